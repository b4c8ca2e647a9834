//! Workflow recipes: what a detected intent needs done, and which slots are
//! still missing before the forms can be filled.

use serde::Serialize;

use crate::intent::{IntentType, Slot};

/// Static description of a filing workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: &'static str,
    pub name: &'static str,
    pub forms: &'static [&'static str],
    pub steps: &'static [&'static str],
    pub regulations: &'static [&'static str],
    pub estimated_time: &'static str,
}

const CSRD_ENERGY_AUDIT: Recipe = Recipe {
    id: "csrd_energy_audit",
    name: "CSRD Energy Audit & VSME Snapshot",
    forms: &["vsme_snapshot", "disclosure_letter"],
    steps: &[
        "collect_energy_data",
        "calculate_emissions",
        "fill_vsme_form",
        "generate_compliance_pack",
    ],
    regulations: &["CSRD", "VSME", "ESRS_E1"],
    estimated_time: "15-20 minutes",
};

const GDPR_ART30_EXPORT: Recipe = Recipe {
    id: "gdpr_art30_export",
    name: "GDPR Article 30 Record Export",
    forms: &["gdpr_art30"],
    steps: &[
        "collect_processing_details",
        "map_legal_bases",
        "fill_art30_form",
        "generate_compliance_pack",
    ],
    regulations: &["GDPR", "Art30"],
    estimated_time: "10-15 minutes",
};

const EU_AI_ACT_RISK: Recipe = Recipe {
    id: "eu_ai_act_risk",
    name: "EU AI Act Risk Assessment",
    forms: &["eu_ai_act_risk"],
    steps: &[
        "collect_system_details",
        "classify_risk_category",
        "check_prohibited_practices",
        "fill_risk_form",
        "generate_system_card",
    ],
    regulations: &["EU_AI_Act", "Annex_III"],
    estimated_time: "20-25 minutes",
};

const GENERAL_COMPLIANCE: Recipe = Recipe {
    id: "general_compliance",
    name: "General Compliance Question",
    forms: &[],
    steps: &["clarify_request"],
    regulations: &[],
    estimated_time: "5-10 minutes",
};

/// Recipe for an intent.
pub fn recipe_for(intent: IntentType) -> &'static Recipe {
    match intent {
        IntentType::EnergyAudit => &CSRD_ENERGY_AUDIT,
        IntentType::DataProcessingRecord => &GDPR_ART30_EXPORT,
        IntentType::AiRiskAssessment => &EU_AI_ACT_RISK,
        IntentType::General => &GENERAL_COMPLIANCE,
    }
}

/// Required slots per intent with the question that asks for each.
fn required_slots(intent: IntentType) -> &'static [(&'static str, &'static str)] {
    match intent {
        IntentType::EnergyAudit => &[
            ("kWh", "What is your total energy consumption (kWh) for the last month?"),
            ("city", "What city are you located in?"),
        ],
        _ => &[],
    }
}

/// Follow-up questions for required slots absent from `slots`.
pub fn missing_questions(intent: IntentType, slots: &[Slot]) -> Vec<String> {
    required_slots(intent)
        .iter()
        .filter(|(name, _)| !slots.iter().any(|s| s.name.eq_ignore_ascii_case(name)))
        .map(|(_, question)| question.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_intent_has_a_recipe() {
        assert_eq!(recipe_for(IntentType::EnergyAudit).id, "csrd_energy_audit");
        assert_eq!(recipe_for(IntentType::DataProcessingRecord).id, "gdpr_art30_export");
        assert_eq!(recipe_for(IntentType::AiRiskAssessment).id, "eu_ai_act_risk");
        assert!(recipe_for(IntentType::General).forms.is_empty());
    }

    #[test]
    fn energy_audit_asks_for_missing_slots() {
        let questions = missing_questions(IntentType::EnergyAudit, &[Slot::new("city", "Kiel")]);
        assert_eq!(questions.len(), 1);
        assert!(questions[0].contains("kWh"));
    }

    #[test]
    fn complete_slots_ask_nothing() {
        let slots = [Slot::new("kwh", 100.0), Slot::new("City", "Kiel")];
        assert!(missing_questions(IntentType::EnergyAudit, &slots).is_empty());
        assert!(missing_questions(IntentType::DataProcessingRecord, &[]).is_empty());
    }
}
