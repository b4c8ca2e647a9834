//! Intent & slot classification of free-text utterances.
//!
//! The deterministic path counts intent keywords in the lower-cased text and
//! picks the intent with the most hits (earlier table entries win ties).
//! Slots are extracted independently by pattern:
//!
//! - `kWh`: a number directly followed by an energy unit
//! - `city`: a capitalized token after a location cue ("in", "from", ...)
//! - `country`: a country name from the grid-factor table
//!
//! An optional [`HostedClassifier`] is consulted first. Its answer replaces
//! the pattern result only when it is well formed; anything else falls back
//! silently.

pub mod hosted;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::FieldValue;
use crate::derive::{country_aliases, country_code, grid_codes};

pub use hosted::{HostedClassifier, HostedIntent, HostedOutcome, OllamaClassifier, parse_hosted_response};

// ── Types ───────────────────────────────────────────────────────────────

/// Filing workflow a user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentType {
    EnergyAudit,
    DataProcessingRecord,
    AiRiskAssessment,
    General,
}

impl IntentType {
    /// Parse an intent name, accepting the legacy workflow names hosted
    /// models tend to answer with.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "energyaudit" | "energy_audit" | "energyauditforcsrd" => Some(Self::EnergyAudit),
            "dataprocessingrecord" | "data_processing_record" | "gdprart30" => {
                Some(Self::DataProcessingRecord)
            }
            "airiskassessment" | "ai_risk_assessment" | "euaiactrisk" => {
                Some(Self::AiRiskAssessment)
            }
            "general" | "generalcompliance" => Some(Self::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnergyAudit => write!(f, "energyAudit"),
            Self::DataProcessingRecord => write!(f, "dataProcessingRecord"),
            Self::AiRiskAssessment => write!(f, "aiRiskAssessment"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Detected intent of one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// In [0, 1].
    pub confidence: f32,
}

/// Typed value extracted from an utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub value: FieldValue,
}

impl Slot {
    pub fn new(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Which classifier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Pattern,
    Hosted,
}

/// Intent plus slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub slots: Vec<Slot>,
    pub classifier: ClassifierKind,
}

impl Classification {
    pub fn slot(&self, name: &str) -> Option<&FieldValue> {
        self.slots
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| &s.value)
    }
}

// ── Pattern tables ──────────────────────────────────────────────────────

/// Intent keyword table; order breaks ties.
const INTENT_KEYWORDS: &[(IntentType, &[&str])] = &[
    (
        IntentType::EnergyAudit,
        &[
            "energy", "kwh", "kilowatt", "consumed", "consumption", "electricity", "audit",
            "csrd", "emission", "carbon", "co2",
        ],
    ),
    (
        IntentType::DataProcessingRecord,
        &[
            "gdpr", "article 30", "art. 30", "data protection", "record of processing",
            "data processing", "personal data", "privacy",
        ],
    ),
    (
        IntentType::AiRiskAssessment,
        &[
            "ai act", "ai risk", "artificial intelligence", "high-risk ai", "ai system",
            "machine learning",
        ],
    ),
];

/// Confidence ceiling of the pattern classifier.
const MAX_PATTERN_CONFIDENCE: f32 = 0.95;

/// Confidence when no intent keyword matches.
const BASELINE_CONFIDENCE: f32 = 0.5;

/// A comma followed by exact thousands groups is a separator ("12,500");
/// any other comma is a decimal comma ("1250,5").
static RE_KWH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?P<grouped>\d{1,3}(?:,\d{3})+(?:\.\d+)?)|(?P<plain>\d+(?:[.,]\d+)?))\s*(?:kwh|kilowatt)",
    )
    .unwrap()
});

static RE_CITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:in|from|at|near|location)\b:?\s+(\p{Lu}[\p{L}'\-]+)").unwrap()
});

/// Country names match in any case; short codes only in upper case.
static RE_COUNTRY: LazyLock<Regex> = LazyLock::new(|| {
    let (names, short): (Vec<_>, Vec<_>) =
        country_aliases().partition(|(alias, _)| alias.chars().count() > 3);
    let names: Vec<String> = names.into_iter().map(|(alias, _)| regex::escape(alias)).collect();
    let codes: Vec<String> = grid_codes()
        .map(str::to_string)
        .chain(short.into_iter().map(|(alias, _)| alias.to_uppercase()))
        .map(|code| regex::escape(&code))
        .collect();
    Regex::new(&format!(
        r"\b((?i:{})|{})\b",
        names.join("|"),
        codes.join("|")
    ))
    .unwrap()
});

// ── PatternClassifier ───────────────────────────────────────────────────

/// Deterministic keyword + regex classifier. Always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn classify(&self, utterance: &str) -> Classification {
        Classification {
            intent: self.intent(utterance),
            slots: self.slots(utterance),
            classifier: ClassifierKind::Pattern,
        }
    }

    /// Highest keyword count wins; ties go to the earlier table entry.
    pub fn intent(&self, utterance: &str) -> Intent {
        let lower = utterance.to_lowercase();
        let mut best: Option<(IntentType, usize)> = None;
        for (intent_type, keywords) in INTENT_KEYWORDS {
            let count = keywords.iter().filter(|kw| lower.contains(*kw)).count();
            if count > 0 && best.is_none_or(|(_, c)| count > c) {
                best = Some((*intent_type, count));
            }
        }

        match best {
            Some((intent_type, count)) => Intent {
                intent_type,
                confidence: pattern_confidence(count),
            },
            None => Intent {
                intent_type: IntentType::General,
                confidence: BASELINE_CONFIDENCE,
            },
        }
    }

    /// Best-effort slot extraction; missing slots are simply absent.
    pub fn slots(&self, utterance: &str) -> Vec<Slot> {
        let mut slots = Vec::new();

        if let Some(kwh) = RE_KWH.captures(utterance).and_then(|c| {
            let number = match (c.name("grouped"), c.name("plain")) {
                (Some(grouped), _) => grouped.as_str().replace(',', ""),
                (None, Some(plain)) => plain.as_str().replace(',', "."),
                (None, None) => return None,
            };
            number.parse::<f64>().ok()
        }) {
            slots.push(Slot::new("kWh", kwh));
        }

        let city = RE_CITY
            .captures_iter(utterance)
            .map(|c| c[1].to_string())
            .find(|token| country_code(token).is_none());
        if let Some(city) = city {
            slots.push(Slot::new("city", city));
        }

        if let Some(code) = RE_COUNTRY
            .captures(utterance)
            .and_then(|c| country_code(&c[1]))
        {
            slots.push(Slot::new("country", code));
        }

        slots
    }
}

/// `min(0.95, 0.5 + 0.1 × matches)`, computed in tenths so two matches give
/// exactly 0.7.
fn pattern_confidence(matches: usize) -> f32 {
    let tenths = 5 + matches.min(10) as u32;
    (tenths as f32 / 10.0).min(MAX_PATTERN_CONFIDENCE)
}

// ── IntentClassifier ────────────────────────────────────────────────────

/// Classify with the hosted backend when it gives a usable answer, else by
/// pattern.
pub fn classify_intent(utterance: &str, hosted: Option<&dyn HostedClassifier>) -> Classification {
    let Some(backend) = hosted else {
        return PatternClassifier.classify(utterance);
    };

    match backend.classify(utterance) {
        HostedOutcome::Ok(h) => {
            tracing::debug!(backend = backend.name(), intent = %h.intent_type, "hosted classification accepted");
            Classification {
                intent: Intent {
                    intent_type: h.intent_type,
                    confidence: h.confidence,
                },
                slots: h.slots,
                classifier: ClassifierKind::Hosted,
            }
        }
        HostedOutcome::Malformed(reason) => {
            tracing::warn!(backend = backend.name(), "malformed hosted classification, using patterns: {reason}");
            PatternClassifier.classify(utterance)
        }
        HostedOutcome::Unavailable(reason) => {
            tracing::warn!(backend = backend.name(), "hosted classifier unavailable, using patterns: {reason}");
            PatternClassifier.classify(utterance)
        }
    }
}
