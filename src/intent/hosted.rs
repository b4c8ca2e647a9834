//! Hosted (LLM) intent classification.
//!
//! The hosted model is asked for a single JSON object:
//!
//! ```json
//! {"intentType": "energyAudit", "confidence": 0.9, "slots": {"kWh": 3000, "city": "Flensburg"}}
//! ```
//!
//! Anything that does not parse into that shape is [`HostedOutcome::Malformed`]
//! and the caller falls back to the pattern classifier.

use serde_json::Value;

use crate::context::FieldValue;
use crate::ollama::OllamaClient;

use super::{IntentType, Slot};

/// A well-formed hosted classification.
#[derive(Debug, Clone, PartialEq)]
pub struct HostedIntent {
    pub intent_type: IntentType,
    pub slots: Vec<Slot>,
    pub confidence: f32,
}

/// Result of asking a hosted classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum HostedOutcome {
    Ok(HostedIntent),
    /// The backend answered but the answer is unusable.
    Malformed(String),
    /// The backend could not be reached in time.
    Unavailable(String),
}

/// An optional remote intent classifier.
pub trait HostedClassifier: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Classify one utterance. Must not block longer than the backend's
    /// configured timeout.
    fn classify(&self, utterance: &str) -> HostedOutcome;
}

const SYSTEM_PROMPT: &str = "You classify requests from small businesses about regulatory filings. \
Answer with one JSON object and nothing else: \
{\"intentType\": one of \"energyAudit\", \"dataProcessingRecord\", \"aiRiskAssessment\", \"general\", \
\"confidence\": number between 0 and 1, \
\"slots\": object with optional keys \"kWh\" (number), \"city\" (string), \"country\" (string)}.";

/// Parse a raw model answer into a [`HostedOutcome`].
///
/// Tolerates prose around the JSON object; everything else must be exact.
pub fn parse_hosted_response(raw: &str) -> HostedOutcome {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return HostedOutcome::Malformed("no JSON object in response".into());
    };
    if end < start {
        return HostedOutcome::Malformed("no JSON object in response".into());
    }

    let json: Value = match serde_json::from_str(&raw[start..=end]) {
        Ok(v) => v,
        Err(e) => return HostedOutcome::Malformed(format!("invalid JSON: {e}")),
    };

    let Some(intent_name) = json["intentType"].as_str().or_else(|| json["intent"].as_str())
    else {
        return HostedOutcome::Malformed("missing 'intentType'".into());
    };
    let Some(intent_type) = IntentType::from_name(intent_name) else {
        return HostedOutcome::Malformed(format!("unknown intent '{intent_name}'"));
    };

    let confidence = match json["confidence"].as_f64() {
        Some(c) if (0.0..=1.0).contains(&c) => c as f32,
        Some(c) => return HostedOutcome::Malformed(format!("confidence {c} outside [0, 1]")),
        None => return HostedOutcome::Malformed("missing 'confidence'".into()),
    };

    let slots = match &json["slots"] {
        Value::Null => Vec::new(),
        Value::Object(map) => match parse_slots(map) {
            Ok(slots) => slots,
            Err(reason) => return HostedOutcome::Malformed(reason),
        },
        _ => return HostedOutcome::Malformed("'slots' is not an object".into()),
    };

    HostedOutcome::Ok(HostedIntent {
        intent_type,
        slots,
        confidence,
    })
}

fn parse_slots(map: &serde_json::Map<String, Value>) -> Result<Vec<Slot>, String> {
    let mut slots = Vec::with_capacity(map.len());
    for (name, raw) in map {
        if raw.is_null() {
            continue;
        }
        let value = FieldValue::from_json(raw)
            .ok_or_else(|| format!("slot '{name}' is not a scalar"))?;
        if name.eq_ignore_ascii_case("kwh") && value.as_f64().is_none() {
            return Err(format!("slot '{name}' is not numeric"));
        }
        slots.push(Slot {
            name: name.clone(),
            value,
        });
    }
    Ok(slots)
}

// ── Ollama ──────────────────────────────────────────────────────────────

/// Hosted classifier backed by a local Ollama server.
#[derive(Debug)]
pub struct OllamaClassifier {
    client: OllamaClient,
}

impl OllamaClassifier {
    /// Wrap a client. Probe it first; an unprobed client always reports
    /// unavailable.
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }
}

impl HostedClassifier for OllamaClassifier {
    fn name(&self) -> &str {
        "ollama"
    }

    fn classify(&self, utterance: &str) -> HostedOutcome {
        match self.client.generate(utterance, Some(SYSTEM_PROMPT)) {
            Ok(raw) => parse_hosted_response(&raw),
            Err(e) => HostedOutcome::Unavailable(e.to_string()),
        }
    }
}
