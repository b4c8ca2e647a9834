//! Per-request context of known facts.
//!
//! The context is merged from three layers, highest priority first:
//! explicit profile data, conversation slots, and derived values. A key that
//! is already present is never overwritten by a later, lower-priority merge.
//! Keys are case-folded so `kWh` and `kwh` name the same fact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::intent::Slot;

// ── FieldValue ──────────────────────────────────────────────────────────

/// A resolved field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a loosely typed JSON scalar. Nulls, arrays and objects have
    /// no field-value form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

// ── Context ─────────────────────────────────────────────────────────────

/// Which layer supplied a context entry. Ordered by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextOrigin {
    Profile,
    Slot,
    Derived,
}

/// One known fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub value: FieldValue,
    pub origin: ContextOrigin,
}

/// Field-identifier → value map assembled per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    entries: BTreeMap<String, ContextEntry>,
}

/// Normalize a context key for storage and lookup.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context holding only profile data.
    pub fn from_profile<K, V>(profile: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let mut ctx = Self::new();
        ctx.merge_profile(profile);
        ctx
    }

    /// Insert `value` under `key` unless the key is already held by an
    /// entry of equal or higher priority. Returns whether the value was stored.
    pub fn insert(&mut self, key: &str, value: FieldValue, origin: ContextOrigin) -> bool {
        let key = normalize_key(key);
        if key.is_empty() {
            return false;
        }
        match self.entries.get(&key) {
            Some(existing) if existing.origin <= origin => false,
            _ => {
                self.entries.insert(key, ContextEntry { value, origin });
                true
            }
        }
    }

    pub fn merge_profile<K, V>(&mut self, profile: impl IntoIterator<Item = (K, V)>)
    where
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        for (k, v) in profile {
            self.insert(k.as_ref(), v.into(), ContextOrigin::Profile);
        }
    }

    /// Merge a JSON object of profile facts, skipping non-scalar members.
    pub fn merge_profile_json(&mut self, profile: &serde_json::Map<String, serde_json::Value>) {
        for (k, v) in profile {
            match FieldValue::from_json(v) {
                Some(value) => {
                    self.insert(k, value, ContextOrigin::Profile);
                }
                None => tracing::debug!(key = %k, "skipping non-scalar profile value"),
            }
        }
    }

    pub fn merge_slots(&mut self, slots: &[Slot]) {
        for slot in slots {
            self.insert(&slot.name, slot.value.clone(), ContextOrigin::Slot);
        }
    }

    pub fn merge_derived<K, V>(&mut self, derived: impl IntoIterator<Item = (K, V)>)
    where
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        for (k, v) in derived {
            self.insert(k.as_ref(), v.into(), ContextOrigin::Derived);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.get(&normalize_key(key))
    }

    pub fn value(&self, key: &str) -> Option<&FieldValue> {
        self.get(key).map(|e| &e.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize_key(key))
    }

    /// Entries in priority order (profile, slots, derived), then by key.
    pub fn by_priority(&self) -> Vec<(&str, &ContextEntry)> {
        let mut out: Vec<(&str, &ContextEntry)> =
            self.entries.iter().map(|(k, e)| (k.as_str(), e)).collect();
        out.sort_by(|a, b| a.1.origin.cmp(&b.1.origin).then_with(|| a.0.cmp(b.0)));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
