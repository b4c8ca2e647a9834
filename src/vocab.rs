//! Field-type keyword dictionary and the canonical field vocabulary.
//!
//! Two static tables drive resolution:
//!
//! - **`FieldType`** keywords: a fixed, totally ordered dictionary used by the
//!   label extractor (is this line a label?) and by the keyword strategy
//!   (which canonical field does this label name?). The first type in
//!   [`FieldType::PRIORITY`] with a contained keyword wins.
//! - **`CanonicalField`** synonyms: the target vocabulary the semantic
//!   strategy embeds once and compares labels against.
//!
//! Both are process-wide and read-only after construction.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::config::ConfigError;

// ── FieldType ───────────────────────────────────────────────────────────

/// Coarse type tag of a form label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Emissions,
    Energy,
    Email,
    Phone,
    PostalCode,
    City,
    Date,
    Address,
    Name,
    Amount,
}

impl FieldType {
    /// Keyword match order. Earlier entries win when a label contains
    /// keywords of several types ("Energy emissions" is `Emissions`,
    /// "Email address" is `Email`).
    pub const PRIORITY: [FieldType; 10] = [
        FieldType::Emissions,
        FieldType::Energy,
        FieldType::Email,
        FieldType::Phone,
        FieldType::PostalCode,
        FieldType::City,
        FieldType::Date,
        FieldType::Address,
        FieldType::Name,
        FieldType::Amount,
    ];

    /// Lower-case keywords matched by substring containment.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Emissions => &["emission", "co2", "carbon", "tco2e", "greenhouse"],
            Self::Energy => &["kwh", "kilowatt", "energy", "consumption", "electricity"],
            Self::Email => &["email", "e-mail", "mail"],
            Self::Phone => &["phone", "telephone", "tel", "mobile"],
            Self::PostalCode => &["postal", "zip", "postcode", "plz"],
            Self::City => &["city", "town", "location"],
            Self::Date => &["date", "dob", "birth"],
            Self::Address => &["address", "street"],
            Self::Name => &["name", "company", "organization", "organisation", "firm"],
            Self::Amount => &["amount", "total", "sum", "value", "price"],
        }
    }

    /// Identifier of the canonical field this type resolves to.
    pub fn canonical_id(self) -> &'static str {
        match self {
            Self::Emissions => "tco2e",
            Self::Energy => "kwh",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::PostalCode => "postal_code",
            Self::City => "city",
            Self::Date => "date",
            Self::Address => "address",
            Self::Name => "name",
            Self::Amount => "amount",
        }
    }

    /// Classify a label by the first matching type in priority order.
    pub fn classify(label: &str) -> Option<FieldType> {
        let folded = fold(label);
        Self::PRIORITY
            .into_iter()
            .find(|ty| ty.keywords().iter().any(|kw| folded.contains(kw)))
    }

    /// Whether any keyword of any type occurs in the label.
    pub fn any_keyword(label: &str) -> bool {
        Self::classify(label).is_some()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emissions => write!(f, "emissions"),
            Self::Energy => write!(f, "energy"),
            Self::Email => write!(f, "email"),
            Self::Phone => write!(f, "phone"),
            Self::PostalCode => write!(f, "postal_code"),
            Self::City => write!(f, "city"),
            Self::Date => write!(f, "date"),
            Self::Address => write!(f, "address"),
            Self::Name => write!(f, "name"),
            Self::Amount => write!(f, "amount"),
        }
    }
}

/// Case-fold for keyword containment: NFKC, then lower case.
pub fn fold(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

// ── CanonicalField ──────────────────────────────────────────────────────

/// A named target concept of the regulatory vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalField {
    /// Context key this field resolves to.
    pub id: String,
    /// Ordered, duplicate-free surface forms.
    pub synonyms: Vec<String>,
}

impl CanonicalField {
    pub fn new(id: impl Into<String>, synonyms: &[&str]) -> Self {
        let mut field = Self {
            id: id.into(),
            synonyms: Vec::with_capacity(synonyms.len()),
        };
        for s in synonyms {
            field.push_synonym(s);
        }
        field
    }

    fn push_synonym(&mut self, synonym: &str) {
        let s = synonym.trim();
        if !s.is_empty() && !self.synonyms.iter().any(|x| x == s) {
            self.synonyms.push(s.to_string());
        }
    }
}

#[derive(Debug, Deserialize)]
struct VocabularyToml {
    #[serde(default)]
    fields: Vec<CanonicalField>,
}

/// The process-wide canonical vocabulary.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    fields: Vec<CanonicalField>,
}

impl Vocabulary {
    /// The built-in vocabulary for data-protection, sustainability and
    /// AI-risk filings. Ids match the profile columns and slot names.
    pub fn builtin() -> Self {
        let fields = vec![
            CanonicalField::new(
                "name",
                &["company name", "organization name", "business name", "legal entity", "firm"],
            ),
            CanonicalField::new("address", &["street address", "registered office", "address"]),
            CanonicalField::new("city", &["city", "town", "municipality"]),
            CanonicalField::new("postal_code", &["postal code", "zip code", "postcode"]),
            CanonicalField::new("country", &["country", "country of registration"]),
            CanonicalField::new("email", &["email address", "e-mail", "contact email"]),
            CanonicalField::new("phone", &["phone number", "telephone", "mobile number"]),
            CanonicalField::new("iban", &["iban", "bank account"]),
            CanonicalField::new("business_type", &["business type", "sector", "industry"]),
            CanonicalField::new(
                "employee_count",
                &["number of employees", "headcount", "staff count"],
            ),
            CanonicalField::new("date", &["date", "reporting date", "date of submission"]),
            CanonicalField::new(
                "kwh",
                &["energy consumption", "electricity consumption", "kwh", "kilowatt hours"],
            ),
            CanonicalField::new(
                "tco2e",
                &["emissions", "co2 emissions", "carbon footprint", "greenhouse gas emissions"],
            ),
            CanonicalField::new("scope2_tco2e", &["scope 2 emissions", "indirect emissions"]),
            CanonicalField::new("scope3_tco2e", &["scope 3 emissions", "upstream emissions"]),
            CanonicalField::new("amount", &["amount", "total", "sum"]),
        ];
        Self { fields }
    }

    /// Build from explicit fields. Later duplicates of an id are merged into
    /// the first occurrence.
    pub fn from_fields(fields: impl IntoIterator<Item = CanonicalField>) -> Self {
        let mut out: Vec<CanonicalField> = Vec::new();
        for field in fields {
            match out.iter_mut().find(|f| f.id == field.id) {
                Some(existing) => {
                    for s in &field.synonyms {
                        existing.push_synonym(s);
                    }
                }
                None => out.push(CanonicalField::new(
                    field.id.clone(),
                    &field.synonyms.iter().map(String::as_str).collect::<Vec<_>>(),
                )),
            }
        }
        Self { fields: out }
    }

    /// Parse a `[[fields]]` TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let parsed: VocabularyToml = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "(vocabulary)".into(),
            message: e.to_string(),
        })?;
        if parsed.fields.is_empty() {
            return Err(ConfigError::Invalid {
                key: "fields".into(),
                message: "vocabulary defines no fields".into(),
            });
        }
        Ok(Self::from_fields(parsed.fields))
    }

    pub fn fields(&self) -> &[CanonicalField] {
        &self.fields
    }

    pub fn get(&self, id: &str) -> Option<&CanonicalField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_follows_priority() {
        assert_eq!(FieldType::classify("Email Address"), Some(FieldType::Email));
        assert_eq!(FieldType::classify("Company Address"), Some(FieldType::Address));
        assert_eq!(FieldType::classify("Company Name:"), Some(FieldType::Name));
        assert_eq!(
            FieldType::classify("Energy Consumption (kWh):"),
            Some(FieldType::Energy)
        );
        assert_eq!(FieldType::classify("Energy-related CO2"), Some(FieldType::Emissions));
        assert_eq!(FieldType::classify("Total amount due"), Some(FieldType::Amount));
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(FieldType::classify("POSTAL CODE"), Some(FieldType::PostalCode));
        assert_eq!(FieldType::classify("date of BIRTH"), Some(FieldType::Date));
    }

    #[test]
    fn unrelated_text_has_no_type() {
        assert_eq!(FieldType::classify("random sentence."), None);
        assert_eq!(FieldType::classify("Miscellaneous remarks"), None);
    }

    #[test]
    fn every_type_maps_to_a_builtin_field() {
        let vocab = Vocabulary::builtin();
        for ty in FieldType::PRIORITY {
            assert!(vocab.get(ty.canonical_id()).is_some(), "{ty} has no field");
        }
    }

    #[test]
    fn synonyms_are_deduplicated() {
        let field = CanonicalField::new("x", &["a", "b", "a", "  ", "b "]);
        assert_eq!(field.synonyms, vec!["a", "b"]);
    }

    #[test]
    fn from_toml_merges_duplicate_ids() {
        let vocab = Vocabulary::from_toml(
            r#"
            [[fields]]
            id = "kwh"
            synonyms = ["energy use"]

            [[fields]]
            id = "kwh"
            synonyms = ["power draw", "energy use"]
            "#,
        )
        .unwrap();
        assert_eq!(vocab.len(), 1);
        assert_eq!(vocab.fields()[0].synonyms, vec!["energy use", "power draw"]);
    }

    #[test]
    fn empty_toml_vocabulary_rejected() {
        assert!(Vocabulary::from_toml("").is_err());
    }
}
