//! Form-template index: labels of known forms, keyed by form id.
//!
//! Registration is an administrative operation; lookups come from
//! concurrent resolution requests. Both go through a `DashMap`, so a
//! registration only locks the shard it writes to and readers of other
//! templates proceed. Templates are stored behind `Arc` and replaced whole,
//! never mutated in place.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::extract::{DocumentText, ExtractedLabel, LabelExtractor};

/// A registered form and its extracted labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormTemplate {
    pub form_id: String,
    pub name: String,
    pub labels: Vec<ExtractedLabel>,
}

/// Concurrent registry of form templates.
#[derive(Debug, Default)]
pub struct TemplateIndex {
    templates: DashMap<String, Arc<FormTemplate>>,
}

impl TemplateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a template. Returns `true` when an existing
    /// template with the same id was replaced.
    pub fn register(&self, template: FormTemplate) -> Result<bool, InputError> {
        if template.labels.is_empty() {
            return Err(InputError::EmptyLabels);
        }
        let form_id = template.form_id.trim().to_string();
        let labels = template.labels.len();
        let replaced = self
            .templates
            .insert(form_id.clone(), Arc::new(FormTemplate { form_id: form_id.clone(), ..template }))
            .is_some();
        tracing::info!(form_id = %form_id, labels, replaced, "registered form template");
        Ok(replaced)
    }

    /// Extract labels from a document and register them as a template.
    pub fn ingest(
        &self,
        form_id: &str,
        name: &str,
        doc: &DocumentText,
        extractor: &LabelExtractor,
    ) -> Result<Arc<FormTemplate>, InputError> {
        let labels = extractor.extract(doc);
        if labels.is_empty() {
            tracing::warn!(form_id, "no labels extracted, template not registered");
        }
        self.register(FormTemplate {
            form_id: form_id.to_string(),
            name: name.to_string(),
            labels,
        })?;
        self.get(form_id)
    }

    /// Look up a template.
    pub fn get(&self, form_id: &str) -> Result<Arc<FormTemplate>, InputError> {
        self.templates
            .get(form_id.trim())
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| InputError::UnknownTemplate {
                form_id: form_id.to_string(),
            })
    }

    pub fn remove(&self, form_id: &str) -> Option<Arc<FormTemplate>> {
        self.templates.remove(form_id.trim()).map(|(_, t)| t)
    }

    /// Registered form ids, sorted.
    pub fn form_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art30() -> FormTemplate {
        FormTemplate {
            form_id: "gdpr_art30".into(),
            name: "GDPR Article 30 Record".into(),
            labels: vec!["Company Name:".into(), "Email Address".into()],
        }
    }

    #[test]
    fn register_and_get() {
        let index = TemplateIndex::new();
        assert!(!index.register(art30()).unwrap());
        let t = index.get("gdpr_art30").unwrap();
        assert_eq!(t.labels.len(), 2);
        assert_eq!(index.form_ids(), vec!["gdpr_art30".to_string()]);
    }

    #[test]
    fn reregister_replaces() {
        let index = TemplateIndex::new();
        index.register(art30()).unwrap();
        let mut updated = art30();
        updated.labels.push("Phone:".into());
        assert!(index.register(updated).unwrap());
        assert_eq!(index.get("gdpr_art30").unwrap().labels.len(), 3);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn held_template_survives_replacement() {
        let index = TemplateIndex::new();
        index.register(art30()).unwrap();
        let held = index.get("gdpr_art30").unwrap();
        let mut updated = art30();
        updated.labels.truncate(1);
        index.register(updated).unwrap();
        assert_eq!(held.labels.len(), 2);
    }

    #[test]
    fn unknown_template_is_input_error() {
        assert!(matches!(
            TemplateIndex::new().get("nope"),
            Err(InputError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn empty_template_rejected() {
        let index = TemplateIndex::new();
        let doc = DocumentText::from_pages(&["just prose."]);
        assert!(index.ingest("x", "X", &doc, &LabelExtractor::default()).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn ingest_extracts_labels() {
        let index = TemplateIndex::new();
        let doc = DocumentText::from_pages(&["Company Name:\nintro text\nCity:"]);
        let t = index
            .ingest("vsme_snapshot", "VSME Snapshot", &doc, &LabelExtractor::default())
            .unwrap();
        assert_eq!(t.labels.len(), 2);
        assert!(index.remove("vsme_snapshot").is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn concurrent_registration_and_reads() {
        let index = Arc::new(TemplateIndex::new());
        index.register(art30()).unwrap();
        std::thread::scope(|s| {
            for i in 0..4 {
                let index = Arc::clone(&index);
                s.spawn(move || {
                    let mut t = art30();
                    t.form_id = format!("form_{i}");
                    index.register(t).unwrap();
                    assert!(index.get("gdpr_art30").is_ok());
                });
            }
        });
        assert_eq!(index.len(), 5);
    }
}
