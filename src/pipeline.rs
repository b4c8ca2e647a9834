//! The confidence/fallback orchestrator.
//!
//! A [`Pipeline`] owns the process-wide resources (vocabulary, optional
//! embedding backend, optional hosted classifier, template index) and runs
//! each request through extraction, classification, context assembly,
//! inference and resolution.
//!
//! Missing optional infrastructure never fails a request and never changes
//! the shape of a [`PipelineResponse`]: it only shows up in the `strategy`
//! and per-label `method`/`confidence`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::context::Context;
use crate::derive::Inference;
use crate::embed::{Embedder, OllamaEmbedder};
use crate::error::{FieldwiseResult, InputError};
use crate::extract::{DocumentText, ExtractedLabel, LabelExtractor, TextSource};
use crate::intent::{Classification, HostedClassifier, Intent, OllamaClassifier, Slot, classify_intent};
use crate::ollama::{OllamaClient, OllamaConfig};
use crate::recipe::{Recipe, missing_questions, recipe_for};
use crate::resolve::{MappingResult, Resolution, Resolver, Strategy};
use crate::template::TemplateIndex;
use crate::vocab::Vocabulary;

/// One end-to-end request.
///
/// Labels are gathered from every source given: explicit `labels`, the
/// registered template `form_id`, and `pages` of document text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineRequest {
    pub utterance: Option<String>,
    pub labels: Vec<String>,
    pub form_id: Option<String>,
    pub pages: Vec<String>,
    /// Known facts about the user, highest context priority.
    pub profile: serde_json::Map<String, serde_json::Value>,
}

/// Result of [`Pipeline::process`]. Always the same shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    pub field_values: std::collections::BTreeMap<String, crate::context::FieldValue>,
    pub low_confidence: Vec<String>,
    pub mappings: Vec<MappingResult>,
    /// Strategy resolution ran under; `None` when there was nothing to
    /// resolve.
    pub strategy: Option<Strategy>,
    pub intent: Option<Intent>,
    pub slots: Vec<Slot>,
    pub recipe: Option<&'static Recipe>,
    pub questions: Vec<String>,
}

/// Shared, immutable-after-construction resolution pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    vocab: Arc<Vocabulary>,
    embedder: Option<Arc<dyn Embedder>>,
    hosted: Option<Arc<dyn HostedClassifier>>,
    extractor: LabelExtractor,
    resolver: Resolver,
    inference: Inference,
    templates: TemplateIndex,
}

impl Pipeline {
    /// Deterministic pipeline: built-in vocabulary, keyword strategy,
    /// pattern classifier.
    pub fn new(config: PipelineConfig) -> Self {
        let vocab = Arc::new(Vocabulary::builtin());
        Self {
            extractor: LabelExtractor::new(config.extract.max_labels),
            resolver: Resolver::new(Arc::clone(&vocab), config.resolver.clone()),
            inference: Inference::new(&config.emissions),
            vocab,
            embedder: None,
            hosted: None,
            templates: TemplateIndex::new(),
            config,
        }
    }

    /// Build from configuration, probing Ollama when it is enabled.
    ///
    /// An unreachable server leaves both backends unset.
    pub fn from_config(config: PipelineConfig) -> Self {
        let ollama = config.ollama.enabled.then(|| {
            let mut client = OllamaClient::new(OllamaConfig::from(&config.ollama));
            client.probe();
            client
        });

        let mut pipeline = Self::new(config);
        match ollama {
            Some(client) if client.is_available() => {
                tracing::info!(base_url = %client.config().base_url, "ollama backends enabled");
                pipeline = pipeline
                    .with_embedder(Arc::new(OllamaEmbedder::new(client.clone())))
                    .with_hosted(Arc::new(OllamaClassifier::new(client)));
            }
            Some(client) => {
                tracing::warn!(base_url = %client.config().base_url, "ollama unreachable, using deterministic fallbacks");
            }
            None => {}
        }
        pipeline
    }

    pub fn with_vocabulary(mut self, vocab: Arc<Vocabulary>) -> Self {
        self.vocab = vocab;
        self.rebuild_resolver();
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self.rebuild_resolver();
        self
    }

    /// Force the keyword strategy.
    pub fn without_embedder(mut self) -> Self {
        self.embedder = None;
        self.rebuild_resolver();
        self
    }

    pub fn with_hosted(mut self, hosted: Arc<dyn HostedClassifier>) -> Self {
        self.hosted = Some(hosted);
        self
    }

    fn rebuild_resolver(&mut self) {
        let resolver = Resolver::new(Arc::clone(&self.vocab), self.config.resolver.clone());
        self.resolver = match &self.embedder {
            Some(e) => resolver.with_embedder(Arc::clone(e)),
            None => resolver,
        };
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateIndex {
        &self.templates
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    // ── Entry points ────────────────────────────────────────────────────

    pub fn extract_labels(&self, doc: &DocumentText) -> Vec<ExtractedLabel> {
        self.extractor.extract(doc)
    }

    pub fn extract_from(&self, source: &dyn TextSource) -> Vec<ExtractedLabel> {
        self.extractor.extract_from(source)
    }

    pub fn classify_intent(&self, utterance: &str) -> Classification {
        classify_intent(utterance, self.hosted.as_deref())
    }

    /// Add derived values as the lowest-priority layer.
    pub fn with_derived(&self, ctx: &Context) -> Context {
        let mut ctx = ctx.clone();
        let derived = self.inference.derive(&ctx);
        ctx.merge_derived(derived);
        ctx
    }

    /// Resolve labels against a context extended by derived values.
    pub fn resolve_fields<L: AsRef<str>>(
        &self,
        labels: &[L],
        ctx: &Context,
    ) -> Result<Resolution, InputError> {
        self.resolver.resolve(labels, &self.with_derived(ctx))
    }

    /// Run a full request.
    pub fn process(&self, request: &PipelineRequest) -> FieldwiseResult<PipelineResponse> {
        let classification = request
            .utterance
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| self.classify_intent(u));

        let mut ctx = Context::new();
        ctx.merge_profile_json(&request.profile);
        if let Some(c) = &classification {
            ctx.merge_slots(&c.slots);
        }

        let labels = self.gather_labels(request)?;
        let resolution = if labels.is_empty() {
            tracing::warn!("no labels in request, nothing to resolve");
            None
        } else {
            Some(self.resolve_fields(&labels, &ctx)?)
        };

        let (intent, slots, recipe, questions) = match classification {
            Some(c) => {
                let questions = missing_questions(c.intent.intent_type, &c.slots);
                (
                    Some(c.intent),
                    c.slots,
                    Some(recipe_for(c.intent.intent_type)),
                    questions,
                )
            }
            None => (None, Vec::new(), None, Vec::new()),
        };

        let (field_values, low_confidence, mappings, strategy) = match resolution {
            Some(r) => (r.field_values, r.low_confidence, r.mappings, Some(r.strategy)),
            None => Default::default(),
        };

        Ok(PipelineResponse {
            field_values,
            low_confidence,
            mappings,
            strategy,
            intent,
            slots,
            recipe,
            questions,
        })
    }

    fn gather_labels(&self, request: &PipelineRequest) -> Result<Vec<String>, InputError> {
        let mut labels: Vec<String> = request.labels.clone();
        if let Some(form_id) = &request.form_id {
            let template = self.templates.get(form_id)?;
            labels.extend(template.labels.iter().map(|l| l.text.clone()));
        }
        if !request.pages.is_empty() {
            let doc = DocumentText::from_pages(&request.pages);
            labels.extend(self.extract_labels(&doc).into_iter().map(|l| l.text));
        }
        Ok(labels)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("resolver", &self.resolver)
            .field("hosted", &self.hosted.as_ref().map(|h| h.name().to_string()))
            .field("templates", &self.templates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FieldValue;
    use crate::intent::{HostedOutcome, IntentType};
    use crate::resolve::Method;
    use crate::template::FormTemplate;

    struct Offline;

    impl HostedClassifier for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        fn classify(&self, _utterance: &str) -> HostedOutcome {
            HostedOutcome::Unavailable("connection refused".into())
        }
    }

    fn energy_request() -> PipelineRequest {
        PipelineRequest {
            utterance: Some("We consumed 3000 kWh last month in Flensburg".into()),
            labels: vec![
                "Energy Consumption (kWh):".into(),
                "City:".into(),
                "Total emissions (tCO2e):".into(),
                "Miscellaneous remarks".into(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn end_to_end_energy_audit() {
        let response = Pipeline::default().process(&energy_request()).unwrap();
        assert_eq!(response.intent.unwrap().intent_type, IntentType::EnergyAudit);
        assert_eq!(response.field_values["Energy Consumption (kWh):"], FieldValue::Number(3000.0));
        assert_eq!(response.field_values["City:"], FieldValue::from("Flensburg"));
        assert_eq!(response.field_values["Total emissions (tCO2e):"], FieldValue::Number(1.26));
        assert!(!response.field_values.contains_key("Miscellaneous remarks"));
        assert!(response.questions.is_empty());
        assert_eq!(response.recipe.unwrap().id, "csrd_energy_audit");
        assert_eq!(response.strategy, Some(Strategy::Keyword));
    }

    #[test]
    fn emissions_label_is_inferred() {
        let response = Pipeline::default().process(&energy_request()).unwrap();
        let m = response
            .mappings
            .iter()
            .find(|m| m.label == "Total emissions (tCO2e):")
            .unwrap();
        assert_eq!(m.method, Method::Inferred);
    }

    #[test]
    fn profile_beats_slots() {
        let mut request = energy_request();
        request.profile.insert("city".into(), serde_json::json!("Kiel"));
        let response = Pipeline::default().process(&request).unwrap();
        assert_eq!(response.field_values["City:"], FieldValue::from("Kiel"));
    }

    #[test]
    fn unavailable_hosted_matches_pattern_result() {
        let offline = Pipeline::default().with_hosted(Arc::new(Offline));
        let plain = Pipeline::default();
        let utterance = "We consumed 3000 kWh last month in Flensburg";
        assert_eq!(
            offline.classify_intent(utterance).slots,
            plain.classify_intent(utterance).slots
        );
    }

    #[test]
    fn missing_slots_become_questions() {
        let request = PipelineRequest {
            utterance: Some("I need my CSRD energy audit".into()),
            ..Default::default()
        };
        let response = Pipeline::default().process(&request).unwrap();
        assert_eq!(response.questions.len(), 2);
        assert!(response.field_values.is_empty());
        assert_eq!(response.strategy, None);
    }

    #[test]
    fn template_labels_are_used() {
        let pipeline = Pipeline::default();
        pipeline
            .templates()
            .register(FormTemplate {
                form_id: "vsme_snapshot".into(),
                name: "VSME Snapshot".into(),
                labels: vec!["Energy Consumption (kWh):".into()],
            })
            .unwrap();
        let request = PipelineRequest {
            form_id: Some("vsme_snapshot".into()),
            profile: serde_json::json!({"kWh": 1200}).as_object().cloned().unwrap_or_default(),
            ..Default::default()
        };
        let response = pipeline.process(&request).unwrap();
        assert_eq!(response.field_values["Energy Consumption (kWh):"], FieldValue::Number(1200.0));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let request = PipelineRequest {
            form_id: Some("nope".into()),
            ..Default::default()
        };
        assert!(Pipeline::default().process(&request).is_err());
    }

    #[test]
    fn pages_are_extracted() {
        let request = PipelineRequest {
            pages: vec!["Company Name:\nrandom sentence.\nEmail Address".into()],
            profile: serde_json::json!({"name": "Bäckerei Nord", "email": "info@example.org"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            ..Default::default()
        };
        let response = Pipeline::default().process(&request).unwrap();
        assert_eq!(response.field_values.len(), 2);
        assert!(response.intent.is_none());
    }

    #[test]
    fn disabled_ollama_leaves_deterministic_pipeline() {
        let pipeline = Pipeline::from_config(PipelineConfig::default());
        assert_eq!(pipeline.resolver().preferred_strategy(), Strategy::Keyword);
    }
}
