//! End-to-end integration tests for the fieldwise pipeline.
//!
//! These tests drive the three public entry points (label extraction,
//! intent classification, field resolution) with stub backends, covering
//! both resolution strategies and every degraded path.

use std::sync::Arc;

use fieldwise::context::{Context, FieldValue};
use fieldwise::derive::{EmissionsRequest, GridTable, calculate_emissions};
use fieldwise::embed::{Embedder, HashEmbedder};
use fieldwise::error::{BackendError, BackendResult, InputError};
use fieldwise::extract::extract_labels;
use fieldwise::intent::{
    ClassifierKind, HostedClassifier, HostedIntent, HostedOutcome, IntentType, Slot, classify_intent,
};
use fieldwise::pipeline::{Pipeline, PipelineRequest};
use fieldwise::resolve::{Method, Resolver, Strategy};
use fieldwise::config::ResolverConfig;
use fieldwise::vocab::{CanonicalField, Vocabulary};

// ── Stub backends ───────────────────────────────────────────────────────

/// Maps a fixed set of texts to 2-d unit vectors; every other text maps to
/// the second axis.
struct AngleEmbedder {
    table: Vec<(String, f32)>,
}

impl AngleEmbedder {
    /// `label` gets cosine `similarity` with the `kwh` synonym.
    fn with_label(label: &str, similarity: f32) -> Self {
        Self {
            table: vec![
                ("energy consumption".into(), 1.0),
                (label.into(), similarity),
            ],
        }
    }
}

impl Embedder for AngleEmbedder {
    fn name(&self) -> &str {
        "angle"
    }

    fn encode(&self, texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| match self.table.iter().find(|(k, _)| k == t) {
                Some((_, cos)) => vec![*cos, (1.0 - cos * cos).max(0.0).sqrt()],
                None => vec![0.0, -1.0],
            })
            .collect())
    }
}

struct Unavailable;

impl Embedder for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn encode(&self, _texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
        Err(BackendError::Timeout {
            backend: "unavailable".into(),
            timeout_secs: 1,
        })
    }
}

/// Returns the wrong number of vectors.
struct ShortBatch;

impl Embedder for ShortBatch {
    fn name(&self) -> &str {
        "short"
    }

    fn encode(&self, _texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
        Ok(vec![vec![1.0, 0.0]])
    }
}

struct FixedHosted(HostedOutcome);

impl HostedClassifier for FixedHosted {
    fn name(&self) -> &str {
        "fixed"
    }

    fn classify(&self, _utterance: &str) -> HostedOutcome {
        self.0.clone()
    }
}

fn energy_vocab() -> Arc<Vocabulary> {
    Arc::new(Vocabulary::from_fields([CanonicalField::new(
        "kwh",
        &["energy consumption"],
    )]))
}

fn semantic_resolver(embedder: impl Embedder + 'static) -> Resolver {
    Resolver::new(energy_vocab(), ResolverConfig::default()).with_embedder(Arc::new(embedder))
}

fn kwh_context() -> Context {
    Context::from_profile([("kWh", 3000.0)])
}

const FORM_LABELS: &[&str] = &[
    "Company Name:",
    "Email Address",
    "Phone:",
    "City:",
    "Postal code:",
    "Energy Consumption (kWh):",
    "Total emissions (tCO2e):",
    "Miscellaneous remarks",
    "Do you process personal data?",
];

fn rich_context() -> Context {
    let mut ctx = Context::from_profile([
        ("name", FieldValue::from("Bäckerei Nord GmbH")),
        ("email", FieldValue::from("info@baeckerei-nord.de")),
        ("postal_code", FieldValue::from("24937")),
    ]);
    ctx.merge_slots(&[Slot::new("kWh", 3000.0), Slot::new("city", "Flensburg")]);
    ctx.merge_derived([("tco2e", 1.26)]);
    ctx
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[test]
fn extract_rejects_plain_sentence() {
    let labels = extract_labels(&["Company Name:", "random sentence.", "Email Address"]);
    let texts: Vec<&str> = labels.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["Company Name:", "Email Address"]);
}

#[test]
fn classify_energy_utterance_without_backend() {
    let c = classify_intent("We consumed 3000 kWh last month in Flensburg", None);
    assert_eq!(c.intent.intent_type, IntentType::EnergyAudit);
    assert!(c.intent.confidence >= 0.7);
    assert_eq!(c.slot("kWh"), Some(&FieldValue::Number(3000.0)));
    assert_eq!(c.slot("city"), Some(&FieldValue::from("Flensburg")));
    assert_eq!(c.slots.len(), 2);
    assert_eq!(c.classifier, ClassifierKind::Pattern);
}

#[test]
fn emissions_for_germany() {
    let estimate = GridTable::builtin()
        .estimate(&EmissionsRequest::new(3000.0).country("DE"))
        .unwrap();
    assert_eq!(estimate.tco2e, 1.26);
    assert_eq!(estimate.scope2_tco2e, 1.26);
}

#[test]
fn keyword_energy_consumption() {
    let r = fieldwise::resolve::resolve_fields(&["Energy Consumption (kWh):"], &kwh_context()).unwrap();
    assert_eq!(r.field_values["Energy Consumption (kWh):"], FieldValue::Number(3000.0));
    assert_eq!(r.mappings[0].method, Method::Keyword);
}

#[test]
fn unmappable_label_in_neither_set() {
    for resolver in [
        Resolver::new(Arc::new(Vocabulary::builtin()), ResolverConfig::default()),
        Resolver::new(Arc::new(Vocabulary::builtin()), ResolverConfig::default())
            .with_embedder(Arc::new(HashEmbedder::default())),
    ] {
        let r = resolver.resolve(&["Miscellaneous remarks"], &rich_context()).unwrap();
        assert!(!r.field_values.contains_key("Miscellaneous remarks"));
        assert!(!r.low_confidence.contains(&"Miscellaneous remarks".to_string()));
        assert_eq!(r.mappings[0].method, Method::Unresolved);
    }
}

// ── Properties ──────────────────────────────────────────────────────────

#[test]
fn emissions_reapplication_is_idempotent() {
    for kwh in [0.0, 0.4, 1.0, 999.9, 3000.0, 12_345.678, 1e7] {
        for g in [0.0, 0.05, 0.25, 0.42, 0.72, 1.3] {
            let first = calculate_emissions(kwh, g).unwrap();
            let second = calculate_emissions(first.kwh, g).unwrap();
            assert_eq!(first.tco2e, second.tco2e, "kwh={kwh} g={g}");
            assert_eq!(first, calculate_emissions(kwh, g).unwrap());
        }
    }
}

#[test]
fn unavailable_backend_equals_keyword_strategy() {
    let label_sets: [&[&str]; 3] = [
        FORM_LABELS,
        &["Energy Consumption (kWh):"],
        &["Miscellaneous remarks", "Your town?", "E-Mail *"],
    ];
    let keyword = Resolver::new(Arc::new(Vocabulary::builtin()), ResolverConfig::default());
    let degraded = Resolver::new(Arc::new(Vocabulary::builtin()), ResolverConfig::default())
        .with_embedder(Arc::new(Unavailable));

    for labels in label_sets {
        let expected = keyword.resolve(labels, &rich_context()).unwrap();
        let actual = degraded.resolve(labels, &rich_context()).unwrap();
        assert_eq!(actual, expected);
        assert_eq!(actual.strategy, Strategy::Keyword);
        assert!(
            actual
                .mappings
                .iter()
                .all(|m| matches!(m.method, Method::Keyword | Method::Inferred | Method::Unresolved))
        );
    }
}

#[test]
fn malformed_embeddings_fall_back_for_whole_request() {
    let r = semantic_resolver(ShortBatch)
        .resolve(&["Energy Consumption (kWh):", "Verbrauch"], &kwh_context())
        .unwrap();
    assert_eq!(r.strategy, Strategy::Keyword);
    assert_eq!(r.field_values.len(), 1);
}

#[test]
fn confidence_is_monotonic_in_similarity() {
    let label = "Verbrauch";
    let mut previous_rank = 0;
    let mut previous_confidence = 0.0f32;

    for step in 0..=20 {
        let similarity = step as f32 / 20.0;
        let r = semantic_resolver(AngleEmbedder::with_label(label, similarity))
            .resolve(&[label], &kwh_context())
            .unwrap();
        let m = &r.mappings[0];

        // 0 = unresolved, 1 = low confidence, 2 = resolved
        let rank = if !m.is_resolved() {
            0
        } else if r.low_confidence.iter().any(|l| l == label) {
            1
        } else {
            2
        };
        assert!(rank >= previous_rank, "rank dropped at similarity {similarity}");
        assert!(m.confidence >= previous_confidence);
        previous_rank = rank;
        previous_confidence = m.confidence;
    }
    assert_eq!(previous_rank, 2);
}

#[test]
fn low_confidence_band() {
    let cases = [(0.55, false, false), (0.65, true, true), (0.8, true, false)];
    for (similarity, resolved, low) in cases {
        let r = semantic_resolver(AngleEmbedder::with_label("Verbrauch", similarity))
            .resolve(&["Verbrauch"], &kwh_context())
            .unwrap();
        assert_eq!(r.strategy, Strategy::Semantic);
        assert_eq!(r.field_values.contains_key("Verbrauch"), resolved, "sim {similarity}");
        assert_eq!(r.low_confidence.contains(&"Verbrauch".to_string()), low, "sim {similarity}");
        if resolved {
            assert_eq!(r.mappings[0].method, Method::Semantic);
            assert!((r.mappings[0].confidence - similarity).abs() < 1e-4);
        }
    }
}

#[test]
fn configurable_threshold() {
    let config = ResolverConfig {
        similarity_threshold: 0.5,
        low_confidence_ceiling: 0.6,
    };
    let r = Resolver::new(energy_vocab(), config)
        .with_embedder(Arc::new(AngleEmbedder::with_label("Verbrauch", 0.55)))
        .resolve(&["Verbrauch"], &kwh_context())
        .unwrap();
    assert_eq!(r.low_confidence, vec!["Verbrauch".to_string()]);
}

#[test]
fn semantic_and_keyword_results_have_same_shape() {
    let keyword = Pipeline::default();
    let semantic = Pipeline::default().with_embedder(Arc::new(HashEmbedder::default()));
    let request = PipelineRequest {
        utterance: Some("We consumed 3000 kWh last month in Flensburg".into()),
        labels: FORM_LABELS.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };

    let a = serde_json::to_value(keyword.process(&request).unwrap()).unwrap();
    let b = serde_json::to_value(semantic.process(&request).unwrap()).unwrap();
    let keys = |v: &serde_json::Value| {
        v.as_object()
            .map(|o| o.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default()
    };
    assert_eq!(keys(&a), keys(&b));
    assert_eq!(a["strategy"], "keyword");
    assert_eq!(b["strategy"], "semantic");
    assert_eq!(a["mappings"].as_array().map(Vec::len), Some(FORM_LABELS.len()));
    assert_eq!(b["mappings"].as_array().map(Vec::len), Some(FORM_LABELS.len()));
}

// ── Hosted classifier fallback ──────────────────────────────────────────

#[test]
fn hosted_answer_supersedes_patterns() {
    let hosted = FixedHosted(HostedOutcome::Ok(HostedIntent {
        intent_type: IntentType::DataProcessingRecord,
        slots: vec![Slot::new("purpose", "payroll")],
        confidence: 0.88,
    }));
    let c = classify_intent("We consumed 3000 kWh last month in Flensburg", Some(&hosted));
    assert_eq!(c.intent.intent_type, IntentType::DataProcessingRecord);
    assert_eq!(c.classifier, ClassifierKind::Hosted);
    assert_eq!(c.slots, vec![Slot::new("purpose", "payroll")]);
}

#[test]
fn hosted_failures_fall_back_to_patterns() {
    let utterance = "We consumed 3000 kWh last month in Flensburg";
    let expected = classify_intent(utterance, None);
    for outcome in [
        HostedOutcome::Unavailable("connection refused".into()),
        HostedOutcome::Unavailable("timed out after 10s".into()),
        HostedOutcome::Malformed("not JSON".into()),
    ] {
        let hosted = FixedHosted(outcome);
        assert_eq!(classify_intent(utterance, Some(&hosted)), expected);
    }
}

// ── Input errors ────────────────────────────────────────────────────────

#[test]
fn empty_label_list_is_user_error() {
    let empty: [&str; 0] = [];
    let err = Pipeline::default().resolve_fields(&empty, &kwh_context()).unwrap_err();
    assert!(matches!(err, InputError::EmptyLabels));
}

#[test]
fn unreadable_document_is_an_empty_result() {
    let pipeline = Pipeline::default();
    let source = fieldwise::extract::PlainTextSource::new("/nonexistent/form.txt");
    assert!(pipeline.extract_from(&source).is_empty());
}

// ── Concurrency ─────────────────────────────────────────────────────────

#[test]
fn concurrent_requests_share_one_pipeline() {
    let pipeline = Arc::new(Pipeline::default().with_embedder(Arc::new(HashEmbedder::default())));
    let expected = pipeline.resolve_fields(FORM_LABELS, &rich_context()).unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            let pipeline = Arc::clone(&pipeline);
            let expected = expected.clone();
            s.spawn(move || {
                let r = pipeline.resolve_fields(FORM_LABELS, &rich_context()).unwrap();
                assert_eq!(r, expected);
            });
        }
    });
}

#[test]
fn errors_render_as_diagnostics() {
    let err: fieldwise::error::FieldwiseError = InputError::EmptyLabels.into();
    let code = miette::Diagnostic::code(&err).map(|c| c.to_string());
    assert_eq!(code.as_deref(), Some("fieldwise::input::empty_labels"));
}
