//! Canonical field resolution: label → value from the request context.
//!
//! Two strategies share one output shape:
//!
//! - **Semantic**: labels and every synonym of every [`CanonicalField`] are
//!   embedded; a field scores the best cosine over its synonyms and the best
//!   field resolves when it clears the similarity threshold.
//! - **Keyword**: a direct containment match between the label and a
//!   context key wins; otherwise the first [`FieldType`] keyword hit names the
//!   canonical id to look up. Confidence is 1.0.
//!
//! The strategy is chosen once per request. Any embedding failure switches
//! the whole request to the keyword strategy before a single label is
//! resolved, so results never mix strategies.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ResolverConfig;
use crate::context::{Context, ContextEntry, ContextOrigin, FieldValue};
use crate::embed::{Embedder, cosine, encode_checked};
use crate::error::{BackendResult, InputError};
use crate::vocab::{FieldType, Vocabulary, fold};

// ── Results ─────────────────────────────────────────────────────────────

/// How a label got (or failed to get) its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Semantic,
    Keyword,
    /// Found by either strategy, but the value was derived rather than
    /// supplied.
    Inferred,
    Unresolved,
}

/// Resolution of a single label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    pub label: String,
    /// Context key the value was read from.
    pub field: Option<String>,
    pub value: Option<FieldValue>,
    pub method: Method,
    pub confidence: f32,
}

impl MappingResult {
    fn unresolved(label: &str) -> Self {
        Self {
            label: label.to_string(),
            field: None,
            value: None,
            method: Method::Unresolved,
            confidence: 0.0,
        }
    }

    fn found(label: &str, key: &str, entry: &ContextEntry, method: Method, confidence: f32) -> Self {
        let method = if entry.origin == ContextOrigin::Derived {
            Method::Inferred
        } else {
            method
        };
        Self {
            label: label.to_string(),
            field: Some(key.to_string()),
            value: Some(entry.value.clone()),
            method,
            confidence,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }
}

/// Which strategy a request ran under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Semantic,
    Keyword,
}

/// Output of one resolution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Label text → value, resolved labels only.
    pub field_values: BTreeMap<String, FieldValue>,
    /// Resolved semantic matches below the low-confidence ceiling, in label
    /// order.
    pub low_confidence: Vec<String>,
    /// One entry per distinct input label, in input order.
    pub mappings: Vec<MappingResult>,
    pub strategy: Strategy,
}

impl Resolution {
    fn assemble(mappings: Vec<MappingResult>, strategy: Strategy, ceiling: f32) -> Self {
        let field_values = mappings
            .iter()
            .filter_map(|m| m.value.clone().map(|v| (m.label.clone(), v)))
            .collect();
        let low_confidence = mappings
            .iter()
            .filter(|m| m.is_resolved() && is_semantic_hit(m) && m.confidence < ceiling)
            .map(|m| m.label.clone())
            .collect();
        Self {
            field_values,
            low_confidence,
            mappings,
            strategy,
        }
    }

    pub fn mapping(&self, label: &str) -> Option<&MappingResult> {
        self.mappings.iter().find(|m| m.label == label)
    }
}

/// Keyword hits always carry confidence 1.0, so only similarity-scored
/// mappings can fall in the low-confidence band.
fn is_semantic_hit(m: &MappingResult) -> bool {
    match m.method {
        Method::Semantic => true,
        Method::Inferred => m.confidence < 1.0,
        Method::Keyword | Method::Unresolved => false,
    }
}

// ── Resolver ────────────────────────────────────────────────────────────

/// Resolver over a shared vocabulary and an optional embedding backend.
///
/// Synonym vectors are computed on the first successful semantic request
/// and reused afterwards.
pub struct Resolver {
    vocab: Arc<Vocabulary>,
    embedder: Option<Arc<dyn Embedder>>,
    config: ResolverConfig,
    synonym_vectors: OnceLock<Vec<Vec<Vec<f32>>>>,
}

impl Resolver {
    /// Keyword-only resolver.
    pub fn new(vocab: Arc<Vocabulary>, config: ResolverConfig) -> Self {
        Self {
            vocab,
            embedder: None,
            config,
            synonym_vectors: OnceLock::new(),
        }
    }

    /// Attach an embedding backend, enabling the semantic strategy.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self.synonym_vectors = OnceLock::new();
        self
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Strategy a request would start with.
    pub fn preferred_strategy(&self) -> Strategy {
        if self.embedder.is_some() {
            Strategy::Semantic
        } else {
            Strategy::Keyword
        }
    }

    /// Resolve labels against a context with the preferred strategy.
    pub fn resolve<L: AsRef<str>>(
        &self,
        labels: &[L],
        ctx: &Context,
    ) -> Result<Resolution, InputError> {
        self.resolve_with(labels, ctx, self.preferred_strategy())
    }

    /// Resolve with an explicit starting strategy. Asking for the semantic
    /// strategy without a working backend yields the keyword strategy.
    pub fn resolve_with<L: AsRef<str>>(
        &self,
        labels: &[L],
        ctx: &Context,
        strategy: Strategy,
    ) -> Result<Resolution, InputError> {
        let labels = distinct_labels(labels);
        if labels.is_empty() {
            return Err(InputError::EmptyLabels);
        }

        let ceiling = self.config.low_confidence_ceiling;
        if strategy == Strategy::Semantic
            && let Some(embedder) = &self.embedder
        {
            match self.score_labels(embedder.as_ref(), &labels) {
                Ok(scores) => {
                    tracing::debug!(labels = labels.len(), backend = embedder.name(), "semantic strategy");
                    let mappings = labels
                        .iter()
                        .zip(scores)
                        .map(|(label, best)| self.semantic_mapping(label, best, ctx))
                        .collect();
                    return Ok(Resolution::assemble(mappings, Strategy::Semantic, ceiling));
                }
                Err(e) => {
                    tracing::warn!(backend = embedder.name(), "embedding failed, using keyword strategy: {e}");
                }
            }
        }

        tracing::debug!(labels = labels.len(), "keyword strategy");
        let mappings = labels
            .par_iter()
            .map(|label| keyword_mapping(label, ctx))
            .collect();
        Ok(Resolution::assemble(mappings, Strategy::Keyword, ceiling))
    }

    fn synonym_vectors(&self, embedder: &dyn Embedder) -> BackendResult<&Vec<Vec<Vec<f32>>>> {
        if let Some(cached) = self.synonym_vectors.get() {
            return Ok(cached);
        }

        let flat: Vec<String> = self
            .vocab
            .fields()
            .iter()
            .flat_map(|f| f.synonyms.iter().cloned())
            .collect();
        let mut vectors = encode_checked(embedder, &flat)?.into_iter();
        let per_field: Vec<Vec<Vec<f32>>> = self
            .vocab
            .fields()
            .iter()
            .map(|f| vectors.by_ref().take(f.synonyms.len()).collect())
            .collect();

        Ok(self.synonym_vectors.get_or_init(|| per_field))
    }

    /// Best `(field index, similarity)` per label.
    fn score_labels(
        &self,
        embedder: &dyn Embedder,
        labels: &[&str],
    ) -> BackendResult<Vec<Option<(usize, f32)>>> {
        let synonyms = self.synonym_vectors(embedder)?;
        let texts: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let label_vectors = encode_checked(embedder, &texts)?;

        let dim = synonyms.iter().flatten().next().map(Vec::len);
        if let (Some(expected), Some(actual)) = (dim, label_vectors.first().map(Vec::len))
            && expected != actual
        {
            return Err(crate::error::BackendError::DimensionMismatch { expected, actual });
        }

        Ok(label_vectors
            .par_iter()
            .map(|lv| best_field(lv, synonyms))
            .collect())
    }

    fn semantic_mapping(&self, label: &str, best: Option<(usize, f32)>, ctx: &Context) -> MappingResult {
        let Some((index, similarity)) = best else {
            return MappingResult::unresolved(label);
        };
        if similarity < self.config.similarity_threshold {
            tracing::debug!(label, similarity, "below similarity threshold");
            return MappingResult::unresolved(label);
        }

        let field = &self.vocab.fields()[index];
        match ctx.get(&field.id) {
            Some(entry) => MappingResult::found(label, &field.id, entry, Method::Semantic, similarity),
            None => {
                tracing::debug!(label, field = %field.id, "matched field has no value");
                MappingResult::unresolved(label)
            }
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("fields", &self.vocab.len())
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .field("config", &self.config)
            .finish()
    }
}

/// Highest-scoring field; ties keep the earlier field.
fn best_field(label: &[f32], synonyms: &[Vec<Vec<f32>>]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, vectors) in synonyms.iter().enumerate() {
        let Some(score) = vectors.iter().map(|s| cosine(label, s)).reduce(f32::max) else {
            continue;
        };
        if best.is_none_or(|(_, b)| score > b) {
            best = Some((index, score));
        }
    }
    best
}

fn distinct_labels<L: AsRef<str>>(labels: &[L]) -> Vec<&str> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .map(|l| l.as_ref())
        .filter(|l| !l.trim().is_empty() && seen.insert(*l))
        .collect()
}

/// Label text folded and stripped of surrounding punctuation, for
/// containment against context keys.
fn label_key(label: &str) -> String {
    fold(label)
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// Context key in bidirectional containment with the label. A key equal to
/// the label wins, then a key equal to `preferred`, then higher-priority
/// layers, then longer keys.
fn direct_match<'c>(
    key: &str,
    preferred: Option<&str>,
    ctx: &'c Context,
) -> Option<(&'c str, &'c ContextEntry)> {
    if key.is_empty() {
        return None;
    }
    ctx.by_priority()
        .into_iter()
        .filter(|(k, _)| !k.is_empty() && (key.contains(k) || k.contains(key)))
        .min_by(|a, b| {
            (b.0 == key)
                .cmp(&(a.0 == key))
                .then_with(|| (Some(b.0) == preferred).cmp(&(Some(a.0) == preferred)))
                .then_with(|| a.1.origin.cmp(&b.1.origin))
                .then_with(|| b.0.len().cmp(&a.0.len()))
                .then_with(|| a.0.cmp(b.0))
        })
}

/// Keyword-strategy resolution of one label.
pub fn keyword_mapping(label: &str, ctx: &Context) -> MappingResult {
    let field_type = FieldType::classify(label);
    let preferred = field_type.map(FieldType::canonical_id);
    if let Some((key, entry)) = direct_match(&label_key(label), preferred, ctx) {
        return MappingResult::found(label, key, entry, Method::Keyword, 1.0);
    }

    let Some(id) = preferred else {
        return MappingResult::unresolved(label);
    };
    match ctx.get(id) {
        Some(entry) => MappingResult::found(label, id, entry, Method::Keyword, 1.0),
        None => MappingResult::unresolved(label),
    }
}

/// Keyword-strategy resolution with the built-in vocabulary.
pub fn resolve_fields<L: AsRef<str>>(
    labels: &[L],
    ctx: &Context,
) -> Result<Resolution, InputError> {
    Resolver::new(Arc::new(Vocabulary::builtin()), ResolverConfig::default()).resolve(labels, ctx)
}
