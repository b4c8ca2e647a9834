//! Embedding backends and cosine similarity.
//!
//! An [`Embedder`] maps a batch of texts to fixed-length vectors. The
//! resolver never trusts backend output blindly: [`encode_checked`] rejects
//! wrong batch sizes, ragged dimensions and non-finite components, and any
//! rejection sends the whole request down the keyword path.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{BackendError, BackendResult};
use crate::ollama::OllamaClient;
use crate::vocab::fold;

/// Encoder of texts into a shared vector space.
///
/// Implementations are shared across concurrent requests and must be pure
/// with respect to their inputs.
pub trait Embedder: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// One vector per input text, all of the same length.
    fn encode(&self, texts: &[String]) -> BackendResult<Vec<Vec<f32>>>;
}

/// Encode and validate the shape of the result.
pub fn encode_checked(embedder: &dyn Embedder, texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
    let vectors = embedder.encode(texts)?;
    let malformed = |message: String| BackendError::Malformed {
        backend: embedder.name().to_string(),
        message,
    };

    if vectors.len() != texts.len() {
        return Err(malformed(format!(
            "expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }

    let Some(dim) = vectors.first().map(Vec::len) else {
        return Ok(vectors);
    };
    if dim == 0 {
        return Err(malformed("zero-length vectors".into()));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(BackendError::DimensionMismatch {
            expected: dim,
            actual: bad.len(),
        });
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(malformed("non-finite vector component".into()));
    }
    Ok(vectors)
}

/// Scale to unit length. A zero vector stays zero.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Cosine similarity clamped to [0, 1].
///
/// Negative correlation is treated as no similarity; a zero vector is
/// similar to nothing.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

// ── HashEmbedder ────────────────────────────────────────────────────────

/// Default dimension of [`HashEmbedder`] vectors.
pub const DEFAULT_HASH_DIM: usize = 256;

/// Offline embedder: character trigrams and whole words hashed into a
/// fixed number of buckets.
///
/// Captures surface similarity only ("E-mail address" vs "email"), but is
/// deterministic and always available.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIM)
    }
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() % self.dim as u64) as usize
    }

    /// Embed one text.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let folded = fold(text);
        let words: Vec<String> = folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        for word in &words {
            v[self.bucket(word)] += 2.0;
            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                v[self.bucket(&gram)] += 1.0;
            }
        }

        normalize(&mut v);
        v
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn encode(&self, texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

// ── OllamaEmbedder ──────────────────────────────────────────────────────

/// Embeddings from a local Ollama server (`/api/embed`).
#[derive(Debug)]
pub struct OllamaEmbedder {
    client: OllamaClient,
}

impl OllamaEmbedder {
    /// Wrap a probed client.
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn encode(&self, texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.client.embed(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ollama::OllamaConfig;

    struct Fixed(Vec<Vec<f32>>);

    impl Embedder for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn encode(&self, _texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
            Ok(self.0.clone())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("t{i}")).collect()
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        let c = cosine(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((c - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        let mut z = vec![0.0, 0.0];
        normalize(&mut z);
        assert_eq!(z, vec![0.0, 0.0]);
    }

    #[test]
    fn checked_accepts_well_formed() {
        let e = Fixed(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(encode_checked(&e, &texts(2)).unwrap().len(), 2);
    }

    #[test]
    fn checked_rejects_wrong_count() {
        let e = Fixed(vec![vec![1.0, 0.0]]);
        assert!(matches!(
            encode_checked(&e, &texts(2)),
            Err(BackendError::Malformed { .. })
        ));
    }

    #[test]
    fn checked_rejects_ragged() {
        let e = Fixed(vec![vec![1.0, 0.0], vec![1.0]]);
        assert!(matches!(
            encode_checked(&e, &texts(2)),
            Err(BackendError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn checked_rejects_nan() {
        let e = Fixed(vec![vec![f32::NAN, 0.0]]);
        assert!(encode_checked(&e, &texts(1)).is_err());
    }

    #[test]
    fn hash_embedder_is_deterministic() {
        let h = HashEmbedder::default();
        assert_eq!(h.embed("Company Name:"), h.embed("Company Name:"));
        assert_eq!(h.embed("x").len(), DEFAULT_HASH_DIM);
    }

    #[test]
    fn hash_embedder_prefers_surface_overlap() {
        let h = HashEmbedder::default();
        let label = h.embed("Company name");
        let near = cosine(&label, &h.embed("company name"));
        let far = cosine(&label, &h.embed("kilowatt hours"));
        assert!((near - 1.0).abs() < 1e-5);
        assert!(near > far);
    }

    #[test]
    fn hash_embedder_empty_text_is_zero() {
        let v = HashEmbedder::default().embed("  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn ollama_embedder_unavailable_errors() {
        let e = OllamaEmbedder::new(OllamaClient::new(OllamaConfig::default()));
        assert!(e.encode(&texts(1)).is_err());
        assert!(e.encode(&[]).unwrap().is_empty());
    }
}
