//! Ollama REST client for the optional backends.
//!
//! Used **only** for:
//! - Hosted intent/slot classification (`/api/generate`)
//! - Label and synonym embeddings (`/api/embed`)
//!
//! Both are optional. Every request carries a bounded timeout, and every
//! failure is a [`BackendError`] that callers turn into the deterministic
//! fallback. Nothing here retries.

use std::io;
use std::time::Duration;

use crate::config::OllamaSection;
use crate::error::{BackendError, BackendResult};

const BACKEND: &str = "ollama";

/// Timeout for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the Ollama client.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Generation model.
    pub model: String,
    /// Embedding model.
    pub embed_model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::from(&OllamaSection::default())
    }
}

impl From<&OllamaSection> for OllamaConfig {
    fn from(section: &OllamaSection) -> Self {
        Self {
            base_url: section.base_url.trim_end_matches('/').to_string(),
            model: section.model.clone(),
            embed_model: section.embed_model.clone(),
            timeout_secs: section.timeout_secs.max(1),
        }
    }
}

/// Client for the Ollama REST API.
#[derive(Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
    available: bool,
}

impl OllamaClient {
    /// Create a client. It reports unavailable until [`probe`](Self::probe)
    /// succeeds.
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            available: false,
        }
    }

    /// Check that the server answers `/api/tags`.
    pub fn probe(&mut self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new().timeout(PROBE_TIMEOUT).build();
        self.available = matches!(agent.get(&url).call(), Ok(resp) if resp.status() == 200);
        tracing::debug!(url = %url, available = self.available, "probed ollama");
        self.available
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn unavailable(&self, message: impl Into<String>) -> BackendError {
        BackendError::Unavailable {
            backend: BACKEND.into(),
            message: message.into(),
        }
    }

    fn malformed(message: impl Into<String>) -> BackendError {
        BackendError::Malformed {
            backend: BACKEND.into(),
            message: message.into(),
        }
    }

    fn post_json(&self, path: &str, body: &serde_json::Value) -> BackendResult<serde_json::Value> {
        if !self.available {
            return Err(self.unavailable(format!("not reachable at {}", self.config.base_url)));
        }

        let url = format!("{}{path}", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build();

        let body_str = serde_json::to_string(body)
            .map_err(|e| Self::malformed(format!("JSON serialize error: {e}")))?;

        let resp = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e: ureq::Error| {
                if is_timeout(&e) {
                    BackendError::Timeout {
                        backend: BACKEND.into(),
                        timeout_secs: self.config.timeout_secs,
                    }
                } else {
                    self.unavailable(e.to_string())
                }
            })?;

        let resp_str = resp
            .into_string()
            .map_err(|e| Self::malformed(e.to_string()))?;

        serde_json::from_str(&resp_str).map_err(|e| Self::malformed(e.to_string()))
    }

    /// Generate a completion for `prompt`.
    pub fn generate(&self, prompt: &str, system: Option<&str>) -> BackendResult<String> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
        });
        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys.to_string());
        }

        let json = self.post_json("/api/generate", &body)?;
        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Self::malformed("missing 'response' field"))
    }

    /// Embed a batch of texts.
    pub fn embed(&self, texts: &[String]) -> BackendResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.config.embed_model,
            "input": texts,
        });

        let json = self.post_json("/api/embed", &body)?;
        let rows = json["embeddings"]
            .as_array()
            .ok_or_else(|| Self::malformed("missing 'embeddings' array"))?;

        rows.iter()
            .map(|row| -> BackendResult<Vec<f32>> {
                row.as_array()
                    .ok_or_else(|| Self::malformed("embedding is not an array"))?
                    .iter()
                    .map(|x| {
                        x.as_f64()
                            .map(|f| f as f32)
                            .ok_or_else(|| Self::malformed("embedding component is not a number"))
                    })
                    .collect()
            })
            .collect()
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("embed_model", &self.config.embed_model)
            .field("available", &self.available)
            .finish()
    }
}

/// Transport failure caused by an expired socket deadline.
fn is_timeout(err: &ureq::Error) -> bool {
    let ureq::Error::Transport(transport) = err else {
        return false;
    };
    std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|io| matches!(io.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
}
