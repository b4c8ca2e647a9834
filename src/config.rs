//! Pipeline configuration, persisted as TOML.
//!
//! The default location is `$XDG_CONFIG_HOME/fieldwise/config.toml`. A missing
//! file means defaults; a malformed one is an error. The similarity threshold
//! and the low-confidence ceiling live here rather than in code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading and validation.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(fieldwise::config::no_home),
        help("Set the HOME environment variable or pass --config explicitly.")
    )]
    NoHome,

    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(fieldwise::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(fieldwise::config::parse),
        help("Check the TOML syntax. Run `fieldwise config show` to print a valid default.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(fieldwise::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value `{key}`: {message}")]
    #[diagnostic(code(fieldwise::config::invalid))]
    Invalid { key: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ── Sections ────────────────────────────────────────────────────────────

/// Canonical-field resolver tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum cosine similarity for a semantic match to resolve.
    pub similarity_threshold: f32,
    /// Semantic matches below this similarity are flagged for review.
    pub low_confidence_ceiling: f32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            low_confidence_ceiling: 0.7,
        }
    }
}

/// Label extraction limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Upper bound on labels returned per document.
    pub max_labels: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { max_labels: 100 }
    }
}

/// Emissions inference defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionsConfig {
    /// ISO country code used when the context names none.
    pub default_country: Option<String>,
    /// Explicit grid factor (kg CO2 / kWh), overriding the country table.
    pub grid_factor: Option<f64>,
    /// Add the upstream (scope 3) share to inferred emissions.
    pub include_scope3: bool,
    /// Additions or overrides to the built-in country table.
    pub grid_factors: BTreeMap<String, f64>,
}

/// Optional Ollama backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSection {
    pub enabled: bool,
    pub base_url: String,
    /// Generation model for hosted intent classification.
    pub model: String,
    /// Embedding model for the semantic strategy.
    pub embed_model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            embed_model: "nomic-embed-text".into(),
            timeout_secs: 10,
        }
    }
}

// ── PipelineConfig ──────────────────────────────────────────────────────

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resolver: ResolverConfig,
    pub extract: ExtractConfig,
    pub emissions: EmissionsConfig,
    pub ollama: OllamaSection,
}

impl PipelineConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: "(in-memory)".into(),
            message: e.to_string(),
        })
    }

    /// Reject values the resolver and inference cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        let r = &self.resolver;
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(invalid(
                "resolver.similarity_threshold",
                format!("{} is outside [0, 1]", r.similarity_threshold),
            ));
        }
        if !(0.0..=1.0).contains(&r.low_confidence_ceiling) {
            return Err(invalid(
                "resolver.low_confidence_ceiling",
                format!("{} is outside [0, 1]", r.low_confidence_ceiling),
            ));
        }
        if r.low_confidence_ceiling < r.similarity_threshold {
            return Err(invalid(
                "resolver.low_confidence_ceiling",
                "must not be below similarity_threshold".into(),
            ));
        }
        if self.extract.max_labels == 0 {
            return Err(invalid("extract.max_labels", "must be at least 1".into()));
        }
        if let Some(g) = self.emissions.grid_factor {
            if !g.is_finite() || g < 0.0 {
                return Err(invalid("emissions.grid_factor", format!("{g} is negative")));
            }
        }
        for (country, g) in &self.emissions.grid_factors {
            if !g.is_finite() || *g < 0.0 {
                return Err(invalid(
                    &format!("emissions.grid_factors.{country}"),
                    format!("{g} is negative"),
                ));
            }
        }
        if self.ollama.timeout_secs == 0 {
            return Err(invalid("ollama.timeout_secs", "must be at least 1".into()));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message,
    }
}

// ── Paths ───────────────────────────────────────────────────────────────

/// XDG-compliant locations for fieldwise.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// `$XDG_CONFIG_HOME/fieldwise/`
    pub config_dir: PathBuf,
}

impl ConfigPaths {
    /// Resolve from environment variables with the standard fallback.
    pub fn resolve() -> ConfigResult<Self> {
        let config_home = match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .map_err(|_| ConfigError::NoHome)?,
        };
        Ok(Self {
            config_dir: config_home.join("fieldwise"),
        })
    }

    /// `config.toml` inside the config directory.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}
