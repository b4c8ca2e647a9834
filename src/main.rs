//! fieldwise CLI: field resolution for regulatory filings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};

use fieldwise::config::{ConfigPaths, PipelineConfig};
use fieldwise::context::{Context, FieldValue};
use fieldwise::derive::{EmissionsRequest, GridTable};
use fieldwise::embed::HashEmbedder;
use fieldwise::extract::{ExtractedLabel, PlainTextSource, TextSource, source_for_path};
use fieldwise::pipeline::{Pipeline, PipelineRequest};
use fieldwise::vocab::Vocabulary;

#[derive(Parser)]
#[command(name = "fieldwise", version, about = "Field resolution for regulatory filings")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/fieldwise/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Embedding backend for semantic resolution.
    #[arg(long, global = true, value_enum)]
    embedder: Option<EmbedderKind>,

    /// Canonical vocabulary TOML (`[[fields]]` with `id` and `synonyms`).
    #[arg(long, global = true)]
    vocabulary: Option<PathBuf>,

    /// Enable the Ollama backends regardless of the config file.
    #[arg(long, global = true)]
    ollama: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Keyword strategy only.
    None,
    /// Offline character-trigram hashing.
    Hash,
    /// Ollama `/api/embed`.
    Ollama,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract candidate field labels from a PDF or text file.
    Extract {
        /// Document path (.pdf, .txt, .md).
        file: PathBuf,

        /// Treat a text file as OCR output.
        #[arg(long)]
        ocr: bool,
    },

    /// Classify the intent of an utterance and extract its slots.
    Classify {
        /// Free-text request.
        utterance: String,
    },

    /// Resolve labels to values from known facts.
    Resolve {
        /// Label to resolve (repeatable).
        #[arg(long = "label")]
        labels: Vec<String>,

        /// Document whose extracted labels are resolved.
        #[arg(long)]
        document: Option<PathBuf>,

        /// JSON object of profile facts.
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Profile fact as key=value (repeatable).
        #[arg(long = "set", value_parser = parse_fact)]
        facts: Vec<(String, FieldValue)>,
    },

    /// Estimate emissions from energy consumption.
    Emissions {
        /// Consumption in kWh.
        #[arg(long)]
        kwh: f64,

        /// Country code or name for the grid factor.
        #[arg(long)]
        country: Option<String>,

        /// Explicit grid factor in kg CO2 per kWh.
        #[arg(long)]
        grid_factor: Option<f64>,

        /// Include the upstream scope 3 share.
        #[arg(long)]
        scope3: bool,
    },

    /// Run a full pipeline request from a JSON file.
    Run {
        /// Request JSON (`utterance`, `labels`, `formId`, `pages`, `profile`).
        request: PathBuf,
    },

    /// Inspect or initialize the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the default config file location.
    Path,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn parse_fact(raw: &str) -> std::result::Result<(String, FieldValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = value.trim();
    let value = match value.parse::<f64>() {
        Ok(n) => FieldValue::Number(n),
        Err(_) => match value {
            "true" => FieldValue::Bool(true),
            "false" => FieldValue::Bool(false),
            _ => FieldValue::from(value),
        },
    };
    Ok((key.trim().to_string(), value))
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(ConfigPaths::resolve()?.config_file()),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let path = config_path(cli)?;
    let mut config = PipelineConfig::load_or_default(&path)?;
    if cli.ollama || cli.embedder == Some(EmbedderKind::Ollama) {
        config.ollama.enabled = true;
    }
    Ok(config)
}

fn build_pipeline(cli: &Cli) -> Result<Pipeline> {
    let mut pipeline = Pipeline::from_config(load_config(cli)?);
    if let Some(path) = &cli.vocabulary {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        pipeline = pipeline.with_vocabulary(Arc::new(Vocabulary::from_toml(&content)?));
    }
    Ok(match cli.embedder {
        Some(EmbedderKind::None) => pipeline.without_embedder(),
        Some(EmbedderKind::Hash) => pipeline.with_embedder(Arc::new(HashEmbedder::default())),
        Some(EmbedderKind::Ollama) | None => pipeline,
    })
}

fn read_labels(pipeline: &Pipeline, path: &Path, ocr: bool) -> Result<Vec<ExtractedLabel>> {
    let source: Box<dyn TextSource> = if ocr {
        Box::new(PlainTextSource::new(path).ocr())
    } else {
        source_for_path(path)?
    };
    Ok(pipeline.extract_from(source.as_ref()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Extract { file, ocr } => {
            let pipeline = build_pipeline(&cli)?;
            let labels = read_labels(&pipeline, file, *ocr)?;
            print_json(&labels)?;
        }

        Commands::Classify { utterance } => {
            let pipeline = build_pipeline(&cli)?;
            print_json(&pipeline.classify_intent(utterance))?;
        }

        Commands::Resolve {
            labels,
            document,
            profile,
            facts,
        } => {
            let pipeline = build_pipeline(&cli)?;

            let mut all_labels = labels.clone();
            if let Some(path) = document {
                all_labels.extend(read_labels(&pipeline, path, false)?.into_iter().map(|l| l.text));
            }

            let mut ctx = Context::from_profile(facts.iter().map(|(k, v)| (k.as_str(), v.clone())));
            if let Some(path) = profile {
                let content = std::fs::read_to_string(path).into_diagnostic()?;
                let json: serde_json::Value = serde_json::from_str(&content).into_diagnostic()?;
                let Some(map) = json.as_object() else {
                    miette::bail!("profile {} is not a JSON object", path.display());
                };
                ctx.merge_profile_json(map);
            }

            let resolution = pipeline.resolve_fields(&all_labels, &ctx)?;
            print_json(&resolution)?;
        }

        Commands::Emissions {
            kwh,
            country,
            grid_factor,
            scope3,
        } => {
            let config = load_config(&cli)?;
            let mut request = EmissionsRequest::new(*kwh);
            request.country = country.clone();
            request.grid_factor = grid_factor.or(config.emissions.grid_factor);
            request.include_scope3 = *scope3 || config.emissions.include_scope3;

            let estimate = GridTable::from_config(&config.emissions).estimate(&request)?;
            print_json(&estimate)?;
        }

        Commands::Run { request } => {
            let pipeline = build_pipeline(&cli)?;
            let content = std::fs::read_to_string(request).into_diagnostic()?;
            let request: PipelineRequest = serde_json::from_str(&content).into_diagnostic()?;
            print_json(&pipeline.process(&request)?)?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(&cli)?;
                print!("{}", config.to_toml_string()?);
            }
            ConfigAction::Path => {
                println!("{}", config_path(&cli)?.display());
            }
            ConfigAction::Init { force } => {
                let path = config_path(&cli)?;
                if path.exists() && !force {
                    miette::bail!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                PipelineConfig::default().save(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
        },
    }

    Ok(())
}
