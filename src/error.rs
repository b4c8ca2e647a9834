//! Rich diagnostic error types for the field-resolution pipeline.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Most of these never reach a caller:
//! extraction failures degrade to an empty label list and backend failures
//! select the keyword fallback. Only malformed *inputs* and configuration
//! problems are reported.

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type for fieldwise.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user. [`ExtractError`] and [`BackendError`] never reach
/// a caller and have no variant here.
#[derive(Debug, Error, Diagnostic)]
pub enum FieldwiseError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias used across the crate.
pub type FieldwiseResult<T> = std::result::Result<T, FieldwiseError>;

// ---------------------------------------------------------------------------
// Extraction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("document unavailable: {origin}")]
    #[diagnostic(
        code(fieldwise::extract::input_unavailable),
        help(
            "The document could not be read. Check that the path exists and is readable. \
             Extraction degrades to an empty label list in this case."
        )
    )]
    InputUnavailable {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no extractable text in {origin}: {message}")]
    #[diagnostic(
        code(fieldwise::extract::no_text),
        help(
            "The document carries no text layer. Scanned forms must be run through \
             an OCR service first and passed in as page text."
        )
    )]
    NoText { origin: String, message: String },

    #[error("unsupported document format: \"{origin}\"")]
    #[diagnostic(
        code(fieldwise::extract::unsupported),
        help("Supported inputs are PDF files (.pdf) and plain text (.txt, .md).")
    )]
    Unsupported { origin: String },
}

pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

// ---------------------------------------------------------------------------
// Backend errors (embedding + hosted classifier)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BackendError {
    #[error("{backend} backend is not available: {message}")]
    #[diagnostic(
        code(fieldwise::backend::unavailable),
        help(
            "The optional backend could not be reached. The pipeline falls back to \
             deterministic keyword matching; start the backend or disable it in the config."
        )
    )]
    Unavailable { backend: String, message: String },

    #[error("{backend} backend returned a malformed response: {message}")]
    #[diagnostic(
        code(fieldwise::backend::malformed),
        help("The response did not match the expected shape and was discarded.")
    )]
    Malformed { backend: String, message: String },

    #[error("{backend} backend timed out after {timeout_secs}s")]
    #[diagnostic(
        code(fieldwise::backend::timeout),
        help("Increase `ollama.timeout_secs` or use a smaller model.")
    )]
    Timeout { backend: String, timeout_secs: u64 },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(fieldwise::backend::dim_mismatch),
        help("All vectors returned by one embedding backend must share a dimension.")
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

// ---------------------------------------------------------------------------
// Input errors (the only caller-visible failures of the core)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InputError {
    #[error("no labels to resolve")]
    #[diagnostic(
        code(fieldwise::input::empty_labels),
        help("Pass at least one field label, a document, or a registered template id.")
    )]
    EmptyLabels,

    #[error("unknown form template: \"{form_id}\"")]
    #[diagnostic(
        code(fieldwise::input::unknown_template),
        help("Register the template first, or pass the labels directly.")
    )]
    UnknownTemplate { form_id: String },
}

// ---------------------------------------------------------------------------
// Derived-value inference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InferenceError {
    #[error("energy consumption must be a finite non-negative number, got {kwh}")]
    #[diagnostic(
        code(fieldwise::derive::invalid_energy),
        help("Pass the consumption in kWh, e.g. 3000 for 3 MWh.")
    )]
    InvalidEnergy { kwh: f64 },

    #[error("grid factor must be a finite non-negative number, got {factor}")]
    #[diagnostic(
        code(fieldwise::derive::invalid_grid_factor),
        help("Grid factors are given in kg CO2 per kWh, typically between 0.0 and 1.0.")
    )]
    InvalidGridFactor { factor: f64 },
}

pub type InferenceResult<T> = std::result::Result<T, InferenceError>;
