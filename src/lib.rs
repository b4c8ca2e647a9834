// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # fieldwise
//!
//! Field resolution for regulatory filings: turns form documents and
//! free-text requests into concrete field values.
//!
//! ## Architecture
//!
//! - **Label extraction** (`extract`): page text and form widgets → candidate labels
//! - **Intent & slots** (`intent`): keyword/regex classifier with an optional hosted model
//! - **Resolution** (`resolve`): semantic cosine matching with a keyword fallback
//! - **Inference** (`derive`): emissions from energy consumption
//! - **Orchestration** (`pipeline`): sequencing and the degrade-gracefully policy
//!
//! ## Library usage
//!
//! ```
//! use fieldwise::context::{Context, FieldValue};
//! use fieldwise::pipeline::Pipeline;
//!
//! let pipeline = Pipeline::default();
//! let ctx = Context::from_profile([("kWh", 3000.0)]);
//! let resolution = pipeline
//!     .resolve_fields(&["Energy Consumption (kWh):"], &ctx)
//!     .unwrap();
//! assert_eq!(
//!     resolution.field_values["Energy Consumption (kWh):"],
//!     FieldValue::Number(3000.0)
//! );
//! ```

pub mod config;
pub mod context;
pub mod derive;
pub mod embed;
pub mod error;
pub mod extract;
pub mod intent;
pub mod ollama;
pub mod pipeline;
pub mod recipe;
pub mod resolve;
pub mod template;
pub mod vocab;
