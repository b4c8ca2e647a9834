//! Label extraction: page text → ordered candidate field labels.
//!
//! A line is a label when it ends with `:` or `?`, or when it contains a
//! [`FieldType`] keyword. Named form-field widgets are labels by definition.
//! The result is deduplicated on the label text (first occurrence wins) and
//! capped so downstream resolution work stays bounded.
//!
//! Extraction never fails: an unreadable source yields an empty list, which
//! is a valid, reportable outcome.

pub mod source;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::vocab::{FieldType, fold};

pub use source::{PdfTextSource, PlainTextSource, TextSource, source_for_path};

/// Default cap on labels per document.
pub const DEFAULT_MAX_LABELS: usize = 100;

// ── Types ───────────────────────────────────────────────────────────────

/// How the text a label came from was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelSource {
    DirectText,
    Ocr,
}

/// Where on the page a label sits.
///
/// For form-field widgets `x`/`y` are page coordinates. For text lines `x`
/// is 0 and `y` is the line ordinal within the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub page: usize,
    pub x: f32,
    pub y: f32,
}

/// One candidate label with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLabel {
    pub text: String,
    pub source: LabelSource,
    pub position: Option<Position>,
    pub field_type: Option<FieldType>,
    pub required: bool,
}

impl ExtractedLabel {
    /// A bare label with no provenance beyond its text.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            field_type: FieldType::classify(&text),
            required: is_required(&text),
            text,
            source: LabelSource::DirectText,
            position: None,
        }
    }
}

impl AsRef<str> for ExtractedLabel {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl From<&str> for ExtractedLabel {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for ExtractedLabel {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Text of one page as delivered by a text or OCR collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// Zero-based page index.
    pub page: usize,
    pub text: String,
    pub source: LabelSource,
}

/// A named interactive form field found in the document structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormFieldAnnotation {
    pub name: String,
    pub page: usize,
    pub x: f32,
    pub y: f32,
}

/// Everything the extractor needs from a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentText {
    pub pages: Vec<PageText>,
    #[serde(default)]
    pub form_fields: Vec<FormFieldAnnotation>,
}

impl DocumentText {
    /// Directly extracted pages, in order.
    pub fn from_pages<S: AsRef<str>>(pages: &[S]) -> Self {
        Self {
            pages: pages
                .iter()
                .enumerate()
                .map(|(page, text)| PageText {
                    page,
                    text: text.as_ref().to_string(),
                    source: LabelSource::DirectText,
                })
                .collect(),
            form_fields: Vec::new(),
        }
    }
}

// ── Line rules ──────────────────────────────────────────────────────────

/// Whether a trimmed line looks like a field label.
pub fn is_label_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && (line.ends_with(':') || line.ends_with('?') || FieldType::any_keyword(line))
}

/// Whether a label marks its field as mandatory.
pub fn is_required(label: &str) -> bool {
    label.contains('*') || fold(label).contains("required")
}

// ── LabelExtractor ──────────────────────────────────────────────────────

/// Stateless extractor with a bounded output size.
#[derive(Debug, Clone, Copy)]
pub struct LabelExtractor {
    max_labels: usize,
}

impl Default for LabelExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LABELS)
    }
}

impl LabelExtractor {
    pub fn new(max_labels: usize) -> Self {
        Self {
            max_labels: max_labels.max(1),
        }
    }

    pub fn max_labels(&self) -> usize {
        self.max_labels
    }

    /// Extract labels from page text and form-field widgets.
    pub fn extract(&self, doc: &DocumentText) -> Vec<ExtractedLabel> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut labels = Vec::new();

        let lines = doc.pages.iter().flat_map(|page| {
            page.text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .enumerate()
                .filter(|(_, l)| is_label_line(l))
                .map(move |(ordinal, line)| ExtractedLabel {
                    text: line.to_string(),
                    source: page.source,
                    position: Some(Position {
                        page: page.page,
                        x: 0.0,
                        y: ordinal as f32,
                    }),
                    field_type: FieldType::classify(line),
                    required: is_required(line),
                })
        });

        let widgets = doc
            .form_fields
            .iter()
            .filter(|f| !f.name.trim().is_empty())
            .map(|f| {
                let name = f.name.trim();
                ExtractedLabel {
                    text: name.to_string(),
                    source: LabelSource::DirectText,
                    position: Some(Position {
                        page: f.page,
                        x: f.x,
                        y: f.y,
                    }),
                    field_type: FieldType::classify(name),
                    required: false,
                }
            });

        for label in lines.chain(widgets) {
            if labels.len() >= self.max_labels {
                break;
            }
            if seen.insert(label.text.clone()) {
                labels.push(label);
            }
        }

        tracing::debug!(
            pages = doc.pages.len(),
            widgets = doc.form_fields.len(),
            labels = labels.len(),
            "extracted labels"
        );
        labels
    }

    /// Read a document through a collaborator and extract its labels.
    ///
    /// Any read failure degrades to an empty list.
    pub fn extract_from(&self, source: &dyn TextSource) -> Vec<ExtractedLabel> {
        match source.read() {
            Ok(doc) => self.extract(&doc),
            Err(e) => {
                tracing::warn!(origin = %source.origin(), "label extraction degraded to empty: {e}");
                Vec::new()
            }
        }
    }
}

/// Extract labels from plain page strings with the default cap.
pub fn extract_labels<S: AsRef<str>>(pages: &[S]) -> Vec<ExtractedLabel> {
    LabelExtractor::default().extract(&DocumentText::from_pages(pages))
}
