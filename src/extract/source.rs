//! Text-source collaborators that turn files into page text.
//!
//! Each supported format implements [`TextSource`]; [`source_for_path`] picks
//! one from the file extension. OCR of scanned pages is out of scope: a PDF
//! without a text layer reports [`ExtractError::NoText`].

use std::path::{Path, PathBuf};

use crate::error::{ExtractError, ExtractResult};

use super::{DocumentText, LabelSource, PageText};

/// Producer of per-page plain text.
pub trait TextSource {
    /// Human-readable origin for diagnostics.
    fn origin(&self) -> String;

    /// Read the document.
    fn read(&self) -> ExtractResult<DocumentText>;
}

/// Split extracted text into pages on form feeds.
fn split_pages(text: &str, source: LabelSource) -> Vec<PageText> {
    text.split('\x0C')
        .enumerate()
        .map(|(page, t)| PageText {
            page,
            text: t.to_string(),
            source,
        })
        .collect()
}

fn read_bytes(path: &Path) -> ExtractResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| ExtractError::InputUnavailable {
        origin: path.display().to_string(),
        source: e,
    })
}

/// PDF text layer via `pdf-extract`.
#[derive(Debug, Clone)]
pub struct PdfTextSource {
    path: PathBuf,
}

impl PdfTextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TextSource for PdfTextSource {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> ExtractResult<DocumentText> {
        let bytes = read_bytes(&self.path)?;
        let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::NoText {
            origin: self.origin(),
            message: e.to_string(),
        })?;

        if text.trim().is_empty() {
            return Err(ExtractError::NoText {
                origin: self.origin(),
                message: "document has no text layer".into(),
            });
        }

        Ok(DocumentText {
            pages: split_pages(&text, LabelSource::DirectText),
            form_fields: Vec::new(),
        })
    }
}

/// Plain UTF-8 text; form feeds separate pages.
#[derive(Debug, Clone)]
pub struct PlainTextSource {
    path: PathBuf,
    source: LabelSource,
}

impl PlainTextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: LabelSource::DirectText,
        }
    }

    /// Mark the text as OCR output (e.g. a transcript saved by an OCR service).
    pub fn ocr(mut self) -> Self {
        self.source = LabelSource::Ocr;
        self
    }
}

impl TextSource for PlainTextSource {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> ExtractResult<DocumentText> {
        let bytes = read_bytes(&self.path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(DocumentText {
            pages: split_pages(&text, self.source),
            form_fields: Vec::new(),
        })
    }
}

/// Pick a text source from the file extension.
pub fn source_for_path(path: &Path) -> ExtractResult<Box<dyn TextSource>> {
    let lower = path.display().to_string().to_lowercase();
    if lower.ends_with(".pdf") {
        Ok(Box::new(PdfTextSource::new(path)))
    } else if lower.ends_with(".txt") || lower.ends_with(".md") || lower.ends_with(".text") {
        Ok(Box::new(PlainTextSource::new(path)))
    } else {
        Err(ExtractError::Unsupported { origin: lower })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_text_splits_on_form_feed() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        write!(file, "Company Name:\n\x0CEmail Address\n").unwrap();
        let doc = PlainTextSource::new(file.path()).read().unwrap();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[1].page, 1);
        assert!(doc.pages[1].text.contains("Email Address"));
    }

    #[test]
    fn ocr_marker_propagates() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        write!(file, "City:").unwrap();
        let doc = PlainTextSource::new(file.path()).ocr().read().unwrap();
        assert_eq!(doc.pages[0].source, LabelSource::Ocr);
    }

    #[test]
    fn missing_file_is_input_unavailable() {
        let err = PlainTextSource::new("/nonexistent/form.txt").read().unwrap_err();
        assert!(matches!(err, ExtractError::InputUnavailable { .. }));
    }

    #[test]
    fn garbage_pdf_is_no_text() {
        let mut file = tempfile::NamedTempFile::with_suffix(".pdf").unwrap();
        write!(file, "definitely not a pdf").unwrap();
        assert!(PdfTextSource::new(file.path()).read().is_err());
    }

    #[test]
    fn format_detection() {
        assert!(source_for_path(Path::new("form.PDF")).is_ok());
        assert!(source_for_path(Path::new("notes.txt")).is_ok());
        assert!(matches!(
            source_for_path(Path::new("scan.tiff")),
            Err(ExtractError::Unsupported { .. })
        ));
    }
}
