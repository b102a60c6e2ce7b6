//! Full-text extraction from PDF files

use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::utils::normalize::collapse_whitespace;

/// PDF magic bytes
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Fewer extracted words than this means the PDF is probably a scanned image
pub const MIN_WORDS: usize = 50;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Not a PDF file")]
    NotPdf,
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to extract PDF text: {0}")]
    Extraction(String),
}

/// Text pulled out of one PDF
#[derive(Debug, Clone, PartialEq)]
pub struct PdfText {
    pub text: String,
    pub word_count: usize,
    /// Too little text came out; the file likely needs OCR
    pub needs_ocr: bool,
}

impl PdfText {
    fn from_raw(raw: &str) -> Self {
        let text = collapse_whitespace(raw);
        let word_count = text.split_whitespace().count();
        Self {
            needs_ocr: word_count < MIN_WORDS,
            text,
            word_count,
        }
    }
}

/// Check if bytes are a valid PDF by checking magic bytes
pub fn is_valid_pdf(bytes: &[u8]) -> bool {
    bytes.len() >= PDF_MAGIC.len() && &bytes[..PDF_MAGIC.len()] == PDF_MAGIC
}

/// Extract text from PDF bytes
///
/// # Returns
/// * `Ok(PdfText)` - Extracted text with whitespace collapsed
/// * `Err(PdfError::NotPdf)` - If the bytes lack the PDF header
pub fn extract_pdf_text(bytes: &[u8]) -> Result<PdfText, PdfError> {
    if !is_valid_pdf(bytes) {
        return Err(PdfError::NotPdf);
    }

    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PdfError::Extraction(e.to_string()))?;
    let text = PdfText::from_raw(&raw);

    if text.needs_ocr {
        warn!(
            "Only {} words extracted from PDF; it may be a scanned image",
            text.word_count
        );
    } else {
        debug!("Extracted {} words from PDF", text.word_count);
    }

    Ok(text)
}

/// Read a PDF from disk and extract its text
pub fn extract_pdf_file(path: &Path) -> Result<PdfText, PdfError> {
    let bytes = std::fs::read(path).map_err(|source| PdfError::Io {
        path: path.display().to_string(),
        source,
    })?;
    extract_pdf_text(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_pdf() {
        assert!(is_valid_pdf(b"%PDF-1.7\n..."));
        assert!(!is_valid_pdf(b"<html>login</html>"));
        assert!(!is_valid_pdf(b"%PD"));
    }

    #[test]
    fn test_rejects_non_pdf() {
        assert!(matches!(extract_pdf_text(b"hello"), Err(PdfError::NotPdf)));
    }

    #[test]
    fn test_word_count_threshold() {
        let short = PdfText::from_raw("Page 1\n\n  of   2");
        assert_eq!(short.text, "Page 1 of 2");
        assert!(short.needs_ocr);

        let long = PdfText::from_raw(&"word ".repeat(MIN_WORDS));
        assert_eq!(long.word_count, MIN_WORDS);
        assert!(!long.needs_ocr);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_pdf_file(&dir.path().join("missing.pdf")).unwrap_err();
        assert!(matches!(err, PdfError::Io { .. }));
    }
}
