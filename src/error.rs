//! Error types for the ddr-report library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DdrError`] — **Fatal**: the request cannot produce a report (input is
//!   not a PDF, the model answered with free text, a field cannot be coerced
//!   to its declared type, the template does not fit the record). Returned as
//!   `Err(DdrError)` from every `produce_*` / `render_*` entry point.
//!
//! * [`ExtractionFailure`] — **Non-fatal**: a single page could not be read
//!   natively or recognised. The page degrades to empty text and the failure is
//!   kept on [`crate::output::DocumentCorpus::failures`] for diagnostics; the
//!   run continues.

use crate::output::Origin;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ddr-report library.
///
/// Page-level extraction problems use [`ExtractionFailure`] and are absorbed
/// by the extractor rather than propagated here.
#[derive(Debug, Error)]
pub enum DdrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// No PDF header within the first 1024 bytes of a report.
    #[error("{origin} report is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { origin: Origin, magic: Vec<u8> },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// pdfium could not open the document at all.
    #[error("{origin} report PDF is corrupt or unreadable: {detail}")]
    CorruptPdf { origin: Origin, detail: String },

    /// Recognition of a scanned page exceeded the OCR timeout.
    #[error("OCR timed out after {secs}s on page {page} of the {origin} report")]
    OcrTimeout { origin: Origin, page: usize, secs: u64 },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Generation errors ─────────────────────────────────────────────────
    /// No model client or provider could be constructed from the configuration.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned a non-retryable error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The provider reported HTTP 429 / quota exhaustion.
    #[error("Rate limit or quota exceeded for provider '{provider}': {detail}")]
    RateLimitExceeded { provider: String, detail: String },

    /// The provider rejected the credentials (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// The model call did not answer within `api_timeout_secs`.
    #[error("Model call timed out after {secs}s")]
    ApiTimeout { secs: u64 },

    /// The model response is not parseable as a JSON object.
    #[error("Model response is not a structured JSON object: {detail}\nResponse began with: {excerpt:?}")]
    Format { detail: String, excerpt: String },

    // ── Validation errors ─────────────────────────────────────────────────
    /// A field of the candidate record cannot be coerced to its declared type.
    #[error("Schema violation at '{field}': {detail}")]
    Schema { field: String, detail: String },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// The report template does not match the record structure.
    #[error("Report template error: {detail}")]
    Render { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the report artifact.
    #[error("Failed to write report '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DdrError {
    /// Pipeline stage the error was raised in, for diagnostics and exit codes.
    pub fn stage(&self) -> &'static str {
        match self {
            DdrError::FileNotFound { .. }
            | DdrError::PermissionDenied { .. }
            | DdrError::DownloadFailed { .. }
            | DdrError::DownloadTimeout { .. } => "input",
            DdrError::NotAPdf { .. }
            | DdrError::CorruptPdf { .. }
            | DdrError::OcrTimeout { .. }
            | DdrError::PdfiumBindingFailed(_) => "extract",
            DdrError::ProviderNotConfigured { .. }
            | DdrError::LlmApiError { .. }
            | DdrError::RateLimitExceeded { .. }
            | DdrError::AuthError { .. }
            | DdrError::ApiTimeout { .. }
            | DdrError::Format { .. } => "generate",
            DdrError::Schema { .. } => "validate",
            DdrError::Render { .. } => "render",
            DdrError::OutputWriteFailed { .. } => "io",
            DdrError::InvalidConfig(_) => "config",
            DdrError::Internal(_) => "internal",
        }
    }

    /// Whether re-running generation may succeed without changing anything.
    ///
    /// The core never retries; transport layers use this to decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DdrError::Format { .. }
                | DdrError::Schema { .. }
                | DdrError::ApiTimeout { .. }
                | DdrError::RateLimitExceeded { .. }
                | DdrError::LlmApiError { .. }
        )
    }

    pub(crate) fn schema(field: impl Into<String>, detail: impl Into<String>) -> Self {
        DdrError::Schema {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn render(detail: impl Into<String>) -> Self {
        DdrError::Render {
            detail: detail.into(),
        }
    }
}

/// A non-fatal failure for a single page.
///
/// Kept alongside the [`crate::output::DocumentCorpus`] when a page could not
/// be read. The page itself is still present, with empty text.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionFailure {
    /// pdfium could not load the page or its text layer.
    #[error("Page {page}: native text extraction failed: {detail}")]
    NativeFailed { page: usize, detail: String },

    /// The page could not be rasterised for recognition.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The OCR engine ran but failed or produced unreadable output.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The page needed OCR but recognition is switched off.
    #[error("Page {page}: text layer insufficient and OCR is disabled")]
    OcrDisabled { page: usize },
}

impl ExtractionFailure {
    /// 1-indexed page the failure belongs to.
    pub fn page(&self) -> usize {
        match self {
            ExtractionFailure::NativeFailed { page, .. }
            | ExtractionFailure::RenderFailed { page, .. }
            | ExtractionFailure::OcrFailed { page, .. }
            | ExtractionFailure::OcrDisabled { page } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_names_field() {
        let e = DdrError::schema("Severity_Assessment.overall_severity", "unrecognised value 'Dire'");
        let msg = e.to_string();
        assert!(msg.contains("Severity_Assessment.overall_severity"), "got: {msg}");
        assert!(msg.contains("Dire"));
        assert_eq!(e.stage(), "validate");
    }

    #[test]
    fn format_error_is_generation_stage() {
        let e = DdrError::Format {
            detail: "no JSON object found".into(),
            excerpt: "I'm sorry".into(),
        };
        assert_eq!(e.stage(), "generate");
        assert!(e.is_retryable());
        assert!(e.to_string().contains("I'm sorry"));
    }

    #[test]
    fn render_error_is_not_retryable() {
        let e = DdrError::render("unknown placeholder 'foo'");
        assert_eq!(e.stage(), "render");
        assert!(!e.is_retryable());
    }

    #[test]
    fn not_a_pdf_display_mentions_origin() {
        let e = DdrError::NotAPdf {
            origin: Origin::Thermal,
            magic: b"PK\x03\x04".to_vec(),
        };
        assert!(e.to_string().starts_with("thermal report"));
    }

    #[test]
    fn extraction_failure_page() {
        let f = ExtractionFailure::OcrFailed {
            page: 4,
            detail: "exit code 1".into(),
        };
        assert_eq!(f.page(), 4);
        assert!(f.to_string().contains("Page 4"));
    }
}
