//! # ddr-report
//!
//! Turn a building inspection report and a thermal-imaging report (both PDF)
//! into a validated Detailed Diagnostic Report (DDR).
//!
//! ## Why this crate?
//!
//! Site reports come as a mix of born-digital and scanned PDFs, and the two
//! reports on the same property often disagree. This crate reads both,
//! falls back to OCR only for pages without a usable text layer, merges them
//! into one cleaned corpus, asks a language model for a structured answer
//! exactly once, and then refuses to trust that answer: every field is
//! coerced against a fixed schema, missing facts become the literal
//! `"Not Available"`, and inspection/thermal contradictions are resolved by
//! policy and recorded.
//!
//! ## Pipeline Overview
//!
//! ```text
//! inspection.pdf ─┐
//!                 ├─ 1. Extract   native text, OCR fallback (concurrent)
//! thermal.pdf ────┘
//!                    2. Merge     normalise, de-boilerplate, tag sections
//!                    3. Generate  one model call → candidate JSON
//!                    4. Validate  typed DdrRecord, sentinels, conflicts
//!                    5. Render    Markdown template → ReportArtifact (.md or .docx)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ddr_report::{produce_report, DdrConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DdrConfig::builder()
//!         .provider_name("openai")
//!         .model("gpt-4.1-mini")
//!         .build()?;
//!     let report = produce_report(
//!         &std::fs::read("inspection.pdf")?,
//!         &std::fs::read("thermal.pdf")?,
//!         &config,
//!     )
//!     .await?;
//!     println!("{}", String::from_utf8_lossy(&report.artifact.bytes));
//!     eprintln!("{} conflicts resolved", report.stats.conflicts);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `ddr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `bundled` | off     | Embeds libpdfium in the binary instead of downloading it on first use |
//!
//! ## External tools
//!
//! OCR uses the `tesseract` CLI, which must be on `PATH` (or configured via
//! [`DdrConfigBuilder::tesseract_path`]) when any page needs recognising.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod produce;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConflictPolicy, DdrConfig, DdrConfigBuilder, DensityPolicy, ReportFormat};
pub use error::{DdrError, ExtractionFailure};
pub use output::{
    DdrReport, DocumentCorpus, MergedText, Origin, PageText, ReportArtifact, RunStats, SectionTag, TextSource,
};
pub use pipeline::extract::{PdfBackend, PdfiumBackend};
pub use pipeline::llm::{ModelClient, ModelRequest, ProviderClient};
pub use pipeline::ocr::{OcrEngine, TesseractEngine};
pub use produce::{
    extract_documents, load_inputs, merge_documents, produce_record, produce_record_from_inputs, produce_report,
    produce_report_sync, record_from_merged, render_record, write_artifact,
};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use record::{
    AreaObservation, ConfidenceLevel, Conflict, Dampness, DampnessClassification, DampnessKind, DdrRecord, Field,
    Severity, SeverityAssessment, NOT_AVAILABLE,
};
pub use schema::SchemaSpec;
