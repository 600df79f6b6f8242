//! Public entry points: two PDFs in, a validated record and a rendered
//! report out.
//!
//! [`produce_report`] runs every stage. The stage functions
//! ([`extract_documents`], [`merge_documents`], [`record_from_merged`],
//! [`render_record`]) are public too, so a caller can keep the merged corpus
//! and re-run only generation when the model answer is rejected. The core
//! itself never retries.

use crate::config::DdrConfig;
use crate::error::DdrError;
use crate::output::{DdrReport, DocumentCorpus, MergedText, Origin, ReportArtifact, RunStats};
use crate::pipeline::extract::extract;
use crate::pipeline::input::load_input;
use crate::pipeline::llm::{generate, resolve_client};
use crate::pipeline::merge::merge_capped;
use crate::pipeline::render::{render_as, Template};
use crate::pipeline::validate::Validator;
use crate::progress::{NoopProgressCallback, PipelineProgressCallback, Stage};
use crate::record::DdrRecord;
use crate::schema::SchemaSpec;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Produce the validated record for one inspection + thermal pair.
///
/// # Errors
/// Fatal errors only. Unreadable pages are absorbed during extraction and
/// show up as `Not Available` fields, never as an error.
pub async fn produce_record(inspection: &[u8], thermal: &[u8], config: &DdrConfig) -> Result<DdrRecord, DdrError> {
    let result = run_to_record(inspection, thermal, config).await;
    progress_of(config).on_run_complete(result.is_ok());
    result.map(|(record, _)| record)
}

/// Render a validated record with the configured template (or the built-in
/// one) in the configured format.
pub fn render_record(record: &DdrRecord, config: &DdrConfig) -> Result<ReportArtifact, DdrError> {
    let progress = progress_of(config);
    progress.on_stage_start(Stage::Render);
    let start = Instant::now();

    let template = match config.template {
        Some(ref source) => Template::parse(source)?,
        None => Template::builtin()?,
    };
    let artifact = render_as(record, &template, config.format)?;

    progress.on_stage_complete(Stage::Render, elapsed_ms(start));
    Ok(artifact)
}

/// Run every stage and return the record, the rendered artifact and run
/// statistics.
///
/// # Example
/// ```rust,no_run
/// use ddr_report::{produce_report, write_artifact, DdrConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DdrConfig::builder()
///         .provider_name("openai")
///         .model("gpt-4.1-mini")
///         .build()?;
///     let inspection = std::fs::read("inspection.pdf")?;
///     let thermal = std::fs::read("thermal.pdf")?;
///     let report = produce_report(&inspection, &thermal, &config).await?;
///     let path = write_artifact(&report.artifact, "reports").await?;
///     eprintln!("{} areas → {}", report.record.area_list().len(), path.display());
///     Ok(())
/// }
/// ```
pub async fn produce_report(inspection: &[u8], thermal: &[u8], config: &DdrConfig) -> Result<DdrReport, DdrError> {
    let total = Instant::now();
    let result = async {
        let (record, mut stats) = run_to_record(inspection, thermal, config).await?;
        let artifact = render_record(&record, config)?;
        stats.total_duration_ms = elapsed_ms(total);
        Ok::<_, DdrError>(DdrReport {
            record,
            artifact,
            stats,
        })
    }
    .await;
    progress_of(config).on_run_complete(result.is_ok());
    result
}

/// [`produce_record`] for local paths or HTTP(S) URLs.
pub async fn produce_record_from_inputs(
    inspection: impl AsRef<str>,
    thermal: impl AsRef<str>,
    config: &DdrConfig,
) -> Result<DdrRecord, DdrError> {
    let (a, b) = load_inputs(inspection.as_ref(), thermal.as_ref(), config).await?;
    produce_record(&a, &b, config).await
}

/// Synchronous wrapper around [`produce_report`].
///
/// Creates a temporary tokio runtime internally.
pub fn produce_report_sync(inspection: &[u8], thermal: &[u8], config: &DdrConfig) -> Result<DdrReport, DdrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DdrError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(produce_report(inspection, thermal, config))
}

/// Read (or download) both documents concurrently.
pub async fn load_inputs(
    inspection: &str,
    thermal: &str,
    config: &DdrConfig,
) -> Result<(Vec<u8>, Vec<u8>), DdrError> {
    let (a, b) = tokio::join!(
        load_input(inspection, Origin::Inspection, config.download_timeout_secs),
        load_input(thermal, Origin::Thermal, config.download_timeout_secs),
    );
    Ok((a?, b?))
}

/// Extract both documents concurrently. Both must finish before merging.
pub async fn extract_documents(
    inspection: &[u8],
    thermal: &[u8],
    config: &DdrConfig,
) -> Result<(DocumentCorpus, DocumentCorpus), DdrError> {
    let progress = progress_of(config);
    progress.on_stage_start(Stage::Extract);
    let start = Instant::now();

    let (a, b) = tokio::join!(
        extract(inspection, Origin::Inspection, config),
        extract(thermal, Origin::Thermal, config),
    );
    let corpora = (a?, b?);

    progress.on_stage_complete(Stage::Extract, elapsed_ms(start));
    Ok(corpora)
}

/// Merge both corpora, applying the configured per-report character cap.
pub fn merge_documents(inspection: &DocumentCorpus, thermal: &DocumentCorpus, config: &DdrConfig) -> MergedText {
    let progress = progress_of(config);
    progress.on_stage_start(Stage::Merge);
    let start = Instant::now();

    let merged = merge_capped(inspection, thermal, config.max_chars_per_report);
    progress.on_stage_complete(Stage::Merge, elapsed_ms(start));
    if merged.is_empty() {
        warn!("Neither report produced readable text; every field will be Not Available");
    } else if !merged.thermal_present {
        warn!("Thermal report produced no readable text");
    } else if !merged.inspection_present {
        warn!("Inspection report produced no readable text");
    }
    merged
}

/// Generation and validation over an already merged corpus.
///
/// This is the unit to repeat when a [`DdrError::is_retryable`] error comes
/// back; extraction and merging need not run again.
pub async fn record_from_merged(merged: &MergedText, config: &DdrConfig) -> Result<DdrRecord, DdrError> {
    generate_validated(merged, config).await.map(|g| g.record)
}

/// Write the artifact into `dir` under its suggested name.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_artifact(artifact: &ReportArtifact, dir: impl AsRef<Path>) -> Result<PathBuf, DdrError> {
    let dir = dir.as_ref();
    let path = dir.join(&artifact.path);
    let write_err = |e| DdrError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    };

    tokio::fs::create_dir_all(dir).await.map_err(write_err)?;

    let mut tmp_name = path.clone().into_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, &artifact.bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, &path).await.map_err(write_err)?;

    info!("Report written to {}", path.display());
    Ok(path)
}

// ── Internals ─────────────────────────────────────────────────────────────

struct Generated {
    record: DdrRecord,
    prompt_chars: usize,
    llm_duration_ms: u64,
}

async fn run_to_record(
    inspection: &[u8],
    thermal: &[u8],
    config: &DdrConfig,
) -> Result<(DdrRecord, RunStats), DdrError> {
    let total = Instant::now();
    info!(
        "Starting DDR run: inspection {} bytes, thermal {} bytes",
        inspection.len(),
        thermal.len()
    );

    // ── Step 1: Extract both reports ─────────────────────────────────────
    let start = Instant::now();
    let (insp, therm) = extract_documents(inspection, thermal, config).await?;
    let extract_duration_ms = elapsed_ms(start);

    // ── Step 2: Merge ────────────────────────────────────────────────────
    let merged = merge_documents(&insp, &therm, config);
    debug!(
        "Merged corpus: {} chars, {} tagged sections",
        merged.len(),
        merged.sections.len()
    );

    // ── Step 3: Generate + validate ──────────────────────────────────────
    let generated = generate_validated(&merged, config).await?;

    let stats = RunStats {
        inspection_pages: insp.page_count(),
        thermal_pages: therm.page_count(),
        recognized_pages: insp.recognized_pages() + therm.recognized_pages(),
        failed_pages: insp.failures.len() + therm.failures.len(),
        merged_chars: merged.len(),
        prompt_chars: generated.prompt_chars,
        conflicts: generated.record.conflicts.len(),
        extract_duration_ms,
        llm_duration_ms: generated.llm_duration_ms,
        total_duration_ms: elapsed_ms(total),
    };
    info!(
        "DDR complete: {} areas, {} conflicts, {}/{} pages recognised, {} page failures, {}ms",
        generated.record.area_list().len(),
        stats.conflicts,
        stats.recognized_pages,
        stats.inspection_pages + stats.thermal_pages,
        stats.failed_pages,
        stats.total_duration_ms
    );
    Ok((generated.record, stats))
}

async fn generate_validated(merged: &MergedText, config: &DdrConfig) -> Result<Generated, DdrError> {
    let progress = progress_of(config);
    let client = resolve_client(config)?;
    let schema = SchemaSpec::ddr();

    progress.on_stage_start(Stage::Generate);
    let start = Instant::now();
    let candidate = generate(merged, &schema, client.as_ref(), config).await?;
    let llm_duration_ms = elapsed_ms(start);
    progress.on_stage_complete(Stage::Generate, llm_duration_ms);

    progress.on_stage_start(Stage::Validate);
    let start = Instant::now();
    let record = Validator::new(config.conflict_policy)
        .with_evidence(merged)
        .validate(&candidate.fields)?;
    progress.on_stage_complete(Stage::Validate, elapsed_ms(start));

    Ok(Generated {
        record,
        prompt_chars: candidate.prompt_chars,
        llm_duration_ms,
    })
}

fn progress_of(config: &DdrConfig) -> &dyn PipelineProgressCallback {
    match config.progress_callback {
        Some(ref cb) => cb.as_ref(),
        None => &NoopProgressCallback,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ReportArtifact;

    #[tokio::test]
    async fn write_artifact_is_atomic_and_named() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ReportArtifact {
            path: PathBuf::from("ddr_report_19700101T000000Z_abcdef012345.md"),
            bytes: b"# Detailed Diagnostic Report\n".to_vec(),
            media_type: "text/markdown",
        };
        let out = dir.path().join("nested");
        let path = write_artifact(&artifact, &out).await.unwrap();
        assert_eq!(path, out.join("ddr_report_19700101T000000Z_abcdef012345.md"));
        assert_eq!(std::fs::read(&path).unwrap(), artifact.bytes);
        assert!(!path.with_extension("md.tmp").exists());
    }

    #[tokio::test]
    async fn missing_provider_is_reported_before_any_model_call() {
        let merged = MergedText::default();
        let err = record_from_merged(&merged, &DdrConfig::default()).await.unwrap_err();
        assert!(matches!(err, DdrError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn render_record_uses_configured_format() {
        let config = DdrConfig::builder().format(crate::config::ReportFormat::Docx).build().unwrap();
        let artifact = render_record(&DdrRecord::default(), &config).unwrap();
        assert!(artifact.path.to_string_lossy().ends_with(".docx"));
        assert!(artifact.bytes.starts_with(b"PK"));
    }

    #[test]
    fn render_record_uses_configured_template() {
        let config = DdrConfig::builder().template("{{oops}}").build().unwrap();
        let err = render_record(&DdrRecord::default(), &config).unwrap_err();
        assert!(matches!(err, DdrError::Render { .. }));
    }
}
