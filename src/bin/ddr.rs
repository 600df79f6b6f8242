//! CLI binary for ddr-report.
//!
//! A thin shim over the library crate: maps flags and environment variables
//! to `DdrConfig`, picks the model provider, retries rejected generations
//! and writes the report.

use anyhow::{Context, Result};
use clap::Parser;
use ddr_report::{
    extract_documents, load_inputs, merge_documents, record_from_merged, render_record, write_artifact,
    ConflictPolicy, DdrConfig, Origin, PipelineProgressCallback, ProgressCallback, ReportFormat, Stage, TextSource,
};
use edgequake_llm::ProviderFactory;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Model used when a provider is chosen without naming a model.
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner line for the running stage, plus a log
/// line per finished stage and per recognised page. Pages of the two
/// reports arrive interleaved.
struct CliProgressCallback {
    bar: ProgressBar,
    pages: AtomicUsize,
    recognized: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening reports…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            pages: AtomicUsize::new(0),
            recognized: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let (prefix, msg) = match stage {
            Stage::Extract => ("Extracting", "reading pages…"),
            Stage::Merge => ("Merging", "cleaning and tagging text…"),
            Stage::Generate => ("Generating", "waiting for the model…"),
            Stage::Validate => ("Validating", "checking every field…"),
            Stage::Render => ("Rendering", "writing the report…"),
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_page_extracted(&self, origin: Origin, page_num: usize, total_pages: usize, source: TextSource) {
        self.pages.fetch_add(1, Ordering::SeqCst);
        self.bar.set_message(format!("{origin} page {page_num}/{total_pages}"));
        if source == TextSource::Recognized {
            self.recognized.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} {:<10} page {:>3}/{:<3}  {}",
                cyan("◌"),
                origin,
                page_num,
                total_pages,
                dim("OCR")
            ));
        }
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let detail = match stage {
            Stage::Extract => format!(
                "{} pages, {} via OCR",
                self.pages.load(Ordering::SeqCst),
                self.recognized.load(Ordering::SeqCst)
            ),
            _ => String::new(),
        };
        self.bar.println(format!(
            "  {} {:<9} {:<28} {}",
            green("✓"),
            stage,
            dim(&detail),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_run_complete(&self, _success: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Build a DDR into the current directory
  ddr inspection.pdf thermal.pdf

  # Write into reports/ and print the validated record as JSON
  ddr inspection.pdf thermal.pdf -o reports --json > record.json

  # Prefer thermal evidence when the two reports disagree
  ddr --conflict-policy thermal inspection.pdf thermal.pdf

  # Scanned reports in German, custom tesseract build
  ddr --ocr-lang deu --tesseract /opt/tesseract/bin/tesseract a.pdf b.pdf

  # Fully born-digital reports: skip OCR entirely
  ddr --no-ocr inspection.pdf thermal.pdf

  # Custom Markdown layout
  ddr --template my_layout.md inspection.pdf thermal.pdf

  # Word document instead of Markdown
  ddr --format docx inspection.pdf thermal.pdf

  # Reports from URLs
  ddr https://example.com/inspection.pdf https://example.com/thermal.pdf

TEMPLATES:
  Placeholders:  {{property_issue_summary}} {{probable_root_cause}}
                 {{overall_severity}} {{severity_reasoning}} {{confidence_level}}
                 {{confidence_reasoning}} {{thermal_anomalies}}
                 {{recommended_actions}} {{risk_implications}} {{additional_notes}}
  Area block:    {{#areas}} … {{/areas}} with {{area}} {{inspection_observation}}
                 {{thermal_observation}} {{merged_finding}} {{severity}}
                 {{dampness_type}} {{recommendation}} {{inspection_evidence_ref}}
                 {{thermal_evidence_ref}} {{conflict_note}}
  Missing block: {{#missing_information}} … {{item}} … {{/missing_information}}
  Every placeholder must appear exactly once.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider, honoured together with EDGEQUAKE_MODEL
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium — skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory

SETUP:
  1. Set API key:      export OPENAI_API_KEY=sk-...
  2. Install OCR:      apt install tesseract-ocr   (only needed for scanned pages)
  3. Run:              ddr inspection.pdf thermal.pdf

  PDFium (~30 MB) is downloaded automatically on first run and cached.
  To use an existing pdfium copy: PDFIUM_LIB_PATH=/path/to/libpdfium ddr ...
"#;

/// Build a Detailed Diagnostic Report from an inspection and a thermal PDF.
#[derive(Parser, Debug)]
#[command(
    name = "ddr",
    version,
    about = "Build a Detailed Diagnostic Report from an inspection and a thermal PDF",
    long_about = "Reads a building inspection report and a thermal-imaging report (local files or URLs), \
merges their text (with OCR for scanned pages), asks an LLM for a structured diagnosis once, validates \
every field and renders a Markdown report. Unsupported facts are written as \"Not Available\".",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Inspection report: local PDF path or HTTP/HTTPS URL.
    inspection: String,

    /// Thermal report: local PDF path or HTTP/HTTPS URL.
    thermal: String,

    /// Directory the report is written to.
    #[arg(short, long = "output-dir", env = "DDR_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Also print the validated record as JSON on stdout.
    #[arg(long, env = "DDR_JSON")]
    json: bool,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DDR_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "DDR_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM call timeout in seconds.
    #[arg(long, env = "DDR_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Extra generation attempts after a rejected or failed model answer.
    #[arg(long, env = "DDR_RETRIES", default_value_t = 2)]
    retries: u32,

    /// Initial retry backoff in milliseconds; doubles per attempt.
    #[arg(long, env = "DDR_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Which report wins when the two disagree.
    #[arg(long, env = "DDR_CONFLICT_POLICY", value_enum, default_value = "inspection")]
    conflict_policy: ConflictArg,

    /// Never OCR; pages without a usable text layer stay empty.
    #[arg(long, env = "DDR_NO_OCR")]
    no_ocr: bool,

    /// Tesseract language code(s), e.g. eng or eng+deu.
    #[arg(long, env = "DDR_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Path to the tesseract binary.
    #[arg(long, env = "DDR_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Per-page OCR timeout in seconds.
    #[arg(long, env = "DDR_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,

    /// Markdown template file replacing the built-in layout.
    #[arg(long, env = "DDR_TEMPLATE")]
    template: Option<PathBuf>,

    /// Report file format.
    #[arg(long, env = "DDR_FORMAT", value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Truncate each report's cleaned text to this many characters.
    #[arg(long, env = "DDR_MAX_CHARS_PER_REPORT")]
    max_chars_per_report: Option<usize>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DDR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DDR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DDR_QUIET")]
    quiet: bool,

    /// Disable progress display.
    #[arg(long, env = "DDR_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ConflictArg {
    Inspection,
    Thermal,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(v: ConflictArg) -> Self {
        match v {
            ConflictArg::Inspection => ConflictPolicy::InspectionFirst,
            ConflictArg::Thermal => ConflictPolicy::ThermalFirst,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Docx,
}

impl From<FormatArg> for ReportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => ReportFormat::Markdown,
            FormatArg::Docx => ReportFormat::Docx,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let total = Instant::now();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level library logs while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Ensure PDFium engine is available ───────────────────────────────────
    #[cfg(feature = "bundled")]
    {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_bundled())
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    if !pdfium_auto::is_pdfium_cached() {
        if !cli.quiet {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|cb| cb as ProgressCallback)).await?;

    let result = run(&cli, &config).await;
    if let Some(ref cb) = progress {
        cb.on_run_complete(result.is_ok());
    }
    let (path, areas, conflicts, pages, recognized) = match result {
        Ok(summary) => summary,
        Err(e) => {
            if !cli.quiet {
                eprintln!("{} {}", red("✘"), bold("DDR generation failed"));
            }
            return Err(e);
        }
    };

    if !cli.quiet {
        eprintln!(
            "{}  {} areas  {} conflicts  {}/{} pages via OCR  {}ms  →  {}",
            green("✔"),
            areas,
            conflicts,
            recognized,
            pages,
            total.elapsed().as_millis(),
            bold(&path.display().to_string()),
        );
    }
    Ok(())
}

/// The pipeline, stage by stage, with generation retried on the merged
/// corpus. Returns (path, areas, conflicts, pages, recognised pages).
async fn run(cli: &Cli, config: &DdrConfig) -> Result<(PathBuf, usize, usize, usize, usize)> {
    let (inspection, thermal) = load_inputs(&cli.inspection, &cli.thermal, config)
        .await
        .context("Failed to load input reports")?;

    let (insp, therm) = extract_documents(&inspection, &thermal, config)
        .await
        .context("Text extraction failed")?;
    let merged = merge_documents(&insp, &therm, config);

    let mut attempt = 0u32;
    let record = loop {
        attempt += 1;
        match record_from_merged(&merged, config).await {
            Ok(record) => break record,
            Err(e) if e.is_retryable() && attempt <= cli.retries => {
                let backoff = cli.retry_backoff_ms * 2u64.pow(attempt - 1);
                tracing::warn!(
                    "Generation attempt {}/{} failed at {}: {}; retrying in {}ms",
                    attempt,
                    cli.retries + 1,
                    e.stage(),
                    e,
                    backoff
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                let stage = e.stage();
                return Err(anyhow::Error::new(e)
                    .context(format!("DDR {stage} stage failed after {attempt} attempt(s)")));
            }
        }
    };

    let artifact = render_record(&record, config).context("Report rendering failed")?;
    let path = write_artifact(&artifact, &cli.output_dir)
        .await
        .context("Failed to write report")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record).context("Failed to serialise record")?
        );
    }

    Ok((
        path,
        record.area_list().len(),
        record.conflicts.len(),
        insp.page_count() + therm.page_count(),
        insp.recognized_pages() + therm.recognized_pages(),
    ))
}

/// Map CLI args and environment to `DdrConfig`.
///
/// Provider resolution, from most-specific to least-specific:
///
/// 1. `--provider` (or `EDGEQUAKE_PROVIDER`) with `--model`
/// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set
/// 3. `OPENAI_API_KEY` present → openai
/// 4. `ProviderFactory::from_env`, which scans every known key variable
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DdrConfig> {
    let mut builder = DdrConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .conflict_policy(cli.conflict_policy.into())
        .format(cli.format.into())
        .ocr_enabled(!cli.no_ocr)
        .ocr_language(cli.ocr_lang.clone())
        .tesseract_path(cli.tesseract.clone())
        .ocr_timeout_secs(cli.ocr_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(n) = cli.max_chars_per_report {
        builder = builder.max_chars_per_report(n);
    }

    if let Some(ref path) = cli.template {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template from {:?}", path))?;
        builder = builder.template(template);
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let model = cli.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    builder = if let Some(ref name) = cli.provider {
        builder.provider_name(name.clone()).model(model)
    } else if let (Some(prov), Some(env_model)) = (env("EDGEQUAKE_LLM_PROVIDER"), env("EDGEQUAKE_MODEL")) {
        builder.provider_name(prov).model(env_model)
    } else if env("OPENAI_API_KEY").is_some() {
        builder.provider_name("openai").model(model)
    } else {
        let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
            anyhow::anyhow!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                 Error: {e}"
            )
        })?;
        builder.provider(llm).model(model)
    };

    builder.build().context("Invalid configuration")
}
