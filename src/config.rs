//! Configuration for a DDR run.
//!
//! Every knob lives in [`DdrConfig`], built through [`DdrConfigBuilder`].
//! Model credentials, provider names and backends are passed in explicitly;
//! nothing in the library reads the environment. The `ddr` binary is the
//! place where environment variables and flags are mapped onto this struct.

use crate::error::DdrError;
use crate::pipeline::extract::PdfBackend;
use crate::pipeline::llm::ModelClient;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for one inspection + thermal run.
///
/// # Example
/// ```rust
/// use ddr_report::{ConflictPolicy, DdrConfig};
///
/// let config = DdrConfig::builder()
///     .model("gpt-4.1-mini")
///     .provider_name("openai")
///     .conflict_policy(ConflictPolicy::InspectionFirst)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_tokens, 4096);
/// ```
#[derive(Clone)]
pub struct DdrConfig {
    /// LLM model identifier, e.g. "gpt-4.1-mini".
    pub model: Option<String>,

    /// Provider name handed to `ProviderFactory` (e.g. "openai", "openrouter").
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Fully custom model client. Takes precedence over `provider`.
    pub model_client: Option<Arc<dyn ModelClient>>,

    /// Native-text backend. Default: pdfium, bound on first use.
    pub pdf_backend: Option<Arc<dyn PdfBackend>>,

    /// OCR backend. Default: the Tesseract CLI.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Completion token limit for the single model call. Default: 4096.
    pub max_tokens: usize,

    /// Model call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// When a page's text layer counts as sufficient.
    pub density: DensityPolicy,

    /// Longest edge, in pixels, of a page rasterised for OCR. Default: 2480.
    ///
    /// 2480 px is an A4 page at 300 DPI.
    pub max_rendered_pixels: u32,

    /// Run OCR on pages with insufficient native text. Default: true.
    pub ocr_enabled: bool,

    /// Tesseract language code(s), e.g. "eng" or "eng+hin". Default: "eng".
    pub ocr_language: String,

    /// Path or name of the tesseract executable. Default: "tesseract".
    pub tesseract_path: String,

    /// Per-page OCR timeout in seconds. Default: 60. Exceeding it aborts the run.
    pub ocr_timeout_secs: u64,

    /// Pages recognised concurrently per document. Default: 4.
    pub ocr_concurrency: usize,

    /// Cap on characters contributed by each report to the merged corpus.
    /// Default: unlimited.
    pub max_chars_per_report: Option<usize>,

    /// Which report wins when the two disagree. Default: inspection.
    pub conflict_policy: ConflictPolicy,

    /// Custom Markdown report template. Default: the built-in template.
    pub template: Option<String>,

    /// Artifact format. Default: Markdown.
    pub format: ReportFormat,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Stage and page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DdrConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            model_client: None,
            pdf_backend: None,
            ocr_engine: None,
            temperature: 0.1,
            max_tokens: 4096,
            api_timeout_secs: 120,
            density: DensityPolicy::default(),
            max_rendered_pixels: 2480,
            ocr_enabled: true,
            ocr_language: "eng".to_string(),
            tesseract_path: "tesseract".to_string(),
            ocr_timeout_secs: 60,
            ocr_concurrency: 4,
            max_chars_per_report: None,
            conflict_policy: ConflictPolicy::default(),
            template: None,
            format: ReportFormat::default(),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DdrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DdrConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("model_client", &self.model_client.as_ref().map(|_| "<dyn ModelClient>"))
            .field("pdf_backend", &self.pdf_backend.as_ref().map(|_| "<dyn PdfBackend>"))
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("density", &self.density)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("ocr_enabled", &self.ocr_enabled)
            .field("ocr_language", &self.ocr_language)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("max_chars_per_report", &self.max_chars_per_report)
            .field("conflict_policy", &self.conflict_policy)
            .field("template", &self.template.as_ref().map(|t| t.len()))
            .field("format", &self.format)
            .finish()
    }
}

impl DdrConfig {
    pub fn builder() -> DdrConfigBuilder {
        DdrConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DdrConfig`].
#[derive(Debug)]
pub struct DdrConfigBuilder {
    config: DdrConfig,
}

impl DdrConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn model_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.config.model_client = Some(client);
        self
    }

    pub fn pdf_backend(mut self, backend: Arc<dyn PdfBackend>) -> Self {
        self.config.pdf_backend = Some(backend);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn density(mut self, policy: DensityPolicy) -> Self {
        self.config.density = policy;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn ocr_enabled(mut self, v: bool) -> Self {
        self.config.ocr_enabled = v;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<String>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn max_chars_per_report(mut self, n: usize) -> Self {
        self.config.max_chars_per_report = Some(n);
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.config.conflict_policy = policy;
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.config.template = Some(template.into());
        self
    }

    pub fn format(mut self, format: ReportFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DdrConfig, DdrError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(DdrError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 || c.ocr_timeout_secs == 0 {
            return Err(DdrError::InvalidConfig("timeouts must be ≥ 1 second".into()));
        }
        if !(0.0..=1.0).contains(&c.density.min_printable_ratio) {
            return Err(DdrError::InvalidConfig(format!(
                "min_printable_ratio must be 0.0–1.0, got {}",
                c.density.min_printable_ratio
            )));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(DdrError::InvalidConfig("ocr_language must not be empty".into()));
        }
        if c.max_chars_per_report == Some(0) {
            return Err(DdrError::InvalidConfig("max_chars_per_report must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Policies ─────────────────────────────────────────────────────────────

/// Which report's value is kept when inspection and thermal evidence disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Inspection is the primary source. (default)
    #[default]
    InspectionFirst,
    ThermalFirst,
}

/// File format of the rendered report. Both are produced from the same
/// checked template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Markdown,
    /// Word document, one paragraph per template line.
    Docx,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Docx => "docx",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ReportFormat::Markdown => "text/markdown",
            ReportFormat::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        }
    }
}

/// Threshold deciding whether a page's native text layer is usable.
///
/// A page is sufficient when it carries at least `min_chars` alphanumeric
/// characters and printable characters make up at least
/// `min_printable_ratio` of its non-whitespace characters. Scanned pages
/// typically have no text layer at all; broken font encodings show up as a
/// low printable ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityPolicy {
    pub min_chars: usize,
    pub min_printable_ratio: f32,
}

impl Default for DensityPolicy {
    fn default() -> Self {
        Self {
            min_chars: 40,
            min_printable_ratio: 0.6,
        }
    }
}

impl DensityPolicy {
    pub fn is_sufficient(&self, text: &str) -> bool {
        let mut alnum = 0usize;
        let mut printable = 0usize;
        let mut visible = 0usize;
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            visible += 1;
            if c.is_alphanumeric() {
                alnum += 1;
            }
            if !c.is_control() && c != '\u{FFFD}' && !is_private_use(c) {
                printable += 1;
            }
        }
        if alnum < self.min_chars || visible == 0 {
            return false;
        }
        printable as f32 / visible as f32 >= self.min_printable_ratio
    }
}

fn is_private_use(c: char) -> bool {
    ('\u{E000}'..='\u{F8FF}').contains(&c)
}
