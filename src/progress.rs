//! Progress-callback trait for pipeline stage and page events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::DdrConfigBuilder::progress_callback`] to follow a run as
//! it moves through extraction, merging, generation, validation and
//! rendering.
//!
//! # Example
//!
//! ```rust
//! use ddr_report::{DdrConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done");
//!     }
//! }
//!
//! let config = DdrConfig::builder()
//!     .progress_callback(Arc::new(StageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Origin;
use crate::output::TextSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Merge,
    Generate,
    Validate,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extract => "extract",
            Stage::Merge => "merge",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Render => "render",
        })
    }
}

/// Called by the pipeline as it runs.
///
/// Implementations must be `Send + Sync`: the two documents are extracted
/// concurrently, so `on_page_extracted` may be called from different tasks at
/// the same time. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once per page after its text has been obtained.
    ///
    /// # Arguments
    /// * `origin`      — which report the page belongs to
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in that report
    /// * `source`      — native text layer or OCR
    fn on_page_extracted(&self, origin: Origin, page_num: usize, total_pages: usize, source: TextSource) {
        let _ = (origin, page_num, total_pages, source);
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called once, after the last stage that ran. `success` is false when a
    /// fatal error stopped the run.
    fn on_run_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DdrConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
