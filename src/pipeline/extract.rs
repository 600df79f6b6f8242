//! Text extraction: PDF bytes → one [`PageText`] per physical page.
//!
//! Each page is read from its text layer first. When the layer is too thin
//! to trust (see [`DensityPolicy`]) the page is rasterised and recognised
//! instead, and whatever thin text the layer had is kept ahead of the OCR
//! output. Page-level problems never fail the document: the page degrades
//! to that thin text (possibly empty) and an [`ExtractionFailure`] is kept
//! for diagnostics. Only an undecodable document, a missing pdfium library or
//! an OCR timeout is fatal.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy calls; it
//! must not run on Tokio worker threads. [`PdfiumBackend`] moves all pdfium
//! work onto the blocking pool. OCR is a child process and stays async.

use crate::config::{DdrConfig, DensityPolicy};
use crate::error::{DdrError, ExtractionFailure};
use crate::output::{DocumentCorpus, Origin, PageText};
use crate::pipeline::input::check_pdf_magic;
use crate::pipeline::ocr::{OcrEngine, OcrError, TesseractEngine};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the native backend should produce for each page.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub origin: Origin,
    pub density: DensityPolicy,
    /// Rasterise pages whose text layer is insufficient.
    pub rasterize: bool,
    pub max_rendered_pixels: u32,
}

/// One page as read by a [`PdfBackend`].
#[derive(Debug, Clone)]
pub struct RawPage {
    /// 0-indexed physical position.
    pub index: usize,
    /// Text layer content, or why it could not be read.
    pub native: Result<String, String>,
    /// Rendered image when requested for an insufficient page.
    pub raster: Option<Result<DynamicImage, String>>,
}

/// Source of per-page native text and page images.
#[async_trait]
pub trait PdfBackend: Send + Sync {
    /// Read every page of the document in physical order.
    ///
    /// Fails only when the document as a whole cannot be opened.
    async fn read_pages(&self, bytes: &[u8], options: ReadOptions) -> Result<Vec<RawPage>, DdrError>;
}

/// pdfium-backed reader. The library is located (and downloaded on first
/// use) through `pdfium-auto`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumBackend;

#[async_trait]
impl PdfBackend for PdfiumBackend {
    async fn read_pages(&self, bytes: &[u8], options: ReadOptions) -> Result<Vec<RawPage>, DdrError> {
        let owned = bytes.to_vec();
        tokio::task::spawn_blocking(move || read_pages_blocking(&owned, options))
            .await
            .map_err(|e| DdrError::Internal(format!("Extraction task panicked: {}", e)))?
    }
}

fn read_pages_blocking(bytes: &[u8], options: ReadOptions) -> Result<Vec<RawPage>, DdrError> {
    let pdfium = pdfium_auto::bind_pdfium_silent().map_err(|e| DdrError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| DdrError::CorruptPdf {
            origin: options.origin,
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("{} report loaded: {} pages", options.origin, total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(options.max_rendered_pixels as i32)
        .set_maximum_height(options.max_rendered_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page = match pages.get(idx as u16) {
            Ok(p) => p,
            Err(e) => {
                results.push(RawPage {
                    index: idx,
                    native: Err(format!("{:?}", e)),
                    raster: None,
                });
                continue;
            }
        };

        let native = page.text().map(|t| t.all()).map_err(|e| format!("{:?}", e));
        let needs_ocr = match &native {
            Ok(text) => !options.density.is_sufficient(text),
            Err(_) => true,
        };

        let raster = (options.rasterize && needs_ocr).then(|| {
            page.render_with_config(&render_config)
                .map(|bitmap| bitmap.as_image())
                .map_err(|e| format!("{:?}", e))
        });
        if let Some(Ok(img)) = &raster {
            debug!("Rendered page {} → {}x{} px", idx + 1, img.width(), img.height());
        }

        results.push(RawPage {
            index: idx,
            native,
            raster,
        });
    }

    Ok(results)
}

enum Slot {
    Done(PageText),
    Ocr { image: DynamicImage, sparse: String },
}

/// Thin native text followed by the recognised text, one per line.
fn join_recognized(sparse: &str, recognized: &str) -> String {
    [sparse.trim(), recognized.trim()]
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract every page of one report.
pub async fn extract(bytes: &[u8], origin: Origin, config: &DdrConfig) -> Result<DocumentCorpus, DdrError> {
    check_pdf_magic(bytes, origin)?;

    let backend: Arc<dyn PdfBackend> = match &config.pdf_backend {
        Some(b) => Arc::clone(b),
        None => Arc::new(PdfiumBackend),
    };
    let engine: Arc<dyn OcrEngine> = match &config.ocr_engine {
        Some(e) => Arc::clone(e),
        None => Arc::new(TesseractEngine::new(
            config.tesseract_path.clone(),
            config.ocr_language.clone(),
            Duration::from_secs(config.ocr_timeout_secs),
        )),
    };

    let options = ReadOptions {
        origin,
        density: config.density,
        rasterize: config.ocr_enabled,
        max_rendered_pixels: config.max_rendered_pixels,
    };
    let raw = backend.read_pages(bytes, options).await?;
    let total_pages = raw.len();

    let mut failures = Vec::new();
    let mut slots = Vec::with_capacity(total_pages);

    for page in raw {
        let page_num = page.index + 1;
        let native = match page.native {
            Ok(text) => text,
            Err(detail) => {
                warn!("{} page {}: text layer unreadable: {}", origin, page_num, detail);
                failures.push(ExtractionFailure::NativeFailed { page: page_num, detail });
                String::new()
            }
        };

        if config.density.is_sufficient(&native) {
            slots.push((page.index, Slot::Done(PageText::native(page.index, native))));
            continue;
        }

        // Below the threshold the page is recognised either way; its thin
        // text layer is all that remains if OCR cannot run.
        let sparse = native.trim().to_string();
        let fallback = |sparse: String| Slot::Done(PageText::recognized(page.index, sparse, None));

        if !config.ocr_enabled {
            debug!("{} page {}: insufficient text, OCR disabled", origin, page_num);
            failures.push(ExtractionFailure::OcrDisabled { page: page_num });
            slots.push((page.index, fallback(sparse)));
            continue;
        }

        match page.raster {
            Some(Ok(image)) => slots.push((page.index, Slot::Ocr { image, sparse })),
            Some(Err(detail)) => {
                warn!("{} page {}: rasterisation failed: {}", origin, page_num, detail);
                failures.push(ExtractionFailure::RenderFailed { page: page_num, detail });
                slots.push((page.index, fallback(sparse)));
            }
            None => {
                failures.push(ExtractionFailure::RenderFailed {
                    page: page_num,
                    detail: "backend returned no image".into(),
                });
                slots.push((page.index, fallback(sparse)));
            }
        }
    }

    let recognised: Vec<(usize, String, Result<PageText, OcrError>)> = stream::iter(slots)
        .map(|(index, slot)| {
            let engine = Arc::clone(&engine);
            async move {
                match slot {
                    Slot::Done(text) => (index, String::new(), Ok(text)),
                    Slot::Ocr { image, sparse } => {
                        let result = engine
                            .recognize(&image)
                            .await
                            .map(|r| PageText::recognized(index, join_recognized(&sparse, &r.text), r.confidence));
                        (index, sparse, result)
                    }
                }
            }
        })
        .buffered(config.ocr_concurrency.max(1))
        .collect()
        .await;

    let mut pages = Vec::with_capacity(total_pages);
    for (index, sparse, result) in recognised {
        let page = match result {
            Ok(page) => page,
            Err(OcrError::Timeout { secs }) => {
                return Err(DdrError::OcrTimeout {
                    origin,
                    page: index + 1,
                    secs,
                })
            }
            Err(OcrError::Failed(detail)) => {
                warn!("{} page {}: OCR failed: {}", origin, index + 1, detail);
                failures.push(ExtractionFailure::OcrFailed { page: index + 1, detail });
                PageText::recognized(index, sparse, None)
            }
        };
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_extracted(origin, index + 1, total_pages, page.source);
        }
        pages.push(page);
    }

    failures.sort_by_key(ExtractionFailure::page);
    let mut corpus = DocumentCorpus::new(origin, pages);
    corpus.failures = failures;
    info!(
        "{} report: {} pages, {} recognised, {} page failures",
        origin,
        corpus.page_count(),
        corpus.recognized_pages(),
        corpus.failures.len()
    );
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::TextSource;
    use crate::pipeline::ocr::Recognition;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DENSE: &str = "Observed dampness at skirting level in the hall, with efflorescence on the plaster.";

    struct FakeBackend(Vec<Result<String, String>>);

    #[async_trait]
    impl PdfBackend for FakeBackend {
        async fn read_pages(&self, _bytes: &[u8], options: ReadOptions) -> Result<Vec<RawPage>, DdrError> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(index, native)| {
                    let needs = native.as_ref().map(|t| !options.density.is_sufficient(t)).unwrap_or(true);
                    let raster = (options.rasterize && needs).then(|| {
                        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([255; 4]))))
                    });
                    RawPage {
                        index,
                        native: native.clone(),
                        raster,
                    }
                })
                .collect())
        }
    }

    struct FakeOcr {
        calls: AtomicUsize,
        outcome: fn() -> Result<Recognition, OcrError>,
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(&self, _image: &DynamicImage) -> Result<Recognition, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn ok_ocr() -> Result<Recognition, OcrError> {
        Ok(Recognition {
            text: "Scanned page text".into(),
            confidence: Some(0.8),
        })
    }

    fn config(pages: Vec<Result<String, String>>, outcome: fn() -> Result<Recognition, OcrError>) -> (DdrConfig, Arc<FakeOcr>) {
        let ocr = Arc::new(FakeOcr {
            calls: AtomicUsize::new(0),
            outcome,
        });
        let cfg = DdrConfig::builder()
            .pdf_backend(Arc::new(FakeBackend(pages)))
            .ocr_engine(ocr.clone())
            .build()
            .unwrap();
        (cfg, ocr)
    }

    #[tokio::test]
    async fn dense_pages_stay_native() {
        let (cfg, ocr) = config(vec![Ok(DENSE.into()), Ok(DENSE.into())], ok_ocr);
        let corpus = extract(b"%PDF-1.7", Origin::Inspection, &cfg).await.unwrap();
        assert_eq!(corpus.page_count(), 2);
        assert!(corpus.pages.iter().all(|p| p.source == TextSource::Native));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sparse_page_is_recognized_in_order() {
        let (cfg, ocr) = config(vec![Ok(DENSE.into()), Ok("3".into()), Ok(DENSE.into())], ok_ocr);
        let corpus = extract(b"%PDF-1.7", Origin::Thermal, &cfg).await.unwrap();
        let sources: Vec<_> = corpus.pages.iter().map(|p| p.source).collect();
        assert_eq!(sources, vec![TextSource::Native, TextSource::Recognized, TextSource::Native]);
        assert_eq!(corpus.pages[1].text, "3\nScanned page text");
        assert_eq!(corpus.pages[1].confidence, Some(0.8));
        assert_eq!(corpus.pages.iter().map(|p| p.page_index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ocr_failure_degrades_page() {
        let (cfg, _) = config(vec![Err("bad page".into())], || Err(OcrError::Failed("exit 1".into())));
        let corpus = extract(b"%PDF-1.7", Origin::Inspection, &cfg).await.unwrap();
        assert_eq!(corpus.pages[0], PageText::unreadable(0));
        assert_eq!(corpus.failures.len(), 2);
        assert!(matches!(corpus.failures[0], ExtractionFailure::NativeFailed { page: 1, .. }));
        assert!(matches!(corpus.failures[1], ExtractionFailure::OcrFailed { page: 1, .. }));
    }

    #[tokio::test]
    async fn ocr_timeout_is_fatal() {
        let (cfg, _) = config(vec![Ok(String::new())], || Err(OcrError::Timeout { secs: 60 }));
        let err = extract(b"%PDF-1.7", Origin::Thermal, &cfg).await.unwrap_err();
        assert!(matches!(err, DdrError::OcrTimeout { page: 1, secs: 60, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn ocr_disabled_records_failure() {
        let ocr = Arc::new(FakeOcr {
            calls: AtomicUsize::new(0),
            outcome: ok_ocr,
        });
        let cfg = DdrConfig::builder()
            .pdf_backend(Arc::new(FakeBackend(vec![Ok(String::new())])))
            .ocr_engine(ocr.clone())
            .ocr_enabled(false)
            .build()
            .unwrap();
        let corpus = extract(b"%PDF-1.7", Origin::Inspection, &cfg).await.unwrap();
        assert_eq!(corpus.pages[0].source, TextSource::Recognized);
        assert_eq!(corpus.failures, vec![ExtractionFailure::OcrDisabled { page: 1 }]);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sparse_text_kept_when_ocr_disabled() {
        let ocr = Arc::new(FakeOcr {
            calls: AtomicUsize::new(0),
            outcome: ok_ocr,
        });
        let cfg = DdrConfig::builder()
            .pdf_backend(Arc::new(FakeBackend(vec![Ok("Roof: OK. Gutter cracked at NE corner.".into())])))
            .ocr_engine(ocr.clone())
            .ocr_enabled(false)
            .build()
            .unwrap();
        let corpus = extract(b"%PDF-1.7", Origin::Inspection, &cfg).await.unwrap();
        assert_eq!(
            corpus.pages[0],
            PageText::recognized(0, "Roof: OK. Gutter cracked at NE corner.", None)
        );
        assert_eq!(corpus.failures, vec![ExtractionFailure::OcrDisabled { page: 1 }]);
    }

    #[tokio::test]
    async fn sparse_text_kept_when_ocr_fails() {
        let (cfg, _) = config(vec![Ok("  Gutter cracked. ".into())], || Err(OcrError::Failed("exit 1".into())));
        let corpus = extract(b"%PDF-1.7", Origin::Thermal, &cfg).await.unwrap();
        assert_eq!(corpus.pages[0].text, "Gutter cracked.");
        assert_eq!(corpus.pages[0].source, TextSource::Recognized);
        assert!(matches!(corpus.failures[0], ExtractionFailure::OcrFailed { page: 1, .. }));
    }

    #[tokio::test]
    async fn non_pdf_rejected_before_backend() {
        let (cfg, _) = config(vec![], ok_ocr);
        let err = extract(b"GIF89a", Origin::Inspection, &cfg).await.unwrap_err();
        assert!(matches!(err, DdrError::NotAPdf { .. }));
    }
}
