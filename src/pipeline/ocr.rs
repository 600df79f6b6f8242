//! Optical character recognition for pages without a usable text layer.
//!
//! The default engine shells out to the Tesseract CLI in TSV mode, which
//! gives per-word confidences alongside the text. The rasterised page is
//! written losslessly as PNG: JPEG artefacts around glyph edges cost
//! recognition accuracy.

use async_trait::async_trait;
use image::DynamicImage;
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Text recognised on one page image.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence in `0.0..=1.0`, `None` when no word was found.
    pub confidence: Option<f32>,
}

#[derive(Debug, Error)]
pub enum OcrError {
    /// Recognition did not finish in time. Aborts the run.
    #[error("recognition timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The engine failed on this page. The page degrades to empty text.
    #[error("{0}")]
    Failed(String),
}

/// A backend that turns a page image into text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &DynamicImage) -> Result<Recognition, OcrError>;
}

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Tesseract CLI engine: `tesseract <png> stdout -l <lang> tsv`.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    pub binary: String,
    pub language: String,
    pub timeout: Duration,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<String>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
            timeout,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &DynamicImage) -> Result<Recognition, OcrError> {
        let png = encode_png(image).map_err(|e| OcrError::Failed(format!("PNG encoding failed: {e}")))?;

        let file = tempfile::Builder::new()
            .prefix("ddr-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Failed(format!("temp file: {e}")))?;
        tokio::fs::write(file.path(), &png)
            .await
            .map_err(|e| OcrError::Failed(format!("temp file write: {e}")))?;

        let child = tokio::process::Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(OcrError::Failed(format!(
                    "failed to run tesseract (is it installed? path='{}'): {e}",
                    self.binary
                )))
            }
            Err(_) => {
                return Err(OcrError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "tesseract exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv(&tsv))
    }
}

/// Reassemble Tesseract TSV output into text.
///
/// Words sharing `(block, paragraph, line)` are joined with spaces; a new
/// paragraph starts after a blank line. Words with negative confidence are
/// layout rows and are skipped.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut current: Option<(u32, u32, u32)> = None;
    let mut conf_sum = 0.0f32;
    let mut words = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.splitn(12, '\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        let conf: f32 = match cols[10].trim().parse() {
            Ok(c) if c >= 0.0 => c,
            _ => continue,
        };
        if word.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let key = (num(2), num(3), num(4));

        match current {
            Some(prev) if prev == key => text.push(' '),
            Some(prev) if (prev.0, prev.1) == (key.0, key.1) => text.push('\n'),
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        current = Some(key);
        text.push_str(word);
        conf_sum += conf;
        words += 1;
    }

    let confidence = (words > 0).then(|| (conf_sum / words as f32 / 100.0).clamp(0.0, 1.0));
    Recognition { text, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn word(block: u32, par: u32, line: u32, n: u32, conf: f32, text: &str) -> String {
        format!("5\t1\t{block}\t{par}\t{line}\t{n}\t0\t0\t10\t10\t{conf}\t{text}")
    }

    #[test]
    fn tsv_groups_words_into_lines_and_paragraphs() {
        let tsv = [
            HEADER.to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t".to_string(),
            word(1, 1, 1, 1, 90.0, "Dampness"),
            word(1, 1, 1, 2, 80.0, "observed"),
            word(1, 1, 2, 1, 70.0, "skirting"),
            word(2, 1, 1, 1, 60.0, "Hall"),
        ]
        .join("\n");
        let r = parse_tsv(&tsv);
        assert_eq!(r.text, "Dampness observed\nskirting\n\nHall");
        let c = r.confidence.unwrap();
        assert!((c - 0.75).abs() < 1e-4, "got {c}");
    }

    #[test]
    fn tsv_without_words_has_no_confidence() {
        let r = parse_tsv(HEADER);
        assert!(r.text.is_empty());
        assert_eq!(r.confidence, None);
    }

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn missing_binary_is_a_page_failure() {
        let engine = TesseractEngine::new("/nonexistent/tesseract", "eng", Duration::from_secs(5));
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let err = engine.recognize(&img).await.unwrap_err();
        assert!(matches!(err, OcrError::Failed(_)), "got {err:?}");
    }
}
