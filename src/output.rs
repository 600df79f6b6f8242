//! Intermediate and final data produced by the pipeline stages.
//!
//! Everything here is plain data: created once by the stage that owns it and
//! never mutated afterwards. The typed report itself lives in
//! [`crate::record`].

use crate::error::ExtractionFailure;
use crate::record::DdrRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Which of the two source documents a piece of text came from.
///
/// The declaration order matters: inspection sorts before thermal, which is
/// the order merged content is laid out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Inspection,
    Thermal,
}

impl Origin {
    /// Label used inside the merged corpus and the prompt.
    pub fn label(self) -> &'static str {
        match self {
            Origin::Inspection => "[Inspection Report]",
            Origin::Thermal => "[Thermal Report]",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Inspection => f.write_str("inspection"),
            Origin::Thermal => f.write_str("thermal"),
        }
    }
}

/// How the text of a page was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Read from the PDF text layer.
    Native,
    /// Rasterised and passed through OCR.
    Recognized,
}

/// Text of a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// 0-indexed physical page position.
    pub page_index: usize,
    pub text: String,
    pub source: TextSource,
    /// Mean OCR word confidence in `0.0..=1.0`; `None` for native text or
    /// when recognition failed.
    pub confidence: Option<f32>,
}

impl PageText {
    pub fn native(page_index: usize, text: impl Into<String>) -> Self {
        Self {
            page_index,
            text: text.into(),
            source: TextSource::Native,
            confidence: None,
        }
    }

    pub fn recognized(page_index: usize, text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            page_index,
            text: text.into(),
            source: TextSource::Recognized,
            confidence,
        }
    }

    /// An empty recognised page: what a page degrades to when both native
    /// extraction and OCR fail.
    pub fn unreadable(page_index: usize) -> Self {
        Self::recognized(page_index, String::new(), None)
    }
}

/// Every page of one source document, in physical order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCorpus {
    pub origin: Origin,
    pub pages: Vec<PageText>,
    /// Page-local failures absorbed during extraction.
    #[serde(default)]
    pub failures: Vec<ExtractionFailure>,
}

impl DocumentCorpus {
    pub fn new(origin: Origin, pages: Vec<PageText>) -> Self {
        Self {
            origin,
            pages,
            failures: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of pages whose text came from OCR.
    pub fn recognized_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.source == TextSource::Recognized)
            .count()
    }
}

/// Section headings the merger recognises.
///
/// Sections are emitted in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SectionTag {
    PropertyDetails,
    Summary,
    Findings,
    ThermalAnomalies,
    RootCause,
    Recommendations,
}

impl SectionTag {
    pub const ALL: [SectionTag; 6] = [
        SectionTag::PropertyDetails,
        SectionTag::Summary,
        SectionTag::Findings,
        SectionTag::ThermalAnomalies,
        SectionTag::RootCause,
        SectionTag::Recommendations,
    ];

    pub fn title(self) -> &'static str {
        match self {
            SectionTag::PropertyDetails => "Property Details",
            SectionTag::Summary => "Summary",
            SectionTag::Findings => "Findings",
            SectionTag::ThermalAnomalies => "Thermal Anomalies",
            SectionTag::RootCause => "Root Cause",
            SectionTag::Recommendations => "Recommendations",
        }
    }
}

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// The cleaned, section-tagged corpus built from both documents.
///
/// Within every section (and in `raw`) inspection text precedes thermal
/// text, each introduced by its [`Origin::label`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedText {
    pub sections: BTreeMap<SectionTag, String>,
    /// Content that appeared under no recognised heading.
    pub raw: String,
    /// The inspection report contributed substantive text.
    pub inspection_present: bool,
    /// The thermal report contributed substantive text.
    pub thermal_present: bool,
}

impl MergedText {
    pub fn section(&self, tag: SectionTag) -> Option<&str> {
        self.sections.get(&tag).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.raw.trim().is_empty()
    }

    /// Total characters across sections and raw content.
    pub fn len(&self) -> usize {
        self.sections.values().map(String::len).sum::<usize>() + self.raw.len()
    }
}

/// The rendered report document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    /// Suggested file name; storage decides the final location.
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
}

/// Timing and volume figures for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub inspection_pages: usize,
    pub thermal_pages: usize,
    pub recognized_pages: usize,
    pub failed_pages: usize,
    pub merged_chars: usize,
    pub prompt_chars: usize,
    pub conflicts: usize,
    pub extract_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a full run produces.
#[derive(Debug, Clone)]
pub struct DdrReport {
    pub record: DdrRecord,
    pub artifact: ReportArtifact,
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_orders_inspection_first() {
        assert!(Origin::Inspection < Origin::Thermal);
        assert_eq!(Origin::Thermal.to_string(), "thermal");
    }

    #[test]
    fn unreadable_page_is_recognized_and_empty() {
        let p = PageText::unreadable(2);
        assert_eq!(p.source, TextSource::Recognized);
        assert!(p.text.is_empty());
        assert_eq!(p.confidence, None);
    }

    #[test]
    fn corpus_counts_recognized_pages() {
        let corpus = DocumentCorpus::new(
            Origin::Inspection,
            vec![
                PageText::native(0, "text"),
                PageText::recognized(1, "ocr", Some(0.9)),
            ],
        );
        assert_eq!(corpus.page_count(), 2);
        assert_eq!(corpus.recognized_pages(), 1);
    }

    #[test]
    fn sections_iterate_in_tag_order() {
        let mut merged = MergedText::default();
        merged.sections.insert(SectionTag::Recommendations, "r".into());
        merged.sections.insert(SectionTag::Findings, "f".into());
        let order: Vec<_> = merged.sections.keys().copied().collect();
        assert_eq!(order, vec![SectionTag::Findings, SectionTag::Recommendations]);
        assert_eq!(merged.len(), 2);
    }
}
