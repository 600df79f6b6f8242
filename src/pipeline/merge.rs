//! Merging: two extracted corpora → one cleaned, section-tagged [`MergedText`].
//!
//! Extracted text is noisy in predictable ways: ligatures and full-width
//! forms from PDF fonts, zero-width characters, running headers and page
//! numbers on every page, and inspectors' room abbreviations. The rules
//! below remove that noise deterministically and then sort the content of
//! each report under the headings it recognises.
//!
//! ## Rule Order
//!
//! Character-level rules run per page before line-level rules, so that
//! boilerplate detection compares lines that have already been normalised.
//! Abbreviations are expanded after boilerplate removal because a running
//! header must match itself on every page, expanded or not.

use crate::output::{DocumentCorpus, MergedText, Origin, SectionTag};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

/// Lines at each end of a page checked for running headers and footers.
const EDGE_LINES: usize = 3;

/// Merge both reports with no per-report size limit.
pub fn merge(inspection: &DocumentCorpus, thermal: &DocumentCorpus) -> MergedText {
    merge_capped(inspection, thermal, None)
}

/// Merge both reports, truncating each report's cleaned text to at most
/// `max_chars_per_report` characters when set.
///
/// Within every section and in `raw`, inspection content precedes thermal
/// content, each introduced by its origin label.
pub fn merge_capped(
    inspection: &DocumentCorpus,
    thermal: &DocumentCorpus,
    max_chars_per_report: Option<usize>,
) -> MergedText {
    let a = tag_sections(&clean_corpus(inspection, max_chars_per_report));
    let b = tag_sections(&clean_corpus(thermal, max_chars_per_report));

    let mut merged = MergedText {
        inspection_present: a.has_content(),
        thermal_present: b.has_content(),
        ..MergedText::default()
    };

    for tag in SectionTag::ALL {
        let parts = [
            (Origin::Inspection, a.sections.get(&tag)),
            (Origin::Thermal, b.sections.get(&tag)),
        ];
        if let Some(body) = join_labelled(&parts) {
            merged.sections.insert(tag, body);
        }
    }
    merged.raw = join_labelled(&[(Origin::Inspection, Some(&a.raw)), (Origin::Thermal, Some(&b.raw))])
        .unwrap_or_default();

    debug!(
        "Merged corpus: {} sections, {} chars (inspection={}, thermal={})",
        merged.sections.len(),
        merged.len(),
        merged.inspection_present,
        merged.thermal_present
    );
    merged
}

fn join_labelled(parts: &[(Origin, Option<&String>)]) -> Option<String> {
    let blocks: Vec<String> = parts
        .iter()
        .filter_map(|(origin, body)| {
            body.filter(|b| !b.trim().is_empty())
                .map(|b| format!("{}\n{}", origin.label(), b))
        })
        .collect();
    (!blocks.is_empty()).then(|| blocks.join("\n\n"))
}

/// Clean every page of one corpus and join the pages into one document.
pub fn clean_corpus(corpus: &DocumentCorpus, max_chars: Option<usize>) -> String {
    let pages: Vec<String> = corpus.pages.iter().map(|p| clean_page(&p.text)).collect();
    let pages = remove_running_lines(&pages);
    let text = pages
        .iter()
        .map(|p| expand_abbreviations(p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    match max_chars {
        Some(cap) if text.chars().count() > cap => {
            warn!("{} report truncated to {} characters", corpus.origin, cap);
            truncate_chars(&text, cap)
        }
        _ => text,
    }
}

/// Apply the character- and line-level rules to one page.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Unicode NFKC (ligatures, full-width forms, non-breaking spaces)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Strip remaining control characters
/// 5. Collapse runs of spaces and tabs
/// 6. Trim each line
/// 7. Collapse 3+ newlines to one blank line
pub fn clean_page(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = normalise_unicode(&s);
    let s = remove_invisible_chars(&s);
    let s = remove_control_chars(&s);
    let s = collapse_spaces(&s);
    let s = trim_lines(&s);
    collapse_blank_lines(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Unicode compatibility normalisation ─────────────────────────────

fn normalise_unicode(input: &str) -> String {
    input.nfkc().collect()
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 4: Remove control characters ───────────────────────────────────────

fn remove_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

// ── Rule 5: Collapse spaces ──────────────────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

fn collapse_spaces(input: &str) -> String {
    RE_SPACES.replace_all(input, " ").to_string()
}

// ── Rule 6: Trim lines ───────────────────────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input.lines().map(str::trim).collect::<Vec<_>>().join("\n")
}

// ── Rule 7: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").trim().to_string()
}

// ── Boilerplate: running headers, footers and page numbers ──────────────────

/// Fewest pages a line must share the same edge slot on to count as running.
const MIN_RUNNING_PAGES: usize = 3;

static RE_PAGE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:.*\s)?page\s*\d+(?:\s*(?:of|/)\s*\d+)?|\d+\s*(?:of|/)\s*\d+)$").unwrap()
});

static RE_BARE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-–]?\s*(\d{1,4})\s*[-–]?$").unwrap());

/// Where a line sits on its page: `Top(0)` is the first non-empty line,
/// `Bottom(0)` the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Top(usize),
    Bottom(usize),
}

/// Edge slots of one page, keyed by line position. Each end gets at most
/// `EDGE_LINES` lines and never more than half the page, so a short page
/// keeps a body that is never treated as an edge.
fn edge_slots(lines: &[&str]) -> HashMap<usize, Slot> {
    let non_empty: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| !l.is_empty())
        .map(|(i, _)| i)
        .collect();
    let depth = EDGE_LINES.min(non_empty.len() / 2);

    let top = non_empty.iter().take(depth).enumerate().map(|(k, &i)| (i, Slot::Top(k)));
    let bottom = non_empty
        .iter()
        .rev()
        .take(depth)
        .enumerate()
        .map(|(k, &i)| (i, Slot::Bottom(k)));
    top.chain(bottom).collect()
}

/// A page label (`Page 3`, `ACME Ltd Page 3 of 10`, `3 of 10`) or a bare
/// number equal to the page's own ordinal (`3`, `- 3 -`).
fn is_page_number(line: &str, ordinal: usize) -> bool {
    if RE_PAGE_LABEL.is_match(line) {
        return true;
    }
    RE_BARE_NUMBER
        .captures(line)
        .and_then(|c| c[1].parse::<usize>().ok())
        .is_some_and(|n| n == ordinal)
}

/// Drop running headers/footers and page numbers from page edges.
///
/// A running line sits in the same edge slot (case-insensitively) on at
/// least half of the non-empty pages and on no fewer than
/// `MIN_RUNNING_PAGES`, and never appears in the body of any page.
/// Section headings are never treated as running lines.
fn remove_running_lines(pages: &[String]) -> Vec<String> {
    let split: Vec<Vec<&str>> = pages.iter().map(|p| p.lines().collect()).collect();
    let edges: Vec<HashMap<usize, Slot>> = split.iter().map(|lines| edge_slots(lines)).collect();

    let mut counts: HashMap<(Slot, String), usize> = HashMap::new();
    let mut in_body: HashSet<String> = HashSet::new();
    for (lines, edge) in split.iter().zip(&edges) {
        let mut seen: HashSet<(Slot, String)> = HashSet::new();
        for (i, line) in lines.iter().enumerate().filter(|(_, l)| !l.is_empty()) {
            match edge.get(&i) {
                Some(&slot) => {
                    seen.insert((slot, line.to_lowercase()));
                }
                None => {
                    in_body.insert(line.to_lowercase());
                }
            }
        }
        for key in seen {
            *counts.entry(key).or_insert(0) += 1;
        }
    }

    let non_empty_pages = pages.iter().filter(|p| !p.is_empty()).count();
    let threshold = non_empty_pages.div_ceil(2).max(MIN_RUNNING_PAGES);
    let running: HashSet<(Slot, String)> = counts
        .into_iter()
        .filter(|((_, line), n)| *n >= threshold && !in_body.contains(line))
        .map(|(key, _)| key)
        .collect();
    if !running.is_empty() {
        debug!("Running header/footer lines: {:?}", running);
    }

    split
        .iter()
        .zip(&edges)
        .enumerate()
        .map(|(page, (lines, edge))| {
            let is_noise = |slot: Slot, line: &str| {
                heading_tag(line).is_none()
                    && (is_page_number(line, page + 1) || running.contains(&(slot, line.to_lowercase())))
            };
            let kept: Vec<&str> = lines
                .iter()
                .enumerate()
                .filter(|&(i, line)| edge.get(&i).map_or(true, |&slot| !is_noise(slot, line)))
                .map(|(_, line)| *line)
                .collect();
            collapse_blank_lines(&kept.join("\n"))
        })
        .collect()
}

// ── Area abbreviations ───────────────────────────────────────────────────────

static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\bLR\b", "Living Room"),
        (r"\bBR\b", "Bedroom"),
        (r"\bWC\b", "Washroom"),
        (r"\bKIT\b", "Kitchen"),
    ]
    .into_iter()
    .map(|(p, r)| (Regex::new(p).unwrap(), r))
    .collect()
});

/// Expand uppercase room abbreviations. Lowercase words ("kit", "br") are
/// ordinary text and stay as they are.
pub fn expand_abbreviations(input: &str) -> String {
    ABBREVIATIONS
        .iter()
        .fold(input.to_string(), |s, (re, name)| re.replace_all(&s, *name).to_string())
}

// ── Section tagging ──────────────────────────────────────────────────────────

static HEADINGS: Lazy<Vec<(SectionTag, Regex)>> = Lazy::new(|| {
    let heading = |names: &str| {
        Regex::new(&format!(
            r"(?i)^(?:#+\s*)?(?:\d+(?:\.\d+)*[.)]?\s+)?(?:{names})\s*:?$"
        ))
        .unwrap()
    };
    vec![
        (
            SectionTag::PropertyDetails,
            heading(r"property details|property information|property description|site details|general information"),
        ),
        (
            SectionTag::Summary,
            heading(r"summary|executive summary|summary of findings|overview|inspection summary"),
        ),
        (
            SectionTag::ThermalAnomalies,
            heading(r"thermal anomal(?:y|ies)|thermal findings|thermal observations|thermal images?|thermal imaging results|hot ?spots|cold ?spots"),
        ),
        (
            SectionTag::Findings,
            heading(r"findings|observations|inspection findings|area[- ]wise observations|visual observations|defects observed|impacted areas?"),
        ),
        (
            SectionTag::RootCause,
            heading(r"(?:probable |likely )?root causes?|root cause analysis|probable causes?|likely causes"),
        ),
        (
            SectionTag::Recommendations,
            heading(r"recommendations?|recommended actions|suggested actions|remedial (?:measures|actions)|remedies"),
        ),
    ]
});

/// Classify a line as a known section heading.
pub fn heading_tag(line: &str) -> Option<SectionTag> {
    let line = line.trim();
    if line.is_empty() || line.len() > 60 {
        return None;
    }
    HEADINGS.iter().find(|(_, re)| re.is_match(line)).map(|(tag, _)| *tag)
}

struct Tagged {
    sections: BTreeMap<SectionTag, String>,
    raw: String,
}

impl Tagged {
    fn has_content(&self) -> bool {
        !self.raw.trim().is_empty() || self.sections.values().any(|s| !s.trim().is_empty())
    }
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

/// Sort a cleaned document under the headings it contains. Text before the
/// first recognised heading goes to `raw`. A heading repeated later appends
/// to the same section.
fn tag_sections(text: &str) -> Tagged {
    let mut sections: BTreeMap<SectionTag, String> = BTreeMap::new();
    let mut raw = String::new();
    let mut current: Option<SectionTag> = None;

    for line in text.lines() {
        if let Some(tag) = heading_tag(line) {
            current = Some(tag);
            let body = sections.entry(tag).or_default();
            if !body.is_empty() {
                body.push('\n');
            }
            continue;
        }
        match current {
            Some(tag) => push_line(sections.entry(tag).or_default(), line),
            None => push_line(&mut raw, line),
        }
    }

    let sections = sections
        .into_iter()
        .map(|(tag, body)| (tag, collapse_blank_lines(&body)))
        .filter(|(_, body)| !body.is_empty())
        .collect();
    Tagged {
        sections,
        raw: collapse_blank_lines(&raw),
    }
}

fn truncate_chars(text: &str, cap: usize) -> String {
    let end = text.char_indices().nth(cap).map(|(i, _)| i).unwrap_or(text.len());
    let cut = &text[..end];
    match cut.rfind('\n') {
        Some(nl) if nl > end / 2 => cut[..nl].trim_end().to_string(),
        _ => cut.trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageText;

    fn corpus(origin: Origin, pages: &[&str]) -> DocumentCorpus {
        DocumentCorpus::new(
            origin,
            pages
                .iter()
                .enumerate()
                .map(|(i, t)| PageText::native(i, *t))
                .collect(),
        )
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(clean_page("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_nfkc_expands_ligatures() {
        assert_eq!(clean_page("e\u{FB04}orescence"), "efflorescence");
        assert_eq!(clean_page("\u{FB01}ne crack"), "fine crack");
        assert_eq!(clean_page("ＨＡＬＬ"), "HALL");
    }

    #[test]
    fn test_remove_invisible_and_control() {
        assert_eq!(clean_page("damp\u{200B}ness\u{0007} seen"), "dampness seen");
    }

    #[test]
    fn test_collapse_whitespace_keeps_paragraphs() {
        let out = clean_page("  a   b\t\tc  \n\n\n\n d ");
        assert_eq!(out, "a b c\n\nd");
    }

    #[test]
    fn test_running_header_removed() {
        let pages = vec![
            "ACME Surveys Ltd\nHall walls damp.\nPage 1 of 3".to_string(),
            "ACME Surveys Ltd\nKitchen ceiling stained.\nPage 2 of 3".to_string(),
            "ACME Surveys Ltd\nBedroom fine.\nPage 3 of 3".to_string(),
        ];
        let out = remove_running_lines(&pages);
        assert_eq!(out[0], "Hall walls damp.");
        assert_eq!(out[1], "Kitchen ceiling stained.");
        assert_eq!(out[2], "Bedroom fine.");
    }

    #[test]
    fn test_repeated_findings_survive() {
        let insp = corpus(
            Origin::Inspection,
            &["Hall\nDampness: Yes", "Kitchen\nDampness: Yes", "Bedroom\nDampness: No\n2019"],
        );
        let merged = merge(&insp, &corpus(Origin::Thermal, &[]));
        assert_eq!(
            merged.raw,
            "[Inspection Report]\nHall\nDampness: Yes\n\nKitchen\nDampness: Yes\n\nBedroom\nDampness: No\n2019"
        );
    }

    #[test]
    fn test_line_repeated_in_body_is_not_running() {
        let pages = vec![
            "Moisture 28%\nHall skirting damp.\nStain 300 mm.\nRe-plaster.\nHall done.".to_string(),
            "Moisture 28%\nKitchen wall damp.\nMoisture 28%\nVentilate.\nKitchen done.".to_string(),
            "Moisture 28%\nBedroom dry.\nNo stain.\nNo action.\nBedroom done.".to_string(),
        ];
        let out = remove_running_lines(&pages);
        assert_eq!(out, pages);
    }

    #[test]
    fn test_bare_number_dropped_only_as_own_page_number() {
        let pages = vec![
            "Hall walls damp.\nReading taken.\n1".to_string(),
            "Kitchen stained.\nReading taken.\n- 2 -".to_string(),
            "Bedroom fine.\nMeter reading\n12".to_string(),
        ];
        let out = remove_running_lines(&pages);
        assert_eq!(out[0], "Hall walls damp.\nReading taken.");
        assert_eq!(out[1], "Kitchen stained.\nReading taken.");
        assert_eq!(out[2], "Bedroom fine.\nMeter reading\n12");
    }

    #[test]
    fn test_single_page_keeps_its_lines() {
        let pages = vec!["ACME Surveys Ltd\nHall walls damp.".to_string()];
        assert_eq!(remove_running_lines(&pages)[0], "ACME Surveys Ltd\nHall walls damp.");
    }

    #[test]
    fn test_abbreviations_uppercase_only() {
        assert_eq!(
            expand_abbreviations("Damp in LR and BR; WC tiles loose; KIT sink"),
            "Damp in Living Room and Bedroom; Washroom tiles loose; Kitchen sink"
        );
        assert_eq!(expand_abbreviations("a repair kit"), "a repair kit");
    }

    #[test]
    fn test_heading_detection() {
        assert_eq!(heading_tag("3. Observations:"), Some(SectionTag::Findings));
        assert_eq!(heading_tag("## Recommendations"), Some(SectionTag::Recommendations));
        assert_eq!(heading_tag("THERMAL ANOMALIES"), Some(SectionTag::ThermalAnomalies));
        assert_eq!(heading_tag("Probable Root Cause"), Some(SectionTag::RootCause));
        assert_eq!(heading_tag("Observations of dampness in the hall"), None);
    }

    #[test]
    fn test_merge_orders_inspection_before_thermal() {
        let insp = corpus(Origin::Inspection, &["Findings\nHall skirting damp."]);
        let therm = corpus(Origin::Thermal, &["Findings\nCold patch at hall skirting."]);
        let merged = merge(&insp, &therm);
        let findings = merged.section(SectionTag::Findings).unwrap();
        let i = findings.find("[Inspection Report]").unwrap();
        let t = findings.find("[Thermal Report]").unwrap();
        assert!(i < t);
        assert!(findings.find("Hall skirting damp.").unwrap() < t);
        assert!(merged.inspection_present && merged.thermal_present);
    }

    #[test]
    fn test_untagged_text_goes_to_raw() {
        let insp = corpus(Origin::Inspection, &["Site visit 12 March.\nSummary\nTwo rooms affected."]);
        let therm = corpus(Origin::Thermal, &[""]);
        let merged = merge(&insp, &therm);
        assert_eq!(merged.raw, "[Inspection Report]\nSite visit 12 March.");
        assert_eq!(
            merged.section(SectionTag::Summary),
            Some("[Inspection Report]\nTwo rooms affected.")
        );
        assert!(!merged.thermal_present);
    }

    #[test]
    fn test_no_substantive_text_dropped() {
        let insp = corpus(
            Origin::Inspection,
            &["Observations\nHall: dampness.\nBedroom: cracks.", "Recommendations\nRe-plaster hall."],
        );
        let therm = corpus(Origin::Thermal, &["Thermal images\nIR-04 shows 4.2 C drop."]);
        let merged = merge(&insp, &therm);
        let all = format!("{:?}", merged);
        for needle in ["Hall: dampness.", "Bedroom: cracks.", "Re-plaster hall.", "IR-04 shows 4.2 C drop."] {
            assert!(all.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn test_cap_truncates_each_report() {
        let long = "word ".repeat(100);
        let insp = corpus(Origin::Inspection, &[long.as_str()]);
        let therm = corpus(Origin::Thermal, &[long.as_str()]);
        let merged = merge_capped(&insp, &therm, Some(50));
        let limit = 2 * (50 + Origin::Inspection.label().len() + 2);
        assert!(merged.raw.len() <= limit, "{}", merged.raw.len());
    }

    #[test]
    fn test_merge_is_deterministic() {
        let insp = corpus(Origin::Inspection, &["Summary\nA.", "Findings\nB."]);
        let therm = corpus(Origin::Thermal, &["Hotspots\nC."]);
        assert_eq!(merge(&insp, &therm), merge(&insp, &therm));
    }
}
