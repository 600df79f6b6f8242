//! Report rendering: a validated [`DdrRecord`] mapped onto a Markdown template.
//!
//! Templates use `{{name}}` placeholders plus two repeated blocks,
//! `{{#areas}}…{{/areas}}` and `{{#missing_information}}…{{/missing_information}}`.
//! A template is checked before use: every record field must appear exactly
//! once and nothing else may. Nothing is omitted conditionally; an
//! unavailable value renders as the literal sentinel, and an unavailable
//! list renders its block once with every placeholder set to the sentinel.
//!
//! Block tags that sit alone on a line consume that line, so a template reads
//! the way its output will look.
//!
//! A [`ReportFormat::Docx`] artifact is the same rendered text laid out by
//! [`crate::pipeline::docx`].

use crate::config::ReportFormat;
use crate::error::DdrError;
use crate::pipeline::docx::to_docx;
use crate::output::ReportArtifact;
use crate::record::{AreaObservation, DdrRecord, Field, NOT_AVAILABLE};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::debug;


/// Built-in report layout.
pub const DEFAULT_TEMPLATE: &str = "\
# Detailed Diagnostic Report

## 1. Property Issue Summary

{{property_issue_summary}}

## 2. Area-wise Observations

{{#areas}}
### {{area}}

- **Inspection observation:** {{inspection_observation}}
- **Thermal observation:** {{thermal_observation}}
- **Merged finding:** {{merged_finding}}
- **Severity:** {{severity}}
- **Dampness type:** {{dampness_type}}
- **Recommendation:** {{recommendation}}
- **Inspection evidence:** {{inspection_evidence_ref}}
- **Thermal evidence:** {{thermal_evidence_ref}}
- **Conflict note:** {{conflict_note}}

{{/areas}}
## 3. Probable Root Cause

{{probable_root_cause}}

## 4. Severity Assessment

- **Overall severity:** {{overall_severity}}
- **Reasoning:** {{severity_reasoning}}
- **Confidence level:** {{confidence_level}}
- **Confidence reasoning:** {{confidence_reasoning}}

## 5. Thermal Anomalies

{{thermal_anomalies}}

## 6. Recommended Actions

{{recommended_actions}}

## 7. Risk Implications

{{risk_implications}}

## 8. Additional Notes

{{additional_notes}}

## 9. Missing or Unclear Information

{{#missing_information}}
- {{item}}
{{/missing_information}}
";

const ROOT_FIELDS: &[&str] = &[
    "property_issue_summary",
    "probable_root_cause",
    "overall_severity",
    "severity_reasoning",
    "confidence_level",
    "confidence_reasoning",
    "thermal_anomalies",
    "recommended_actions",
    "risk_implications",
    "additional_notes",
];

const AREA_BLOCK: &str = "areas";
const AREA_FIELDS: &[&str] = &[
    "area",
    "inspection_observation",
    "thermal_observation",
    "merged_finding",
    "severity",
    "dampness_type",
    "recommendation",
    "inspection_evidence_ref",
    "thermal_evidence_ref",
    "conflict_note",
];

const MISSING_BLOCK: &str = "missing_information";
const MISSING_FIELDS: &[&str] = &["item"];

const BLOCKS: &[(&str, &[&str])] = &[(AREA_BLOCK, AREA_FIELDS), (MISSING_BLOCK, MISSING_FIELDS)];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Var(String),
    Open(String),
    Close(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    Block { name: String, body: Vec<Node> },
}

/// A parsed, checked report template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse and check `source`. Any mismatch with the record layout is a
    /// [`DdrError::Render`].
    pub fn parse(source: &str) -> Result<Self, DdrError> {
        let nodes = build_tree(tokenize(source)?)?;
        check_scope(&nodes, "the report", ROOT_FIELDS, BLOCKS)?;
        Ok(Self { nodes })
    }

    pub fn builtin() -> Result<Self, DdrError> {
        Self::parse(DEFAULT_TEMPLATE)
    }

    /// Substitute every placeholder. Pure: same record, same output.
    pub fn render(&self, record: &DdrRecord) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Var(name) => out.push_str(&root_value(record, name)),
                Node::Block { name, body } if name == AREA_BLOCK => match &record.areas {
                    Field::Known(areas) => {
                        for area in areas {
                            render_body(&mut out, body, |field| area_value(Some(area), field));
                        }
                    }
                    Field::Unavailable => render_body(&mut out, body, |field| area_value(None, field)),
                },
                Node::Block { body, .. } => match &record.missing_or_unclear_information {
                    Field::Known(items) => {
                        for item in items {
                            render_body(&mut out, body, |_| item.clone());
                        }
                    }
                    Field::Unavailable => render_body(&mut out, body, |_| NOT_AVAILABLE.to_string()),
                },
            }
        }
        out
    }
}

/// Render with the built-in template as Markdown.
pub fn render(record: &DdrRecord) -> Result<ReportArtifact, DdrError> {
    render_with(record, &Template::builtin()?)
}

/// Render with a checked template as Markdown.
pub fn render_with(record: &DdrRecord, template: &Template) -> Result<ReportArtifact, DdrError> {
    render_as(record, template, ReportFormat::Markdown)
}

/// Render with a checked template in `format`. The suggested file name
/// carries the current UTC time; the bytes do not.
pub fn render_as(record: &DdrRecord, template: &Template, format: ReportFormat) -> Result<ReportArtifact, DdrError> {
    let text = template.render(record);
    let bytes = match format {
        ReportFormat::Markdown => text.into_bytes(),
        ReportFormat::Docx => to_docx(&text)?,
    };
    let path = PathBuf::from(artifact_name(&bytes, OffsetDateTime::now_utc(), format));
    debug!("Rendered {} bytes → {}", bytes.len(), path.display());
    Ok(ReportArtifact {
        path,
        bytes,
        media_type: format.media_type(),
    })
}

/// `ddr_report_<yyyymmddThhmmssZ>_<first 12 hex chars of sha256>.<md|docx>`
pub fn artifact_name(bytes: &[u8], at: OffsetDateTime, format: ReportFormat) -> String {
    let at = at.to_offset(time::UtcOffset::UTC);
    let digest = format!("{:x}", Sha256::digest(bytes));
    format!(
        "ddr_report_{:04}{:02}{:02}T{:02}{:02}{:02}Z_{}.{}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        &digest[..12],
        format.extension()
    )
}

fn render_body(out: &mut String, body: &[Node], value: impl Fn(&str) -> String) {
    for node in body {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Var(name) => out.push_str(&value(name)),
            // Nested blocks are rejected by `check_scope`.
            Node::Block { .. } => {}
        }
    }
}

fn root_value(record: &DdrRecord, name: &str) -> String {
    let s = &record.severity_assessment;
    match name {
        "property_issue_summary" => record.property_issue_summary.to_string(),
        "probable_root_cause" => record.probable_root_cause.to_string(),
        "overall_severity" => s.overall_severity.to_string(),
        "severity_reasoning" => s.reasoning.to_string(),
        "confidence_level" => s.confidence_level.to_string(),
        "confidence_reasoning" => s.confidence_reasoning.to_string(),
        "thermal_anomalies" => record.thermal_anomalies.to_string(),
        "recommended_actions" => record.recommended_actions.to_string(),
        "risk_implications" => record.risk_implications.to_string(),
        "additional_notes" => record.additional_notes.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn area_value(area: Option<&AreaObservation>, name: &str) -> String {
    let Some(a) = area else {
        return NOT_AVAILABLE.to_string();
    };
    match name {
        "area" => a.area.clone(),
        "inspection_observation" => a.inspection_observation.to_string(),
        "thermal_observation" => a.thermal_observation.to_string(),
        "merged_finding" => a.merged_finding.to_string(),
        "severity" => a.severity.to_string(),
        "dampness_type" => a.dampness_type.to_string(),
        "recommendation" => a.recommendation.to_string(),
        "inspection_evidence_ref" => a.inspection_evidence_ref.to_string(),
        "thermal_evidence_ref" => a.thermal_evidence_ref.to_string(),
        "conflict_note" => a.conflict_note.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

fn tokenize(source: &str) -> Result<Vec<Token>, DdrError> {
    let mut tokens = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        let (text, after) = rest.split_at(start);
        let after = &after[2..];
        let end = after.find("}}").ok_or_else(|| {
            DdrError::render(format!(
                "unterminated tag '{{{{{}'",
                after.chars().take(24).collect::<String>()
            ))
        })?;
        let tag = after[..end].trim();
        rest = &after[end + 2..];

        let token = if let Some(name) = tag.strip_prefix('#') {
            Token::Open(name.trim().to_string())
        } else if let Some(name) = tag.strip_prefix('/') {
            Token::Close(name.trim().to_string())
        } else {
            Token::Var(tag.to_string())
        };

        // A block tag alone on its line takes the line with it.
        let standalone = matches!(token, Token::Open(_) | Token::Close(_))
            && text.rsplit('\n').next().is_some_and(|line| line.trim().is_empty())
            && rest.starts_with('\n');
        let text = if standalone {
            text.trim_end_matches([' ', '\t'])
        } else {
            text
        };
        if standalone {
            rest = &rest[1..];
        }

        if !text.is_empty() {
            tokens.push(Token::Text(text.to_string()));
        }
        tokens.push(token);
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

fn build_tree(tokens: Vec<Token>) -> Result<Vec<Node>, DdrError> {
    let mut stack: Vec<(String, Vec<Node>)> = Vec::new();
    let mut current: Vec<Node> = Vec::new();

    for token in tokens {
        match token {
            Token::Text(t) => current.push(Node::Text(t)),
            Token::Var(name) => current.push(Node::Var(name)),
            Token::Open(name) => stack.push((name, std::mem::take(&mut current))),
            Token::Close(name) => {
                let (open, parent) = stack
                    .pop()
                    .ok_or_else(|| DdrError::render(format!("'{{{{/{name}}}}}' has no opening tag")))?;
                if open != name {
                    return Err(DdrError::render(format!(
                        "'{{{{/{name}}}}}' closes '{{{{#{open}}}}}'"
                    )));
                }
                let body = std::mem::replace(&mut current, parent);
                current.push(Node::Block { name, body });
            }
        }
    }

    match stack.pop() {
        Some((open, _)) => Err(DdrError::render(format!("'{{{{#{open}}}}}' is never closed"))),
        None => Ok(current),
    }
}

/// Every allowed name exactly once, nothing else.
fn check_scope(
    nodes: &[Node],
    scope: &str,
    fields: &[&str],
    blocks: &[(&str, &[&str])],
) -> Result<(), DdrError> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();

    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Var(name) => {
                if !fields.contains(&name.as_str()) {
                    return Err(DdrError::render(format!("unknown placeholder '{{{{{name}}}}}' in {scope}")));
                }
                *seen.entry(name.as_str()).or_default() += 1;
            }
            Node::Block { name, body } => {
                let Some((_, children)) = blocks.iter().find(|(b, _)| *b == name.as_str()) else {
                    return Err(DdrError::render(format!("unknown block '{{{{#{name}}}}}' in {scope}")));
                };
                check_scope(body, &format!("block '{name}'"), children, &[])?;
                *seen.entry(name.as_str()).or_default() += 1;
            }
        }
    }

    for name in fields.iter().chain(blocks.iter().map(|(b, _)| b)) {
        match seen.get(name).copied().unwrap_or(0) {
            1 => {}
            0 => return Err(DdrError::render(format!("'{name}' is missing from {scope}"))),
            n => return Err(DdrError::render(format!("'{name}' appears {n} times in {scope}"))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Severity, SeverityAssessment};
    use regex::Regex;

    fn sample() -> DdrRecord {
        let mut hall = AreaObservation::unavailable("Hall");
        hall.merged_finding = Field::Known("Rising damp at skirting.".into());
        hall.severity = Field::Known(Severity::Moderate);
        let bedroom = AreaObservation::unavailable("Bedroom");
        DdrRecord {
            property_issue_summary: Field::Known("Dampness in two rooms.".into()),
            areas: Field::Known(vec![hall, bedroom]),
            severity_assessment: SeverityAssessment {
                overall_severity: Field::Known(Severity::High),
                ..SeverityAssessment::default()
            },
            missing_or_unclear_information: Field::Known(vec!["Roof condition".into(), "Plumbing layout".into()]),
            ..DdrRecord::default()
        }
    }

    fn text(artifact: &ReportArtifact) -> String {
        String::from_utf8(artifact.bytes.clone()).unwrap()
    }

    #[test]
    fn builtin_template_is_valid() {
        Template::builtin().unwrap();
    }

    #[test]
    fn renders_values_and_sentinels() {
        let out = text(&render(&sample()).unwrap());
        assert!(out.contains("Dampness in two rooms."));
        assert!(out.contains("- **Overall severity:** High"));
        assert!(out.contains("- **Severity:** Moderate"));
        assert!(out.contains(&format!("## 3. Probable Root Cause\n\n{NOT_AVAILABLE}\n")));
        assert!(out.contains("- Roof condition\n- Plumbing layout\n"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn areas_expand_in_record_order() {
        let out = text(&render(&sample()).unwrap());
        let hall = out.find("### Hall").unwrap();
        let bedroom = out.find("### Bedroom").unwrap();
        assert!(hall < bedroom);
        assert_eq!(out.matches("- **Merged finding:**").count(), 2);
    }

    #[test]
    fn unavailable_lists_render_once_with_sentinel() {
        let out = text(&render(&DdrRecord::default()).unwrap());
        assert_eq!(out.matches("### ").count(), 1);
        assert!(out.contains(&format!("### {NOT_AVAILABLE}\n")));
        assert!(out.contains(&format!("- {NOT_AVAILABLE}\n")));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render(&sample()).unwrap();
        let b = render(&sample()).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.media_type, "text/markdown");
    }

    #[test]
    fn docx_artifact_uses_same_template() {
        let t = Template::builtin().unwrap();
        let docx = render_as(&sample(), &t, ReportFormat::Docx).unwrap();
        assert!(docx.bytes.starts_with(b"PK\x03\x04"));
        assert_eq!(docx.media_type, ReportFormat::Docx.media_type());
        assert!(docx.path.to_string_lossy().ends_with(".docx"));

        let blocks = crate::pipeline::docx::blocks(&t.render(&sample()));
        assert!(blocks.contains(&crate::pipeline::docx::Block::Heading(3, "Hall".into())));
    }

    #[test]
    fn artifact_name_format() {
        let at = OffsetDateTime::from_unix_timestamp(0).unwrap();
        let name = artifact_name(b"report", at, ReportFormat::Markdown);
        let re = Regex::new(r"^ddr_report_19700101T000000Z_[0-9a-f]{12}\.md$").unwrap();
        assert!(re.is_match(&name), "{name}");
        assert_ne!(name, artifact_name(b"other report", at, ReportFormat::Markdown));
        assert!(artifact_name(b"report", at, ReportFormat::Docx).ends_with(".docx"));
    }

    #[test]
    fn conflicts_do_not_affect_output() {
        let mut with_conflicts = sample();
        with_conflicts.conflicts.push(crate::record::Conflict {
            field: "Probable_Root_Cause".into(),
            inspection: "a".into(),
            thermal: "b".into(),
            selected: crate::output::Origin::Inspection,
        });
        let t = Template::builtin().unwrap();
        assert_eq!(t.render(&sample()), t.render(&with_conflicts));
    }

    fn custom(areas_body: &str) -> String {
        format!(
            "{}\n{{{{#areas}}}}\n{}\n{{{{/areas}}}}\n{{{{#missing_information}}}}{{{{item}}}}{{{{/missing_information}}}}\n",
            ROOT_FIELDS.iter().map(|f| format!("{{{{{f}}}}}")).collect::<Vec<_>>().join("\n"),
            areas_body
        )
    }

    fn all_area_fields() -> String {
        AREA_FIELDS.iter().map(|f| format!("{{{{{f}}}}}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn custom_template_accepted() {
        let t = Template::parse(&custom(&all_area_fields())).unwrap();
        let out = t.render(&sample());
        assert!(out.contains("Hall"));
        assert!(out.contains("Roof conditionPlumbing layout"));
    }

    #[test]
    fn unknown_placeholder_rejected() {
        let src = custom(&format!("{} {{{{floor_area}}}}", all_area_fields()));
        let err = Template::parse(&src).unwrap_err();
        assert!(matches!(err, DdrError::Render { ref detail } if detail.contains("floor_area")), "{err}");
    }

    #[test]
    fn duplicate_placeholder_rejected() {
        let src = custom(&format!("{} {{{{severity}}}}", all_area_fields()));
        let err = Template::parse(&src).unwrap_err();
        assert!(matches!(err, DdrError::Render { ref detail } if detail.contains("2 times")), "{err}");
    }

    #[test]
    fn missing_placeholder_rejected() {
        let src = custom(&all_area_fields().replace("{{conflict_note}}", ""));
        let err = Template::parse(&src).unwrap_err();
        assert!(matches!(err, DdrError::Render { ref detail } if detail.contains("conflict_note")), "{err}");
    }

    #[test]
    fn area_field_outside_block_rejected() {
        let src = format!("{}{{{{severity}}}}", custom(&all_area_fields()));
        assert!(matches!(Template::parse(&src), Err(DdrError::Render { .. })));
    }

    #[test]
    fn unclosed_and_mismatched_blocks_rejected() {
        assert!(matches!(Template::parse("{{#areas}} {{area}}"), Err(DdrError::Render { .. })));
        assert!(matches!(
            Template::parse("{{#areas}}{{/missing_information}}"),
            Err(DdrError::Render { .. })
        ));
        assert!(matches!(Template::parse("{{/areas}}"), Err(DdrError::Render { .. })));
        assert!(matches!(Template::parse("{{property_issue_summary"), Err(DdrError::Render { .. })));
    }
}
