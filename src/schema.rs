//! The DDR output schema as data.
//!
//! [`SchemaSpec::ddr`] is the single description of every key the model must
//! return, its type and cardinality. The prompt is generated from it and the
//! validator resolves keys through it, so the two cannot drift apart.

use crate::record::{Canonical, ConfidenceLevel, DampnessKind, Severity};

/// Top-level and nested key names as they appear in the model's JSON.
pub mod keys {
    pub const PROPERTY_ISSUE_SUMMARY: &str = "Property_Issue_Summary";
    pub const AREA_WISE_OBSERVATIONS: &str = "Area_Wise_Observations";
    pub const PROBABLE_ROOT_CAUSE: &str = "Probable_Root_Cause";
    pub const SEVERITY_ASSESSMENT: &str = "Severity_Assessment";
    pub const THERMAL_ANOMALIES: &str = "Thermal_Anomalies";
    pub const RECOMMENDED_ACTIONS: &str = "Recommended_Actions";
    pub const RISK_IMPLICATIONS: &str = "Risk_Implications";
    pub const ADDITIONAL_NOTES: &str = "Additional_Notes";
    pub const MISSING_OR_UNCLEAR_INFORMATION: &str = "Missing_or_Unclear_Information";

    pub const AREA: &str = "area";
    pub const INSPECTION_OBSERVATION: &str = "inspection_observation";
    pub const THERMAL_OBSERVATION: &str = "thermal_observation";
    pub const MERGED_FINDING: &str = "merged_finding";
    pub const SEVERITY: &str = "severity";
    pub const DAMPNESS_TYPE: &str = "dampness_type";
    pub const RECOMMENDATION: &str = "recommendation";
    pub const INSPECTION_EVIDENCE_REF: &str = "inspection_evidence_ref";
    pub const THERMAL_EVIDENCE_REF: &str = "thermal_evidence_ref";
    pub const CONFLICT_NOTE: &str = "conflict_note";

    pub const OVERALL_SEVERITY: &str = "overall_severity";
    pub const REASONING: &str = "reasoning";
    pub const CONFIDENCE_LEVEL: &str = "Confidence_Level";
    pub const CONFIDENCE_REASONING: &str = "Confidence_Reasoning";

    /// Keys of a sourced value: a field both reports speak to.
    pub const SOURCED_INSPECTION: &str = "inspection";
    pub const SOURCED_THERMAL: &str = "thermal";
}

/// Declared type of one field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Free text, single value.
    Text,
    /// Exactly one label out of a closed set.
    Choice(&'static [&'static str]),
    /// Comma-separated dampness labels, each optionally "(Probable)".
    Dampness(&'static [&'static str]),
    /// A list of short text items.
    TextList,
    /// A nested object with fixed keys.
    Group(&'static [FieldSpec]),
    /// Area name → per-area object.
    Areas(&'static [FieldSpec]),
}

/// One key of the schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

impl FieldSpec {
    const fn new(key: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            key,
            kind,
            description,
        }
    }

    /// Whether a sourced `{"inspection": .., "thermal": ..}` value is allowed.
    pub fn accepts_sourced(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Text | FieldKind::Choice(_) | FieldKind::Dampness(_)
        )
    }
}

const AREA_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(keys::INSPECTION_OBSERVATION, FieldKind::Text, "what the inspection report states for this area"),
    FieldSpec::new(keys::THERMAL_OBSERVATION, FieldKind::Text, "area-relevant thermal signals only"),
    FieldSpec::new(keys::MERGED_FINDING, FieldKind::Text, "1-3 sentence combined diagnostic statement"),
    FieldSpec::new(keys::SEVERITY, FieldKind::Choice(Severity::LABELS), "severity of this area's defects"),
    FieldSpec::new(keys::DAMPNESS_TYPE, FieldKind::Dampness(DampnessKind::LABELS), "dampness mechanism(s)"),
    FieldSpec::new(keys::RECOMMENDATION, FieldKind::Text, "area-specific remedial action"),
    FieldSpec::new(keys::INSPECTION_EVIDENCE_REF, FieldKind::Text, "inspection section, checklist point or table row"),
    FieldSpec::new(keys::THERMAL_EVIDENCE_REF, FieldKind::Text, "thermal image ID, caption or page"),
    FieldSpec::new(keys::CONFLICT_NOTE, FieldKind::Text, "explicit contradiction between the reports"),
];

const SEVERITY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(keys::OVERALL_SEVERITY, FieldKind::Choice(Severity::LABELS), "overall severity"),
    FieldSpec::new(keys::REASONING, FieldKind::Text, "why this severity was assigned"),
    FieldSpec::new(keys::CONFIDENCE_LEVEL, FieldKind::Choice(ConfidenceLevel::LABELS), "confidence in the assessment"),
    FieldSpec::new(
        keys::CONFIDENCE_REASONING,
        FieldKind::Text,
        "whether confidence rests on multiple inspection observations, thermal confirmation or single-source evidence",
    ),
];

const DDR_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(keys::PROPERTY_ISSUE_SUMMARY, FieldKind::Text, "compact executive summary"),
    FieldSpec::new(keys::AREA_WISE_OBSERVATIONS, FieldKind::Areas(AREA_FIELDS), "physical defects grouped by area"),
    FieldSpec::new(keys::PROBABLE_ROOT_CAUSE, FieldKind::Text, "likely mechanisms, evidence only"),
    FieldSpec::new(keys::SEVERITY_ASSESSMENT, FieldKind::Group(SEVERITY_FIELDS), "overall severity with justification"),
    FieldSpec::new(keys::THERMAL_ANOMALIES, FieldKind::Text, "temperature anomalies reported by the thermal survey"),
    FieldSpec::new(
        keys::RECOMMENDED_ACTIONS,
        FieldKind::Text,
        "labelled Immediate Actions / Short-Term Actions / Preventive Measures",
    ),
    FieldSpec::new(keys::RISK_IMPLICATIONS, FieldKind::Text, "consequences if unresolved"),
    FieldSpec::new(keys::ADDITIONAL_NOTES, FieldKind::Text, "metadata, context and cross-report conflicts"),
    FieldSpec::new(keys::MISSING_OR_UNCLEAR_INFORMATION, FieldKind::TextList, "true gaps that limit certainty"),
];

/// The complete output schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaSpec {
    pub fields: &'static [FieldSpec],
}

impl SchemaSpec {
    pub fn ddr() -> Self {
        Self { fields: DDR_FIELDS }
    }

    /// Look a key up at the top level.
    pub fn field(&self, key: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Nested fields of a group or area key.
    pub fn children(&self, key: &str) -> &'static [FieldSpec] {
        match self.field(key).map(|f| f.kind) {
            Some(FieldKind::Group(c)) | Some(FieldKind::Areas(c)) => c,
            _ => &[],
        }
    }

    /// JSON skeleton of the expected response, one key per line.
    pub fn skeleton(&self) -> String {
        let mut out = String::from("{\n");
        write_fields(&mut out, self.fields, 1);
        out.push('}');
        out
    }

    /// Every constrained field with its allowed labels, for the prompt.
    pub fn constraints(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_constraints(&mut out, "", self.fields);
        out
    }
}

fn type_hint(kind: FieldKind) -> String {
    match kind {
        FieldKind::Text => "\"string\"".to_string(),
        FieldKind::Choice(labels) => format!("\"{}\"", labels.join(" | ")),
        FieldKind::Dampness(labels) => format!("\"{} (comma-separated, optional ' (Probable)')\"", labels.join(" | ")),
        FieldKind::TextList => "[\"string\"]".to_string(),
        FieldKind::Group(_) | FieldKind::Areas(_) => String::new(),
    }
}

fn write_fields(out: &mut String, fields: &[FieldSpec], depth: usize) {
    let pad = "  ".repeat(depth);
    for (i, f) in fields.iter().enumerate() {
        let comma = if i + 1 < fields.len() { "," } else { "" };
        match f.kind {
            FieldKind::Group(children) => {
                out.push_str(&format!("{pad}\"{}\": {{\n", f.key));
                write_fields(out, children, depth + 1);
                out.push_str(&format!("{pad}}}{comma}\n"));
            }
            FieldKind::Areas(children) => {
                out.push_str(&format!("{pad}\"{}\": {{\n", f.key));
                out.push_str(&format!("{pad}  \"<Area Name>\": {{\n"));
                write_fields(out, children, depth + 2);
                out.push_str(&format!("{pad}  }}\n"));
                out.push_str(&format!("{pad}}}{comma}\n"));
            }
            kind => {
                out.push_str(&format!("{pad}\"{}\": {}{comma}\n", f.key, type_hint(kind)));
            }
        }
    }
}

fn collect_constraints(out: &mut Vec<String>, prefix: &str, fields: &[FieldSpec]) {
    for f in fields {
        let path = if prefix.is_empty() {
            f.key.to_string()
        } else {
            format!("{prefix}.{}", f.key)
        };
        match f.kind {
            FieldKind::Choice(labels) | FieldKind::Dampness(labels) => {
                out.push(format!("{path}: {} ({})", labels.join(", "), f.description));
            }
            FieldKind::Group(children) => collect_constraints(out, &path, children),
            FieldKind::Areas(children) => collect_constraints(out, &format!("{path}.<area>"), children),
            FieldKind::Text | FieldKind::TextList => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_lists_every_top_level_key() {
        let spec = SchemaSpec::ddr();
        let skeleton = spec.skeleton();
        for f in spec.fields {
            assert!(skeleton.contains(&format!("\"{}\"", f.key)), "missing {}", f.key);
        }
        assert!(skeleton.contains("\"<Area Name>\""));
        assert!(skeleton.contains("Low to Moderate"));
    }

    #[test]
    fn skeleton_is_balanced() {
        let s = SchemaSpec::ddr().skeleton();
        assert_eq!(s.matches('{').count(), s.matches('}').count());
    }

    #[test]
    fn children_resolve_nested_keys() {
        let spec = SchemaSpec::ddr();
        assert_eq!(spec.children(keys::SEVERITY_ASSESSMENT).len(), 4);
        assert!(spec
            .children(keys::AREA_WISE_OBSERVATIONS)
            .iter()
            .any(|f| f.key == keys::DAMPNESS_TYPE));
        assert!(spec.children(keys::PROPERTY_ISSUE_SUMMARY).is_empty());
    }

    #[test]
    fn constraints_name_enum_paths() {
        let c = SchemaSpec::ddr().constraints();
        assert!(c.iter().any(|l| l.starts_with("Severity_Assessment.overall_severity")));
        assert!(c.iter().any(|l| l.starts_with("Area_Wise_Observations.<area>.severity")));
    }
}
