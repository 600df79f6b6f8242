//! Prompt text for DDR generation.
//!
//! The domain rules are fixed; the JSON skeleton and the enum constraints are
//! generated from [`SchemaSpec`] so that what the model is asked for is
//! exactly what the validator accepts.

use crate::output::{MergedText, SectionTag};
use crate::record::NOT_AVAILABLE;
use crate::schema::SchemaSpec;

/// System message for the single generation call.
pub const SYSTEM_PROMPT: &str = "You are a senior building pathology analyst. \
You write Detailed Diagnostic Reports from inspection and thermal-imaging reports. \
You return exactly one JSON object and nothing else.";

/// Domain rules placed before the schema in the user message.
pub const DDR_RULES: &str = r#"Produce one Detailed Diagnostic Report (DDR) from the two reports below.
Return ONLY one valid JSON object. No markdown, no code fences, no commentary.

1. EVIDENCE DISCIPLINE
   - Use ONLY facts present in the two reports.
   - If a fact is absent, use exactly "Not Available".
   - Do not infer measurements, dates, names or component conditions unless stated.
   - Mark conclusions that are inferred rather than stated with "(Probable)".

2. AREA MAPPING
   - Put each observation only under the area it belongs to.
   - Do not copy bathroom issues into other rooms unless the text links them.
   - Use specific, normalised area names (e.g. "Hall", "Master Bedroom Bathroom").
   - Use the area "General" only for issues that are not area-specific.
   - Area observations hold physical defects only. Move form metadata and checklists to Additional_Notes.

3. THERMAL INTEGRATION
   - If the thermal report is missing or empty, every thermal_observation is "Not Available".
   - Otherwise summarise only area-relevant thermal signals.
   - Thermal_Anomalies lists temperature anomalies the thermal report states; "Not Available" if it states none.

4. CONFLICTS
   - When the reports contradict each other, describe the contradiction in conflict_note, otherwise "Not Available".
   - Any text or label field the reports disagree on may be given as
     {"inspection": "<value from the inspection report>", "thermal": "<value from the thermal report>"}.
   - Summarise major cross-report conflicts in Additional_Notes.

5. QUALITY
   - No repeated sentences across areas; merged_finding is 1-3 sentences.
   - Property_Issue_Summary is a compact executive summary. Describe a defect recurring in several rooms once.

6. ROOT CAUSE AND RECOMMENDATIONS
   - Probable_Root_Cause states likely mechanisms based on evidence only.
   - Recommended_Actions has exactly three labelled groups: "Immediate Actions", "Short-Term Actions", "Preventive Measures". No numbered lists.
   - Risk_Implications describes likely consequences if unresolved.

7. MISSING INFORMATION
   - Missing_or_Unclear_Information lists only true gaps that limit certainty, as a JSON array of strings.
   - If the thermal report is absent or unusable, include "Thermal Report data".

8. EVIDENCE TRACEABILITY
   - inspection_evidence_ref cites section names, checklist points or table rows.
   - thermal_evidence_ref cites image IDs, captions or page references.

9. DAMPNESS
   - Classify dampness with one or more of "Rising Damp", "Penetrating Damp", "Plumbing Leakage Damp", comma-separated.
   - Append " (Probable)" to a label inferred from context.

10. CONFIDENCE
   - Confidence_Reasoning states whether confidence comes from multiple inspection observations, thermal confirmation or single-source evidence."#;

/// A complete prompt for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdrPrompt {
    pub system: String,
    pub user: String,
    /// Schema description embedded in `user`, kept separately for clients
    /// that support structured output.
    pub schema: String,
}

/// Build the generation prompt from the merged corpus.
pub fn build_prompt(merged: &MergedText, schema: &SchemaSpec) -> DdrPrompt {
    let skeleton = schema.skeleton();
    let mut user = String::with_capacity(DDR_RULES.len() + skeleton.len() + merged.len() + 512);
    user.push_str(DDR_RULES);
    user.push_str("\n\nRequired output JSON (exact keys, every key mandatory):\n");
    user.push_str(&skeleton);
    user.push_str("\n\nAllowed labels:\n");
    for line in schema.constraints() {
        user.push_str("- ");
        user.push_str(&line);
        user.push('\n');
    }
    user.push_str(&format!(
        "Any value the reports do not support must be exactly \"{NOT_AVAILABLE}\".\n"
    ));
    user.push_str("\n=== REPORT TEXT ===\n");
    user.push_str(&corpus_text(merged));
    DdrPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        schema: skeleton,
    }
}

/// Lay the merged corpus out as headed sections followed by untagged text.
pub fn corpus_text(merged: &MergedText) -> String {
    let mut out = String::new();
    for tag in SectionTag::ALL {
        if let Some(body) = merged.section(tag) {
            out.push_str(&format!("\n## {}\n{}\n", tag.title(), body));
        }
    }
    if !merged.raw.trim().is_empty() {
        out.push_str("\n## Other Content\n");
        out.push_str(&merged.raw);
        out.push('\n');
    }
    if !merged.thermal_present {
        out.push_str("\n[Thermal Report]\n(no readable text)\n");
    }
    if !merged.inspection_present {
        out.push_str("\n[Inspection Report]\n(no readable text)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged() -> MergedText {
        let mut m = MergedText {
            raw: "[Inspection Report]\nSite visit on record.".into(),
            inspection_present: true,
            thermal_present: true,
            ..MergedText::default()
        };
        m.sections.insert(
            SectionTag::Findings,
            "[Inspection Report]\nDampness in hall.\n\n[Thermal Report]\nCold spot at skirting.".into(),
        );
        m
    }

    #[test]
    fn prompt_embeds_schema_and_corpus() {
        let p = build_prompt(&merged(), &SchemaSpec::ddr());
        assert!(p.user.contains("\"Property_Issue_Summary\""));
        assert!(p.user.contains("## Findings"));
        assert!(p.user.contains("Cold spot at skirting."));
        assert!(p.user.contains("## Other Content"));
        assert!(p.user.contains("exactly \"Not Available\""));
        assert_eq!(p.system, SYSTEM_PROMPT);
    }

    #[test]
    fn prompt_flags_absent_thermal_report() {
        let mut m = merged();
        m.thermal_present = false;
        let text = corpus_text(&m);
        assert!(text.contains("[Thermal Report]\n(no readable text)"));
    }
}
