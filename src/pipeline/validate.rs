//! Validation: untrusted candidate JSON → typed [`DdrRecord`].
//!
//! Every field is coerced explicitly to its declared type. Absent, null,
//! blank and "missing"-style values become [`Field::Unavailable`]; values
//! that are present but cannot be coerced (an unknown severity label, a list
//! where text is expected) are a [`DdrError::Schema`] naming the field. No
//! field is ever silently defaulted to a plausible value.
//!
//! Fields the two reports disagree on arrive as
//! `{"inspection": .., "thermal": ..}`. Both sides are coerced, and when
//! they still differ the [`ConflictPolicy`] picks the winner and the
//! disagreement is recorded on [`DdrRecord::conflicts`].

use crate::config::ConflictPolicy;
use crate::error::DdrError;
use crate::output::{MergedText, Origin, SectionTag};
use crate::record::{
    AreaObservation, Conflict, ConfidenceLevel, DampnessClassification, DdrRecord, Field, Severity,
    SeverityAssessment,
};
use crate::schema::{keys, FieldKind, FieldSpec, SchemaSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info};

/// Strings that mean "no value".
const MISSING_ALIASES: &[&str] = &[
    "",
    "n/a",
    "na",
    "null",
    "none",
    "unknown",
    "not provided",
    "missing",
    "not available",
];

/// Entry added to the missing-information list when the thermal report
/// contributed nothing.
pub const THERMAL_DATA_MISSING: &str = "Thermal Report data";

static RE_ANOMALY_LANGUAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:anomal\w*|hot ?spots?|cold ?spots?|thermal (?:bridg\w*|patterns?|signatures?)|moisture signatures?|heat loss|temperature (?:differences?|differentials?|variations?|drops?|rise)|delta ?t|(?:cooler|colder|warmer|hotter) (?:areas?|patch(?:es)?|zones?|regions?|spots?))\b",
    )
    .unwrap()
});

/// What the merged corpus says about the availability of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evidence {
    /// The thermal report contributed text.
    pub thermal_present: bool,
    /// Anything in the corpus talks about temperature anomalies.
    pub anomaly_language: bool,
}

impl Evidence {
    pub fn from_merged(merged: &MergedText) -> Self {
        let anomaly_language = merged
            .section(SectionTag::ThermalAnomalies)
            .is_some_and(|s| !s.trim().is_empty())
            || merged.sections.values().any(|s| RE_ANOMALY_LANGUAGE.is_match(s))
            || RE_ANOMALY_LANGUAGE.is_match(&merged.raw);
        Self {
            thermal_present: merged.thermal_present,
            anomaly_language,
        }
    }
}

/// Schema enforcement for one candidate record.
#[derive(Debug, Clone)]
pub struct Validator {
    schema: SchemaSpec,
    policy: ConflictPolicy,
    evidence: Option<Evidence>,
}

impl Validator {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            schema: SchemaSpec::ddr(),
            policy,
            evidence: None,
        }
    }

    /// Cross-check fields against what the source documents actually contain.
    pub fn with_evidence(mut self, merged: &MergedText) -> Self {
        self.evidence = Some(Evidence::from_merged(merged));
        self
    }

    pub fn validate(&self, candidate: &Map<String, Value>) -> Result<DdrRecord, DdrError> {
        let mut cx = Coercer {
            policy: self.policy,
            conflicts: Vec::new(),
        };
        let root = Scope::new(self.schema.fields, candidate, None);
        root.log_unknown(&[]);

        let mut record = DdrRecord {
            property_issue_summary: root.text(&mut cx, keys::PROPERTY_ISSUE_SUMMARY)?,
            areas: self.areas(&mut cx, root.get(keys::AREA_WISE_OBSERVATIONS))?,
            probable_root_cause: root.text(&mut cx, keys::PROBABLE_ROOT_CAUSE)?,
            severity_assessment: self.severity_assessment(&mut cx, root.get(keys::SEVERITY_ASSESSMENT))?,
            thermal_anomalies: root.text(&mut cx, keys::THERMAL_ANOMALIES)?,
            recommended_actions: root.text(&mut cx, keys::RECOMMENDED_ACTIONS)?,
            risk_implications: root.text(&mut cx, keys::RISK_IMPLICATIONS)?,
            additional_notes: root.text(&mut cx, keys::ADDITIONAL_NOTES)?,
            missing_or_unclear_information: root.list(keys::MISSING_OR_UNCLEAR_INFORMATION)?,
            conflicts: Vec::new(),
        };

        if let Some(evidence) = self.evidence {
            apply_evidence(&mut record, evidence);
        }
        record.conflicts = cx.conflicts;

        info!(
            "Validated DDR: {} areas, {} conflicts resolved ({:?})",
            record.area_list().len(),
            record.conflicts.len(),
            self.policy
        );
        Ok(record)
    }

    fn severity_assessment(&self, cx: &mut Coercer, value: Option<&Value>) -> Result<SeverityAssessment, DdrError> {
        let path = keys::SEVERITY_ASSESSMENT;
        let obj = match value {
            None => return Ok(SeverityAssessment::default()),
            Some(v) if is_missing(v) => return Ok(SeverityAssessment::default()),
            Some(Value::Object(obj)) => obj,
            Some(other) => return Err(DdrError::schema(path, format!("expected an object, got {}", kind_of(other)))),
        };
        let scope = Scope::new(self.schema.children(path), obj, Some(path.to_string()));
        scope.log_unknown(&[]);

        Ok(SeverityAssessment {
            overall_severity: scope.choice::<Severity>(cx, keys::OVERALL_SEVERITY)?,
            reasoning: scope.text(cx, keys::REASONING)?,
            confidence_level: scope.choice::<ConfidenceLevel>(cx, keys::CONFIDENCE_LEVEL)?,
            confidence_reasoning: scope.text(cx, keys::CONFIDENCE_REASONING)?,
        })
    }

    fn areas(&self, cx: &mut Coercer, value: Option<&Value>) -> Result<Field<Vec<AreaObservation>>, DdrError> {
        let path = keys::AREA_WISE_OBSERVATIONS;
        let entries: Vec<(String, &Map<String, Value>)> = match value {
            None => return Ok(Field::Unavailable),
            Some(v) if is_missing(v) => return Ok(Field::Unavailable),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, entry)| match entry {
                    Value::Object(obj) => Ok((name.trim().to_string(), obj)),
                    other => Err(DdrError::schema(
                        format!("{path}.{name}"),
                        format!("expected an object, got {}", kind_of(other)),
                    )),
                })
                .collect::<Result<_, _>>()?,
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, entry)| -> Result<(String, &Map<String, Value>), DdrError> {
                    let obj = entry.as_object().ok_or_else(|| {
                        DdrError::schema(format!("{path}[{i}]"), format!("expected an object, got {}", kind_of(entry)))
                    })?;
                    let name = match lookup(obj, keys::AREA) {
                        Some(Value::String(s)) => s.trim().to_string(),
                        _ => String::new(),
                    };
                    Ok((name, obj))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(DdrError::schema(
                    path,
                    format!("expected an object keyed by area name, got {}", kind_of(other)),
                ))
            }
        };

        let mut areas = Vec::with_capacity(entries.len());
        for (name, obj) in entries {
            if name.is_empty() {
                return Err(DdrError::schema(path, "area name is empty"));
            }
            let scope = Scope::new(self.schema.children(path), obj, Some(format!("{path}.{name}")));
            scope.log_unknown(&[keys::AREA]);

            let area = AreaObservation {
                inspection_observation: scope.text(cx, keys::INSPECTION_OBSERVATION)?,
                thermal_observation: scope.text(cx, keys::THERMAL_OBSERVATION)?,
                merged_finding: scope.text(cx, keys::MERGED_FINDING)?,
                severity: scope.choice::<Severity>(cx, keys::SEVERITY)?,
                dampness_type: scope.choice::<DampnessClassification>(cx, keys::DAMPNESS_TYPE)?,
                recommendation: scope.text(cx, keys::RECOMMENDATION)?,
                inspection_evidence_ref: scope.text(cx, keys::INSPECTION_EVIDENCE_REF)?,
                thermal_evidence_ref: scope.text(cx, keys::THERMAL_EVIDENCE_REF)?,
                conflict_note: scope.text(cx, keys::CONFLICT_NOTE)?,
                area: name,
            };

            if area.area.eq_ignore_ascii_case("general") && area.has_no_observations() {
                debug!("Dropping placeholder area '{}'", area.area);
                continue;
            }
            areas.push(area);
        }

        Ok(if areas.is_empty() {
            Field::Unavailable
        } else {
            Field::Known(areas)
        })
    }
}

/// Validate with default settings and no evidence cross-check.
pub fn validate(candidate: &Map<String, Value>, policy: ConflictPolicy) -> Result<DdrRecord, DdrError> {
    Validator::new(policy).validate(candidate)
}

fn apply_evidence(record: &mut DdrRecord, evidence: Evidence) {
    if !evidence.thermal_present {
        debug!("Thermal report contributed no text; clearing thermal fields");
        if let Field::Known(areas) = &mut record.areas {
            for area in areas.iter_mut() {
                area.thermal_observation = Field::Unavailable;
                area.thermal_evidence_ref = Field::Unavailable;
            }
        }
        record.thermal_anomalies = Field::Unavailable;

        let mut items = match std::mem::take(&mut record.missing_or_unclear_information) {
            Field::Known(items) => items,
            Field::Unavailable => Vec::new(),
        };
        if !items.iter().any(|i| i.to_lowercase().contains("thermal report")) {
            items.push(THERMAL_DATA_MISSING.to_string());
        }
        record.missing_or_unclear_information = Field::Known(items);
    }
    if !evidence.anomaly_language && record.thermal_anomalies.is_known() {
        debug!("No thermal-anomaly language in the corpus; clearing Thermal_Anomalies");
        record.thermal_anomalies = Field::Unavailable;
    }
}

// ── Key lookup ───────────────────────────────────────────────────────────────

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | ' ' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Find `key` in `obj`, ignoring case, underscores, spaces and hyphens.
fn lookup<'v>(obj: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
    if let Some(v) = obj.get(key) {
        return Some(v);
    }
    let want = fold_key(key);
    obj.iter().find(|(k, _)| fold_key(k) == want).map(|(_, v)| v)
}

// ── Schema-driven access ─────────────────────────────────────────────────────

/// One JSON object read against the fields the schema declares for it.
///
/// Every read goes through the declaration: a key the schema does not
/// declare, or one read as the wrong kind, is an internal error rather than
/// a silently unchecked field.
struct Scope<'v> {
    fields: &'static [FieldSpec],
    obj: &'v Map<String, Value>,
    prefix: Option<String>,
}

impl<'v> Scope<'v> {
    fn new(fields: &'static [FieldSpec], obj: &'v Map<String, Value>, prefix: Option<String>) -> Self {
        Self { fields, obj, prefix }
    }

    fn path(&self, key: &str) -> String {
        match self.prefix {
            Some(ref p) => format!("{p}.{key}"),
            None => key.to_string(),
        }
    }

    fn get(&self, key: &str) -> Option<&'v Value> {
        lookup(self.obj, key)
    }

    fn spec(&self, key: &str) -> Result<&'static FieldSpec, DdrError> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .ok_or_else(|| DdrError::Internal(format!("'{}' is not declared in the DDR schema", self.path(key))))
    }

    fn mismatch(&self, key: &str, wanted: &str, spec: &FieldSpec) -> DdrError {
        DdrError::Internal(format!(
            "'{}' is declared as {:?}, read as {}",
            self.path(key),
            spec.kind,
            wanted
        ))
    }

    fn text(&self, cx: &mut Coercer, key: &str) -> Result<Field<String>, DdrError> {
        let spec = self.spec(key)?;
        match spec.kind {
            FieldKind::Text => cx.text(&self.path(key), self.get(key), spec.accepts_sourced()),
            _ => Err(self.mismatch(key, "text", spec)),
        }
    }

    fn choice<T>(&self, cx: &mut Coercer, key: &str) -> Result<Field<T>, DdrError>
    where
        T: FromStr<Err = String> + PartialEq + Display,
    {
        let spec = self.spec(key)?;
        match spec.kind {
            FieldKind::Choice(_) | FieldKind::Dampness(_) => {
                cx.choice::<T>(&self.path(key), self.get(key), spec.accepts_sourced())
            }
            _ => Err(self.mismatch(key, "a label", spec)),
        }
    }

    fn list(&self, key: &str) -> Result<Field<Vec<String>>, DdrError> {
        let spec = self.spec(key)?;
        match spec.kind {
            FieldKind::TextList => text_list(&self.path(key), self.get(key)),
            _ => Err(self.mismatch(key, "a list", spec)),
        }
    }

    /// Debug-log keys the schema does not declare here; `extra` names keys
    /// that are structural rather than fields.
    fn log_unknown(&self, extra: &[&str]) {
        let known: Vec<String> = self
            .fields
            .iter()
            .map(|f| f.key)
            .chain(extra.iter().copied())
            .map(fold_key)
            .collect();
        for key in self.obj.keys() {
            if !known.contains(&fold_key(key)) {
                debug!(
                    "Ignoring unknown key '{}' at '{}'",
                    key,
                    self.prefix.as_deref().unwrap_or("<root>")
                );
            }
        }
    }
}

// ── Scalar coercion ──────────────────────────────────────────────────────────

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => MISSING_ALIASES.contains(&s.trim().to_lowercase().as_str()),
        Value::Array(items) => items.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Split `{"inspection": a, "thermal": b}` into its two sides.
fn as_sourced(value: &Value) -> Option<(Option<&Value>, Option<&Value>)> {
    let obj = value.as_object()?;
    let ins = lookup(obj, keys::SOURCED_INSPECTION);
    let th = lookup(obj, keys::SOURCED_THERMAL);
    let only_sides = obj.keys().all(|k| {
        let f = fold_key(k);
        f == keys::SOURCED_INSPECTION || f == keys::SOURCED_THERMAL
    });
    (only_sides && (ins.is_some() || th.is_some())).then_some((ins, th))
}

fn scalar_text(path: &str, value: &Value) -> Result<Field<String>, DdrError> {
    match value {
        v if is_missing(v) => Ok(Field::Unavailable),
        Value::String(s) => Ok(Field::Known(s.trim().to_string())),
        Value::Number(n) => Ok(Field::Known(n.to_string())),
        Value::Bool(b) => Ok(Field::Known(b.to_string())),
        other => Err(DdrError::schema(path, format!("expected text, got {}", kind_of(other)))),
    }
}

fn scalar_choice<T>(path: &str, value: &Value) -> Result<Field<T>, DdrError>
where
    T: FromStr<Err = String>,
{
    match value {
        v if is_missing(v) => Ok(Field::Unavailable),
        Value::String(s) => s.parse::<T>().map(Field::Known).map_err(|e| DdrError::schema(path, e)),
        other => Err(DdrError::schema(path, format!("expected a label, got {}", kind_of(other)))),
    }
}

fn text_list(path: &str, value: Option<&Value>) -> Result<Field<Vec<String>>, DdrError> {
    let items = match value {
        None => return Ok(Field::Unavailable),
        Some(v) if is_missing(v) => return Ok(Field::Unavailable),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(DdrError::schema(path, format!("expected a list, got {}", kind_of(other)))),
    };

    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if let Field::Known(s) = scalar_text(&format!("{path}[{i}]"), item)? {
            if !out.iter().any(|o| o.eq_ignore_ascii_case(&s)) {
                out.push(s);
            }
        }
    }
    Ok(if out.is_empty() {
        Field::Unavailable
    } else {
        Field::Known(out)
    })
}

/// Per-record coercion state: the conflict policy and the conflicts found.
struct Coercer {
    policy: ConflictPolicy,
    conflicts: Vec<Conflict>,
}

impl Coercer {
    fn text(&mut self, path: &str, value: Option<&Value>, sourced: bool) -> Result<Field<String>, DdrError> {
        self.field(path, value, sourced, scalar_text, |a: &String, b: &String| {
            a.split_whitespace().eq(b.split_whitespace()) || a.eq_ignore_ascii_case(b)
        })
    }

    fn choice<T>(&mut self, path: &str, value: Option<&Value>, sourced: bool) -> Result<Field<T>, DdrError>
    where
        T: FromStr<Err = String> + PartialEq + Display,
    {
        self.field(path, value, sourced, scalar_choice::<T>, |a: &T, b: &T| a == b)
    }

    fn field<T: Display>(
        &mut self,
        path: &str,
        value: Option<&Value>,
        sourced: bool,
        coerce: impl Fn(&str, &Value) -> Result<Field<T>, DdrError>,
        same: impl Fn(&T, &T) -> bool,
    ) -> Result<Field<T>, DdrError> {
        let Some(value) = value else {
            return Ok(Field::Unavailable);
        };
        let Some((ins, th)) = as_sourced(value).filter(|_| sourced) else {
            return coerce(path, value);
        };

        let side = |v: Option<&Value>, origin: Origin| match v {
            Some(v) => coerce(&format!("{path}.{origin}"), v),
            None => Ok(Field::Unavailable),
        };
        let ins = side(ins, Origin::Inspection)?;
        let th = side(th, Origin::Thermal)?;

        Ok(match (ins, th) {
            (Field::Known(a), Field::Known(b)) if !same(&a, &b) => {
                let selected = match self.policy {
                    ConflictPolicy::InspectionFirst => Origin::Inspection,
                    ConflictPolicy::ThermalFirst => Origin::Thermal,
                };
                debug!("Conflict at '{}': inspection='{}' thermal='{}' → {}", path, a, b, selected);
                self.conflicts.push(Conflict {
                    field: path.to_string(),
                    inspection: a.to_string(),
                    thermal: b.to_string(),
                    selected,
                });
                match selected {
                    Origin::Inspection => Field::Known(a),
                    Origin::Thermal => Field::Known(b),
                }
            }
            (Field::Known(a), _) => Field::Known(a),
            (Field::Unavailable, th) => th,
        })
    }
}
