//! The canonical Detailed Diagnostic Report record.
//!
//! Every required field is a [`Field`]: either a value that the source
//! documents support, or [`Field::Unavailable`]. The distinction is kept in
//! the types all the way to the edges; only serialisation and rendering
//! flatten `Unavailable` into the literal [`NOT_AVAILABLE`] sentinel.
//!
//! Records are produced by [`crate::pipeline::validate`] only. Nothing else in
//! the crate constructs one from model output.

use crate::output::Origin;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The reserved literal standing in for information the sources do not support.
pub const NOT_AVAILABLE: &str = "Not Available";

/// A required field: a supported value, or explicitly unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Field<T> {
    Known(T),
    #[default]
    Unavailable,
}

impl<T> Field<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, Field::Known(_))
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Field::Known(v) => Some(v),
            Field::Unavailable => None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Known(v) => v.fmt(f),
            Field::Unavailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Known(v) => v.serialize(serializer),
            Field::Unavailable => serializer.serialize_str(NOT_AVAILABLE),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.as_str() == Some(NOT_AVAILABLE) {
            return Ok(Field::Unavailable);
        }
        T::deserialize(value)
            .map(Field::Known)
            .map_err(serde::de::Error::custom)
    }
}

/// A value with a closed set of canonical labels.
///
/// `parse_label` is the coercion whitelist: it accepts the textual variants a
/// model is known to produce and rejects everything else.
pub trait Canonical: Sized + Copy + PartialEq + fmt::Display + 'static {
    /// Canonical labels, in display order.
    const LABELS: &'static [&'static str];

    fn parse_label(s: &str) -> Option<Self>;
}

/// Lowercase, turn `-`/`_`/`/` into spaces and collapse whitespace.
fn fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '-' | '_' | '/' => ' ',
            c => c.to_ascii_lowercase(),
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal $(| $alias:literal)*),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl Canonical for $name {
            const LABELS: &'static [&'static str] = &[$($label),+];

            fn parse_label(s: &str) -> Option<Self> {
                let folded = fold(s);
                $(
                    if folded == fold($label) $(|| folded == $alias)* {
                        return Some($name::$variant);
                    }
                )+
                None
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($name::$variant => $label),+
                })
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse_label(s).ok_or_else(|| {
                    format!("unrecognised value '{}'; expected one of: {}", s.trim(), Self::LABELS.join(", "))
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

labelled_enum! {
    /// Diagnostic severity scale.
    Severity {
        Low => "Low",
        LowToModerate => "Low to Moderate" | "low moderate",
        Moderate => "Moderate" | "medium" | "med",
        ModerateToHigh => "Moderate to High" | "moderate high" | "medium to high" | "medium high",
        High => "High",
    }
}

labelled_enum! {
    /// How strongly the evidence supports the assessment.
    ConfidenceLevel {
        High => "High",
        Medium => "Medium" | "moderate" | "med",
        Low => "Low",
    }
}

labelled_enum! {
    /// Mechanism behind observed dampness.
    DampnessKind {
        Rising => "Rising Damp",
        Penetrating => "Penetrating Damp",
        PlumbingLeakage => "Plumbing Leakage Damp" | "plumbing leak damp" | "plumbing damp",
    }
}

/// One dampness label, optionally qualified as inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dampness {
    pub kind: DampnessKind,
    /// Inferred from context rather than stated in the source.
    pub probable: bool,
}

impl fmt::Display for Dampness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.probable {
            write!(f, "{} (Probable)", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl FromStr for Dampness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        let (base, probable) = match lower.strip_suffix("(probable)") {
            Some(rest) => (&trimmed[..rest.len()], true),
            None => (trimmed, false),
        };
        let kind = base.parse::<DampnessKind>()?;
        Ok(Dampness { kind, probable })
    }
}

/// One or more dampness labels, written comma-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DampnessClassification(pub Vec<Dampness>);

impl fmt::Display for DampnessClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(", "))
    }
}

impl FromStr for DampnessClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let label: Dampness = part.parse()?;
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        if labels.is_empty() {
            return Err("empty dampness classification".to_string());
        }
        Ok(DampnessClassification(labels))
    }
}

impl PartialEq<str> for DampnessClassification {
    fn eq(&self, other: &str) -> bool {
        self.to_string() == other
    }
}

impl Serialize for DampnessClassification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DampnessClassification {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Findings for one named area of the property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaObservation {
    pub area: String,
    pub inspection_observation: Field<String>,
    pub thermal_observation: Field<String>,
    pub merged_finding: Field<String>,
    pub severity: Field<Severity>,
    pub dampness_type: Field<DampnessClassification>,
    pub recommendation: Field<String>,
    pub inspection_evidence_ref: Field<String>,
    pub thermal_evidence_ref: Field<String>,
    pub conflict_note: Field<String>,
}

impl AreaObservation {
    /// An area with a name and nothing else supported.
    pub fn unavailable(area: impl Into<String>) -> Self {
        Self {
            area: area.into(),
            inspection_observation: Field::Unavailable,
            thermal_observation: Field::Unavailable,
            merged_finding: Field::Unavailable,
            severity: Field::Unavailable,
            dampness_type: Field::Unavailable,
            recommendation: Field::Unavailable,
            inspection_evidence_ref: Field::Unavailable,
            thermal_evidence_ref: Field::Unavailable,
            conflict_note: Field::Unavailable,
        }
    }

    /// True when none of the observation fields carry a value.
    pub fn has_no_observations(&self) -> bool {
        !self.inspection_observation.is_known()
            && !self.thermal_observation.is_known()
            && !self.merged_finding.is_known()
    }
}

/// Overall severity with its justification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeverityAssessment {
    pub overall_severity: Field<Severity>,
    pub reasoning: Field<String>,
    pub confidence_level: Field<ConfidenceLevel>,
    pub confidence_reasoning: Field<String>,
}

/// A field where inspection-derived and thermal-derived evidence disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Path of the field in the candidate record, e.g. `Area_Wise_Observations.Hall.severity`.
    pub field: String,
    pub inspection: String,
    pub thermal: String,
    /// Which side ended up in the record.
    pub selected: Origin,
}

/// The validated Detailed Diagnostic Report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DdrRecord {
    pub property_issue_summary: Field<String>,
    pub areas: Field<Vec<AreaObservation>>,
    pub probable_root_cause: Field<String>,
    pub severity_assessment: SeverityAssessment,
    pub thermal_anomalies: Field<String>,
    pub recommended_actions: Field<String>,
    pub risk_implications: Field<String>,
    pub additional_notes: Field<String>,
    pub missing_or_unclear_information: Field<Vec<String>>,
    /// Auxiliary: contradictions resolved during validation. Not rendered.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl DdrRecord {
    /// Every area, or an empty slice when the areas are unavailable.
    pub fn area_list(&self) -> &[AreaObservation] {
        self.areas.known().map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_whitelist_accepts_case_variants() {
        for s in ["High", "high", "HIGH", " High "] {
            assert_eq!(s.parse::<Severity>(), Ok(Severity::High), "{s}");
        }
        assert_eq!("low-to-moderate".parse::<Severity>(), Ok(Severity::LowToModerate));
        assert_eq!("Medium".parse::<Severity>(), Ok(Severity::Moderate));
        assert_eq!("moderate_to_high".parse::<Severity>(), Ok(Severity::ModerateToHigh));
    }

    #[test]
    fn severity_rejects_unknown_label() {
        let err = "Catastrophic".parse::<Severity>().unwrap_err();
        assert!(err.contains("Catastrophic"));
        assert!(err.contains("Low to Moderate"));
    }

    #[test]
    fn confidence_accepts_moderate_as_medium() {
        assert_eq!("moderate".parse::<ConfidenceLevel>(), Ok(ConfidenceLevel::Medium));
    }

    #[test]
    fn dampness_parses_multiple_labels() {
        let c: DampnessClassification = "rising damp, Plumbing Leakage Damp (probable)".parse().unwrap();
        assert_eq!(c.0.len(), 2);
        assert!(!c.0[0].probable);
        assert!(c.0[1].probable);
        assert_eq!(c.to_string(), "Rising Damp, Plumbing Leakage Damp (Probable)");
    }

    #[test]
    fn dampness_rejects_unknown_mechanism() {
        assert!("Condensation".parse::<DampnessClassification>().is_err());
    }

    #[test]
    fn field_serialises_sentinel() {
        let f: Field<Severity> = Field::Unavailable;
        assert_eq!(serde_json::to_string(&f).unwrap(), "\"Not Available\"");
        let k = Field::Known(Severity::ModerateToHigh);
        assert_eq!(serde_json::to_string(&k).unwrap(), "\"Moderate to High\"");
    }

    #[test]
    fn field_deserialises_sentinel_back_to_unavailable() {
        let f: Field<Vec<String>> = serde_json::from_str("\"Not Available\"").unwrap();
        assert_eq!(f, Field::Unavailable);
        let g: Field<Vec<String>> = serde_json::from_str("[\"Roof drawings\"]").unwrap();
        assert_eq!(g, Field::Known(vec!["Roof drawings".to_string()]));
    }

    #[test]
    fn record_json_round_trip_keeps_unavailable_distinct() {
        let mut record = DdrRecord {
            property_issue_summary: Field::Known("Dampness in two rooms".into()),
            ..DdrRecord::default()
        };
        record.areas = Field::Known(vec![AreaObservation::unavailable("Hall")]);
        let json = serde_json::to_string(&record).unwrap();
        let back: DdrRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.probable_root_cause, Field::Unavailable);
    }
}
