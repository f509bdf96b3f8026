use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationTriageLabel {
    Tp,
    Fp,
    Fn_,
    Mistake,
}

impl AnnotationTriageLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationTriageLabel::Tp => "tp",
            AnnotationTriageLabel::Fp => "fp",
            AnnotationTriageLabel::Fn_ => "fn",
            AnnotationTriageLabel::Mistake => "mistake",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "tp" => Some(AnnotationTriageLabel::Tp),
            "fp" => Some(AnnotationTriageLabel::Fp),
            "fn" => Some(AnnotationTriageLabel::Fn_),
            "mistake" => Some(AnnotationTriageLabel::Mistake),
            _ => None,
        }
    }
}

/// A user-supplied label that supersedes auto-computed labels at read
/// time (§3, "Annotation triage override"). Writing one sets the
/// sample's `triage:annotated` tag (I4); removing the last one for a
/// sample clears it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationTriageOverride {
    pub annotation_id: String,
    pub dataset_id: String,
    pub sample_id: String,
    pub label: AnnotationTriageLabel,
    pub created_at: DateTime<Utc>,
}
