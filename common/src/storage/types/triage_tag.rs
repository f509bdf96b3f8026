/// The enumerated values a dataset triage tag may take (§3, "Dataset
/// triage tag"). Distinct from [`super::annotation_triage::AnnotationTriageLabel`]:
/// this tags a whole sample, not a single annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetTriageTag {
    Tp,
    Fp,
    Fn_,
    Mistake,
    Annotated,
}

impl DatasetTriageTag {
    pub fn as_tag(self) -> &'static str {
        match self {
            DatasetTriageTag::Tp => "triage:tp",
            DatasetTriageTag::Fp => "triage:fp",
            DatasetTriageTag::Fn_ => "triage:fn",
            DatasetTriageTag::Mistake => "triage:mistake",
            DatasetTriageTag::Annotated => "triage:annotated",
        }
    }

    pub fn label_from_str(value: &str) -> Option<Self> {
        match value {
            "tp" => Some(DatasetTriageTag::Tp),
            "fp" => Some(DatasetTriageTag::Fp),
            "fn" => Some(DatasetTriageTag::Fn_),
            "mistake" => Some(DatasetTriageTag::Mistake),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_from_str_rejects_annotated() {
        assert!(DatasetTriageTag::label_from_str("annotated").is_none());
    }

    #[test]
    fn as_tag_roundtrips_with_label_from_str() {
        for tag in [
            DatasetTriageTag::Tp,
            DatasetTriageTag::Fp,
            DatasetTriageTag::Fn_,
            DatasetTriageTag::Mistake,
        ] {
            let rendered = tag.as_tag();
            let label = rendered.strip_prefix("triage:").unwrap();
            assert_eq!(DatasetTriageTag::label_from_str(label), Some(tag));
        }
    }
}
