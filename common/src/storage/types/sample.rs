use serde::{Deserialize, Serialize};

/// A single image within a dataset. `width`/`height` of 0 mean
/// "unknown until thumbnail resolves"; `tags` preserves insertion order
/// with duplicates forbidden (multiset semantics per §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub dataset_id: String,
    pub id: String,
    pub file_name: String,
    pub width: i32,
    pub height: i32,
    pub thumbnail_path: Option<String>,
    pub split: Option<String>,
    pub tags: Vec<String>,
    pub image_dir: String,
}

/// Prefix marking a sample tag as a dataset-triage tag (§3, "Dataset
/// triage tag"). At most one non-`triage:annotated` tag with this prefix
/// may exist on a sample at a time.
pub const TRIAGE_TAG_PREFIX: &str = "triage:";
pub const TRIAGE_ANNOTATED_TAG: &str = "triage:annotated";

impl Sample {
    /// Appends a tag if not already present, preserving insertion order.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.retain(|t| t != tag);
    }

    /// Replaces any existing non-`triage:annotated` triage tag with `label`.
    pub fn set_triage_tag(&mut self, label: &str) {
        let new_tag = format!("{TRIAGE_TAG_PREFIX}{label}");
        self.tags
            .retain(|t| !t.starts_with(TRIAGE_TAG_PREFIX) || t == TRIAGE_ANNOTATED_TAG);
        self.add_tag(&new_tag);
    }

    pub fn triage_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .map(String::as_str)
            .find(|t| t.starts_with(TRIAGE_TAG_PREFIX) && *t != TRIAGE_ANNOTATED_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample {
            dataset_id: "d1".into(),
            id: "s1".into(),
            file_name: "a.jpg".into(),
            width: 0,
            height: 0,
            thumbnail_path: None,
            split: None,
            tags: vec![],
            image_dir: "images".into(),
        }
    }

    #[test]
    fn set_triage_tag_replaces_prior_value() {
        let mut s = sample();
        s.set_triage_tag("fp");
        s.set_triage_tag("fn");
        let triage_tags: Vec<_> = s
            .tags
            .iter()
            .filter(|t| t.starts_with(TRIAGE_TAG_PREFIX) && t.as_str() != TRIAGE_ANNOTATED_TAG)
            .collect();
        assert_eq!(triage_tags, vec!["triage:fn"]);
    }

    #[test]
    fn add_tag_is_idempotent() {
        let mut s = sample();
        s.add_tag("blurry");
        s.add_tag("blurry");
        assert_eq!(s.tags, vec!["blurry".to_string()]);
    }
}
