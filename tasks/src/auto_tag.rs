//! Auto-tag operation (C11). Five fixed prompts against a
//! [`VisionLanguageModel`], each answer checked against a controlled
//! vocabulary; invalid answers are silently discarded rather than raised,
//! and valid tags are merged into the sample's existing tag list with
//! set semantics. Prompts and vocabularies ported from the original's
//! `vlm_service.py`.

use common::capabilities::VisionLanguageModel;
use common::error::AppError;
use common::storage::db::Database;
use common::storage::store::StorageManager;
use common::storage::types::sample::Sample;
use tracing::warn;

use crate::engine::TaskHandle;

const DIMENSIONS: &[(&str, &str, &[&str])] = &[
    (
        "lighting",
        "Describe the lighting: is this image dark, dim, bright, or normal? One word only.",
        &["dark", "dim", "bright", "normal"],
    ),
    (
        "clarity",
        "Is this image blurry, sharp, or noisy? One word only.",
        &["blurry", "sharp", "noisy"],
    ),
    (
        "setting",
        "Is this scene indoor or outdoor? One word only.",
        &["indoor", "outdoor"],
    ),
    (
        "weather",
        "What weather or time: sunny, cloudy, rainy, foggy, snowy, night, or day? One word.",
        &["sunny", "cloudy", "rainy", "foggy", "snowy", "night", "day"],
    ),
    (
        "density",
        "How crowded is this scene: empty, sparse, moderate, or crowded? One word only.",
        &["empty", "sparse", "moderate", "crowded"],
    ),
];

/// Runs all five prompts for one image, returning only answers that fall
/// within that dimension's controlled vocabulary.
async fn tag_image(model: &dyn VisionLanguageModel, image_bytes: &[u8]) -> Vec<String> {
    let mut tags = Vec::new();
    for (dimension, prompt, valid) in DIMENSIONS {
        match model.answer(image_bytes, prompt).await {
            Ok(raw) => {
                let normalised = raw.trim().trim_end_matches('.').to_lowercase();
                if valid.contains(&normalised.as_str()) {
                    tags.push(normalised);
                }
            }
            Err(err) => {
                warn!(dimension = %dimension, error = %err, "vlm prompt failed");
            }
        }
    }
    tags
}

pub async fn run(
    db: &Database,
    storage: &StorageManager,
    model: &dyn VisionLanguageModel,
    dataset_id: &str,
    handle: &TaskHandle,
) -> Result<u64, AppError> {
    let samples = db.list_samples(dataset_id).await?;
    let mut tagged = 0_u64;

    for (i, sample) in samples.iter().enumerate() {
        match tag_one(db, storage, model, sample).await {
            Ok(true) => tagged += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(sample_id = %sample.id, error = %err, "skipping sample: auto-tag failed");
            }
        }
        handle.update((i + 1) as u64, None).await;
    }

    handle
        .update(samples.len() as u64, Some(format!("tagged {tagged}/{} samples", samples.len())))
        .await;
    Ok(tagged)
}

async fn tag_one(
    db: &Database,
    storage: &StorageManager,
    model: &dyn VisionLanguageModel,
    sample: &Sample,
) -> Result<bool, AppError> {
    let image_path = storage.resolve_image_path(&sample.image_dir, &sample.file_name)?;
    let bytes = storage.read_bytes(&image_path).await?;
    let new_tags = tag_image(model, &bytes).await;
    if new_tags.is_empty() {
        return Ok(false);
    }
    let mut merged = sample.tags.clone();
    for tag in new_tags {
        if !merged.iter().any(|t| t == &tag) {
            merged.push(tag);
        }
    }
    db.set_sample_tags(&sample.dataset_id, &sample.id, merged).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedAnswers(Vec<&'static str>);

    #[async_trait]
    impl VisionLanguageModel for FixedAnswers {
        async fn answer(&self, _image_bytes: &[u8], prompt: &str) -> Result<String, AppError> {
            let idx = DIMENSIONS.iter().position(|(_, p, _)| *p == prompt).unwrap_or(0);
            Ok(self.0.get(idx).copied().unwrap_or("unknown").to_string())
        }
    }

    #[tokio::test]
    async fn invalid_answers_are_discarded() {
        let model = FixedAnswers(vec!["bright", "garbage", "outdoor", "sunny", "crowded"]);
        let tags = tag_image(&model, b"fake").await;
        assert_eq!(tags, vec!["bright", "outdoor", "sunny", "crowded"]);
    }

    #[tokio::test]
    async fn case_and_trailing_period_are_normalised() {
        let model = FixedAnswers(vec!["Bright.", "Sharp.", "Indoor.", "Day.", "Empty."]);
        let tags = tag_image(&model, b"fake").await;
        assert_eq!(tags, vec!["bright", "sharp", "indoor", "day", "empty"]);
    }
}
