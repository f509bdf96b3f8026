//! Embed operation (C11). Resolves each sample's image, batch-forwards
//! through an [`EmbeddingModel`], and writes vectors into `embeddings`,
//! deleting any existing rows for the dataset first for idempotence.
//! Mirrors `ingestion::pipeline::backfill_one_thumbnail`'s per-sample
//! image resolution and isolated-failure handling.

use common::capabilities::EmbeddingModel;
use common::error::AppError;
use common::storage::db::Database;
use common::storage::store::StorageManager;
use common::storage::types::embedding::Embedding;
use common::storage::types::sample::Sample;
use tracing::warn;

use crate::engine::TaskHandle;

const EMBED_MODEL_NAME: &str = "default";
const BATCH_SIZE: usize = 32;

pub async fn run(
    db: &Database,
    storage: &StorageManager,
    model: &dyn EmbeddingModel,
    dataset_id: &str,
    handle: &TaskHandle,
) -> Result<u64, AppError> {
    let samples = db.list_samples(dataset_id).await?;
    db.delete_embeddings_for_dataset(dataset_id).await?;

    let mut written = 0_u64;
    for batch in samples.chunks(BATCH_SIZE) {
        let mut embeddings = Vec::with_capacity(batch.len());
        for sample in batch {
            match embed_one(storage, model, sample).await {
                Ok(vector) => embeddings.push(Embedding {
                    sample_id: sample.id.clone(),
                    dataset_id: dataset_id.to_string(),
                    model_name: EMBED_MODEL_NAME.to_string(),
                    vector,
                    x: None,
                    y: None,
                }),
                Err(err) => {
                    warn!(sample_id = %sample.id, error = %err, "skipping sample: embed failed");
                }
            }
        }
        let batch_len = embeddings.len() as u64;
        if !embeddings.is_empty() {
            db.bulk_insert_embeddings(embeddings).await?;
        }
        written += batch_len;
        handle.update(written, None).await;
    }
    Ok(written)
}

async fn embed_one(
    storage: &StorageManager,
    model: &dyn EmbeddingModel,
    sample: &Sample,
) -> Result<Vec<f32>, AppError> {
    let image_path = storage.resolve_image_path(&sample.image_dir, &sample.file_name)?;
    let bytes = storage.read_bytes(&image_path).await?;
    model.embed(&bytes).await
}

pub fn model_name() -> &'static str {
    EMBED_MODEL_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_model_name_is_stable() {
        assert_eq!(model_name(), "default");
    }
}
