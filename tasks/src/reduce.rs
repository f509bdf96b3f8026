//! Reduce operation (C11): projects a dataset's embedding vectors down to
//! 2-D coordinates for the scatter view. The original defers to a UMAP
//! implementation; its exact parameters (`neighbourhood=15`,
//! `min_dist=0.1`, cosine metric, `seed=42`) are kept as this module's
//! knobs, but the projection itself is a small hand-rolled,
//! deterministically-seeded neighbour-graph force layout rather than a
//! literal UMAP port — `rand` is the teacher's own choice for this kind
//! of seeded numeric work (see `eval`/`evaluations` in the teacher repo).

use std::collections::HashMap;

use common::error::AppError;
use common::storage::db::Database;
use common::storage::types::embedding::Embedding;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::TaskHandle;

pub const NEIGHBOURHOOD_SIZE: usize = 15;
pub const MIN_DIST: f64 = 0.1;
pub const SEED: u64 = 42;
const ITERATIONS: usize = 200;
const ATTRACTION: f64 = 0.05;
const REPULSION: f64 = 0.05;

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

/// Per-point indices of its `k` nearest neighbours by cosine similarity,
/// `k` clamped to `n - 1` for small datasets.
fn neighbour_graph(vectors: &[Vec<f32>], k: usize) -> Vec<Vec<usize>> {
    let n = vectors.len();
    let k = k.min(n.saturating_sub(1));
    (0..n)
        .map(|i| {
            let mut scored: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, cosine_similarity(&vectors[i], &vectors[j])))
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            scored.into_iter().map(|(j, _)| j).collect()
        })
        .collect()
}

/// A force-directed 2-D layout: each iteration pulls points toward their
/// cosine neighbours and pushes apart any pair closer than `min_dist`.
/// Deterministic for a fixed seed and input order.
fn force_layout(vectors: &[Vec<f32>], neighbourhood: usize, min_dist: f64, seed: u64) -> Vec<(f64, f64)> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions: Vec<(f64, f64)> =
        (0..n).map(|_| (rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))).collect();

    let graph = neighbour_graph(vectors, neighbourhood);

    for _ in 0..ITERATIONS {
        let mut deltas = vec![(0.0_f64, 0.0_f64); n];
        for (i, neighbours) in graph.iter().enumerate() {
            for &j in neighbours {
                let Some(&(xi, yi)) = positions.get(i) else { continue };
                let Some(&(xj, yj)) = positions.get(j) else { continue };
                let dx = xj - xi;
                let dy = yj - yi;
                if let Some(d) = deltas.get_mut(i) {
                    d.0 += dx * ATTRACTION;
                    d.1 += dy * ATTRACTION;
                }
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let (Some(&(xi, yi)), Some(&(xj, yj))) = (positions.get(i), positions.get(j)) else {
                    continue;
                };
                let dx = xi - xj;
                let dy = yi - yj;
                let dist = (dx * dx + dy * dy).sqrt().max(1e-6);
                if dist < min_dist {
                    let push = (min_dist - dist) * REPULSION / dist;
                    if let Some(d) = deltas.get_mut(i) {
                        d.0 += dx * push;
                        d.1 += dy * push;
                    }
                    if let Some(d) = deltas.get_mut(j) {
                        d.0 -= dx * push;
                        d.1 -= dy * push;
                    }
                }
            }
        }
        for (pos, delta) in positions.iter_mut().zip(deltas.iter()) {
            pos.0 += delta.0;
            pos.1 += delta.1;
        }
    }
    positions
}

pub async fn run(db: &Database, dataset_id: &str, handle: &TaskHandle) -> Result<u64, AppError> {
    let embeddings: Vec<Embedding> = db.list_embeddings(dataset_id).await?;
    handle.update(0, Some("computing layout".to_string())).await;

    let vectors: Vec<Vec<f32>> = embeddings.iter().map(|e| e.vector.clone()).collect();
    let positions = force_layout(&vectors, NEIGHBOURHOOD_SIZE, MIN_DIST, SEED);

    let mut written = 0_u64;
    let mut by_sample: HashMap<&str, (f64, f64)> = HashMap::new();
    for (e, pos) in embeddings.iter().zip(positions.iter()) {
        by_sample.insert(e.sample_id.as_str(), *pos);
    }
    for e in &embeddings {
        if let Some((x, y)) = by_sample.get(e.sample_id.as_str()) {
            db.update_embedding_xy(&e.sample_id, dataset_id, &e.model_name, *x, *y).await?;
        }
        written += 1;
        handle.update(written, None).await;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_layout_is_deterministic_for_fixed_seed() {
        let vectors = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![-1.0, 0.0]];
        let a = force_layout(&vectors, 2, MIN_DIST, SEED);
        let b = force_layout(&vectors, 2, MIN_DIST, SEED);
        assert_eq!(a, b);
    }

    #[test]
    fn neighbour_graph_clamps_k_to_n_minus_one() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let graph = neighbour_graph(&vectors, 15);
        assert_eq!(graph[0].len(), 1);
    }

    #[test]
    fn empty_dataset_produces_no_positions() {
        let vectors: Vec<Vec<f32>> = vec![];
        assert!(force_layout(&vectors, 15, MIN_DIST, SEED).is_empty());
    }
}
