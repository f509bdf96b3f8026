//! Near-duplicate clusterer (C13): union-find with path compression over
//! sample ids, merging each vector's score-above-threshold neighbours
//! (pulled from the [`VectorIndex`]) into a single set. Grounded on the
//! teacher's `StringUnionFind` (parent/rank vectors, path-compressing
//! `find`, lazy `make_set` growth) from its points-to analysis module.

use std::collections::HashMap;

use common::error::AppError;
use common::storage::db::Database;

use crate::engine::TaskHandle;
use crate::vector_index::VectorIndex;

pub const DEFAULT_THRESHOLD: f64 = 0.95;
pub const MAX_NEIGHBOURS: usize = 10;

struct StringUnionFind {
    string_to_id: HashMap<String, u32>,
    id_to_string: Vec<String>,
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl StringUnionFind {
    fn new() -> Self {
        Self {
            string_to_id: HashMap::new(),
            id_to_string: Vec::new(),
            parent: Vec::new(),
            rank: Vec::new(),
        }
    }

    fn get_or_create_id(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.string_to_id.get(s) {
            return id;
        }
        let id = self.id_to_string.len() as u32;
        self.string_to_id.insert(s.to_string(), id);
        self.id_to_string.push(s.to_string());
        self.parent.push(id);
        self.rank.push(0);
        id
    }

    fn find(&mut self, x: u32) -> u32 {
        let idx = x as usize;
        let Some(&parent) = self.parent.get(idx) else {
            return x;
        };
        if parent != x {
            let root = self.find(parent);
            if let Some(slot) = self.parent.get_mut(idx) {
                *slot = root;
            }
        }
        self.parent.get(idx).copied().unwrap_or(x)
    }

    /// Union by rank; the surviving root is the set's representative.
    fn union(&mut self, s1: &str, s2: &str) {
        let id1 = self.get_or_create_id(s1);
        let id2 = self.get_or_create_id(s2);
        let root1 = self.find(id1);
        let root2 = self.find(id2);
        if root1 == root2 {
            return;
        }
        let (r1, r2) = (root1 as usize, root2 as usize);
        let rank1 = self.rank.get(r1).copied().unwrap_or(0);
        let rank2 = self.rank.get(r2).copied().unwrap_or(0);
        if rank1 < rank2 {
            if let Some(slot) = self.parent.get_mut(r1) {
                *slot = root2;
            }
        } else if rank1 > rank2 {
            if let Some(slot) = self.parent.get_mut(r2) {
                *slot = root1;
            }
        } else {
            if let Some(slot) = self.parent.get_mut(r2) {
                *slot = root1;
            }
            if let Some(slot) = self.rank.get_mut(r1) {
                *slot += 1;
            }
        }
    }

    fn note(&mut self, s: &str) {
        self.get_or_create_id(s);
    }

    /// Groups of size >= 2, members sorted ascending, groups sorted by
    /// size descending.
    fn groups(&mut self) -> Vec<Vec<String>> {
        let mut by_root: HashMap<u32, Vec<String>> = HashMap::new();
        for id in 0..self.id_to_string.len() as u32 {
            let root = self.find(id);
            let name = self.id_to_string.get(id as usize).cloned().unwrap_or_default();
            by_root.entry(root).or_default().push(name);
        }
        let mut groups: Vec<Vec<String>> = by_root
            .into_values()
            .filter(|members| members.len() >= 2)
            .map(|mut members| {
                members.sort();
                members
            })
            .collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()));
        groups
    }
}

pub async fn run(
    db: &Database,
    index: &dyn VectorIndex,
    dataset_id: &str,
    threshold: f64,
    handle: &TaskHandle,
) -> Result<Vec<Vec<String>>, AppError> {
    index.ensure_collection(dataset_id).await?;
    let embeddings = db.list_embeddings(dataset_id).await?;
    let total = embeddings.len() as u64;

    let mut uf = StringUnionFind::new();
    for (i, e) in embeddings.iter().enumerate() {
        uf.note(&e.sample_id);
        let neighbours = index
            .query(dataset_id, &e.vector, MAX_NEIGHBOURS, Some(&e.sample_id))
            .await?;
        for (neighbour_id, score) in neighbours {
            if score >= threshold {
                uf.union(&e.sample_id, &neighbour_id);
            }
        }
        let processed = (i + 1) as u64;
        if processed % 10 == 0 || processed == total {
            handle.update(processed, Some("scanning".to_string())).await;
        }
    }

    handle.update(total, Some("grouping".to_string())).await;
    Ok(uf.groups())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_filters_singletons_and_sorts_by_size_desc() {
        let mut uf = StringUnionFind::new();
        uf.union("a", "b");
        uf.union("b", "c");
        uf.note("d");
        uf.union("e", "f");

        let groups = uf.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(groups[1], vec!["e".to_string(), "f".to_string()]);
    }

    #[test]
    fn path_compression_flattens_chain() {
        let mut uf = StringUnionFind::new();
        for i in 0..20 {
            uf.union(&i.to_string(), &(i + 1).to_string());
        }
        let root = uf.find(uf.get_or_create_id("0"));
        for i in 0..=20 {
            assert_eq!(uf.find(uf.get_or_create_id(&i.to_string())), root);
        }
    }
}
