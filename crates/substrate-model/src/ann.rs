//! Cosine k-NN index over L2-normalized embedding rows.
//!
//! HNSW above a configurable vector-count floor, exact linear scan below
//! it, collapsed to cosine-only since rows are pre-normalized before the
//! index ever sees them (`spec.md` §4.8 steps 2-3: "the core requires
//! only that similarity is cosine and that the same threshold is applied
//! consistently").

use hnsw_rs::prelude::*;

#[derive(Debug, Clone, Copy)]
pub struct AnnConfig {
    /// Neighbors per node during HNSW construction.
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Below this vector count, search falls back to an exact linear scan.
    pub min_vectors_for_hnsw: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        AnnConfig {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            min_vectors_for_hnsw: 1000,
        }
    }
}

/// Holds the normalized vectors and, once built, an HNSW graph over them.
/// Row `i` corresponds to vocabulary index `i` in the caller's embedding
/// matrix; the index never renames or reorders rows.
pub struct CosineIndex {
    config: AnnConfig,
    vectors: Vec<Vec<f32>>,
    hnsw: Option<Hnsw<'static, f32, DistCosine>>,
}

impl CosineIndex {
    /// Build an index over already L2-normalized `vectors`. Uses HNSW once
    /// the row count clears `config.min_vectors_for_hnsw` (and the
    /// algorithm's own 10-vector minimum); falls back to linear scan
    /// otherwise.
    pub fn build(vectors: Vec<Vec<f32>>, config: AnnConfig) -> Self {
        let nb_elem = vectors.len();
        let hnsw = if nb_elem >= config.min_vectors_for_hnsw.max(10) {
            let nb_layer = 16.min((nb_elem as f32).ln().trunc() as usize).max(1);
            let index = Hnsw::<f32, DistCosine>::new(
                config.m,
                nb_elem,
                nb_layer,
                config.ef_construction,
                DistCosine {},
            );
            let data_for_insertion: Vec<(&Vec<f32>, usize)> =
                vectors.iter().enumerate().map(|(idx, v)| (v, idx)).collect();
            index.parallel_insert(&data_for_insertion);
            Some(index)
        } else {
            None
        };
        CosineIndex {
            config,
            vectors,
            hnsw,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Up to `k` neighbours of row `query_index` with cosine similarity at
    /// least `threshold`, excluding the row itself, ordered by decreasing
    /// similarity.
    pub fn neighbors(&self, query_index: usize, k: usize, threshold: f32) -> Vec<(usize, f32)> {
        if self.vectors.is_empty() {
            return Vec::new();
        }
        let query = &self.vectors[query_index];
        let candidates = match &self.hnsw {
            Some(hnsw) => {
                let ef = self.config.ef_search.max(k + 1);
                hnsw.search(query, k + 1, ef)
                    .into_iter()
                    .map(|n| (n.get_origin_id(), 1.0 - n.distance))
                    .collect()
            }
            None => self.linear_neighbors(query, k + 1),
        };

        let mut results: Vec<(usize, f32)> = candidates
            .into_iter()
            .filter(|&(idx, sim)| idx != query_index && sim >= threshold)
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        results
    }

    fn linear_neighbors(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, v)| (idx, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Rows are expected pre-normalized, so this is a plain dot product;
/// clamped against float drift pushing it fractionally past +/-1.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}
