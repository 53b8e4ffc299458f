//! HNSW vector index for raw-embedding (image) queries
//!
//! Indexes one vector per product image; a candidate with several images
//! therefore occupies several slots. Search de-duplicates by candidate,
//! keeping the best-similarity hit, and widens the batch size when too
//! many raw hits collide on the same candidate.

use ahash::AHashMap;
use hnsw_rs::prelude::*;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// A distinct-candidate search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHit {
    pub candidate_id: u64,
    /// Cosine similarity (higher is more similar)
    pub similarity: f32,
}

/// Tuning parameters for the HNSW graph and the widening search
#[derive(Debug, Clone)]
pub struct VectorIndexParams {
    pub ef_construction: usize,
    pub m: usize,
    pub ef_search: usize,
    /// Widening rounds before giving up and returning what was found
    pub max_widening_rounds: usize,
}

impl Default for VectorIndexParams {
    fn default() -> Self {
        Self {
            ef_construction: 200,
            m: 16,
            ef_search: 64,
            max_widening_rounds: 8,
        }
    }
}

/// Approximate nearest-neighbor index over per-image embeddings
///
/// Uses cosine distance; similarity is reported as `1 - distance`.
pub struct VectorIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    /// Slot id -> owning candidate id
    owners: RwLock<Vec<u64>>,
    dimension: usize,
    params: VectorIndexParams,
}

impl VectorIndex {
    pub fn new(dimension: usize, params: VectorIndexParams) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            dimension,
            params.ef_construction,
            200, // max_nb_connection
            DistCosine,
        );

        Self {
            index: RwLock::new(index),
            owners: RwLock::new(Vec::new()),
            dimension,
            params,
        }
    }

    /// Insert one image embedding owned by `candidate_id`
    pub fn insert(&self, candidate_id: u64, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut owners = self.owners.write().unwrap();
        let slot = owners.len();
        owners.push(candidate_id);

        let index = self.index.write().unwrap();
        index.insert((&vector.to_vec(), slot));

        Ok(())
    }

    pub fn insert_batch(&self, items: &[(u64, Vec<f32>)]) -> Result<(), VectorIndexError> {
        for (candidate_id, vector) in items {
            self.insert(*candidate_id, vector)?;
        }
        Ok(())
    }

    /// Number of indexed vectors (not distinct candidates)
    pub fn len(&self) -> usize {
        self.owners.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Search for up to `max_distinct_results` distinct candidates above
    /// `similarity_threshold`
    ///
    /// Starts with a raw batch of `k` neighbors and doubles it each round
    /// while too few distinct candidates were found, up to the configured
    /// round ceiling or the index size. Exhausting the ceiling returns
    /// whatever distinct set was accumulated, never an error.
    pub fn search(
        &self,
        query: &[f32],
        similarity_threshold: f32,
        max_distinct_results: usize,
    ) -> Result<Vec<ImageHit>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let total = self.len();
        if total == 0 || max_distinct_results == 0 {
            return Ok(Vec::new());
        }

        let owners = self.owners.read().unwrap();
        let index = self.index.read().unwrap();

        let mut best: AHashMap<u64, f32> = AHashMap::new();
        let mut k = max_distinct_results.max(1);

        for round in 0..self.params.max_widening_rounds {
            let capped_k = k.min(total);
            let ef = self.params.ef_search.max(capped_k);
            let neighbours = index.search(query, capped_k, ef);

            for neighbour in neighbours {
                let similarity = 1.0 - neighbour.distance;
                if similarity > similarity_threshold {
                    let candidate_id = owners[neighbour.d_id];
                    best.entry(candidate_id)
                        .and_modify(|s| *s = s.max(similarity))
                        .or_insert(similarity);
                }
            }

            if best.len() >= max_distinct_results || capped_k >= total {
                break;
            }

            tracing::debug!(
                round,
                k = capped_k,
                distinct = best.len(),
                wanted = max_distinct_results,
                "Widening vector search batch"
            );
            k *= 2;
        }

        let mut hits: Vec<ImageHit> = best
            .into_iter()
            .map(|(candidate_id, similarity)| ImageHit {
                candidate_id,
                similarity,
            })
            .collect();

        // Deterministic order: similarity descending, candidate id ascending
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        hits.truncate(max_distinct_results);

        Ok(hits)
    }
}
