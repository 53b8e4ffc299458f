//! Cache-aware batch embedding resolution
//!
//! Partitions inputs into cache hits and misses, sends misses to the
//! provider in capped batches (one in-flight call at a time), writes new
//! vectors back best-effort, and reassembles results in input order.
//! The output always has exactly one vector per input; a provider
//! failure is fatal to the whole batch and retries belong to the caller.

use super::{EmbeddingProvider, ProviderError};
use crate::cache::{invalidate_if_dim_mismatch, EmbeddingCache, EmbeddingKey};
use ahash::AHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Provider returned {actual} vectors for a batch of {expected}")]
    BatchShape { expected: usize, actual: usize },
}

/// A resolved batch aligned to the plurality dimension
///
/// `kept` holds the original input indices that survived
/// majority-dimension filtering, in ascending order; `vectors` is
/// parallel to it. Inputs whose vectors disagreed with the plurality
/// dimension are dropped, not recomputed.
#[derive(Debug)]
pub struct AlignedBatch {
    pub dim: usize,
    pub kept: Vec<usize>,
    pub vectors: Vec<Vec<f32>>,
}

impl AlignedBatch {
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }

    pub fn len(&self) -> usize {
        self.kept.len()
    }
}

/// Batch embedding pipeline over one cache and one provider
///
/// Both collaborators are injected at construction; the pipeline owns no
/// global state. Within one invocation there is never more than one
/// provider call in flight; concurrency across independent requests is
/// the caller's scheduler's concern.
pub struct EmbeddingPipeline {
    cache: Arc<dyn EmbeddingCache>,
    provider: Arc<dyn EmbeddingProvider>,
    batch_cap: usize,
}

impl EmbeddingPipeline {
    /// Create a pipeline with the given provider batch cap (default 32)
    pub fn new(
        cache: Arc<dyn EmbeddingCache>,
        provider: Arc<dyn EmbeddingProvider>,
        batch_cap: usize,
    ) -> Self {
        Self {
            cache,
            provider,
            batch_cap: batch_cap.max(1),
        }
    }

    /// The active provider's embedding dimension
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Resolve one input, cache-first
    pub fn resolve_one(&self, input: &str) -> Result<Vec<f32>, PipelineError> {
        let mut vectors = self.resolve(std::slice::from_ref(&input.to_string()))?;
        match vectors.pop() {
            Some(vector) => Ok(vector),
            None => Err(PipelineError::BatchShape {
                expected: 1,
                actual: 0,
            }),
        }
    }

    /// Resolve a batch of inputs, cache-first, preserving input order
    ///
    /// Guarantee: `output.len() == inputs.len()`, position for position.
    pub fn resolve(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let expected_dim = self.provider.dimension();
        let mut resolved: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, input) in inputs.iter().enumerate() {
            let key = EmbeddingKey {
                identifier: input.clone(),
                modality: self.provider.modality(),
            };

            match self
                .cache
                .get(&key)
                .and_then(|record| invalidate_if_dim_mismatch(record, expected_dim))
            {
                Some(record) => resolved[i] = Some(record.vector),
                None => misses.push(i),
            }
        }

        debug!(
            total = inputs.len(),
            hits = inputs.len() - misses.len(),
            misses = misses.len(),
            "Resolved batch against embedding cache"
        );

        // One in-flight provider call at a time, capped per chunk
        for chunk in misses.chunks(self.batch_cap) {
            let texts: Vec<String> = chunk.iter().map(|&i| inputs[i].clone()).collect();
            let computed = self.provider.encode_batch(&texts)?;

            if computed.len() != chunk.len() {
                return Err(PipelineError::BatchShape {
                    expected: chunk.len(),
                    actual: computed.len(),
                });
            }

            for (&i, vector) in chunk.iter().zip(computed.into_iter()) {
                let key = EmbeddingKey {
                    identifier: inputs[i].clone(),
                    modality: self.provider.modality(),
                };

                // Write-back is best-effort; the in-memory vector still
                // serves the current request
                if let Err(e) = self.cache.put(&key, &vector) {
                    warn!(
                        key = %key.content_hash(),
                        modality = key.modality.as_str(),
                        error = %e,
                        "Failed to cache computed embedding"
                    );
                }

                resolved[i] = Some(vector);
            }
        }

        // Every position is filled: hits up front, misses by the loop above
        Ok(resolved
            .into_iter()
            .map(|slot| slot.expect("every input position resolved"))
            .collect())
    }

    /// Resolve a batch and align it to the plurality dimension
    ///
    /// If vector dimensions disagree across the batch (a cache built
    /// under an old model version coexisting with an upgraded provider),
    /// only vectors matching the most frequent dimension are kept and
    /// the rest are dropped together with their input positions.
    pub fn resolve_aligned(&self, inputs: &[String]) -> Result<AlignedBatch, PipelineError> {
        let vectors = self.resolve(inputs)?;

        let mut histogram: AHashMap<usize, usize> = AHashMap::new();
        for vector in &vectors {
            *histogram.entry(vector.len()).or_insert(0) += 1;
        }

        // Equal counts break toward the larger dimension for determinism
        let majority_dim = histogram
            .iter()
            .max_by_key(|(dim, count)| (**count, **dim))
            .map(|(dim, _)| *dim)
            .unwrap_or(0);

        if histogram.len() > 1 {
            warn!(
                ?histogram,
                majority_dim,
                expected = self.provider.dimension(),
                batch_size = inputs.len(),
                "Dimension drift across batch, keeping plurality dimension only"
            );
        }

        let mut kept = Vec::new();
        let mut aligned = Vec::new();
        for (i, vector) in vectors.into_iter().enumerate() {
            if vector.len() == majority_dim {
                kept.push(i);
                aligned.push(vector);
            }
        }

        Ok(AlignedBatch {
            dim: majority_dim,
            kept,
            vectors: aligned,
        })
    }
}
