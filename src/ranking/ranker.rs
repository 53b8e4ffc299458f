//! Similarity and diversity ranking
//!
//! Scores candidates against a target vector as
//! `similarity * 0.75 + (accord_bonus + tag_bonus) * 0.25`. The bonuses
//! are capped at 0.1 each so diversity stays a tie-breaking nudge and
//! semantic similarity dominates.

use super::Profile;
use crate::catalog::CandidateProduct;
use crate::embedding::{EmbeddingPipeline, PipelineError};
use lru::LruCache;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

const SIMILARITY_WEIGHT: f32 = 0.75;
const DIVERSITY_WEIGHT: f32 = 0.25;
const ACCORD_BONUS: f32 = 0.1;
const TAG_BONUS_CAP: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RankError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Target vector dimension {actual} does not match candidate dimension {expected} even after recomputation")]
    TargetDimension { expected: usize, actual: usize },
}

/// A scored candidate
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub candidate_id: u64,
    pub final_score: f32,
    pub similarity: f32,
    pub diversity_bonus: f32,
}

/// Cosine similarity between two equal-length vectors
///
/// Returns 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Similarity & diversity ranker
///
/// Owns a bounded memo for the tag-overlap bonus since the same
/// (candidate tags, profile tags) pairs recur across candidates and
/// requests. The pipeline is injected; the ranker holds no global state.
pub struct Ranker {
    pipeline: Arc<EmbeddingPipeline>,
    tag_bonus_memo: Mutex<LruCache<(String, String), f32>>,
}

impl Ranker {
    pub fn new(pipeline: Arc<EmbeddingPipeline>, memo_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(memo_capacity.max(1)).expect("capacity >= 1");
        Self {
            pipeline,
            tag_bonus_memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Rank candidates against the target vector, top `top_n`
    ///
    /// Candidate vectors are resolved through the pipeline and aligned to
    /// the plurality dimension; candidates dropped by that alignment are
    /// excluded from the result. If the target vector's dimension
    /// disagrees with the candidates', it is recomputed from the profile
    /// text instead of failing the request. An empty candidate list (or
    /// one emptied by alignment) yields an empty result.
    ///
    /// Output order is deterministic: final score descending, then
    /// candidate id ascending.
    pub fn rank(
        &self,
        target: &[f32],
        profile: &Profile,
        candidates: &[CandidateProduct],
        top_n: usize,
    ) -> Result<Vec<RankedResult>, RankError> {
        if candidates.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.source_text.clone()).collect();
        let aligned = self.pipeline.resolve_aligned(&texts)?;
        if aligned.is_empty() {
            return Ok(Vec::new());
        }

        // Self-healing: a stale target (e.g. computed under an older
        // model) is recomputed from the profile, not surfaced as an error
        let recomputed;
        let target = if target.len() != aligned.dim {
            warn!(
                target_dim = target.len(),
                candidate_dim = aligned.dim,
                "Target vector dimension mismatch, recomputing from profile"
            );
            recomputed = self.pipeline.resolve_one(&profile.query_text())?;
            if recomputed.len() != aligned.dim {
                return Err(RankError::TargetDimension {
                    expected: aligned.dim,
                    actual: recomputed.len(),
                });
            }
            recomputed.as_slice()
        } else {
            target
        };

        let mut results: Vec<RankedResult> = aligned
            .kept
            .iter()
            .zip(aligned.vectors.iter())
            .map(|(&i, vector)| {
                let candidate = &candidates[i];
                let similarity = cosine_similarity(target, vector);

                let accord_bonus = if profile
                    .primary_tags
                    .iter()
                    .any(|accord| accord == &candidate.main_accord)
                {
                    0.0
                } else {
                    ACCORD_BONUS
                };

                let tag_bonus = self.tag_bonus(&candidate.tags, profile);
                let diversity_bonus = accord_bonus + tag_bonus;

                RankedResult {
                    candidate_id: candidate.id,
                    final_score: similarity * SIMILARITY_WEIGHT
                        + diversity_bonus * DIVERSITY_WEIGHT,
                    similarity,
                    diversity_bonus,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        results.truncate(top_n);

        Ok(results)
    }

    /// Tag-overlap diversity bonus, memoized per (candidate tags,
    /// profile tags) pair
    ///
    /// `0.1 * (1 - |common| / |secondary|)`: the fewer profile tags the
    /// candidate shares, the larger the bonus. Zero when the profile has
    /// no secondary tags.
    fn tag_bonus(&self, candidate_tags: &BTreeSet<String>, profile: &Profile) -> f32 {
        if profile.secondary_tags.is_empty() {
            return 0.0;
        }

        let key = (
            candidate_tags
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("\x1f"),
            profile.secondary_tags.join("\x1f"),
        );

        let mut memo = self.tag_bonus_memo.lock().unwrap();
        if let Some(bonus) = memo.get(&key) {
            return *bonus;
        }

        let common = profile
            .secondary_tags
            .iter()
            .filter(|tag| candidate_tags.contains(*tag))
            .count();
        let overlap_ratio = common as f32 / profile.secondary_tags.len() as f32;
        let bonus = TAG_BONUS_CAP * (1.0 - overlap_ratio);

        memo.put(key, bonus);
        bonus
    }

    #[cfg(test)]
    fn memo_len(&self) -> usize {
        self.tag_bonus_memo.lock().unwrap().len()
    }
}
