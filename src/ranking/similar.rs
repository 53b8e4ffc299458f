//! "More like this" lookups for a single product
//!
//! Text similarity fuses per-field embeddings into one vector per
//! product with a weighted mean (notes weigh twice as much as the
//! description, the main accord sits in between). Image similarity
//! compares a raw query embedding against every candidate image and
//! keeps the best image per candidate.

use super::{cosine_similarity, RankError};
use crate::embedding::EmbeddingPipeline;
use ahash::AHashMap;
use tracing::warn;

const NOTES_WEIGHT: f32 = 2.0;
const ACCORD_WEIGHT: f32 = 1.5;
const DESCRIPTION_WEIGHT: f32 = 1.0;

/// The embeddable text fields of one product
#[derive(Debug, Clone)]
pub struct ProductText {
    pub id: u64,
    pub notes: String,
    pub main_accord: String,
    pub description: String,
}

impl ProductText {
    /// Non-empty fields with their fusion weights
    fn weighted_fields(&self) -> Vec<(f32, &str)> {
        let mut fields = Vec::with_capacity(3);
        if !self.notes.is_empty() {
            fields.push((NOTES_WEIGHT, self.notes.as_str()));
        }
        if !self.main_accord.is_empty() {
            fields.push((ACCORD_WEIGHT, self.main_accord.as_str()));
        }
        if !self.description.is_empty() {
            fields.push((DESCRIPTION_WEIGHT, self.description.as_str()));
        }
        fields
    }
}

/// A similarity-search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarHit {
    pub candidate_id: u64,
    pub similarity: f32,
}

fn sort_hits(hits: &mut Vec<SimilarHit>, top_n: usize) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
    hits.truncate(top_n);
}

/// Weighted mean of a product's field embeddings
///
/// Returns None when the product has no non-empty fields or its field
/// vectors disagree in dimension.
fn fused_vector(
    pipeline: &EmbeddingPipeline,
    product: &ProductText,
) -> Result<Option<Vec<f32>>, RankError> {
    let fields = product.weighted_fields();
    if fields.is_empty() {
        return Ok(None);
    }

    let texts: Vec<String> = fields.iter().map(|(_, text)| text.to_string()).collect();
    let vectors = pipeline.resolve(&texts)?;

    let dim = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dim) {
        warn!(
            product_id = product.id,
            "Field embeddings disagree in dimension, skipping product"
        );
        return Ok(None);
    }

    let mut fused = vec![0.0f32; dim];
    let mut total_weight = 0.0f32;
    for ((weight, _), vector) in fields.iter().zip(vectors.iter()) {
        total_weight += weight;
        for (slot, value) in fused.iter_mut().zip(vector.iter()) {
            *slot += weight * value;
        }
    }
    for slot in fused.iter_mut() {
        *slot /= total_weight;
    }

    Ok(Some(fused))
}

/// Products most similar to `target` by fused text embedding
///
/// Candidates without any embeddable text are skipped. Order is
/// similarity descending, then candidate id ascending.
pub fn similar_by_text(
    pipeline: &EmbeddingPipeline,
    target: &ProductText,
    candidates: &[ProductText],
    top_n: usize,
) -> Result<Vec<SimilarHit>, RankError> {
    if top_n == 0 {
        return Ok(Vec::new());
    }

    let target_vector = match fused_vector(pipeline, target)? {
        Some(vector) => vector,
        None => return Ok(Vec::new()),
    };

    let mut hits = Vec::new();
    for candidate in candidates {
        if candidate.id == target.id {
            continue;
        }
        if let Some(vector) = fused_vector(pipeline, candidate)? {
            if vector.len() != target_vector.len() {
                continue;
            }
            hits.push(SimilarHit {
                candidate_id: candidate.id,
                similarity: cosine_similarity(&target_vector, &vector),
            });
        }
    }

    sort_hits(&mut hits, top_n);
    Ok(hits)
}

/// Candidates most similar to a raw image embedding
///
/// `images` pairs each image URL with its owning candidate id; the best
/// image per candidate decides that candidate's similarity. Image
/// embeddings resolve through the (image-modality) pipeline, so repeat
/// queries over the same catalog are cache-served.
pub fn similar_by_image(
    pipeline: &EmbeddingPipeline,
    query: &[f32],
    images: &[(u64, String)],
    top_n: usize,
) -> Result<Vec<SimilarHit>, RankError> {
    if images.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let urls: Vec<String> = images.iter().map(|(_, url)| url.clone()).collect();
    let aligned = pipeline.resolve_aligned(&urls)?;

    if aligned.is_empty() {
        return Ok(Vec::new());
    }
    if query.len() != aligned.dim {
        warn!(
            query_dim = query.len(),
            index_dim = aligned.dim,
            "Image query dimension does not match catalog embeddings"
        );
        return Ok(Vec::new());
    }

    let mut best: AHashMap<u64, f32> = AHashMap::new();
    for (&i, vector) in aligned.kept.iter().zip(aligned.vectors.iter()) {
        let candidate_id = images[i].0;
        let similarity = cosine_similarity(query, vector);
        best.entry(candidate_id)
            .and_modify(|s| *s = s.max(similarity))
            .or_insert(similarity);
    }

    let mut hits: Vec<SimilarHit> = best
        .into_iter()
        .map(|(candidate_id, similarity)| SimilarHit {
            candidate_id,
            similarity,
        })
        .collect();

    sort_hits(&mut hits, top_n);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, EmbeddingCache, EmbeddingKey, EmbeddingRecord, Modality};
    use crate::embedding::{EmbeddingProvider, ProviderError};
    use std::sync::Arc;

    /// Provider answering from a fixed text -> vector table
    struct TableProvider {
        dim: usize,
        modality: Modality,
        table: AHashMap<String, Vec<f32>>,
    }

    impl TableProvider {
        fn text(dim: usize, entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                dim,
                modality: Modality::Text,
                table: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.clone()))
                    .collect(),
            }
        }

        fn image(dim: usize, entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                modality: Modality::Image,
                ..Self::text(dim, entries)
            }
        }

        fn lookup(&self, text: &str) -> Vec<f32> {
            self.table.get(text).cloned().unwrap_or_else(|| {
                let mut v = vec![0.0; self.dim];
                v[0] = 1.0;
                v
            })
        }
    }

    impl EmbeddingProvider for TableProvider {
        fn modality(&self) -> Modality {
            self.modality
        }

        fn encode_one(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(self.lookup(input))
        }

        fn encode_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(inputs.iter().map(|t| self.lookup(t)).collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    struct NullCache;

    impl EmbeddingCache for NullCache {
        fn get(&self, _key: &EmbeddingKey) -> Option<EmbeddingRecord> {
            None
        }

        fn put(&self, _key: &EmbeddingKey, _vector: &[f32]) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn pipeline(provider: TableProvider) -> EmbeddingPipeline {
        EmbeddingPipeline::new(Arc::new(NullCache), Arc::new(provider), 32)
    }

    fn product(id: u64, notes: &str, accord: &str, description: &str) -> ProductText {
        ProductText {
            id,
            notes: notes.to_string(),
            main_accord: accord.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_fused_vector_is_weighted_mean() {
        let p = pipeline(TableProvider::text(
            3,
            &[
                ("cedar, vetiver", vec![1.0, 0.0, 0.0]),
                ("Woody", vec![0.0, 1.0, 0.0]),
                ("a dry forest scent", vec![0.0, 0.0, 1.0]),
            ],
        ));

        let fused = fused_vector(&p, &product(1, "cedar, vetiver", "Woody", "a dry forest scent"))
            .unwrap()
            .unwrap();

        // (2.0 * e1 + 1.5 * e2 + 1.0 * e3) / 4.5
        assert!((fused[0] - 2.0 / 4.5).abs() < 1e-6);
        assert!((fused[1] - 1.5 / 4.5).abs() < 1e-6);
        assert!((fused[2] - 1.0 / 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_notes_outweigh_description() {
        let p = pipeline(TableProvider::text(
            3,
            &[
                ("shared notes", vec![1.0, 0.0, 0.0]),
                ("shared description", vec![0.0, 0.0, 1.0]),
                ("other", vec![0.0, 1.0, 0.0]),
            ],
        ));

        let target = product(1, "shared notes", "", "shared description");
        // Candidate 2 matches on notes, candidate 3 only on description
        let candidates = vec![
            product(2, "shared notes", "", "other"),
            product(3, "other", "", "shared description"),
        ];

        let hits = similar_by_text(&p, &target, &candidates, 10).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].candidate_id, 2);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn test_target_excluded_and_blank_candidates_skipped() {
        let p = pipeline(TableProvider::text(2, &[]));

        let target = product(1, "cedar", "", "");
        let candidates = vec![
            target.clone(),
            product(2, "cedar", "", ""),
            product(3, "", "", ""), // nothing to embed
        ];

        let hits = similar_by_text(&p, &target, &candidates, 10).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].candidate_id, 2);
    }

    #[test]
    fn test_blank_target_yields_empty() {
        let p = pipeline(TableProvider::text(2, &[]));
        let hits = similar_by_text(
            &p,
            &product(1, "", "", ""),
            &[product(2, "cedar", "", "")],
            10,
        )
        .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_image_search_keeps_best_image_per_candidate() {
        let p = pipeline(TableProvider::image(
            2,
            &[
                ("a.jpg", vec![1.0, 0.0]),
                ("b.jpg", vec![0.0, 1.0]),
                ("c.jpg", vec![0.7, 0.7]),
            ],
        ));

        let images = vec![
            (1, "a.jpg".to_string()),
            (1, "b.jpg".to_string()),
            (2, "c.jpg".to_string()),
        ];

        let hits = similar_by_image(&p, &[1.0, 0.0], &images, 10).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].candidate_id, 1);
        assert!(hits[0].similarity > 0.99); // best image, not the orthogonal one
        assert_eq!(hits[1].candidate_id, 2);
    }

    #[test]
    fn test_image_query_dimension_mismatch_yields_empty() {
        let p = pipeline(TableProvider::image(2, &[("a.jpg", vec![1.0, 0.0])]));
        let images = vec![(1, "a.jpg".to_string())];

        let hits = similar_by_image(&p, &[1.0, 0.0, 0.0], &images, 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_image_search_truncates_to_top_n() {
        let p = pipeline(TableProvider::image(
            2,
            &[
                ("a.jpg", vec![1.0, 0.0]),
                ("b.jpg", vec![0.9, 0.1]),
                ("c.jpg", vec![0.8, 0.2]),
            ],
        ));

        let images = vec![
            (1, "a.jpg".to_string()),
            (2, "b.jpg".to_string()),
            (3, "c.jpg".to_string()),
        ];

        let hits = similar_by_image(&p, &[1.0, 0.0], &images, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].candidate_id, 1);
        assert_eq!(hits[1].candidate_id, 2);
    }

    #[test]
    fn test_image_search_empty_inputs() {
        let p = pipeline(TableProvider::image(2, &[]));
        assert!(similar_by_image(&p, &[1.0, 0.0], &[], 10)
            .unwrap()
            .is_empty());
    }
}
