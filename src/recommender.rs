//! End-to-end recommendation flow
//!
//! Wires the catalog, the cache-aware embedding pipeline, and the ranker
//! together: reference products in, ranked recommendations out. All
//! collaborators are injected at construction so callers can swap the
//! provider or the catalog source wholesale.

use crate::catalog::SqliteCatalog;
use crate::config::Config;
use crate::embedding::{EmbeddingPipeline, FastEmbedTextProvider};
use crate::ranking::{Profile, RankedResult, Ranker};
use crate::{cache::SqliteEmbeddingCache, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Similarity recommendation engine
pub struct Recommender {
    catalog: SqliteCatalog,
    pipeline: Arc<EmbeddingPipeline>,
    ranker: Ranker,
}

impl Recommender {
    pub fn new(
        catalog: SqliteCatalog,
        pipeline: Arc<EmbeddingPipeline>,
        memo_capacity: usize,
    ) -> Self {
        let ranker = Ranker::new(Arc::clone(&pipeline), memo_capacity);
        Self {
            catalog,
            pipeline,
            ranker,
        }
    }

    /// Build a recommender from configuration, with the SQLite cache and
    /// a FastEmbed text provider
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = Arc::new(SqliteEmbeddingCache::new(
            &config.cache.db_path,
            config.cache.pool_size,
        )?);
        let provider = Arc::new(FastEmbedTextProvider::new(&config.embedding.text_model)?);
        let pipeline = Arc::new(EmbeddingPipeline::new(
            cache,
            provider,
            config.embedding.batch_cap,
        ));
        let catalog = SqliteCatalog::new(&config.catalog.db_path, config.catalog.workers)?;

        info!(
            text_model = %config.embedding.text_model,
            batch_cap = config.embedding.batch_cap,
            "Recommender initialized"
        );

        Ok(Self::new(catalog, pipeline, config.ranking.memo_capacity))
    }

    /// Recommend up to `top_n` products similar to the reference set
    ///
    /// The reference products themselves are excluded from the candidate
    /// pool. An empty or unknown reference set yields an empty list, not
    /// an error.
    pub fn recommend(&self, reference_ids: &[u64], top_n: usize) -> Result<Vec<RankedResult>> {
        let reference = self.catalog.fetch_by_ids(reference_ids)?;
        if reference.is_empty() {
            debug!(?reference_ids, "No reference products found");
            return Ok(Vec::new());
        }

        let profile = Profile::from_reference(&reference);
        let target = self.pipeline.resolve_one(&profile.query_text())?;

        let candidates = self.catalog.fetch_candidates(reference_ids)?;
        debug!(
            references = reference.len(),
            candidates = candidates.len(),
            top_n,
            "Ranking candidate pool"
        );

        Ok(self.ranker.rank(&target, &profile, &candidates, top_n)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, EmbeddingCache, EmbeddingKey, EmbeddingRecord, Modality};
    use crate::embedding::{EmbeddingProvider, ProviderError};
    use rusqlite::Connection;
    use tempfile::TempDir;

    /// Provider that derives vectors from the input's content hash so
    /// equal texts embed identically and distinct texts never coincide
    struct HashProvider {
        dim: usize,
    }

    impl HashProvider {
        fn encode(&self, text: &str) -> Vec<f32> {
            let hash = blake3::hash(text.as_bytes());
            hash.as_bytes()[..self.dim]
                .iter()
                .map(|&b| b as f32 + 1.0)
                .collect()
        }
    }

    impl EmbeddingProvider for HashProvider {
        fn modality(&self) -> Modality {
            Modality::Text
        }

        fn encode_one(&self, input: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            Ok(self.encode(input))
        }

        fn encode_batch(
            &self,
            inputs: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(inputs.iter().map(|t| self.encode(t)).collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn model_name(&self) -> &str {
            "hash"
        }
    }

    struct NullCache;

    impl EmbeddingCache for NullCache {
        fn get(&self, _key: &EmbeddingKey) -> Option<EmbeddingRecord> {
            None
        }

        fn put(
            &self,
            _key: &EmbeddingKey,
            _vector: &[f32],
        ) -> std::result::Result<(), CacheError> {
            Ok(())
        }
    }

    fn seed_catalog(temp: &TempDir) -> std::path::PathBuf {
        let path = temp.path().join("catalog.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "
            CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, brand TEXT, main_accord TEXT);
            CREATE TABLE product_images (product_id INTEGER, url TEXT);
            CREATE TABLE product_tags (product_id INTEGER, tag TEXT);

            INSERT INTO products VALUES
                (1, 'Bois Sauvage', 'Maison A', 'Woody'),
                (2, 'Foret Noire', 'Maison B', 'Woody'),
                (3, 'Agrume', 'Maison B', 'Citrus'),
                (4, 'Nuit Florale', 'Maison A', 'Floral');

            INSERT INTO product_tags VALUES
                (1, 'Cedar'),
                (2, 'Cedar'),
                (3, 'Bergamot'),
                (4, 'Rose');
            ",
        )
        .unwrap();
        path
    }

    fn recommender(temp: &TempDir) -> Recommender {
        let catalog = SqliteCatalog::new(&seed_catalog(temp), 2).unwrap();
        let pipeline = Arc::new(EmbeddingPipeline::new(
            Arc::new(NullCache),
            Arc::new(HashProvider { dim: 16 }),
            32,
        ));
        Recommender::new(catalog, pipeline, 128)
    }

    #[test]
    fn test_recommend_excludes_reference_products() {
        let temp = TempDir::new().unwrap();
        let engine = recommender(&temp);

        let results = engine.recommend(&[1], 10).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.candidate_id != 1));
    }

    #[test]
    fn test_empty_reference_set_yields_empty_result() {
        let temp = TempDir::new().unwrap();
        let engine = recommender(&temp);

        assert!(engine.recommend(&[], 10).unwrap().is_empty());
        // Unknown ids behave like an empty reference set
        assert!(engine.recommend(&[999], 10).unwrap().is_empty());
    }

    #[test]
    fn test_top_n_limits_results() {
        let temp = TempDir::new().unwrap();
        let engine = recommender(&temp);

        let results = engine.recommend(&[1], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].final_score >= results[1].final_score);
    }

    #[test]
    fn test_scores_are_complete_and_ordered() {
        let temp = TempDir::new().unwrap();
        let engine = recommender(&temp);

        let results = engine.recommend(&[1, 2], 10).unwrap();

        for window in results.windows(2) {
            assert!(window[0].final_score >= window[1].final_score);
        }
        for result in &results {
            assert!(result.similarity >= -1.0 && result.similarity <= 1.0);
            assert!(result.diversity_bonus >= 0.0 && result.diversity_bonus <= 0.2 + 1e-6);
        }
    }
}
