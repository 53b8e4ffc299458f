//! SQLite-backed embedding cache
//!
//! A pooled, WAL-mode SQLite database keyed by the BLAKE3 content hash.
//! The raw identifier and modality are stored alongside each record for
//! diagnostics only; lookups go through the hash.

use super::{CacheError, EmbeddingCache, EmbeddingKey, EmbeddingRecord};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

const MIGRATIONS: &[&str] = &["CREATE TABLE IF NOT EXISTS embeddings (
        key_hash    TEXT PRIMARY KEY,
        identifier  TEXT NOT NULL,
        modality    TEXT NOT NULL,
        dim         INTEGER NOT NULL,
        vector      BLOB NOT NULL,
        updated_at  TEXT NOT NULL
    )"];

/// Embedding cache persisted in SQLite with a connection pool
pub struct SqliteEmbeddingCache {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteEmbeddingCache {
    /// Open (or create) the cache database at the given path
    pub fn new(db_path: &Path, pool_size: u32) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                source: e,
                context: format!("Failed to create cache directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| CacheError::InitializationError(e.to_string()))?;

        {
            let conn = pool
                .get()
                .map_err(|e| CacheError::InitializationError(e.to_string()))?;

            // WAL keeps concurrent get/put from blocking each other
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;

            for migration in MIGRATIONS {
                conn.execute(migration, [])?;
            }
        }

        Ok(Self { pool })
    }

    fn get_inner(&self, key: &EmbeddingKey) -> Result<Option<EmbeddingRecord>, CacheError> {
        let key_hash = key.content_hash();
        let conn = self
            .pool
            .get()
            .map_err(|e| CacheError::InitializationError(e.to_string()))?;

        let row: Option<(usize, Vec<u8>)> = conn
            .query_row(
                "SELECT dim, vector FROM embeddings WHERE key_hash = ?1",
                params![key_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match row {
            Some((dim, blob)) => {
                let vector = decode_vector(&blob)?;
                if vector.len() != dim {
                    return Err(CacheError::InvalidVector(format!(
                        "stored dim {} disagrees with vector length {}",
                        dim,
                        vector.len()
                    )));
                }
                Ok(Some(EmbeddingRecord {
                    key_hash,
                    vector,
                    dim,
                }))
            }
            None => Ok(None),
        }
    }
}

impl EmbeddingCache for SqliteEmbeddingCache {
    fn get(&self, key: &EmbeddingKey) -> Option<EmbeddingRecord> {
        match self.get_inner(key) {
            Ok(record) => record,
            Err(e) => {
                // Read errors degrade to a miss; the pipeline recomputes
                tracing::warn!(
                    key = %key.content_hash(),
                    modality = key.modality.as_str(),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    fn put(&self, key: &EmbeddingKey, vector: &[f32]) -> Result<(), CacheError> {
        if vector.is_empty() {
            return Err(CacheError::InvalidVector(
                "refusing to cache an empty vector".to_string(),
            ));
        }

        let conn = self
            .pool
            .get()
            .map_err(|e| CacheError::WriteError(e.to_string()))?;

        conn.execute(
            "INSERT INTO embeddings (key_hash, identifier, modality, dim, vector, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key_hash) DO UPDATE SET
                dim = excluded.dim,
                vector = excluded.vector,
                updated_at = excluded.updated_at",
            params![
                key.content_hash(),
                key.identifier,
                key.modality.as_str(),
                vector.len(),
                encode_vector(vector),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, CacheError> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return Err(CacheError::InvalidVector(format!(
            "blob length {} is not a positive multiple of 4",
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_cache(temp: &TempDir) -> SqliteEmbeddingCache {
        SqliteEmbeddingCache::new(&temp.path().join("embeddings.db"), 4).unwrap()
    }

    #[test]
    fn test_put_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let key = EmbeddingKey::text("Main accords: Woody Spices: Cedar, Sandalwood");
        let vector = vec![0.25f32, -1.5, 0.0, 3.125];

        cache.put(&key, &vector).unwrap();
        let record = cache.get(&key).unwrap();

        assert_eq!(record.dim, 4);
        for (stored, original) in record.vector.iter().zip(vector.iter()) {
            assert!((stored - original).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_miss_returns_none() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        assert!(cache.get(&EmbeddingKey::text("never stored")).is_none());
    }

    #[test]
    fn test_upsert_replaces_vector() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let key = EmbeddingKey::image("https://img.example.com/bottle.jpg");
        cache.put(&key, &vec![1.0; 768]).unwrap();
        cache.put(&key, &vec![2.0; 384]).unwrap();

        let record = cache.get(&key).unwrap();
        assert_eq!(record.dim, 384);
        assert!((record.vector[0] - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_vector_rejected() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let result = cache.put(&EmbeddingKey::text("empty"), &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_modalities_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let url = "https://img.example.com/a.jpg";
        cache.put(&EmbeddingKey::text(url), &vec![1.0; 8]).unwrap();
        cache.put(&EmbeddingKey::image(url), &vec![2.0; 16]).unwrap();

        assert_eq!(cache.get(&EmbeddingKey::text(url)).unwrap().dim, 8);
        assert_eq!(cache.get(&EmbeddingKey::image(url)).unwrap().dim, 16);
    }

    #[test]
    fn test_vector_codec() {
        let vector = vec![0.0f32, -0.0, f32::MIN_POSITIVE, 1234.5678];
        let decoded = decode_vector(&encode_vector(&vector)).unwrap();
        assert_eq!(vector, decoded);

        assert!(decode_vector(&[]).is_err());
        assert!(decode_vector(&[0, 1, 2]).is_err());
    }
}
