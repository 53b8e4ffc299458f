//! Content-addressed embedding cache
//!
//! Maps (identifier, modality) pairs to stored vectors. Keys are a BLAKE3
//! hash of the pair so they stay fixed-length and filesystem/DB-safe
//! regardless of how long the source text or image URL is. Reads never
//! fail: a storage error is logged and treated as a miss so the pipeline
//! always has a recomputation path.

mod sqlite;

pub use sqlite::SqliteEmbeddingCache;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache initialization failed: {0}")]
    InitializationError(String),

    #[error("Cache write failed: {0}")]
    WriteError(String),

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },
}

/// The kind of content an embedding was computed from.
///
/// Text and image embeddings share the same cache but live in disjoint
/// key namespaces: the same identifier string under a different modality
/// is a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

/// Cache key: the raw content identifier plus its modality
///
/// Identifiers are the raw content itself: the text that was embedded, or
/// the URL/path of the image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingKey {
    pub identifier: String,
    pub modality: Modality,
}

impl EmbeddingKey {
    pub fn text(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            modality: Modality::Text,
        }
    }

    pub fn image(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            modality: Modality::Image,
        }
    }

    /// BLAKE3 content hash of (modality, identifier), truncated to 32 hex
    /// characters for reasonable uniqueness with fixed-length keys.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.modality.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.identifier.as_bytes());
        format!("{:.32}", hasher.finalize().to_hex())
    }
}

/// A cached embedding with its dimension metadata
///
/// Invariant: `dim == vector.len() > 0`. Records are immutable once
/// written; updates are full replacements under the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub key_hash: String,
    pub vector: Vec<f32>,
    pub dim: usize,
}

impl EmbeddingRecord {
    pub fn new(key: &EmbeddingKey, vector: Vec<f32>) -> Self {
        let dim = vector.len();
        Self {
            key_hash: key.content_hash(),
            vector,
            dim,
        }
    }
}

/// Durable key-value store for embeddings
///
/// `get` never fails; `put` is an upsert with last-writer-wins semantics.
/// A `put` failure is non-fatal to callers since the freshly computed
/// vector is still usable in-memory for the current request.
pub trait EmbeddingCache: Send + Sync {
    /// Look up a cached embedding. Storage errors are logged and
    /// reported as a miss, never propagated.
    fn get(&self, key: &EmbeddingKey) -> Option<EmbeddingRecord>;

    /// Store (or replace) the embedding for a key.
    fn put(&self, key: &EmbeddingKey, vector: &[f32]) -> Result<(), CacheError>;
}

/// Guard against stale caches surviving a model upgrade to a different
/// embedding dimensionality: a record whose dimension disagrees with the
/// active provider is discarded, forcing recomputation.
pub fn invalidate_if_dim_mismatch(
    record: EmbeddingRecord,
    expected_dim: usize,
) -> Option<EmbeddingRecord> {
    if record.dim != expected_dim {
        tracing::warn!(
            key = %record.key_hash,
            expected = expected_dim,
            actual = record.dim,
            "Cached embedding dimension mismatch, invalidating"
        );
        None
    } else {
        Some(record)
    }
}
