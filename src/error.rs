use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the scentmatch engine
#[derive(Error, Debug)]
pub enum ScentMatchError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Embedding cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// Embedding provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] crate::embedding::ProviderError),

    /// Batch pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::embedding::PipelineError),

    /// Vector index errors
    #[error("Vector index error: {0}")]
    Index(#[from] crate::index::VectorIndexError),

    /// Catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),

    /// Ranking errors
    #[error("Ranking error: {0}")]
    Ranking(#[from] crate::ranking::RankError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for scentmatch operations
pub type Result<T> = std::result::Result<T, ScentMatchError>;
