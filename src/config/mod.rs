//! Configuration management
//!
//! TOML-backed configuration with defaults, environment overrides, and
//! up-front validation so a bad value fails at load time instead of mid
//! request.

use crate::error::{Result, ScentMatchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub catalog: CatalogConfig,
    pub ranking: RankingConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Embedding cache storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub db_path: PathBuf,
    pub pool_size: u32,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub text_model: String,
    pub image_model: String,
    /// Maximum inputs per provider call
    pub batch_cap: usize,
}

/// Vector index tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub ef_construction: usize,
    pub m: usize,
    pub ef_search: usize,
    pub max_widening_rounds: usize,
}

/// Catalog source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub db_path: PathBuf,
    /// Per-request query workers, supported range 1..=4
    pub workers: usize,
}

/// Ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub top_n_default: usize,
    /// Bounded size of the tag-overlap bonus memo
    pub memo_capacity: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ScentMatchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ScentMatchError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ScentMatchError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SCENTMATCH_CACHE_DB") {
            self.cache.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SCENTMATCH_CATALOG_DB") {
            self.catalog.db_path = PathBuf::from(path);
        }
        if let Ok(model) = std::env::var("SCENTMATCH_TEXT_MODEL") {
            self.embedding.text_model = model;
        }
    }

    /// Default configuration file location
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ScentMatchError::Config("Cannot determine config directory".into()))?;
        Ok(config_dir.join("scentmatch").join("config.toml"))
    }

    /// Default data directory for databases
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| ScentMatchError::Config("Cannot determine data directory".into()))?;
        Ok(data_dir.join("scentmatch"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".scentmatch"));

        Self {
            meta: MetaConfig {
                schema_version: "1.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            cache: CacheConfig {
                db_path: data_dir.join("embeddings.db"),
                pool_size: 4,
            },
            embedding: EmbeddingConfig {
                text_model: "all-MiniLM-L6-v2".to_string(),
                image_model: "clip-vit-b-32".to_string(),
                batch_cap: 32,
            },
            index: IndexConfig {
                ef_construction: 200,
                m: 16,
                ef_search: 64,
                max_widening_rounds: 8,
            },
            catalog: CatalogConfig {
                db_path: data_dir.join("catalog.db"),
                workers: 2,
            },
            ranking: RankingConfig {
                top_n_default: 10,
                memo_capacity: 128,
            },
        }
    }
}
