//! Configuration validation
//!
//! All checks run before any error is reported so a bad config surfaces
//! every problem at once.

use super::Config;
use crate::error::{Result, ScentMatchError, ValidationError};

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        if config.cache.pool_size == 0 {
            errors.push(ValidationError::new(
                "cache.pool_size",
                "must be at least 1",
            ));
        }

        if config.embedding.text_model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.text_model",
                "must not be empty",
            ));
        }
        if config.embedding.image_model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.image_model",
                "must not be empty",
            ));
        }
        if config.embedding.batch_cap == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_cap",
                "must be at least 1",
            ));
        }

        if config.index.ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.ef_construction",
                "must be at least 1",
            ));
        }
        if config.index.m == 0 {
            errors.push(ValidationError::new("index.m", "must be at least 1"));
        }
        if config.index.ef_search == 0 {
            errors.push(ValidationError::new(
                "index.ef_search",
                "must be at least 1",
            ));
        }
        if config.index.max_widening_rounds == 0 {
            errors.push(ValidationError::new(
                "index.max_widening_rounds",
                "must be at least 1",
            ));
        }

        if !(1..=4).contains(&config.catalog.workers) {
            errors.push(ValidationError::new(
                "catalog.workers",
                "must be between 1 and 4",
            ));
        }

        if config.ranking.top_n_default == 0 {
            errors.push(ValidationError::new(
                "ranking.top_n_default",
                "must be at least 1",
            ));
        }
        if config.ranking.memo_capacity == 0 {
            errors.push(ValidationError::new(
                "ranking.memo_capacity",
                "must be at least 1",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScentMatchError::ConfigValidation { errors })
        }
    }
}
