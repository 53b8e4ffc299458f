//! Scentmatch - Embedding-Based Similarity Recommendation Engine
//!
//! A cache-aware recommendation core that turns heterogeneous product
//! attributes (note texts, accords, product images) into vectors, compares
//! them against a derived taste profile, and produces a ranked,
//! diversity-adjusted candidate list. An HNSW index provides the
//! raw-embedding (image search) entry point.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ranking;
pub mod recommender;

pub use error::{Result, ScentMatchError};
pub use recommender::Recommender;
