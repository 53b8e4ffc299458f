//! Embedding provider adapters and the cache-aware batch pipeline
//!
//! The core never computes embeddings itself: it requests them from an
//! [`EmbeddingProvider`] (text or image encoder behind one trait) and
//! resolves as much as possible from the [`crate::cache`] first.

mod pipeline;
mod provider;

pub use pipeline::{AlignedBatch, EmbeddingPipeline, PipelineError};
pub use provider::{
    EmbeddingProvider, FastEmbedImageProvider, FastEmbedTextProvider, ProviderError,
};
