//! Embedding provider trait and FastEmbed implementations
use crate::cache::Modality;
use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use once_cell::sync::OnceCell;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Text and image encoders are interchangeable behind this interface;
/// they differ only by the modality tag that partitions the cache
/// namespace. Timeouts and retries on the underlying model are the
/// adapter's concern, never the pipeline's.
pub trait EmbeddingProvider: Send + Sync {
    /// The cache namespace this provider's vectors belong to
    fn modality(&self) -> Modality;

    /// Encode a single input (a text, or an image path/URL)
    fn encode_one(&self, input: &str) -> Result<Vec<f32>, ProviderError>;

    /// Encode multiple inputs in one model call
    fn encode_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// FastEmbed provider for local text embedding generation
///
/// The model handle is lazily initialized on first use (guarded for
/// concurrent first access), so constructing the provider is cheap and
/// a fully cache-served request never loads the model at all.
///
/// **Important**: models are downloaded on-demand to
/// `~/.cache/huggingface/` on first use. all-MiniLM-L6-v2 is ~90MB.
pub struct FastEmbedTextProvider {
    model: OnceCell<TextEmbedding>,
    embedding_model: EmbeddingModel,
    model_name: String,
    dimension: usize,
}

impl FastEmbedTextProvider {
    /// Create a provider for the named model without loading it yet
    pub fn new(model_name: &str) -> Result<Self, ProviderError> {
        let embedding_model = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            _ => {
                return Err(ProviderError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };

        let dimension = match embedding_model {
            EmbeddingModel::BGEBaseENV15 => 768,
            _ => 384,
        };

        Ok(Self {
            model: OnceCell::new(),
            embedding_model,
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, ProviderError> {
        Self::new("all-MiniLM-L6-v2")
    }

    /// Initialize-or-fetch the underlying model handle
    fn model(&self) -> Result<&TextEmbedding, ProviderError> {
        self.model.get_or_try_init(|| {
            tracing::info!(
                model = %self.model_name,
                dimension = self.dimension,
                "Initializing text embedding model (downloads on first use if not cached)"
            );

            let init_options =
                InitOptions::new(self.embedding_model.clone()).with_show_download_progress(true);

            TextEmbedding::try_new(init_options)
                .map_err(|e| ProviderError::InitializationError(e.to_string()))
        })
    }
}

impl EmbeddingProvider for FastEmbedTextProvider {
    fn modality(&self) -> Modality {
        Modality::Text
    }

    fn encode_one(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        if input.is_empty() {
            return Err(ProviderError::InvalidInput("Empty text".to_string()));
        }

        let embeddings = self
            .model()?
            .embed(vec![input.to_string()], None)
            .map_err(|e| ProviderError::GenerationError(e.to_string()))?;

        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::GenerationError("No embeddings generated".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(ProviderError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn encode_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        if inputs.iter().any(|t| t.is_empty()) {
            return Err(ProviderError::InvalidInput(
                "Batch contains an empty text".to_string(),
            ));
        }

        let embeddings = self
            .model()?
            .embed(inputs.to_vec(), None)
            .map_err(|e| ProviderError::GenerationError(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(ProviderError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// FastEmbed provider for local image embedding generation
///
/// Inputs are local image paths (the surrounding application is
/// responsible for downloading remote URLs to disk). Vectors are
/// unit-normalized before being returned so cosine similarity reduces
/// to an inner product over the index.
pub struct FastEmbedImageProvider {
    model: OnceCell<ImageEmbedding>,
    image_model: ImageEmbeddingModel,
    model_name: String,
    dimension: usize,
}

impl FastEmbedImageProvider {
    pub fn new(model_name: &str) -> Result<Self, ProviderError> {
        let image_model = match model_name {
            "clip-vit-b-32" => ImageEmbeddingModel::ClipVitB32,
            "resnet50" => ImageEmbeddingModel::Resnet50,
            _ => {
                return Err(ProviderError::InitializationError(format!(
                    "Unsupported model: {}. Supported: clip-vit-b-32, resnet50",
                    model_name
                )));
            }
        };

        let dimension = match image_model {
            ImageEmbeddingModel::Resnet50 => 2048,
            _ => 512,
        };

        Ok(Self {
            model: OnceCell::new(),
            image_model,
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create provider with default model (clip-vit-b-32)
    pub fn with_default_model() -> Result<Self, ProviderError> {
        Self::new("clip-vit-b-32")
    }

    fn model(&self) -> Result<&ImageEmbedding, ProviderError> {
        self.model.get_or_try_init(|| {
            tracing::info!(
                model = %self.model_name,
                dimension = self.dimension,
                "Initializing image embedding model (downloads on first use if not cached)"
            );

            let init_options =
                ImageInitOptions::new(self.image_model.clone()).with_show_download_progress(true);

            ImageEmbedding::try_new(init_options)
                .map_err(|e| ProviderError::InitializationError(e.to_string()))
        })
    }
}

impl EmbeddingProvider for FastEmbedImageProvider {
    fn modality(&self) -> Modality {
        Modality::Image
    }

    fn encode_one(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let mut embeddings = self.encode_batch(std::slice::from_ref(&input.to_string()))?;
        embeddings
            .pop()
            .ok_or_else(|| ProviderError::GenerationError("No embeddings generated".to_string()))
    }

    fn encode_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        if inputs.iter().any(|p| p.is_empty()) {
            return Err(ProviderError::InvalidInput(
                "Batch contains an empty image path".to_string(),
            ));
        }

        let embeddings = self
            .model()?
            .embed(inputs.to_vec(), None)
            .map_err(|e| ProviderError::GenerationError(e.to_string()))?;

        let mut normalized = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            if embedding.len() != self.dimension {
                return Err(ProviderError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
            normalized.push(unit_normalize(embedding));
        }

        Ok(normalized)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn unit_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in &mut vector {
            *value /= magnitude;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_rejected() {
        assert!(FastEmbedTextProvider::new("not-a-model").is_err());
        assert!(FastEmbedImageProvider::new("not-a-model").is_err());
    }

    #[test]
    fn test_construction_is_lazy() {
        // No model download happens until the first encode call
        let provider = FastEmbedTextProvider::with_default_model().unwrap();
        assert_eq!(provider.dimension(), 384);
        assert_eq!(provider.model_name(), "all-MiniLM-L6-v2");
        assert_eq!(provider.modality(), Modality::Text);

        let provider = FastEmbedImageProvider::with_default_model().unwrap();
        assert_eq!(provider.dimension(), 512);
        assert_eq!(provider.modality(), Modality::Image);
    }

    #[test]
    fn test_unit_normalize() {
        let normalized = unit_normalize(vec![3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        // Zero vectors pass through unchanged
        assert_eq!(unit_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_single_embedding() {
        let provider = FastEmbedTextProvider::with_default_model().unwrap();
        let embedding = provider
            .encode_one("Main accords: Woody Spices: Cedar, Sandalwood")
            .unwrap();

        assert_eq!(embedding.len(), 384);

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.1);
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_batch_embedding() {
        let provider = FastEmbedTextProvider::with_default_model().unwrap();
        let texts = vec![
            "Main accords: Citrus Spices: Bergamot".to_string(),
            "Main accords: Woody Spices: Cedar".to_string(),
            "Main accords: Floral Spices: Rose, Jasmine".to_string(),
        ];

        let embeddings = provider.encode_batch(&texts).unwrap();
        assert_eq!(embeddings.len(), 3);
        for embedding in embeddings {
            assert_eq!(embedding.len(), 384);
        }
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_empty_text() {
        let provider = FastEmbedTextProvider::with_default_model().unwrap();
        assert!(provider.encode_one("").is_err());
    }
}
