/// Embedding provider trait, FastEmbed implementation and the degrade-aware query path
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
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
/// The provider is an external collaborator: it may be slow or unreachable, and
/// callers on the query path must go through [`embed_query`] so a failure
/// degrades instead of aborting retrieval.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts (batched for efficiency)
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// FastEmbed provider for local embedding generation
///
/// Models are downloaded on first use to `~/.cache/huggingface/`.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Dimension produced by a supported model name, if it is supported
    pub fn model_dimension(model_name: &str) -> Option<usize> {
        match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" | "bge-small-en-v1.5" => Some(384),
            "bge-base-en-v1.5" => Some(768),
            _ => None,
        }
    }

    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let embedding_model = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };
        let dimension = Self::model_dimension(model_name).unwrap_or(384);

        tracing::info!(
            "Initializing embedding model: {} ({}D, downloaded on first use)",
            model_name,
            dimension
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let mut embeddings = self
            .model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        let embedding = embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            // dropping empties here would break alignment with the caller's ids
            return Err(EmbeddingError::InvalidInput(
                "Batch contains empty text".to_string(),
            ));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
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

/// Why a query embedding fell back to the zero vector
#[derive(Debug, Clone, PartialEq)]
pub enum DegradeReason {
    /// No provider is configured
    NoProvider,
    /// The provider call failed
    ProviderFailure(String),
    /// The provider returned a vector of the wrong shape
    WrongDimension { expected: usize, actual: usize },
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::NoProvider => write!(f, "no embedding provider configured"),
            DegradeReason::ProviderFailure(e) => write!(f, "embedding provider failed: {}", e),
            DegradeReason::WrongDimension { expected, actual } => write!(
                f,
                "embedding dimension mismatch: expected {}, got {}",
                expected, actual
            ),
        }
    }
}

/// Outcome of embedding a query: either the real vector or a zero vector plus the reason
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEmbedding {
    Success(Vec<f32>),
    Degraded {
        vector: Vec<f32>,
        reason: DegradeReason,
    },
}

impl QueryEmbedding {
    pub fn degraded(dimension: usize, reason: DegradeReason) -> Self {
        QueryEmbedding::Degraded {
            vector: vec![0.0; dimension],
            reason,
        }
    }

    pub fn vector(&self) -> &[f32] {
        match self {
            QueryEmbedding::Success(v) => v,
            QueryEmbedding::Degraded { vector, .. } => vector,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, QueryEmbedding::Degraded { .. })
    }
}

/// Embed a query, degrading once (no retries) to a zero vector on any failure.
pub fn embed_query(
    provider: Option<&dyn EmbeddingProvider>,
    text: &str,
    dimension: usize,
) -> QueryEmbedding {
    let Some(provider) = provider else {
        return QueryEmbedding::degraded(dimension, DegradeReason::NoProvider);
    };

    match provider.embed(text) {
        Ok(vector) if vector.len() == dimension => QueryEmbedding::Success(vector),
        Ok(vector) => QueryEmbedding::degraded(
            dimension,
            DegradeReason::WrongDimension {
                expected: dimension,
                actual: vector.len(),
            },
        ),
        Err(e) => QueryEmbedding::degraded(dimension, DegradeReason::ProviderFailure(e.to_string())),
    }
}
