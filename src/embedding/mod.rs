/// Embedding & indexing
///
/// - `EmbeddingProvider` trait for abstraction, `FastEmbedProvider` for local models
/// - `embed_query` turns provider failures into a tagged zero-vector outcome
/// - `KeywordIndex`: in-memory BM25 over tokenized text
/// - `VectorIndex`: dense matrix scored by cosine similarity
/// - `EmbeddingBackfill`: fills missing chunk vectors in batches
mod backfill;
mod keyword_index;
mod provider;
mod vector_index;

pub use backfill::{BackfillResult, EmbeddingBackfill, EmbeddingStore, PendingChunk};
pub use keyword_index::{tokenize, Bm25Params, KeywordIndex, KeywordIndexError, KeywordSearchResult};
pub use provider::{
    embed_query, DegradeReason, EmbeddingError, EmbeddingProvider, FastEmbedProvider,
    QueryEmbedding,
};
pub use vector_index::{check_row, CoercionStats, RowDefect, VectorIndex, COSINE_EPSILON};

use crate::config::Config;
use crate::error::{HtsError, Result};
use std::sync::Arc;

/// Build the provider named by the configuration, `None` when embeddings are disabled
pub fn provider_from_config(config: &Config) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.embedding.provider.as_str() {
        "disabled" => Ok(None),
        "fastembed" => {
            let provider = FastEmbedProvider::new(&config.embedding.model)?;
            Ok(Some(Arc::new(provider)))
        }
        other => Err(HtsError::InvalidConfigValue {
            path: "embedding.provider".to_string(),
            message: format!("Unknown provider '{}'", other),
        }),
    }
}
