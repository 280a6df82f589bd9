/// Batch embedding of stored chunks that have no vector yet
use super::EmbeddingProvider;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Chunk text awaiting an embedding
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub text: String,
}

/// Storage the backfill reads pending chunks from and writes vectors to
pub trait EmbeddingStore {
    fn chunks_missing_embeddings(&self) -> Result<Vec<PendingChunk>>;

    fn store_embeddings(&self, model: &str, embeddings: &[(String, Vec<f32>)]) -> Result<()>;
}

/// Result of a backfill pass
#[derive(Debug, Default)]
pub struct BackfillResult {
    pub processed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Fills the lazily-populated embedding cache of the chunk store
///
/// A failed batch is logged and counted; its chunks stay pending for the next
/// pass and their rows are scored as zero vectors in the meantime.
pub struct EmbeddingBackfill {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingBackfill {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn run(&self, store: &dyn EmbeddingStore) -> Result<BackfillResult> {
        let start = std::time::Instant::now();
        let pending = store.chunks_missing_embeddings()?;
        let total = pending.len();

        info!("Starting embedding backfill of {} chunks", total);

        let mut result = BackfillResult::default();

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            match self.provider.embed_batch(&texts) {
                Ok(vectors) if vectors.len() == batch.len() => {
                    let rows: Vec<(String, Vec<f32>)> = batch
                        .iter()
                        .map(|c| c.chunk_id.clone())
                        .zip(vectors)
                        .collect();
                    store.store_embeddings(self.provider.model_name(), &rows)?;
                    result.processed += rows.len();
                    debug!("Embedded batch of {} chunks", rows.len());
                }
                Ok(vectors) => {
                    warn!(
                        "Provider returned {} vectors for {} chunks; skipping batch",
                        vectors.len(),
                        batch.len()
                    );
                    result.failed += batch.len();
                }
                Err(e) => {
                    warn!("Embedding batch failed: {}", e);
                    result.failed += batch.len();
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Backfill complete: {} embedded, {} failed in {}ms",
            result.processed, result.failed, result.duration_ms
        );

        Ok(result)
    }
}
