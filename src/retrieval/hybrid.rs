//! Hybrid retrieval combining BM25 and vector similarity

use crate::config::Config;
use crate::embedding::{
    embed_query, tokenize, Bm25Params, DegradeReason, EmbeddingProvider, KeywordIndex,
    QueryEmbedding, VectorIndex,
};
use crate::retrieval::corpus::{ChunkRecord, CorpusSource, IndexAudit, TariffRow};
use crate::retrieval::fusion::{clamp_alpha, clamp_top_k, fuse_scores, FusionConfig};
use crate::retrieval::provenance::{anchor, excerpt, RetrievalHit, TariffMatch};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid retrieval settings: {0}")]
    InvalidSettings(String),

    #[error("Corpus unavailable: {0}")]
    CorpusUnavailable(String),
}

/// The two independently rebuildable index families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusFamily {
    Lexical,
    Vector,
}

impl CorpusFamily {
    fn audit_name(&self) -> &'static str {
        match self {
            CorpusFamily::Lexical => "bm25",
            CorpusFamily::Vector => "vectors",
        }
    }
}

impl fmt::Display for CorpusFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusFamily::Lexical => f.write_str("lexical"),
            CorpusFamily::Vector => f.write_str("vector"),
        }
    }
}

/// Lifecycle of one index family
#[derive(Debug)]
pub enum IndexState<T> {
    Unbuilt,
    Ready(Arc<T>),
}

impl<T> IndexState<T> {
    fn ready(&self) -> Option<Arc<T>> {
        match self {
            IndexState::Ready(snapshot) => Some(Arc::clone(snapshot)),
            IndexState::Unbuilt => None,
        }
    }
}

/// Externally visible state tag of an index family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexStatus {
    Unbuilt,
    Ready,
}

/// Immutable lexical snapshot; the chunk list it owns defines row alignment
#[derive(Debug)]
struct LexicalSnapshot {
    generation: u64,
    chunks: Arc<Vec<ChunkRecord>>,
    chunk_index: Option<KeywordIndex>,
    tariff_rows: Vec<TariffRow>,
    tariff_index: Option<KeywordIndex>,
}

/// Immutable vector snapshot, valid only for the lexical generation it was built against
#[derive(Debug)]
struct VectorSnapshot {
    generation: u64,
    index: Option<VectorIndex>,
}

/// Retrieval tuning resolved from configuration
#[derive(Debug, Clone)]
pub struct RetrieverSettings {
    pub bm25: Bm25Params,
    pub fusion_alpha: f32,
    pub top_k: usize,
    pub vector_dim: usize,
    pub snippet_chars: usize,
    /// Tag written into index audit records
    pub version_tag: String,
}

impl RetrieverSettings {
    pub fn from_config(config: &Config) -> Result<Self, SearchError> {
        let bm25 = Bm25Params::new(config.retrieval.bm25_k1, config.retrieval.bm25_b)
            .map_err(|e| SearchError::InvalidSettings(e.to_string()))?;
        FusionConfig::new(config.retrieval.fusion_alpha)
            .map_err(|e| SearchError::InvalidSettings(e.to_string()))?;
        if config.indexing.vector_dim == 0 {
            return Err(SearchError::InvalidSettings(
                "vector dimension must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            bm25,
            fusion_alpha: config.retrieval.fusion_alpha,
            top_k: clamp_top_k(Some(config.retrieval.top_k), 6),
            vector_dim: config.indexing.vector_dim,
            snippet_chars: config.retrieval.snippet_chars.max(1),
            version_tag: config.indexing.version_tag.clone(),
        })
    }
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            fusion_alpha: 0.75,
            top_k: 6,
            vector_dim: 1536,
            snippet_chars: 300,
            version_tag: "dev".to_string(),
        }
    }
}

/// Hits plus how the query embedding went
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalReport {
    pub hits: Vec<RetrievalHit>,
    /// Set when the vector side ran on a zero query vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// Hybrid retriever over a read-only corpus
///
/// Both index families start `Unbuilt` and are built on first use. Rebuilds
/// construct a fresh snapshot and swap it in under the write lock, so a query
/// always scores against one complete snapshot. The vector snapshot records the
/// lexical generation it is aligned with and is rebuilt lazily when they differ.
pub struct HybridRetriever {
    corpus: Arc<dyn CorpusSource>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    settings: RetrieverSettings,
    lexical: RwLock<IndexState<LexicalSnapshot>>,
    vector: RwLock<IndexState<VectorSnapshot>>,
    rebuild: Mutex<()>,
    generation: AtomicU64,
}

impl HybridRetriever {
    pub fn new(
        corpus: Arc<dyn CorpusSource>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        settings: RetrieverSettings,
    ) -> Self {
        Self {
            corpus,
            provider,
            settings,
            lexical: RwLock::new(IndexState::Unbuilt),
            vector: RwLock::new(IndexState::Unbuilt),
            rebuild: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    /// Hybrid retrieval; never fails, an unavailable corpus yields no hits
    pub fn retrieve(&self, query: &str, top_k: Option<usize>, alpha: Option<f32>) -> Vec<RetrievalHit> {
        self.retrieve_with_report(query, top_k, alpha).hits
    }

    pub fn retrieve_with_report(
        &self,
        query: &str,
        top_k: Option<usize>,
        alpha: Option<f32>,
    ) -> RetrievalReport {
        let top_k = clamp_top_k(top_k, self.settings.top_k);
        let alpha = clamp_alpha(alpha, self.settings.fusion_alpha);
        let mut report = RetrievalReport {
            hits: Vec::new(),
            degraded: None,
        };

        let lexical = match self.lexical_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Lexical index unavailable: {}", e);
                return report;
            }
        };
        let Some(chunk_index) = lexical.chunk_index.as_ref() else {
            info!("Chunk corpus is empty; returning no hits");
            return report;
        };

        let lexical_scores = chunk_index.scores(&tokenize(query));

        let vector_scores = if alpha > 0.0 {
            let embedding = embed_query(self.provider.as_deref(), query, self.settings.vector_dim);
            if let QueryEmbedding::Degraded { reason, .. } = &embedding {
                if *reason != DegradeReason::NoProvider {
                    warn!(%reason, "Query embedding degraded to zero vector");
                }
                report.degraded = Some(reason.to_string());
            }
            let vectors = self.vector_snapshot(&lexical);
            match vectors.index.as_ref() {
                Some(index) => index.cosine_scores(embedding.vector()),
                None => vec![0.0; lexical.chunks.len()],
            }
        } else {
            debug!("alpha is 0; skipping query embedding");
            vec![0.0; lexical.chunks.len()]
        };

        let fusion = FusionConfig::clamped(alpha);

        report.hits = fuse_scores(&lexical_scores, &vector_scores, &fusion)
            .into_iter()
            .filter(|r| r.lexical_raw > 0.0 || r.vector_raw > 0.0)
            .take(top_k)
            .filter_map(|r| {
                let chunk = lexical.chunks.get(r.position)?;
                Some(RetrievalHit {
                    chunk_id: chunk.chunk_id.clone(),
                    code: chunk.code.clone(),
                    anchor: anchor(&chunk.document_id, chunk.position),
                    snippet: excerpt(&chunk.text, self.settings.snippet_chars),
                    score: r.fused,
                    source: chunk.source,
                    url: chunk.url.clone(),
                    lexical: r.lexical_raw,
                    vector: r.vector_raw,
                })
            })
            .collect();

        debug!(
            hits = report.hits.len(),
            top_k,
            alpha,
            degraded = report.degraded.is_some(),
            "Hybrid retrieval complete"
        );
        report
    }

    /// Pure BM25 lookup against tariff rows; only rows sharing a term with the query
    pub fn search_lexical_only(&self, query: &str, top_k: Option<usize>) -> Vec<TariffMatch> {
        let top_k = clamp_top_k(top_k, self.settings.top_k);

        let lexical = match self.lexical_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Lexical index unavailable: {}", e);
                return Vec::new();
            }
        };
        let Some(index) = lexical.tariff_index.as_ref() else {
            info!("Tariff corpus is empty; returning no matches");
            return Vec::new();
        };

        index
            .search(query, top_k)
            .into_iter()
            .filter_map(|hit| {
                let row = lexical.tariff_rows.get(hit.position)?;
                Some(TariffMatch {
                    code: row.code.clone(),
                    description: row.description.clone(),
                    duty_rate: row.duty_rate.clone(),
                    chapter: row.chapter,
                    score: hit.score,
                })
            })
            .collect()
    }

    /// Explicit, exclusive rebuild of one index family; writes an audit record
    pub fn reindex(&self, family: CorpusFamily) -> bool {
        let _guard = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);

        let outcome = match family {
            CorpusFamily::Lexical => self.build_lexical().map(|snapshot| {
                let details = json!({
                    "k1": self.settings.bm25.k1(),
                    "b": self.settings.bm25.b(),
                    "chunks": snapshot.chunks.len(),
                    "tariff_rows": snapshot.tariff_rows.len(),
                    "generation": snapshot.generation,
                });
                *write(&self.lexical) = IndexState::Ready(Arc::new(snapshot));
                details
            }),
            CorpusFamily::Vector => self.rebuild_vectors_locked(),
        };

        let (ok, details) = match outcome {
            Ok(details) => (true, details),
            Err(e) => {
                warn!("Reindex of {} failed: {}", family, e);
                (false, json!({ "error": e.to_string() }))
            }
        };

        let audit = IndexAudit {
            name: family.audit_name().to_string(),
            version: self.settings.version_tag.clone(),
            details,
            ok,
            built_at: chrono::Utc::now(),
        };
        if let Err(e) = self.corpus.record_index_build(&audit) {
            warn!("Failed to record index audit: {}", e);
        }

        info!(family = %family, ok, "Reindex complete");
        ok
    }

    pub fn state(&self, family: CorpusFamily) -> IndexStatus {
        let ready = match family {
            CorpusFamily::Lexical => read(&self.lexical).ready().is_some(),
            CorpusFamily::Vector => read(&self.vector).ready().is_some(),
        };
        if ready {
            IndexStatus::Ready
        } else {
            IndexStatus::Unbuilt
        }
    }

    /// Fresh embeddings for the current lexical chunk list; caller holds the rebuild lock
    fn rebuild_vectors_locked(&self) -> Result<serde_json::Value, SearchError> {
        let existing = read(&self.lexical).ready();
        let lexical = match existing {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = Arc::new(self.build_lexical()?);
                *write(&self.lexical) = IndexState::Ready(Arc::clone(&snapshot));
                snapshot
            }
        };

        let fresh = self
            .corpus
            .load_chunks()
            .map_err(|e| SearchError::CorpusUnavailable(e.to_string()))?;
        let snapshot = self.build_vector(&lexical, Some(&fresh));

        let coerced = snapshot.index.as_ref().map(|i| i.coercions().total()).unwrap_or(0);
        let details = json!({
            "dimension": self.settings.vector_dim,
            "rows": lexical.chunks.len(),
            "coerced": coerced,
            "generation": snapshot.generation,
        });
        *write(&self.vector) = IndexState::Ready(Arc::new(snapshot));
        Ok(details)
    }

    /// Ensure-built: the first caller builds, concurrent callers wait and reuse
    fn lexical_snapshot(&self) -> Result<Arc<LexicalSnapshot>, SearchError> {
        if let Some(snapshot) = read(&self.lexical).ready() {
            return Ok(snapshot);
        }

        let _guard = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = read(&self.lexical).ready() {
            return Ok(snapshot);
        }

        let snapshot = Arc::new(self.build_lexical()?);
        *write(&self.lexical) = IndexState::Ready(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn vector_snapshot(&self, lexical: &LexicalSnapshot) -> Arc<VectorSnapshot> {
        let current = |state: &IndexState<VectorSnapshot>| {
            state.ready().filter(|s| s.generation == lexical.generation)
        };

        if let Some(snapshot) = current(&read(&self.vector)) {
            return snapshot;
        }

        let _guard = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = current(&read(&self.vector)) {
            return snapshot;
        }

        let snapshot = Arc::new(self.build_vector(lexical, None));
        *write(&self.vector) = IndexState::Ready(Arc::clone(&snapshot));
        snapshot
    }

    fn build_lexical(&self) -> Result<LexicalSnapshot, SearchError> {
        let chunks = self
            .corpus
            .load_chunks()
            .map_err(|e| SearchError::CorpusUnavailable(e.to_string()))?;
        let tariff_rows = self
            .corpus
            .load_tariff_rows()
            .map_err(|e| SearchError::CorpusUnavailable(e.to_string()))?;

        let chunk_index = KeywordIndex::from_texts(chunks.iter().map(|c| c.text.as_str()), self.settings.bm25);
        let tariff_texts: Vec<String> = tariff_rows.iter().map(TariffRow::search_text).collect();
        let tariff_index =
            KeywordIndex::from_texts(tariff_texts.iter().map(String::as_str), self.settings.bm25);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            chunks = chunks.len(),
            tariff_rows = tariff_rows.len(),
            generation,
            "Built lexical indices"
        );

        Ok(LexicalSnapshot {
            generation,
            chunks: Arc::new(chunks),
            chunk_index,
            tariff_rows,
            tariff_index,
        })
    }

    /// Rows follow the lexical chunk list; `fresh` supplies newer embeddings by chunk id
    fn build_vector(&self, lexical: &LexicalSnapshot, fresh: Option<&[ChunkRecord]>) -> VectorSnapshot {
        let fresh_by_id: HashMap<&str, &[f32]> = fresh
            .unwrap_or_default()
            .iter()
            .filter_map(|c| Some((c.chunk_id.as_str(), c.embedding.as_deref()?)))
            .collect();

        let rows = lexical.chunks.iter().map(|chunk| {
            fresh_by_id
                .get(chunk.chunk_id.as_str())
                .copied()
                .or(chunk.embedding.as_deref())
        });
        let index = VectorIndex::build(rows, self.settings.vector_dim);

        if let Some(index) = &index {
            let coerced = index.coercions();
            if coerced.total() > 0 {
                warn!(
                    missing = coerced.missing,
                    wrong_dimension = coerced.wrong_dimension,
                    non_finite = coerced.non_finite,
                    "Coerced stored embeddings to zero vectors"
                );
            }
        }

        VectorSnapshot {
            generation: lexical.generation,
            index,
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
