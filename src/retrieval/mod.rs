//! Hybrid Retrieval
//!
//! BM25 and cosine similarity over the same chunk list, min-max normalized per
//! query and fused with a convex weight. Results are hydrated into hits that
//! carry a stable anchor back to the originating document.

mod corpus;
mod fusion;
mod hybrid;
mod provenance;

pub use corpus::{ChunkRecord, CorpusSource, IndexAudit, MemoryCorpus, SourceKind, TariffRow};
pub use fusion::{
    clamp_alpha, clamp_top_k, fuse_scores, min_max_normalize, rank_order, FusionConfig,
    FusionError, ScoreRecord, MAX_TOP_K,
};
pub use hybrid::{
    CorpusFamily, HybridRetriever, IndexState, IndexStatus, RetrievalReport, RetrieverSettings,
    SearchError,
};
pub use provenance::{anchor, excerpt, RetrievalHit, TariffMatch};
