//! Classification pipeline
//!
//! retrieve → reasoning step → evidence gate. The reasoning step is an external
//! collaborator behind [`ReasoningStep`]; whatever it returns, the response is
//! produced by [`EvidenceGate::finalize`].

mod candidate;
mod fallback;
mod gate;

pub use candidate::{
    is_valid_code, parse_reasoning_output, Candidate, ClassifyResponse, Evidence,
    ReasoningOutcome,
};
pub use fallback::synthesize_fallback;
pub use gate::{support_by_code, EvidenceGate, GatePolicy};

use crate::error::Result;
use crate::retrieval::{HybridRetriever, RetrievalHit};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Turns a query plus retrieval context into candidate codes
pub trait ReasoningStep: Send + Sync {
    fn propose(&self, query: &str, hits: &[RetrievalHit]) -> ReasoningOutcome;

    fn name(&self) -> &str;
}

/// Reasoning step used when no model is wired in: proposes nothing, so the
/// gate answers from retrieval evidence alone
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineReasoning;

impl ReasoningStep for OfflineReasoning {
    fn propose(&self, _query: &str, _hits: &[RetrievalHit]) -> ReasoningOutcome {
        ReasoningOutcome::Candidates(Vec::new())
    }

    fn name(&self) -> &str {
        "offline"
    }
}

type Completion = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Reasoning step backed by a text completion function returning JSON
pub struct CompletionReasoning {
    complete: Box<Completion>,
}

impl CompletionReasoning {
    pub fn new<F>(complete: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            complete: Box::new(complete),
        }
    }
}

impl ReasoningStep for CompletionReasoning {
    fn propose(&self, query: &str, hits: &[RetrievalHit]) -> ReasoningOutcome {
        match (self.complete)(&render_context(query, hits)) {
            Ok(raw) => parse_reasoning_output(&raw, hits),
            Err(e) => ReasoningOutcome::Invalid {
                reason: e.to_string(),
            },
        }
    }

    fn name(&self) -> &str {
        "completion"
    }
}

/// Compact context block handed to a completion function
pub fn render_context(query: &str, hits: &[RetrievalHit]) -> String {
    let mut out = format!("QUERY:\n{}\n\nCONTEXT:\n", query);
    if hits.is_empty() {
        out.push_str("(none)\n");
    }
    for hit in hits {
        let _ = writeln!(
            out,
            "[{:.3}] {} {} ({}) {}",
            hit.score,
            hit.source,
            hit.anchor,
            hit.code.as_deref().unwrap_or("?"),
            hit.snippet
        );
    }
    out.push_str("\nReturn ONLY the JSON object.");
    out
}

/// Persists the evidence behind every answered call
pub trait EvidenceSink: Send + Sync {
    fn record_evidence(&self, call_id: Uuid, query: &str, candidates: &[Candidate]) -> Result<()>;
}

/// Outcome of one classify call
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub call_id: Uuid,
    pub response: ClassifyResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<RetrievalHit>,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

pub struct Classifier {
    retriever: Arc<HybridRetriever>,
    reasoning: Box<dyn ReasoningStep>,
    gate: EvidenceGate,
    sink: Option<Arc<dyn EvidenceSink>>,
}

impl Classifier {
    pub fn new(retriever: Arc<HybridRetriever>, reasoning: Box<dyn ReasoningStep>, gate: EvidenceGate) -> Self {
        Self {
            retriever,
            reasoning,
            gate,
            sink: None,
        }
    }

    pub fn with_evidence_sink(mut self, sink: Arc<dyn EvidenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Classify a free-text product description; never fails, abstains instead
    pub fn classify(&self, query: &str, top_k: Option<usize>) -> Classification {
        let call_id = Uuid::new_v4();
        let report = self.retriever.retrieve_with_report(query, top_k, None);
        let hits = report.hits;

        let (response, used_fallback) = if hits.is_empty() {
            info!(%call_id, "No retrieval evidence; abstaining");
            (self.gate.finalize(Vec::new(), &[]), false)
        } else {
            let candidates = match self.reasoning.propose(query, &hits) {
                ReasoningOutcome::Candidates(candidates) => candidates,
                ReasoningOutcome::Invalid { reason } => {
                    warn!(%call_id, step = self.reasoning.name(), %reason, "Reasoning output invalid");
                    Vec::new()
                }
            };
            let used_fallback = candidates.is_empty();
            (self.gate.finalize(candidates, &hits), used_fallback)
        };

        if let Some(sink) = &self.sink {
            if !response.codes.is_empty() {
                if let Err(e) = sink.record_evidence(call_id, query, &response.codes) {
                    warn!(%call_id, "Failed to record evidence: {}", e);
                }
            }
        }

        info!(
            %call_id,
            hits = hits.len(),
            codes = response.codes.len(),
            used_fallback,
            "Classification complete"
        );

        Classification {
            call_id,
            response,
            hits,
            used_fallback,
            degraded: report.degraded,
        }
    }
}
