//! Candidate codes, their evidence, and parsing of structured reasoning output

use crate::retrieval::{RetrievalHit, SourceKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}\.\d{2}(?:\.\d{2})?$").expect("valid HTS code regex"))
}

/// `NNNN.NN` or `NNNN.NN.NN`
pub fn is_valid_code(code: &str) -> bool {
    code_re().is_match(code)
}

/// Traceable reference backing a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: SourceKind,
    pub id: String,
    pub url: Option<String>,
}

impl Evidence {
    /// `None` when the id is blank; an evidence entry must point somewhere
    pub fn new(source: SourceKind, id: &str, url: Option<String>) -> Option<Self> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            source,
            id: id.to_string(),
            url: url.filter(|u| !u.trim().is_empty()),
        })
    }

    /// Evidence pointing at a retrieval hit's anchor
    pub fn from_hit(hit: &RetrievalHit) -> Option<Self> {
        Self::new(hit.source, &hit.anchor, hit.url.clone())
    }
}

/// A proposed HTS code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    pub description: String,
    pub duty_rate: Option<String>,
    pub rationale: String,
    pub confidence: f32,
    pub evidence: Vec<Evidence>,
}

impl Candidate {
    pub fn has_evidence(&self) -> bool {
        !self.evidence.is_empty()
    }
}

/// The only outward-facing response shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub disclaimer: String,
    pub codes: Vec<Candidate>,
}

impl ClassifyResponse {
    pub fn abstain(disclaimer: impl Into<String>) -> Self {
        Self {
            disclaimer: disclaimer.into(),
            codes: Vec::new(),
        }
    }

    pub fn is_abstain(&self) -> bool {
        self.codes.is_empty()
    }
}

/// What the reasoning step produced
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningOutcome {
    Candidates(Vec<Candidate>),
    /// Unparsable or empty output; triggers fallback synthesis
    Invalid { reason: String },
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    codes: Vec<RawCandidate>,
}

#[derive(Deserialize)]
struct RawCandidate {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    duty_rate: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    confidence: Value,
    #[serde(default)]
    evidence: Vec<RawEvidence>,
}

#[derive(Deserialize)]
struct RawEvidence {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    url: Option<String>,
}

fn parse_raw(text: &str) -> Option<RawOutput> {
    if let Ok(parsed) = serde_json::from_str(text) {
        return Some(parsed);
    }
    // models sometimes wrap the object in prose or fences
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Coerce a JSON confidence into a finite float; anything unusable is 0.0
fn coerce_confidence(value: &Value) -> f32 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(c) if c.is_finite() => c as f32,
        _ => 0.0,
    }
}

fn evidence_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse raw reasoning-step text into candidates.
///
/// Evidence with blank ids is dropped; a candidate left without evidence borrows
/// the anchor of the first hit resolving to the same code. Malformed codes are
/// rejected.
pub fn parse_reasoning_output(raw: &str, hits: &[RetrievalHit]) -> ReasoningOutcome {
    let text = raw.trim();
    if text.is_empty() {
        return ReasoningOutcome::Invalid {
            reason: "empty output".to_string(),
        };
    }

    let Some(output) = parse_raw(text) else {
        return ReasoningOutcome::Invalid {
            reason: "output is not a JSON object".to_string(),
        };
    };

    let mut candidates = Vec::with_capacity(output.codes.len());
    for raw in output.codes {
        let code = raw.code.unwrap_or_default().trim().to_string();
        if !is_valid_code(&code) {
            warn!(code = %code, "Dropping candidate with malformed code");
            continue;
        }

        let mut evidence: Vec<Evidence> = raw
            .evidence
            .iter()
            .filter_map(|e| {
                let source = e
                    .source
                    .as_deref()
                    .and_then(SourceKind::parse)
                    .unwrap_or(SourceKind::Hts);
                Evidence::new(source, &evidence_id(&e.id)?, e.url.clone())
            })
            .collect();

        if evidence.is_empty() {
            if let Some(backfill) = hits
                .iter()
                .filter(|h| h.code.as_deref() == Some(code.as_str()))
                .find_map(Evidence::from_hit)
            {
                debug!(code = %code, anchor = %backfill.id, "Backfilled evidence from retrieval hit");
                evidence.push(backfill);
            }
        }

        candidates.push(Candidate {
            confidence: coerce_confidence(&raw.confidence),
            description: raw.description.unwrap_or_default(),
            duty_rate: raw.duty_rate.filter(|d| !d.trim().is_empty()),
            rationale: raw.rationale.unwrap_or_default(),
            evidence,
            code,
        });
    }

    ReasoningOutcome::Candidates(candidates)
}
