//! Evidence gate: the last step before anything reaches a caller
//!
//! Order of operations: clamp, calibrate against retrieval support, threshold,
//! drop candidates without evidence, abstain when nothing survives.

use crate::classify::candidate::{Candidate, ClassifyResponse};
use crate::classify::fallback::synthesize_fallback;
use crate::config::{GateConfig, DEFAULT_DISCLAIMER};
use crate::retrieval::RetrievalHit;
use std::collections::HashMap;
use tracing::{debug, info};

/// Gate policy constants
#[derive(Debug, Clone, PartialEq)]
pub struct GatePolicy {
    pub min_confidence: f32,
    pub calibrate: bool,
    /// Floor for the best-supported candidate
    pub top_floor: f32,
    /// Floor for the second best-supported candidate
    pub second_floor: f32,
    pub fallback_max_codes: usize,
    pub disclaimer: String,
}

impl GatePolicy {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            calibrate: config.calibrate,
            top_floor: config.top_floor,
            second_floor: config.second_floor,
            fallback_max_codes: config.fallback_max_codes,
            disclaimer: config.disclaimer.clone(),
        }
    }
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.40,
            calibrate: true,
            top_floor: 0.55,
            second_floor: 0.45,
            fallback_max_codes: 2,
            disclaimer: DEFAULT_DISCLAIMER.to_string(),
        }
    }
}

/// Best fused score of any hit resolving to each code
pub fn support_by_code(hits: &[RetrievalHit]) -> HashMap<String, f32> {
    let mut support: HashMap<String, f32> = HashMap::new();
    for hit in hits {
        let Some(code) = hit.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        let score = if hit.score.is_finite() { hit.score } else { 0.0 };
        let entry = support.entry(code.to_string()).or_insert(score);
        if score > *entry {
            *entry = score;
        }
    }
    support
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

pub struct EvidenceGate {
    policy: GatePolicy,
}

impl EvidenceGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Raise confidences of supported candidates to rank-based floors.
    ///
    /// Ranks are by support, descending, ties in input order. Floors only ever
    /// raise a confidence and never apply to unsupported candidates. Input
    /// order is preserved.
    pub fn calibrate(&self, candidates: &mut [Candidate], hits: &[RetrievalHit]) {
        let support = support_by_code(hits);
        let support_of = |c: &Candidate| support.get(c.code.trim()).copied().unwrap_or(0.0);

        let mut ranked: Vec<usize> = (0..candidates.len()).collect();
        ranked.sort_by(|&a, &b| support_of(&candidates[b]).total_cmp(&support_of(&candidates[a])));

        for (rank, idx) in ranked.into_iter().enumerate() {
            let candidate = &mut candidates[idx];
            if support.get(candidate.code.trim()).copied().unwrap_or(0.0) <= 0.0 {
                continue;
            }
            let floor = match rank {
                0 => self.policy.top_floor,
                1 => self.policy.second_floor,
                _ => continue,
            };
            if candidate.confidence < floor {
                debug!(code = %candidate.code, from = candidate.confidence, to = floor, "Raised confidence to floor");
                candidate.confidence = floor;
            }
        }
    }

    /// Produce the outward-facing response.
    ///
    /// With no candidates, up to `fallback_max_codes` are synthesized from the
    /// hits at the threshold confidence. Every surfaced candidate carries
    /// evidence and meets the threshold, or the response is empty.
    pub fn finalize(&self, candidates: Vec<Candidate>, hits: &[RetrievalHit]) -> ClassifyResponse {
        let mut candidates = if candidates.is_empty() {
            let synthesized =
                synthesize_fallback(hits, self.policy.fallback_max_codes, self.policy.min_confidence);
            if !synthesized.is_empty() {
                info!(count = synthesized.len(), "Synthesized fallback candidates from retrieval hits");
            }
            synthesized
        } else {
            candidates
        };

        for candidate in candidates.iter_mut() {
            candidate.confidence = clamp_confidence(candidate.confidence);
        }

        if self.policy.calibrate {
            self.calibrate(&mut candidates, hits);
        }

        let before = candidates.len();
        candidates.retain(|c| c.confidence >= self.policy.min_confidence && c.has_evidence());
        debug!(
            min_confidence = self.policy.min_confidence,
            before,
            after = candidates.len(),
            "Evidence gate applied"
        );

        if candidates.is_empty() {
            info!("No candidate met the confidence and evidence bar; abstaining");
            return ClassifyResponse::abstain(self.policy.disclaimer.clone());
        }

        ClassifyResponse {
            disclaimer: self.policy.disclaimer.clone(),
            codes: candidates,
        }
    }
}

impl Default for EvidenceGate {
    fn default() -> Self {
        Self::new(GatePolicy::default())
    }
}
