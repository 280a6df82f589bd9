//! Min-max score normalization and convex-sum fusion of lexical and vector scores

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Hard cap on the number of results any retrieval call may return
pub const MAX_TOP_K: usize = 50;

/// Scores closer than this are treated as tied when normalizing
const TIE_EPSILON: f32 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid fusion alpha {0}: must be between 0.0 and 1.0")]
    InvalidAlpha(f32),
}

/// Configuration for the fusion step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Weight of the normalized vector score; `1 - alpha` goes to the lexical score
    alpha: f32,
}

impl FusionConfig {
    pub fn new(alpha: f32) -> Result<Self, FusionError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(FusionError::InvalidAlpha(alpha));
        }
        Ok(Self { alpha })
    }

    /// Out-of-range alpha is clamped into [0, 1]; NaN falls back to lexical only
    pub fn clamped(alpha: f32) -> Self {
        let alpha = if alpha.is_nan() { 0.0 } else { alpha.clamp(0.0, 1.0) };
        Self { alpha }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn fuse(&self, vector_norm: f32, lexical_norm: f32) -> f32 {
        self.alpha * vector_norm + (1.0 - self.alpha) * lexical_norm
    }
}

/// Min-max normalize a per-query score set into [0, 1].
///
/// A fully tied set (including all zeros and the empty set) maps to all 0.0.
/// Non-finite inputs count as 0.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let clean: Vec<f32> = scores
        .iter()
        .map(|s| if s.is_finite() { *s } else { 0.0 })
        .collect();

    let (min, max) = clean
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });

    let range = max - min;
    if clean.is_empty() || range.abs() <= TIE_EPSILON * max.abs().max(1.0) {
        return vec![0.0; clean.len()];
    }

    clean.iter().map(|s| (s - min) / range).collect()
}

/// Per-query scoring record of one corpus position; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub position: usize,
    pub lexical_raw: f32,
    pub vector_raw: f32,
    pub lexical_norm: f32,
    pub vector_norm: f32,
    pub fused: f32,
}

/// Fuse index-aligned raw score vectors into ranked records.
///
/// Both inputs must be aligned with the same chunk list; a shorter vector is
/// padded with zeros. The output is fully sorted (see [`rank_order`]).
pub fn fuse_scores(lexical: &[f32], vector: &[f32], config: &FusionConfig) -> Vec<ScoreRecord> {
    let n = lexical.len().max(vector.len());
    let pad = |scores: &[f32]| {
        let mut padded = scores.to_vec();
        padded.resize(n, 0.0);
        padded
    };
    let lexical = pad(lexical);
    let vector = pad(vector);

    let lexical_norm = min_max_normalize(&lexical);
    let vector_norm = min_max_normalize(&vector);

    let mut records: Vec<ScoreRecord> = (0..n)
        .map(|position| ScoreRecord {
            position,
            lexical_raw: lexical[position],
            vector_raw: vector[position],
            lexical_norm: lexical_norm[position],
            vector_norm: vector_norm[position],
            fused: config.fuse(vector_norm[position], lexical_norm[position]),
        })
        .collect();

    records.sort_by(rank_order);
    records
}

/// Final ranking order: fused desc, then raw lexical desc, then earlier position first
pub fn rank_order(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    b.fused
        .total_cmp(&a.fused)
        .then_with(|| b.lexical_raw.total_cmp(&a.lexical_raw))
        .then_with(|| a.position.cmp(&b.position))
}

/// Clamp a requested result count into `[1, MAX_TOP_K]`, using `default` when absent
pub fn clamp_top_k(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_TOP_K)
}

/// Clamp a caller-supplied alpha into `[0, 1]`, using `default` when absent or NaN
pub fn clamp_alpha(requested: Option<f32>, default: f32) -> f32 {
    match requested {
        Some(alpha) if alpha.is_finite() => alpha.clamp(0.0, 1.0),
        _ => default.clamp(0.0, 1.0),
    }
}
