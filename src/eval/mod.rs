//! Golden-set evaluation
//!
//! Runs every labelled query through the hybrid retriever (and optionally the
//! classifier) and reports recall@k, mean reciprocal rank and, when
//! classifying, how often the top surfaced code is the expected one.

mod golden;

pub use golden::{load_golden, parse_golden, GoldenCase};

use crate::classify::Classifier;
use crate::error::{HtsError, Result};
use crate::retrieval::{clamp_top_k, HybridRetriever};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Cannot read golden set {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Golden set has no '{0}' column")]
    MissingColumn(&'static str),

    #[error("Golden set line {line}: {message}")]
    MalformedRow { line: usize, message: String },

    #[error("Golden set contains no cases")]
    EmptyGoldenSet,
}

/// Whether a surfaced code answers an expected one.
///
/// Codes are compared on their digits; a code nested under the expected one
/// (or the heading it sits in) counts as a match.
pub fn code_matches(expected: &str, got: &str) -> bool {
    let expected: String = expected.chars().filter(char::is_ascii_digit).collect();
    let got: String = got.chars().filter(char::is_ascii_digit).collect();
    if expected.len() < 4 || got.len() < 4 {
        return false;
    }
    expected.starts_with(&got) || got.starts_with(&expected)
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub query: String,
    pub expected_code: String,
    /// 1-based rank of the first matching hit within the top k
    pub rank: Option<usize>,
    pub retrieved_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classified_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationMetrics {
    pub answered: usize,
    pub abstained: usize,
    pub top1_correct: usize,
    /// Correct top codes over all cases
    pub accuracy: f64,
    /// Correct top codes over answered cases, 0 when nothing was answered
    pub precision: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalMetrics {
    pub k: usize,
    pub cases: usize,
    pub hits_at_k: usize,
    pub recall_at_k: f64,
    pub mrr: f64,
    pub degraded_queries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationMetrics>,
    pub duration_ms: u64,
    pub evaluated_at: DateTime<Utc>,
    pub outcomes: Vec<CaseOutcome>,
}

pub struct GoldenEval<'a> {
    retriever: &'a HybridRetriever,
    classifier: Option<&'a Classifier>,
}

impl<'a> GoldenEval<'a> {
    pub fn new(retriever: &'a HybridRetriever) -> Self {
        Self {
            retriever,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: &'a Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn run(&self, cases: &[GoldenCase], k: usize) -> std::result::Result<EvalMetrics, EvalError> {
        if cases.is_empty() {
            return Err(EvalError::EmptyGoldenSet);
        }

        let start = Instant::now();
        let k = clamp_top_k(Some(k), k);
        let mut outcomes = Vec::with_capacity(cases.len());
        let mut degraded_queries = 0;
        let mut reciprocal_ranks = 0.0;
        let mut answered = 0;
        let mut top1_correct = 0;

        for case in cases {
            let report = self.retriever.retrieve_with_report(&case.query, Some(k), None);
            if report.degraded.is_some() {
                degraded_queries += 1;
            }

            let retrieved_codes: Vec<String> = report.hits.iter().filter_map(|h| h.code.clone()).collect();
            let rank = report
                .hits
                .iter()
                .position(|h| h.code.as_deref().is_some_and(|c| code_matches(&case.expected_code, c)))
                .map(|idx| idx + 1);
            if let Some(rank) = rank {
                reciprocal_ranks += 1.0 / rank as f64;
            } else {
                debug!(query = %case.query, expected = %case.expected_code, "Expected code not retrieved");
            }

            let classified_code = self.classifier.and_then(|classifier| {
                let classification = classifier.classify(&case.query, Some(k));
                classification.response.codes.first().map(|c| c.code.clone())
            });
            if let Some(code) = &classified_code {
                answered += 1;
                if code_matches(&case.expected_code, code) {
                    top1_correct += 1;
                }
            }

            outcomes.push(CaseOutcome {
                query: case.query.clone(),
                expected_code: case.expected_code.clone(),
                rank,
                retrieved_codes,
                classified_code,
            });
        }

        let total = cases.len() as f64;
        let hits_at_k = outcomes.iter().filter(|o| o.rank.is_some()).count();
        let classification = self.classifier.map(|_| ClassificationMetrics {
            answered,
            abstained: cases.len() - answered,
            top1_correct,
            accuracy: top1_correct as f64 / total,
            precision: if answered == 0 {
                0.0
            } else {
                top1_correct as f64 / answered as f64
            },
        });

        let metrics = EvalMetrics {
            k,
            cases: cases.len(),
            hits_at_k,
            recall_at_k: hits_at_k as f64 / total,
            mrr: reciprocal_ranks / total,
            degraded_queries,
            classification,
            duration_ms: start.elapsed().as_millis() as u64,
            evaluated_at: Utc::now(),
            outcomes,
        };

        info!(
            cases = metrics.cases,
            k = metrics.k,
            recall = metrics.recall_at_k,
            mrr = metrics.mrr,
            "Golden-set evaluation complete"
        );
        Ok(metrics)
    }
}

/// Write metrics as pretty JSON, creating parent directories as needed
pub fn write_metrics(path: &Path, metrics: &EvalMetrics) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| HtsError::Io {
            source: e,
            context: format!("Failed to create metrics directory: {}", parent.display()),
        })?;
    }

    let json = serde_json::to_string_pretty(metrics).map_err(|e| HtsError::Json {
        source: e,
        context: "Failed to serialize evaluation metrics".to_string(),
    })?;
    std::fs::write(path, json).map_err(|e| HtsError::Io {
        source: e,
        context: format!("Failed to write metrics: {}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches() {
        assert!(code_matches("8504.40", "8504.40"));
        assert!(code_matches("8504.40", "8504.40.95"));
        assert!(code_matches("8504.40.95", "8504.40"));
        assert!(code_matches("8504.40.9550", "850440"));
        assert!(!code_matches("8504.40", "8544.42"));
        assert!(!code_matches("8504.40", "85"));
    }
}
