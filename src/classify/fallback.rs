//! Candidates synthesized straight from retrieval hits
//!
//! Used when the reasoning step yields nothing usable, so an answer can still
//! be given whenever retrieval found evidence.

use crate::classify::candidate::{Candidate, Evidence};
use crate::retrieval::{excerpt, RetrievalHit, SourceKind};
use std::collections::HashSet;

const DESCRIPTION_CHARS: usize = 140;

/// One candidate per distinct resolvable code, best hit first, at most `max_codes`
pub fn synthesize_fallback(hits: &[RetrievalHit], max_codes: usize, confidence: f32) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for hit in hits {
        if out.len() >= max_codes {
            break;
        }
        let Some(code) = hit.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        if !seen.insert(code.to_string()) {
            continue;
        }

        let snippet = hit.snippet.trim();
        let description = if snippet.is_empty() {
            format!("HTS reference for code {}.", code)
        } else {
            excerpt(snippet, DESCRIPTION_CHARS)
        };
        let origin = match hit.source {
            SourceKind::Hts => "HTS",
            SourceKind::Ruling => "ruling",
        };

        out.push(Candidate {
            code: code.to_string(),
            description,
            duty_rate: None,
            rationale: format!("Matched {} excerpt for code {}.", origin, code),
            confidence,
            evidence: Evidence::from_hit(hit).into_iter().collect(),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(code: Option<&str>, anchor: &str, snippet: &str) -> RetrievalHit {
        RetrievalHit {
            chunk_id: format!("src:{}", anchor),
            code: code.map(str::to_string),
            anchor: anchor.to_string(),
            snippet: snippet.to_string(),
            score: 0.5,
            source: SourceKind::Hts,
            url: None,
            lexical: 1.0,
            vector: 0.0,
        }
    }

    #[test]
    fn test_distinct_codes_capped() {
        let hits = vec![
            hit(Some("8504.40"), "hts:8504.40#0", "Static converters"),
            hit(None, "ruling:N1#0", "no code here"),
            hit(Some("8504.40"), "hts:8504.40#1", "Static converters, other"),
            hit(Some("8544.42"), "hts:8544.42#0", "Insulated cables"),
            hit(Some("8471.30"), "hts:8471.30#0", "Portable machines"),
        ];

        let out = synthesize_fallback(&hits, 2, 0.4);
        let codes: Vec<&str> = out.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["8504.40", "8544.42"]);
        assert_eq!(out[0].evidence[0].id, "hts:8504.40#0");
        assert_eq!(out[0].rationale, "Matched HTS excerpt for code 8504.40.");
        assert_eq!(out[1].confidence, 0.4);
    }

    #[test]
    fn test_empty_snippet_and_long_snippet() {
        let long = "word ".repeat(60);
        let hits = vec![
            hit(Some("8504.40"), "hts:8504.40#0", "  "),
            hit(Some("8544.42"), "hts:8544.42#0", &long),
        ];
        let out = synthesize_fallback(&hits, 2, 0.4);
        assert_eq!(out[0].description, "HTS reference for code 8504.40.");
        assert!(out[1].description.ends_with('…'));
        assert!(out[1].description.chars().count() <= 140);
    }

    #[test]
    fn test_no_hits() {
        assert!(synthesize_fallback(&[], 2, 0.4).is_empty());
    }
}
