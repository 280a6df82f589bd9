//! Hydrated retrieval hits and the evidence locators they carry

use crate::retrieval::corpus::SourceKind;
use serde::{Deserialize, Serialize};

/// Stable evidence locator: `{document_id}#{position}`
pub fn anchor(document_id: &str, position: usize) -> String {
    format!("{}#{}", document_id, position)
}

/// Bound `text` to at most `max_chars` characters.
///
/// When truncation is needed the cut moves back to the nearest preceding
/// whitespace and an ellipsis is appended; the ellipsis counts towards the budget.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    let cut = match head.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &head[..idx],
        _ => head.as_str(),
    };
    format!("{}…", cut.trim_end())
}

/// A retrieval result hydrated from the chunk corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    /// HTS code the chunk resolves to, if any
    pub code: Option<String>,
    pub anchor: String,
    pub snippet: String,
    /// Fused score in [0, 1]
    pub score: f32,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Raw BM25 score
    pub lexical: f32,
    /// Raw cosine similarity
    pub vector: f32,
}

/// A tariff row matched by the lexical-only lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffMatch {
    pub code: String,
    pub description: String,
    pub duty_rate: Option<String>,
    pub chapter: Option<u32>,
    pub score: f32,
}
