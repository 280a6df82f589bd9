//! Deterministic chunking
//!
//! Splits normalized document text into overlapping windows whose identifiers are
//! a pure function of (document id, version, section, offset). Re-running the
//! chunker over the same text yields byte-identical chunk ids and spans, which is
//! what keeps ingestion idempotent and retrieval evidence auditable.

mod token_budget;
mod window;

pub use token_budget::{estimate_tokens, TokenBudgetChunker, TokenChunk};
pub use window::{Window, WindowChunker, Windows};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    /// Chunking parameters that would never terminate or never advance
    #[error("Chunking configuration error: {0}")]
    Configuration(String),
}

/// A chunk ready to be persisted, still detached from any embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDraft {
    pub chunk_id: String,
    /// Ordinal of the chunk within its document, used for anchors
    pub position: usize,
    pub section: usize,
    /// Byte offset inside the section for window chunks, ordinal for token chunks
    pub offset: usize,
    pub text: String,
}

/// Build the stable identifier of a chunk.
///
/// Never random and never time dependent: identical inputs always produce the
/// identical id, so re-ingesting the same content cannot create duplicates.
pub fn chunk_id(document_id: &str, version: u32, section: usize, offset: usize) -> String {
    format!("src:{}:v{}:p{}:c{}", document_id, version, section, offset)
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("valid whitespace regex"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid newline regex"))
}

/// Normalize raw source text before chunking.
///
/// BOM and non-breaking spaces become plain spaces, runs of spaces/tabs collapse
/// to one space, three or more newlines collapse to a blank line.
pub fn normalize_text(text: &str) -> String {
    let replaced = text.replace(['\u{feff}', '\u{a0}'], " ");
    let collapsed = spaces_re().replace_all(&replaced, " ");
    let collapsed = blank_lines_re().replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}

/// Window-chunk one section of a document.
///
/// `first_position` lets callers continue numbering across sections.
pub fn plan_window_chunks(
    chunker: &WindowChunker,
    document_id: &str,
    version: u32,
    section: usize,
    first_position: usize,
    text: &str,
) -> Vec<ChunkDraft> {
    chunker
        .windows(text)
        .enumerate()
        .map(|(i, w)| ChunkDraft {
            chunk_id: chunk_id(document_id, version, section, w.offset),
            position: first_position + i,
            section,
            offset: w.offset,
            text: w.text.to_string(),
        })
        .collect()
}

/// Token-budget chunk a sequence of free-form paragraphs, one section per paragraph.
pub fn plan_token_chunks<'a>(
    chunker: &TokenBudgetChunker,
    document_id: &str,
    version: u32,
    paragraphs: impl IntoIterator<Item = &'a str>,
) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    for (section, paragraph) in paragraphs.into_iter().enumerate() {
        for piece in chunker.chunk(paragraph) {
            drafts.push(ChunkDraft {
                chunk_id: chunk_id(document_id, version, section, piece.position),
                position: drafts.len(),
                section,
                offset: piece.position,
                text: piece.text,
            });
        }
    }
    drafts
}
