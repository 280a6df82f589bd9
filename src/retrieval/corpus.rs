//! Read-only view of the chunk and tariff corpora the retriever indexes

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};

/// Which corpus a chunk was ingested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    Hts,
    Ruling,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Hts => "HTS",
            SourceKind::Ruling => "RULING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HTS" => Some(SourceKind::Hts),
            "RULING" => Some(SourceKind::Ruling),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrievable chunk of the latest version of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub position: usize,
    pub text: String,
    pub code: Option<String>,
    pub source: SourceKind,
    pub url: Option<String>,
    /// Cached embedding; absent until backfilled
    pub embedding: Option<Vec<f32>>,
}

/// One tariff schedule row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffRow {
    pub code: String,
    pub description: String,
    pub duty_rate: Option<String>,
    pub chapter: Option<u32>,
    pub notes: Option<String>,
}

impl TariffRow {
    /// Text the lexical-only lookup indexes
    pub fn search_text(&self) -> String {
        match &self.notes {
            Some(notes) if !notes.trim().is_empty() => format!("{} {}", self.description, notes),
            _ => self.description.clone(),
        }
    }
}

/// Reproducibility record written on every explicit rebuild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAudit {
    pub name: String,
    pub version: String,
    pub details: serde_json::Value,
    pub ok: bool,
    pub built_at: DateTime<Utc>,
}

/// Source of the corpora the retriever builds its indices from
///
/// The retriever never writes chunks or rows; the only write is the audit trail.
pub trait CorpusSource: Send + Sync {
    /// Chunks of the latest version of every document, in a stable order
    fn load_chunks(&self) -> Result<Vec<ChunkRecord>>;

    /// Tariff rows ordered by code
    fn load_tariff_rows(&self) -> Result<Vec<TariffRow>>;

    fn record_index_build(&self, audit: &IndexAudit) -> Result<()>;
}

/// In-memory corpus, mainly for tests and one-shot tooling
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    chunks: RwLock<Vec<ChunkRecord>>,
    tariff_rows: RwLock<Vec<TariffRow>>,
    audits: Mutex<Vec<IndexAudit>>,
}

impl MemoryCorpus {
    pub fn new(chunks: Vec<ChunkRecord>, tariff_rows: Vec<TariffRow>) -> Self {
        Self {
            chunks: RwLock::new(chunks),
            tariff_rows: RwLock::new(tariff_rows),
            audits: Mutex::new(Vec::new()),
        }
    }

    /// Replace the chunk list; indices only see it after a reindex
    pub fn set_chunks(&self, chunks: Vec<ChunkRecord>) {
        *self.chunks.write().unwrap_or_else(PoisonError::into_inner) = chunks;
    }

    pub fn set_tariff_rows(&self, rows: Vec<TariffRow>) {
        *self.tariff_rows.write().unwrap_or_else(PoisonError::into_inner) = rows;
    }

    pub fn audits(&self) -> Vec<IndexAudit> {
        self.audits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CorpusSource for MemoryCorpus {
    fn load_chunks(&self) -> Result<Vec<ChunkRecord>> {
        Ok(self
            .chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn load_tariff_rows(&self) -> Result<Vec<TariffRow>> {
        Ok(self
            .tariff_rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn record_index_build(&self, audit: &IndexAudit) -> Result<()> {
        self.audits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(audit.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_serde() {
        assert_eq!(serde_json::to_string(&SourceKind::Ruling).unwrap(), "\"RULING\"");
        assert_eq!(SourceKind::parse("hts"), Some(SourceKind::Hts));
        assert_eq!(SourceKind::parse("cbp"), None);
    }

    #[test]
    fn test_search_text_includes_notes() {
        let row = TariffRow {
            code: "8504.40".to_string(),
            description: "Static converters".to_string(),
            duty_rate: Some("Free".to_string()),
            chapter: Some(85),
            notes: Some("rectifiers".to_string()),
        };
        assert_eq!(row.search_text(), "Static converters rectifiers");
    }
}
