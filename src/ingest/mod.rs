//! Idempotent ingestion of tariff schedule items and rulings
//!
//! Each source item becomes one registered document. Its identity is derived
//! from the source key, its content is hashed, and a new version with fresh
//! chunks is written only when the content changed.

pub mod schema;

use crate::chunking::{
    normalize_text, plan_token_chunks, plan_window_chunks, ChunkDraft, ChunkingError,
    TokenBudgetChunker, WindowChunker,
};
use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::retrieval::{SourceKind, TariffRow};
use crate::storage::{Database, DocumentRecord, NewChunk};
use schema::{extract_codes, extract_items, HtsItem, RulingItem};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path:?}: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unsupported payload shape: {0}")]
    UnsupportedShape(String),

    #[error("Item is missing required field '{field}'")]
    MissingField { field: &'static str },
}

/// Counts from one ingestion run
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// New documents or new versions of existing ones
    pub documents_added: usize,
    /// Items whose content was already registered
    pub documents_skipped: usize,
    pub chunks_added: usize,
    pub tariff_rows: usize,
    /// Items missing a required field
    pub items_rejected: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.documents_added += other.documents_added;
        self.documents_skipped += other.documents_skipped;
        self.chunks_added += other.chunks_added;
        self.tariff_rows += other.tariff_rows;
        self.items_rejected += other.items_rejected;
    }
}

/// `{source_type}:{external_key}`, with `@{edition}` when the source is versioned by edition
pub fn document_id(source: SourceKind, external_key: &str, edition: Option<&str>) -> String {
    let prefix = match source {
        SourceKind::Hts => "hts",
        SourceKind::Ruling => "ruling",
    };
    match edition {
        Some(edition) => format!("{}:{}@{}", prefix, external_key, edition),
        None => format!("{}:{}", prefix, external_key),
    }
}

/// blake3 over the fields that define a document's content
fn content_hash(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Read a JSON payload, tolerating a UTF-8 BOM
pub fn read_payload(path: &Path) -> std::result::Result<Value, IngestError> {
    let raw = std::fs::read_to_string(path).map_err(|e| IngestError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
    serde_json::from_str(raw).map_err(|e| IngestError::InvalidJson {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Chunks planned for one document version, each with the code it resolves to
type PlannedChunks = Vec<(ChunkDraft, Option<String>)>;

pub struct Ingestor<'a> {
    db: &'a Database,
    window: WindowChunker,
    tokens: TokenBudgetChunker,
}

impl<'a> Ingestor<'a> {
    pub fn new(db: &'a Database, config: &ChunkingConfig) -> std::result::Result<Self, ChunkingError> {
        Ok(Self {
            db,
            window: WindowChunker::new(config.window_chars, config.overlap_chars)?,
            tokens: TokenBudgetChunker::new(config.max_tokens, config.overlap_tokens)?,
        })
    }

    pub fn ingest_hts_file(&self, path: &Path) -> Result<IngestReport> {
        info!("Ingesting HTS items from {}", path.display());
        let report = self.ingest_hts(read_payload(path)?)?;
        info!(?report, "HTS ingestion complete for {}", path.display());
        Ok(report)
    }

    pub fn ingest_rulings_file(&self, path: &Path) -> Result<IngestReport> {
        info!("Ingesting rulings from {}", path.display());
        let report = self.ingest_rulings(read_payload(path)?)?;
        info!(?report, "Ruling ingestion complete for {}", path.display());
        Ok(report)
    }

    /// Register tariff items and upsert their tariff rows
    pub fn ingest_hts(&self, payload: Value) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for fields in extract_items(payload)? {
            let item = match HtsItem::from_fields(&fields) {
                Ok(item) => item,
                Err(e) => {
                    warn!("Rejecting HTS item: {}", e);
                    report.items_rejected += 1;
                    continue;
                }
            };

            self.db.upsert_tariff_row(&TariffRow {
                code: item.code.clone(),
                description: item.title.clone().unwrap_or_else(|| item.text.clone()),
                duty_rate: item.duty_rate.clone(),
                chapter: item.chapter(),
                notes: item.notes.clone(),
            })?;
            report.tariff_rows += 1;

            let text = normalize_text(&item.text);
            self.register(self.hts_record(&item, &text), &mut report, |doc_id, version| {
                plan_window_chunks(&self.window, doc_id, version, 0, 0, &text)
                    .into_iter()
                    .map(|draft| (draft, Some(item.code.clone())))
                    .collect()
            })?;
        }

        Ok(report)
    }

    /// Register rulings, chunked paragraph by paragraph
    pub fn ingest_rulings(&self, payload: Value) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for fields in extract_items(payload)? {
            let item = match RulingItem::from_fields(&fields) {
                Ok(item) => item,
                Err(e) => {
                    warn!("Rejecting ruling: {}", e);
                    report.items_rejected += 1;
                    continue;
                }
            };

            let text = normalize_text(&item.text);
            let codes = extract_codes(&text);
            let primary = item.code.clone().or_else(|| codes.first().cloned());
            let record = self.ruling_record(&item, &text, &codes);

            self.register(record, &mut report, |doc_id, version| {
                let paragraphs = text.split("\n\n").map(str::trim).filter(|p| !p.is_empty());
                plan_token_chunks(&self.tokens, doc_id, version, paragraphs)
                    .into_iter()
                    .map(|draft| {
                        // a chunk resolves to the first code it mentions itself
                        let code = extract_codes(&draft.text)
                            .into_iter()
                            .next()
                            .or_else(|| primary.clone());
                        (draft, code)
                    })
                    .collect()
            })?;
        }

        Ok(report)
    }

    fn hts_record(&self, item: &HtsItem, text: &str) -> DocumentRecord {
        let title = item.title.clone().unwrap_or_else(|| item.code.clone());

        DocumentRecord {
            document_id: document_id(SourceKind::Hts, &item.code, item.edition.as_deref()),
            source_type: SourceKind::Hts,
            external_id: item.code.clone(),
            edition: item.edition.clone(),
            title: Some(title.clone()),
            url: item.url.clone(),
            version: 0,
            content_hash: content_hash(&[&item.code, &title, text]),
            metadata: json!({ "code": item.code, "title": title }),
        }
    }

    fn ruling_record(&self, item: &RulingItem, text: &str, codes: &[String]) -> DocumentRecord {
        let title = item
            .title
            .clone()
            .unwrap_or_else(|| format!("Ruling {}", item.ruling_id));

        DocumentRecord {
            document_id: document_id(SourceKind::Ruling, &item.ruling_id, None),
            source_type: SourceKind::Ruling,
            external_id: item.ruling_id.clone(),
            edition: None,
            title: Some(title.clone()),
            url: item.url.clone(),
            version: 0,
            content_hash: content_hash(&[&item.ruling_id, &title, text]),
            metadata: json!({ "title": title, "codes": codes }),
        }
    }

    /// Write a new document version unless its content is already registered.
    ///
    /// `plan` chunks the document for the version being written; chunk ids
    /// embed the version, so planning waits until the version is known.
    fn register<F>(&self, mut record: DocumentRecord, report: &mut IngestReport, plan: F) -> Result<()>
    where
        F: FnOnce(&str, u32) -> PlannedChunks,
    {
        let version = match self.db.latest_version(&record.document_id)? {
            Some(latest) if latest.content_hash == record.content_hash => {
                debug!(
                    document_id = %record.document_id,
                    version = latest.version,
                    "Content unchanged; skipping"
                );
                report.documents_skipped += 1;
                return Ok(());
            }
            Some(latest) => latest.version + 1,
            None => 1,
        };
        record.version = version;

        let chunks: Vec<NewChunk> = plan(&record.document_id, version)
            .into_iter()
            .map(|(draft, code)| NewChunk {
                chunk_id: draft.chunk_id,
                section: draft.section,
                offset: draft.offset,
                position: draft.position,
                text: draft.text,
                code,
            })
            .collect();

        let written = self.db.insert_document_version(&record, &chunks)?;
        info!(
            document_id = %record.document_id,
            version,
            chunks = written,
            "Registered document version"
        );

        report.documents_added += 1;
        report.chunks_added += written;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::CorpusSource;
    use tempfile::TempDir;

    fn chunking() -> ChunkingConfig {
        ChunkingConfig {
            window_chars: 64,
            overlap_chars: 8,
            max_tokens: 32,
            overlap_tokens: 4,
        }
    }

    fn setup() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("ingest.db")).unwrap();
        (temp_dir, db)
    }

    #[test]
    fn test_document_id() {
        assert_eq!(document_id(SourceKind::Hts, "8504.40", None), "hts:8504.40");
        assert_eq!(document_id(SourceKind::Hts, "8504.40", Some("2024")), "hts:8504.40@2024");
        assert_eq!(document_id(SourceKind::Ruling, "N301619", None), "ruling:N301619");
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let (_temp_dir, db) = setup();
        let ingestor = Ingestor::new(&db, &chunking()).unwrap();
        let payload = json!({"items": [
            {"code": "8504.40", "title": "Static converters", "general": "Free"},
            {"hts_code": "8544.42", "description": "Insulated electric conductors with connectors"},
        ]});

        let first = ingestor.ingest_hts(payload.clone()).unwrap();
        assert_eq!(first.documents_added, 2);
        assert_eq!(first.tariff_rows, 2);
        let chunks_before = db.load_chunks().unwrap();

        let second = ingestor.ingest_hts(payload).unwrap();
        assert_eq!(second.documents_added, 0);
        assert_eq!(second.documents_skipped, 2);
        assert_eq!(second.chunks_added, 0);

        let chunks_after = db.load_chunks().unwrap();
        let ids = |chunks: &[crate::retrieval::ChunkRecord]| {
            chunks.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&chunks_before), ids(&chunks_after));
        assert_eq!(db.load_tariff_rows().unwrap().len(), 2);
    }

    #[test]
    fn test_changed_content_gets_new_version() {
        let (_temp_dir, db) = setup();
        let ingestor = Ingestor::new(&db, &chunking()).unwrap();

        ingestor
            .ingest_hts(json!({"code": "8504.40", "text": "Static converters"}))
            .unwrap();
        let report = ingestor
            .ingest_hts(json!({"code": "8504.40", "text": "Static converters, for example rectifiers"}))
            .unwrap();
        assert_eq!(report.documents_added, 1);

        let latest = db.latest_version("hts:8504.40").unwrap().unwrap();
        assert_eq!(latest.version, 2);

        // only the latest version is visible to retrieval
        let chunks = db.load_chunks().unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chunk_id.contains(":v2:")));
        assert!(chunks.iter().all(|c| c.code.as_deref() == Some("8504.40")));
    }

    #[test]
    fn test_ruling_chunks_resolve_codes() {
        let (_temp_dir, db) = setup();
        let ingestor = Ingestor::new(&db, &chunking()).unwrap();

        let report = ingestor
            .ingest_rulings(json!([{
                "ruling_id": "N301619",
                "title": "USB wall charger",
                "text": "The merchandise is a USB wall charger.\n\nIt is classified in 8504.40.95.",
            }]))
            .unwrap();
        assert_eq!(report.documents_added, 1);

        let chunks = db.load_chunks().unwrap();
        assert!(chunks.len() >= 2);
        // the first paragraph names no code and inherits the ruling's first mention
        assert!(chunks.iter().all(|c| c.code.as_deref() == Some("8504.40.95")));
        assert!(chunks.iter().all(|c| c.source == SourceKind::Ruling));
    }

    #[test]
    fn test_rejected_items_are_counted() {
        let (_temp_dir, db) = setup();
        let ingestor = Ingestor::new(&db, &chunking()).unwrap();

        let report = ingestor
            .ingest_rulings(json!([{"title": "no id"}, {"id": "N1", "body": "Toy robots"}]))
            .unwrap();
        assert_eq!(report.items_rejected, 1);
        assert_eq!(report.documents_added, 1);
    }

    #[test]
    fn test_read_payload_with_bom() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hts.json");
        std::fs::write(&path, "\u{feff}{\"items\": []}").unwrap();
        assert_eq!(read_payload(&path).unwrap(), json!({"items": []}));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_payload(&path), Err(IngestError::InvalidJson { .. })));
        assert!(matches!(
            read_payload(&temp_dir.path().join("missing.json")),
            Err(IngestError::Unreadable { .. })
        ));
    }
}
