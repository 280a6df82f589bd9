//! SQLite database management with migrations
//!
//! Holds the document registry, chunks with their cached embeddings, tariff
//! rows, index build audits and the evidence audit trail.

use crate::classify::{Candidate, EvidenceSink};
use crate::embedding::{EmbeddingStore, PendingChunk};
use crate::error::{HtsError, Result};
use crate::retrieval::{ChunkRecord, CorpusSource, IndexAudit, SourceKind, TariffRow};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// One version of a registered source document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub source_type: SourceKind,
    pub external_id: String,
    pub edition: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub version: u32,
    pub content_hash: String,
    pub metadata: serde_json::Value,
}

/// A chunk row as written during ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub chunk_id: String,
    pub section: usize,
    pub offset: usize,
    pub position: usize,
    pub text: String,
    pub code: Option<String>,
}

/// Latest registered version of a document
#[derive(Debug, Clone, PartialEq)]
pub struct LatestVersion {
    pub version: u32,
    pub content_hash: String,
}

/// Database manager with migration support
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HtsError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        {
            let conn = pool.get()?;

            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Latest registered version of a document, if any
    pub fn latest_version(&self, document_id: &str) -> Result<Option<LatestVersion>> {
        let conn = self.get_conn()?;
        let latest = conn
            .query_row(
                "SELECT version, content_hash FROM documents
                 WHERE document_id = ?1 ORDER BY version DESC LIMIT 1",
                params![document_id],
                |row| {
                    Ok(LatestVersion {
                        version: row.get(0)?,
                        content_hash: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(latest)
    }

    /// Register a document version together with its chunks, atomically
    ///
    /// Chunk ids are deterministic, so re-inserting an existing chunk is ignored.
    /// Returns the number of chunk rows actually written.
    pub fn insert_document_version(
        &self,
        document: &DocumentRecord,
        chunks: &[NewChunk],
    ) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let metadata = serde_json::to_string(&document.metadata).map_err(|e| HtsError::Json {
            source: e,
            context: "Failed to serialize document metadata".to_string(),
        })?;

        tx.execute(
            "INSERT OR IGNORE INTO documents
                (document_id, source_type, external_id, edition, title, url, version, content_hash, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))",
            params![
                document.document_id,
                document.source_type.as_str(),
                document.external_id,
                document.edition,
                document.title,
                document.url,
                document.version,
                document.content_hash,
                metadata,
            ],
        )?;

        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO chunks
                    (chunk_id, document_id, version, section, offset, position, text, code, source, url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))",
            )?;
            for chunk in chunks {
                written += stmt.execute(params![
                    chunk.chunk_id,
                    document.document_id,
                    document.version,
                    chunk.section as i64,
                    chunk.offset as i64,
                    chunk.position as i64,
                    chunk.text,
                    chunk.code,
                    document.source_type.as_str(),
                    document.url,
                ])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }

    /// Insert or replace a tariff row keyed by code
    pub fn upsert_tariff_row(&self, row: &TariffRow) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO hts_items (code, description, duty_rate, chapter, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(code) DO UPDATE SET
                description = excluded.description,
                duty_rate = excluded.duty_rate,
                chapter = excluded.chapter,
                notes = excluded.notes",
            params![row.code, row.description, row.duty_rate, row.chapter, row.notes],
        )?;
        Ok(())
    }

    /// Most recent index builds, newest first
    pub fn index_history(&self, limit: usize) -> Result<Vec<IndexAudit>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, version, details, ok, built_at FROM index_meta
             ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let details: String = row.get(2)?;
            let built_at: String = row.get(4)?;
            Ok(IndexAudit {
                name: row.get(0)?,
                version: row.get(1)?,
                details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                ok: row.get(3)?,
                built_at: chrono::DateTime::parse_from_rfc3339(&built_at)
                    .map(|t| t.with_timezone(&chrono::Utc))
                    .unwrap_or_default(),
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            document_count: count("SELECT COUNT(DISTINCT document_id) FROM documents")?,
            version_count: count("SELECT COUNT(*) FROM documents")?,
            chunk_count: count(&format!("SELECT COUNT(*) FROM chunks c {}", LATEST_VERSION_JOIN))?,
            embedded_chunk_count: count(&format!(
                "SELECT COUNT(*) FROM chunks c {} WHERE c.embedding IS NOT NULL",
                LATEST_VERSION_JOIN
            ))?,
            tariff_row_count: count("SELECT COUNT(*) FROM hts_items")?,
            index_build_count: count("SELECT COUNT(*) FROM index_meta")?,
            evidence_count: count("SELECT COUNT(*) FROM evidence")?,
        })
    }
}

/// Restricts a `chunks c` query to the latest version of each document
const LATEST_VERSION_JOIN: &str = "JOIN (
        SELECT document_id, MAX(version) AS version FROM documents GROUP BY document_id
    ) latest ON latest.document_id = c.document_id AND latest.version = c.version";

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let source: String = row.get(5)?;
    let embedding: Option<String> = row.get(7)?;
    let chunk_id: String = row.get(0)?;

    let embedding = embedding.and_then(|raw| match serde_json::from_str::<Vec<f32>>(&raw) {
        Ok(vector) => Some(vector),
        Err(e) => {
            tracing::debug!(chunk_id = %chunk_id, "Unreadable stored embedding: {}", e);
            None
        }
    });

    Ok(ChunkRecord {
        chunk_id,
        document_id: row.get(1)?,
        position: row.get::<_, i64>(2)? as usize,
        text: row.get(3)?,
        code: row.get(4)?,
        source: SourceKind::parse(&source).unwrap_or(SourceKind::Hts),
        url: row.get(6)?,
        embedding,
    })
}

impl CorpusSource for Database {
    fn load_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT c.chunk_id, c.document_id, c.position, c.text, c.code, c.source, c.url, c.embedding
             FROM chunks c {}
             ORDER BY c.document_id, c.position",
            LATEST_VERSION_JOIN
        ))?;

        let rows = stmt.query_map([], chunk_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn load_tariff_rows(&self) -> Result<Vec<TariffRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT code, description, duty_rate, chapter, notes FROM hts_items ORDER BY code",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(TariffRow {
                code: row.get(0)?,
                description: row.get(1)?,
                duty_rate: row.get(2)?,
                chapter: row.get(3)?,
                notes: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn record_index_build(&self, audit: &IndexAudit) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO index_meta (name, version, details, ok, built_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                audit.name,
                audit.version,
                audit.details.to_string(),
                audit.ok,
                audit.built_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl EmbeddingStore for Database {
    fn chunks_missing_embeddings(&self) -> Result<Vec<PendingChunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT c.chunk_id, c.text FROM chunks c {}
             WHERE c.embedding IS NULL
             ORDER BY c.document_id, c.position",
            LATEST_VERSION_JOIN
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok(PendingChunk {
                chunk_id: row.get(0)?,
                text: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn store_embeddings(&self, model: &str, embeddings: &[(String, Vec<f32>)]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE chunks SET embedding = ?1, embedding_model = ?2 WHERE chunk_id = ?3",
            )?;
            for (chunk_id, vector) in embeddings {
                let encoded = serde_json::to_string(vector).map_err(|e| HtsError::Json {
                    source: e,
                    context: format!("Failed to encode embedding for {}", chunk_id),
                })?;
                stmt.execute(params![encoded, model, chunk_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl EvidenceSink for Database {
    fn record_evidence(&self, call_id: Uuid, query: &str, candidates: &[Candidate]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO evidence (call_id, query, code, confidence, source, ref_id, url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))",
            )?;
            let call_id = call_id.to_string();
            for candidate in candidates {
                for evidence in &candidate.evidence {
                    stmt.execute(params![
                        call_id,
                        query,
                        candidate.code,
                        candidate.confidence,
                        evidence.source.as_str(),
                        evidence.id,
                        evidence.url,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Database statistics
#[derive(Debug, Serialize)]
pub struct DbStats {
    pub document_count: usize,
    pub version_count: usize,
    /// Chunks of the latest document versions
    pub chunk_count: usize,
    pub embedded_chunk_count: usize,
    pub tariff_row_count: usize,
    pub index_build_count: usize,
    pub evidence_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Registered document versions
    CREATE TABLE documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id TEXT NOT NULL,
        source_type TEXT NOT NULL,
        external_id TEXT NOT NULL,
        edition TEXT,
        title TEXT,
        url TEXT,
        version INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        metadata TEXT,  -- JSON metadata
        created_at TEXT NOT NULL,
        UNIQUE (document_id, version)
    );

    CREATE INDEX idx_documents_source ON documents(source_type);

    -- Chunks, keyed by deterministic id
    CREATE TABLE chunks (
        chunk_id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        section INTEGER NOT NULL,
        offset INTEGER NOT NULL,
        position INTEGER NOT NULL,
        text TEXT NOT NULL,
        code TEXT,
        source TEXT NOT NULL,
        url TEXT,
        embedding TEXT,  -- JSON array, filled by backfill
        embedding_model TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (document_id, version) REFERENCES documents(document_id, version) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_document ON chunks(document_id, version);
    CREATE INDEX idx_chunks_code ON chunks(code);

    -- Tariff schedule rows
    CREATE TABLE hts_items (
        code TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        duty_rate TEXT,
        chapter INTEGER,
        notes TEXT
    );

    -- Index build audit
    CREATE TABLE index_meta (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        details TEXT NOT NULL,  -- JSON parameters
        ok BOOLEAN NOT NULL,
        built_at TEXT NOT NULL
    );

    -- Evidence surfaced by classify calls
    CREATE TABLE evidence (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        call_id TEXT NOT NULL,
        query TEXT NOT NULL,
        code TEXT NOT NULL,
        confidence REAL NOT NULL,
        source TEXT NOT NULL,
        ref_id TEXT NOT NULL,
        url TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_evidence_call ON evidence(call_id);
    "#,
];
