use std::path::PathBuf;
use thiserror::Error;

use crate::chunking::ChunkingError;
use crate::embedding::EmbeddingError;
use crate::eval::EvalError;
use crate::ingest::IngestError;
use crate::retrieval::SearchError;

/// Main error type for hts-copilot
#[derive(Error, Debug)]
pub enum HtsError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every violation found in one pass over the configuration
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// A single key that could not be applied (env override, provider name)
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Search(#[from] SearchError),

    /// Provider could not be constructed; query-time failures degrade instead
    #[error("Embedding provider error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Completion backend failed before producing any output
    #[error("Reasoning step failed: {0}")]
    Reasoning(String),

    /// Explicit rebuild requests that left the previous snapshot in place
    #[error("Index rebuild failed for: {}", .families.join(", "))]
    IndexRebuild { families: Vec<String> },

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Cannot parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Cannot render configuration: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("SQLite connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// One rejected configuration key
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Dotted key, e.g. `retrieval.fusion_alpha`
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for hts-copilot operations
pub type Result<T> = std::result::Result<T, HtsError>;
