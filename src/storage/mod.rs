//! Storage layer for hts-copilot
//!
//! Everything persistent lives in a single SQLite file under the data directory.

pub mod database;

use crate::error::{HtsError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub use database::{Database, DbPool, DbStats, DocumentRecord, LatestVersion, NewChunk};

const DATABASE_FILE: &str = "hts.sqlite";

/// Storage manager owning the data directory and the database inside it
pub struct StorageManager {
    pub database: Database,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).map_err(|e| HtsError::Io {
            source: e,
            context: format!("Failed to create data directory: {}", base_path.display()),
        })?;

        let database = Database::new(&base_path.join(DATABASE_FILE))?;

        Ok(Self {
            database,
            base_path,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.base_path.join(DATABASE_FILE)
    }

    /// Get combined storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            db: self.database.stats()?,
            data_dir_size: Self::dir_size(&self.base_path)?,
        })
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> Result<u64> {
        let mut size = 0u64;

        if path.is_dir() {
            for entry in std::fs::read_dir(path).map_err(|e| HtsError::Io {
                source: e,
                context: format!(
                    "Failed to read directory for size calculation: {}",
                    path.display()
                ),
            })? {
                let entry = entry.map_err(|e| HtsError::Io {
                    source: e,
                    context: "Failed to read directory entry for size calculation".to_string(),
                })?;
                let path = entry.path();

                if path.is_dir() {
                    size += Self::dir_size(&path)?;
                } else {
                    size += entry
                        .metadata()
                        .map_err(|e| HtsError::Io {
                            source: e,
                            context: format!("Failed to get file metadata: {}", path.display()),
                        })?
                        .len();
                }
            }
        }

        Ok(size)
    }
}

/// Combined storage statistics
#[derive(Debug, Serialize)]
pub struct StorageStats {
    pub db: DbStats,
    pub data_dir_size: u64,
}

impl StorageStats {
    /// Format size as human-readable string
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
