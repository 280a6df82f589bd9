//! Configuration management for hts-copilot
//!
//! TOML file, `HTSC_SECTION__KEY` environment overrides and named profiles,
//! validated as a whole before anything is built from it.

use crate::error::{HtsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";
pub const DEFAULT_DISCLAIMER: &str =
    "Not legal advice. Verify with a licensed customs broker or counsel.";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub gate: GateConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Chunking parameters for both chunker variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Character budget of a window chunk
    pub window_chars: usize,
    pub overlap_chars: usize,
    /// Approximate token budget of a free-form chunk
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "disabled" or "fastembed"
    pub provider: String,
    pub model: String,
    pub batch_size: usize,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    /// Free-form tag written to the index audit log
    pub version_tag: String,
}

/// Hybrid retrieval knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub fusion_alpha: f32,
    pub top_k: usize,
    pub snippet_chars: usize,
}

/// Evidence gate policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub min_confidence: f32,
    pub calibrate: bool,
    pub top_floor: f32,
    pub second_floor: f32,
    pub fallback_max_codes: usize,
    pub disclaimer: String,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_alpha: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f32>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HtsError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| HtsError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| HtsError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self.profiles.get(profile).cloned().ok_or_else(|| {
            HtsError::Config(format!("Unknown profile: {}", profile))
        })?;

        if let Some(alpha) = overrides.fusion_alpha {
            self.retrieval.fusion_alpha = alpha;
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        if let Some(min_confidence) = overrides.min_confidence {
            self.gate.min_confidence = min_confidence;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: HTSC_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `HTSC_`-prefixed key/value pairs; unknown or unparsable keys are warned about and skipped
    pub fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("HTSC_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "RETRIEVAL__BM25_K1" => self.retrieval.bm25_k1 = parse_value(path, value)?,
            "RETRIEVAL__BM25_B" => self.retrieval.bm25_b = parse_value(path, value)?,
            "RETRIEVAL__FUSION_ALPHA" => self.retrieval.fusion_alpha = parse_value(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_value(path, value)?,
            "GATE__MIN_CONFIDENCE" => self.gate.min_confidence = parse_value(path, value)?,
            "GATE__CALIBRATE" => self.gate.calibrate = parse_value(path, value)?,
            "INDEXING__VECTOR_DIM" => self.indexing.vector_dim = parse_value(path, value)?,
            "INDEXING__VERSION_TAG" => self.indexing.version_tag = value.to_string(),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            _ => {
                return Err(HtsError::InvalidConfigValue {
                    path: path.to_string(),
                    message: "Unknown configuration key".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| HtsError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("hts-copilot").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| HtsError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".hts-copilot"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| HtsError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "lexical".to_string(),
            ProfileOverrides {
                fusion_alpha: Some(0.0),
                ..Default::default()
            },
        );
        profiles.insert(
            "strict".to_string(),
            ProfileOverrides {
                min_confidence: Some(0.6),
                ..Default::default()
            },
        );

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.hts-copilot"),
            },
            chunking: ChunkingConfig {
                window_chars: 2048,
                overlap_chars: 256,
                max_tokens: 512,
                overlap_tokens: 64,
            },
            embedding: EmbeddingConfig {
                provider: "disabled".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
            },
            indexing: IndexingConfig {
                vector_dim: 1536,
                version_tag: "dev".to_string(),
            },
            retrieval: RetrievalConfig {
                bm25_k1: 1.4,
                bm25_b: 0.8,
                fusion_alpha: 0.75,
                top_k: 6,
                snippet_chars: 300,
            },
            gate: GateConfig {
                min_confidence: 0.40,
                calibrate: true,
                top_floor: 0.55,
                second_floor: 0.45,
                fallback_max_codes: 2,
                disclaimer: DEFAULT_DISCLAIMER.to_string(),
            },
            profiles,
        }
    }
}
