//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hts-copilot",
    version,
    author = "neur0map",
    about = "Evidence-backed HTS tariff classification",
    long_about = "hts-copilot ingests tariff schedule items and CBP rulings, retrieves them with a \
                  hybrid of BM25 and vector similarity, and classifies product descriptions into \
                  HTS codes that always cite retrieved evidence, or abstains."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/hts-copilot/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the configuration (e.g., "lexical", "strict")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest source documents into the chunk store
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Embed stored chunks that have no vector yet
    Backfill,

    /// Rebuild indexes from the current corpus (both when no flag is given)
    Reindex {
        /// Rebuild the BM25 index
        #[arg(long)]
        lexical: bool,

        /// Rebuild the vector index
        #[arg(long)]
        vectors: bool,
    },

    /// Hybrid search over ingested chunks
    Search {
        /// Search query text
        query: String,

        /// Number of hits to return (clamped to 1..=50)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Vector weight in the fused score, 0 = lexical only
        #[arg(short, long)]
        alpha: Option<f32>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Lexical-only lookup over tariff rows
    Lookup {
        /// Search query text
        query: String,

        /// Number of rows to return (clamped to 1..=50)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Classify a product description into HTS codes
    Classify {
        /// Product description
        query: String,

        /// Number of retrieval hits used as context
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show the response in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Measure retrieval recall@k against a labelled golden set
    Eval {
        /// Golden CSV with `sku`, optional `notes`, and `expected_code` columns
        #[arg(short, long, value_name = "FILE")]
        golden: PathBuf,

        /// Cutoff for recall@k (clamped to 1..=50)
        #[arg(short = 'k', long = "top-k", default_value_t = 10)]
        k: usize,

        /// Where to write metrics JSON (defaults to <data_dir>/eval/metrics.json)
        #[arg(short, long, value_name = "FILE")]
        metrics: Option<PathBuf>,

        /// Also classify every case and score the top surfaced code
        #[arg(long)]
        classify: bool,

        /// Print the metrics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show storage and index status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum IngestSource {
    /// Tariff schedule items (JSON: {items: [...]}, a list, or one object)
    Hts {
        /// JSON files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// CBP rulings (JSON: {items: [...]}, a list, or one object)
    Rulings {
        /// JSON files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_args() {
        let cli = Cli::parse_from(["hts-copilot", "search", "usb charger", "-k", "3", "--alpha", "0"]);
        match cli.command {
            Commands::Search { query, top_k, alpha, json } => {
                assert_eq!(query, "usb charger");
                assert_eq!(top_k, Some(3));
                assert_eq!(alpha, Some(0.0));
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_eval_args() {
        let cli = Cli::parse_from(["hts-copilot", "eval", "--golden", "golden.csv", "--classify"]);
        match cli.command {
            Commands::Eval {
                golden,
                k,
                metrics,
                classify,
                json,
            } => {
                assert_eq!(golden, PathBuf::from("golden.csv"));
                assert_eq!(k, 10);
                assert!(metrics.is_none());
                assert!(classify);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["hts-copilot", "eval"]).is_err());
    }

    #[test]
    fn test_ingest_requires_files() {
        assert!(Cli::try_parse_from(["hts-copilot", "ingest", "hts"]).is_err());
        let cli = Cli::parse_from(["hts-copilot", "--profile", "strict", "ingest", "rulings", "a.json", "b.json"]);
        assert_eq!(cli.profile.as_deref(), Some("strict"));
        match cli.command {
            Commands::Ingest {
                source: IngestSource::Rulings { files },
            } => assert_eq!(files.len(), 2),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
