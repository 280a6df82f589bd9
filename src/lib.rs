//! hts-copilot - Evidence-backed HTS tariff classification
//!
//! Ingests tariff schedule items and rulings into deterministic chunks, ranks
//! them with a hybrid of BM25 and vector similarity, and classifies product
//! descriptions through an evidence gate that either cites retrieved
//! evidence or abstains. A golden-set evaluation measures retrieval recall
//! against labelled product descriptions.

pub mod chunking;
pub mod classify;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod ingest;
pub mod retrieval;
pub mod storage;

pub use error::{HtsError, Result};
