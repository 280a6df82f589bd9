//! Integration Test: ingest → index → classify over SQLite
//!
//! Runs the whole offline pipeline against a temporary data directory.

use hts_copilot::classify::{Classifier, EvidenceGate, OfflineReasoning};
use hts_copilot::config::Config;
use hts_copilot::embedding::{EmbeddingBackfill, EmbeddingError, EmbeddingProvider};
use hts_copilot::ingest::Ingestor;
use hts_copilot::retrieval::{CorpusFamily, CorpusSource, HybridRetriever, RetrieverSettings};
use hts_copilot::storage::StorageManager;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

struct UnitProvider;

impl EmbeddingProvider for UnitProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn dimension(&self) -> usize {
        4
    }
    fn model_name(&self) -> &str {
        "unit"
    }
}

fn hts_payload() -> serde_json::Value {
    json!({"items": [
        {
            "htsno": "8504.40",
            "title": "Static converters",
            "description": "Static converters, for example rectifiers, USB wall chargers and power adapters",
            "general": "Free",
            "url": "https://hts.usitc.gov/?query=8504.40",
        },
        {
            "code": "8544.42",
            "title": "Insulated conductors fitted with connectors",
            "text": "Insulated electric conductors fitted with connectors, such as USB charging cables",
            "rate": "2.6%",
        },
        {"title": "missing code"},
    ]})
}

fn rulings_payload() -> serde_json::Value {
    json!([{
        "ruling_id": "N301619",
        "title": "The tariff classification of a USB wall charger from China",
        "body": "The item is a USB wall charger that converts AC to DC.\n\nThe applicable subheading is 8504.40.95.",
        "link": "https://rulings.cbp.gov/ruling/N301619",
    }])
}

fn setup() -> (TempDir, StorageManager) {
    let temp = TempDir::new().unwrap();
    let storage = StorageManager::new(temp.path().to_path_buf()).unwrap();
    (temp, storage)
}

#[test]
fn test_ingest_is_idempotent() {
    let (_temp, storage) = setup();
    let config = Config::default();
    let ingestor = Ingestor::new(&storage.database, &config.chunking).unwrap();

    let first = ingestor.ingest_hts(hts_payload()).unwrap();
    assert_eq!(first.documents_added, 2);
    assert_eq!(first.items_rejected, 1);
    ingestor.ingest_rulings(rulings_payload()).unwrap();

    let before = storage.stats().unwrap().db;

    let second = ingestor.ingest_hts(hts_payload()).unwrap();
    let rulings = ingestor.ingest_rulings(rulings_payload()).unwrap();
    assert_eq!(second.documents_added + rulings.documents_added, 0);
    assert_eq!(second.chunks_added + rulings.chunks_added, 0);
    assert_eq!(second.documents_skipped, 2);

    let after = storage.stats().unwrap().db;
    assert_eq!(before.chunk_count, after.chunk_count);
    assert_eq!(before.version_count, after.version_count);
    assert_eq!(after.document_count, 3);
    assert_eq!(after.tariff_row_count, 2);
}

#[test]
fn test_ingest_files() {
    let (temp, storage) = setup();
    let path = temp.path().join("rulings.json");
    std::fs::write(&path, rulings_payload().to_string()).unwrap();

    let ingestor = Ingestor::new(&storage.database, &Config::default().chunking).unwrap();
    let report = ingestor.ingest_rulings_file(&path).unwrap();
    assert_eq!(report.documents_added, 1);

    assert!(ingestor.ingest_hts_file(&temp.path().join("missing.json")).is_err());
}

#[test]
fn test_retrieval_over_ingested_corpus() {
    let (_temp, storage) = setup();
    let ingestor = Ingestor::new(&storage.database, &Config::default().chunking).unwrap();
    ingestor.ingest_hts(hts_payload()).unwrap();
    ingestor.ingest_rulings(rulings_payload()).unwrap();

    let retriever = HybridRetriever::new(
        Arc::new(storage.database.clone()),
        None,
        RetrieverSettings::default(),
    );

    let report = retriever.retrieve_with_report("usb wall charger", Some(5), None);
    assert!(report.degraded.is_some(), "no provider means a degraded vector side");
    assert!(!report.hits.is_empty());
    assert!(report
        .hits
        .iter()
        .any(|h| h.code.as_deref() == Some("8504.40.95") && h.anchor.starts_with("ruling:N301619#")));
    assert!(report.hits.iter().any(|h| h.code.as_deref() == Some("8504.40")));

    let rows = retriever.search_lexical_only("rectifiers", None);
    assert!(rows.is_empty(), "tariff lookup only sees titles and notes");
    let rows = retriever.search_lexical_only("static converters", None);
    assert_eq!(rows[0].code, "8504.40");
    assert_eq!(rows[0].chapter, Some(85));

    assert!(retriever.reindex(CorpusFamily::Lexical));
    let history = storage.database.index_history(5).unwrap();
    assert_eq!(history[0].name, "bm25");
    assert!(history[0].ok);
}

#[test]
fn test_backfill_then_vector_reindex() {
    let (_temp, storage) = setup();
    let ingestor = Ingestor::new(&storage.database, &Config::default().chunking).unwrap();
    ingestor.ingest_hts(hts_payload()).unwrap();

    let chunks = storage.database.load_chunks().unwrap();
    assert!(chunks.iter().all(|c| c.embedding.is_none()));

    let backfill = EmbeddingBackfill::new(Arc::new(UnitProvider), 1);
    let result = backfill.run(&storage.database).unwrap();
    assert_eq!(result.processed, chunks.len());
    assert_eq!(result.failed, 0);

    let stats = storage.stats().unwrap().db;
    assert_eq!(stats.embedded_chunk_count, stats.chunk_count);

    let retriever = HybridRetriever::new(
        Arc::new(storage.database.clone()),
        Some(Arc::new(UnitProvider)),
        RetrieverSettings {
            vector_dim: 4,
            ..Default::default()
        },
    );
    assert!(retriever.reindex(CorpusFamily::Vector));

    let report = retriever.retrieve_with_report("charging cables", Some(5), Some(0.5));
    assert!(report.degraded.is_none());
    assert!(report.hits.iter().all(|h| (h.vector - 1.0).abs() < 1e-4));
}

#[test]
fn test_offline_classification_cites_evidence() {
    let (_temp, storage) = setup();
    let ingestor = Ingestor::new(&storage.database, &Config::default().chunking).unwrap();
    ingestor.ingest_hts(hts_payload()).unwrap();
    ingestor.ingest_rulings(rulings_payload()).unwrap();

    let retriever = Arc::new(HybridRetriever::new(
        Arc::new(storage.database.clone()),
        None,
        RetrieverSettings::default(),
    ));
    let classifier = Classifier::new(retriever, Box::new(OfflineReasoning), EvidenceGate::default())
        .with_evidence_sink(Arc::new(storage.database.clone()));

    let classification = classifier.classify("usb wall charger", None);
    assert!(classification.used_fallback);

    let response = &classification.response;
    assert!(!response.is_abstain());
    assert!(response.codes.len() <= 2);
    for candidate in &response.codes {
        assert!(!candidate.evidence.is_empty());
        assert!(candidate.confidence >= 0.40);
        assert!(classification
            .hits
            .iter()
            .any(|h| h.code.as_deref() == Some(candidate.code.as_str())));
    }
    assert!(storage.stats().unwrap().db.evidence_count >= 1);

    let nothing = classifier.classify("zzzz qqqq", None);
    assert!(nothing.response.is_abstain());
    assert!(!nothing.response.disclaimer.is_empty());
}
