//! Integration Test: Hybrid Retrieval
//!
//! Builds the retriever over an in-memory corpus and checks ranking, degrade
//! behavior and the index lifecycle end to end.

use hts_copilot::embedding::{EmbeddingError, EmbeddingProvider};
use hts_copilot::retrieval::{
    ChunkRecord, CorpusFamily, CorpusSource, HybridRetriever, IndexAudit, IndexStatus,
    MemoryCorpus, RetrieverSettings, SourceKind, TariffRow,
};
use hts_copilot::HtsError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Always returns the same vector
struct FixedProvider(Vec<f32>);

impl EmbeddingProvider for FixedProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.0.clone())
    }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| self.0.clone()).collect())
    }
    fn dimension(&self) -> usize {
        self.0.len()
    }
    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Always fails, like an unreachable embedding service
struct FailingProvider;

impl EmbeddingProvider for FailingProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("connection refused".to_string()))
    }
    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("connection refused".to_string()))
    }
    fn dimension(&self) -> usize {
        2
    }
    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Corpus whose loads can be switched to fail, like a database going away mid-rebuild
struct FlakyCorpus {
    inner: MemoryCorpus,
    failing: AtomicBool,
}

impl FlakyCorpus {
    fn check(&self) -> hts_copilot::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HtsError::Io {
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk unavailable"),
                context: "Failed to read chunks".to_string(),
            });
        }
        Ok(())
    }
}

impl CorpusSource for FlakyCorpus {
    fn load_chunks(&self) -> hts_copilot::Result<Vec<ChunkRecord>> {
        self.check()?;
        self.inner.load_chunks()
    }

    fn load_tariff_rows(&self) -> hts_copilot::Result<Vec<TariffRow>> {
        self.check()?;
        self.inner.load_tariff_rows()
    }

    fn record_index_build(&self, audit: &IndexAudit) -> hts_copilot::Result<()> {
        self.inner.record_index_build(audit)
    }
}

fn chunk(code: &str, position: usize, text: &str, embedding: Option<Vec<f32>>) -> ChunkRecord {
    let document_id = format!("hts:{}", code);
    ChunkRecord {
        chunk_id: format!("src:{}:v1:p0:c{}", document_id, position),
        document_id,
        position,
        text: text.to_string(),
        code: Some(code.to_string()),
        source: SourceKind::Hts,
        url: None,
        embedding,
    }
}

fn tariff_corpus() -> Vec<ChunkRecord> {
    vec![
        chunk(
            "8504.40",
            0,
            "Static converters, for example rectifiers and USB power adapters for charging phones",
            Some(vec![1.0, 0.0]),
        ),
        chunk(
            "8544.42",
            0,
            "Insulated electric conductors fitted with connectors, such as USB charging cables",
            Some(vec![0.0, 1.0]),
        ),
        chunk(
            "9503.00",
            0,
            "Tricycles, scooters, pedal cars and similar wheeled toys",
            Some(vec![0.7, 0.7]),
        ),
    ]
}

fn tariff_rows() -> Vec<TariffRow> {
    vec![
        TariffRow {
            code: "8504.40".to_string(),
            description: "Static converters".to_string(),
            duty_rate: Some("Free".to_string()),
            chapter: Some(85),
            notes: Some("rectifiers, power adapters".to_string()),
        },
        TariffRow {
            code: "8544.42".to_string(),
            description: "Insulated electric conductors fitted with connectors".to_string(),
            duty_rate: Some("2.6%".to_string()),
            chapter: Some(85),
            notes: None,
        },
    ]
}

fn settings() -> RetrieverSettings {
    RetrieverSettings {
        vector_dim: 2,
        ..Default::default()
    }
}

fn retriever(corpus: Arc<MemoryCorpus>, provider: Option<Arc<dyn EmbeddingProvider>>) -> HybridRetriever {
    HybridRetriever::new(corpus, provider, settings())
}

#[test]
fn test_degraded_ranking_matches_lexical_ranking() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    let hybrid = retriever(Arc::clone(&corpus), Some(Arc::new(FailingProvider)));
    let lexical = retriever(corpus, None);

    let report = hybrid.retrieve_with_report("usb charging adapter", Some(5), Some(0.75));
    assert!(report.degraded.is_some(), "failed embedding must be reported");
    assert!(!report.hits.is_empty());

    let degraded_order: Vec<&str> = report.hits.iter().map(|h| h.chunk_id.as_str()).collect();
    let bm25_hits = lexical.retrieve("usb charging adapter", Some(5), Some(0.0));
    let bm25_order: Vec<&str> = bm25_hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(degraded_order, bm25_order);

    // every vector contribution is zero on the degraded path
    assert!(report.hits.iter().all(|h| h.vector == 0.0));
}

#[test]
fn test_wrong_dimension_degrades_to_lexical_ranking() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    // three components against a two-dimensional deployment
    let hybrid = retriever(Arc::clone(&corpus), Some(Arc::new(FixedProvider(vec![0.0, 1.0, 0.0]))));
    let lexical = retriever(corpus, None);

    let report = hybrid.retrieve_with_report("usb charging cables", Some(5), Some(0.5));
    let reason = report.degraded.expect("dimension mismatch must degrade");
    assert!(reason.contains("dimension"), "unexpected reason: {}", reason);

    let bm25 = lexical.retrieve("usb charging cables", Some(5), Some(0.0));
    let degraded_ids: Vec<&str> = report.hits.iter().map(|h| h.chunk_id.as_str()).collect();
    let bm25_ids: Vec<&str> = bm25.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(degraded_ids, bm25_ids);

    // zero vector side: the best lexical hit carries exactly the lexical weight
    assert!((report.hits[0].score - 0.5).abs() < 1e-6);
    assert!(report.hits.iter().all(|h| h.vector == 0.0 && h.lexical > 0.0));
}

#[test]
fn test_vector_weight_reorders() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    // query embedding points at the cable chunk
    let hybrid = retriever(corpus, Some(Arc::new(FixedProvider(vec![0.0, 1.0]))));

    let hits = hybrid.retrieve("usb charging", Some(3), Some(1.0));
    assert_eq!(hits[0].code.as_deref(), Some("8544.42"));
    assert!((hits[0].score - 1.0).abs() < 1e-6);

    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for hit in &hits {
        assert!((0.0..=1.0).contains(&hit.score));
    }
}

#[test]
fn test_hits_are_hydrated() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    let hybrid = retriever(corpus, None);

    let hits = hybrid.retrieve("rectifiers", Some(3), Some(0.0));
    assert_eq!(hits.len(), 1, "chunks without any signal are not returned");
    let hit = &hits[0];
    assert_eq!(hit.anchor, "hts:8504.40#0");
    assert_eq!(hit.source, SourceKind::Hts);
    assert!(hit.snippet.starts_with("Static converters"));
    assert!(hit.lexical > 0.0);
}

#[test]
fn test_top_k_is_clamped() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    let hybrid = retriever(corpus, None);

    let hits = hybrid.retrieve("usb", Some(0), Some(0.0));
    assert_eq!(hits.len(), 1);

    let hits = hybrid.retrieve("usb", Some(10_000), Some(0.0));
    assert_eq!(hits.len(), 2);
}

#[test]
fn test_empty_corpus_returns_nothing() {
    let corpus = Arc::new(MemoryCorpus::default());
    let hybrid = retriever(Arc::clone(&corpus), Some(Arc::new(FailingProvider)));

    assert!(hybrid.retrieve("usb charger", None, None).is_empty());
    assert!(hybrid.search_lexical_only("usb charger", None).is_empty());
    assert_eq!(hybrid.state(CorpusFamily::Lexical), IndexStatus::Ready);
}

#[test]
fn test_index_lifecycle_and_audit() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    let hybrid = retriever(Arc::clone(&corpus), Some(Arc::new(FixedProvider(vec![1.0, 0.0]))));

    assert_eq!(hybrid.state(CorpusFamily::Lexical), IndexStatus::Unbuilt);
    assert_eq!(hybrid.state(CorpusFamily::Vector), IndexStatus::Unbuilt);

    hybrid.retrieve("converters", None, Some(0.5));
    assert_eq!(hybrid.state(CorpusFamily::Lexical), IndexStatus::Ready);
    assert_eq!(hybrid.state(CorpusFamily::Vector), IndexStatus::Ready);

    // corpus changes are only visible after an explicit rebuild
    corpus.set_chunks(vec![chunk("9503.00", 0, "Electric scooters", None)]);
    let stale = hybrid.retrieve("electric scooters", None, Some(0.0));
    assert_eq!(stale.len(), 2);
    assert!(stale.iter().all(|h| h.snippet != "Electric scooters"));

    assert!(hybrid.reindex(CorpusFamily::Lexical));
    let hits = hybrid.retrieve("electric scooters", None, Some(0.5));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].snippet, "Electric scooters");

    assert!(hybrid.reindex(CorpusFamily::Vector));
    let audits = corpus.audits();
    let names: Vec<&str> = audits.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["bm25", "vectors"]);
    assert!(audits.iter().all(|a| a.ok));
    assert_eq!(audits[0].details["chunks"], 1);
}

#[test]
fn test_lexical_only_lookup() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    let hybrid = retriever(corpus, None);

    let matches = hybrid.search_lexical_only("power adapters", Some(5));
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].code, "8504.40");
    assert_eq!(matches[0].duty_rate.as_deref(), Some("Free"));

    assert!(hybrid.search_lexical_only("bicycle", Some(5)).is_empty());
}

#[test]
fn test_concurrent_queries_share_one_build() {
    let corpus = Arc::new(MemoryCorpus::new(tariff_corpus(), tariff_rows()));
    let hybrid = Arc::new(retriever(Arc::clone(&corpus), None));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let hybrid = Arc::clone(&hybrid);
            std::thread::spawn(move || hybrid.retrieve("usb charging", Some(3), Some(0.0)))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for result in &results {
        assert_eq!(result, &results[0]);
    }
    // lazy builds are not audited, only explicit rebuilds are
    assert!(corpus.audits().is_empty());
}

#[test]
fn test_failed_reindex_keeps_serving_previous_snapshot() {
    let corpus = Arc::new(FlakyCorpus {
        inner: MemoryCorpus::new(tariff_corpus(), tariff_rows()),
        failing: AtomicBool::new(false),
    });
    let hybrid = HybridRetriever::new(
        Arc::clone(&corpus) as Arc<dyn CorpusSource>,
        Some(Arc::new(FixedProvider(vec![1.0, 0.0]))),
        settings(),
    );

    let before = hybrid.retrieve("usb charging", Some(3), Some(0.5));
    assert!(!before.is_empty());

    corpus.inner.set_chunks(vec![chunk("9503.00", 0, "Electric scooters", None)]);
    corpus.failing.store(true, Ordering::SeqCst);

    assert!(!hybrid.reindex(CorpusFamily::Lexical));
    assert!(!hybrid.reindex(CorpusFamily::Vector));
    assert_eq!(hybrid.state(CorpusFamily::Lexical), IndexStatus::Ready);
    assert_eq!(hybrid.state(CorpusFamily::Vector), IndexStatus::Ready);
    assert_eq!(hybrid.retrieve("usb charging", Some(3), Some(0.5)), before);
    assert!(hybrid.retrieve("electric scooters", Some(3), Some(0.0)).iter().all(|h| h.snippet != "Electric scooters"));

    // failures are audited as such, never as a completed build
    let audits = corpus.inner.audits();
    assert_eq!(audits.len(), 2);
    assert!(audits.iter().all(|a| !a.ok && a.details.get("error").is_some()));
    assert!(audits.iter().all(|a| a.details.get("chunks").is_none() && a.details.get("rows").is_none()));

    corpus.failing.store(false, Ordering::SeqCst);
    assert!(hybrid.reindex(CorpusFamily::Lexical));
    let hits = hybrid.retrieve("electric scooters", Some(3), Some(0.0));
    assert_eq!(hits.len(), 1);
    assert_eq!(corpus.inner.audits().last().map(|a| a.ok), Some(true));
}
