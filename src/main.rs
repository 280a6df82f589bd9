use hts_copilot::classify::{Classifier, EvidenceGate, GatePolicy, OfflineReasoning};
use hts_copilot::cli::{Cli, Commands, ConfigAction, IngestSource};
use hts_copilot::config::Config;
use hts_copilot::embedding::{provider_from_config, EmbeddingBackfill};
use hts_copilot::error::{HtsError, Result};
use hts_copilot::eval::{load_golden, write_metrics, GoldenEval};
use hts_copilot::ingest::{IngestReport, Ingestor};
use hts_copilot::retrieval::{CorpusFamily, HybridRetriever, RetrieverSettings};
use hts_copilot::storage::{StorageManager, StorageStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    let Cli {
        config,
        profile,
        command,
        ..
    } = cli;

    // Handle commands
    match command {
        Commands::Ingest { source } => {
            cmd_ingest(&load_config(config, profile)?, source)?;
        }
        Commands::Backfill => {
            cmd_backfill(&load_config(config, profile)?)?;
        }
        Commands::Reindex { lexical, vectors } => {
            cmd_reindex(&load_config(config, profile)?, lexical, vectors)?;
        }
        Commands::Search {
            query,
            top_k,
            alpha,
            json,
        } => {
            cmd_search(&load_config(config, profile)?, &query, top_k, alpha, json)?;
        }
        Commands::Lookup { query, top_k, json } => {
            cmd_lookup(&load_config(config, profile)?, &query, top_k, json)?;
        }
        Commands::Classify { query, top_k, json } => {
            cmd_classify(&load_config(config, profile)?, &query, top_k, json)?;
        }
        Commands::Eval {
            golden,
            k,
            metrics,
            classify,
            json,
        } => {
            cmd_eval(&load_config(config, profile)?, &golden, k, metrics, classify, json)?;
        }
        Commands::Status => {
            cmd_status(&load_config(config, profile)?)?;
        }
        Commands::Config { action } => {
            cmd_config(config, profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "hts_copilot=debug"
    } else {
        "hts_copilot=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_storage(config: &Config) -> Result<StorageManager> {
    StorageManager::new(expand_path(&config.storage.data_dir)?)
}

fn build_retriever(config: &Config, storage: &StorageManager) -> Result<Arc<HybridRetriever>> {
    let settings = RetrieverSettings::from_config(config)?;
    let provider = provider_from_config(config)?;
    let corpus = Arc::new(storage.database.clone());
    Ok(Arc::new(HybridRetriever::new(corpus, provider, settings)))
}

fn cmd_ingest(config: &Config, source: IngestSource) -> Result<()> {
    let storage = open_storage(config)?;
    let ingestor = Ingestor::new(&storage.database, &config.chunking)?;

    let mut total = IngestReport::default();
    match source {
        IngestSource::Hts { files } => {
            for file in &files {
                total.merge(&ingestor.ingest_hts_file(file)?);
            }
        }
        IngestSource::Rulings { files } => {
            for file in &files {
                total.merge(&ingestor.ingest_rulings_file(file)?);
            }
        }
    }

    println!("✓ Ingestion complete");
    println!("  Documents added:   {}", total.documents_added);
    println!("  Documents skipped: {}", total.documents_skipped);
    println!("  Chunks added:      {}", total.chunks_added);
    if total.tariff_rows > 0 {
        println!("  Tariff rows:       {}", total.tariff_rows);
    }
    if total.items_rejected > 0 {
        println!("  ⚠ Items rejected:  {}", total.items_rejected);
    }
    Ok(())
}

fn cmd_backfill(config: &Config) -> Result<()> {
    let Some(provider) = provider_from_config(config)? else {
        println!("Embeddings are disabled; set embedding.provider to enable backfill");
        return Ok(());
    };

    let storage = open_storage(config)?;
    let backfill = EmbeddingBackfill::new(provider, config.embedding.batch_size);
    let result = backfill.run(&storage.database)?;

    println!("✓ Backfill complete in {}ms", result.duration_ms);
    println!("  Embedded: {}", result.processed);
    if result.failed > 0 {
        println!("  ⚠ Failed: {} (left pending for the next run)", result.failed);
    }
    Ok(())
}

fn cmd_reindex(config: &Config, lexical: bool, vectors: bool) -> Result<()> {
    let storage = open_storage(config)?;
    let retriever = build_retriever(config, &storage)?;

    let families: Vec<CorpusFamily> = match (lexical, vectors) {
        (true, false) => vec![CorpusFamily::Lexical],
        (false, true) => vec![CorpusFamily::Vector],
        _ => vec![CorpusFamily::Lexical, CorpusFamily::Vector],
    };

    let mut failed = Vec::new();
    for family in families {
        if retriever.reindex(family) {
            println!("✓ Rebuilt {} index", family);
        } else {
            println!("✗ Rebuilding {} index failed", family);
            failed.push(family.to_string());
        }
    }

    if !failed.is_empty() {
        return Err(HtsError::IndexRebuild { families: failed });
    }
    Ok(())
}

fn cmd_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    alpha: Option<f32>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(config)?;
    let retriever = build_retriever(config, &storage)?;
    let report = retriever.retrieve_with_report(query, top_k, alpha);

    if json {
        return print_json(&report);
    }

    if let Some(reason) = &report.degraded {
        println!("⚠ Vector side degraded ({}); ranking is lexical", reason);
    }
    if report.hits.is_empty() {
        println!("No results for: {}", query);
        return Ok(());
    }

    for (rank, hit) in report.hits.iter().enumerate() {
        println!(
            "{:>2}. [{:.3}] {} {} (bm25 {:.2}, cos {:.2})",
            rank + 1,
            hit.score,
            hit.code.as_deref().unwrap_or("-"),
            hit.anchor,
            hit.lexical,
            hit.vector
        );
        println!("    {}", hit.snippet.replace('\n', " "));
    }
    Ok(())
}

fn cmd_lookup(config: &Config, query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let storage = open_storage(config)?;
    let retriever = build_retriever(config, &storage)?;
    let matches = retriever.search_lexical_only(query, top_k);

    if json {
        return print_json(&matches);
    }

    if matches.is_empty() {
        println!("No tariff rows match: {}", query);
        return Ok(());
    }

    for row in &matches {
        println!(
            "{:<12} [{:.2}] {} ({})",
            row.code,
            row.score,
            row.description,
            row.duty_rate.as_deref().unwrap_or("rate n/a")
        );
    }
    Ok(())
}

fn cmd_classify(config: &Config, query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let storage = open_storage(config)?;
    let retriever = build_retriever(config, &storage)?;
    let gate = EvidenceGate::new(GatePolicy::from_config(&config.gate));
    let classifier = Classifier::new(retriever, Box::new(OfflineReasoning), gate)
        .with_evidence_sink(Arc::new(storage.database.clone()));

    let classification = classifier.classify(query, top_k);

    if json {
        return print_json(&classification.response);
    }

    let response = &classification.response;
    if response.is_abstain() {
        println!("No evidence-backed classification found; abstaining.");
    } else {
        for candidate in &response.codes {
            println!("{}  (confidence {:.2})", candidate.code, candidate.confidence);
            println!("  {}", candidate.description);
            if let Some(rate) = &candidate.duty_rate {
                println!("  Duty rate: {}", rate);
            }
            println!("  Rationale: {}", candidate.rationale);
            for evidence in &candidate.evidence {
                match &evidence.url {
                    Some(url) => println!("  Evidence: {} {} <{}>", evidence.source, evidence.id, url),
                    None => println!("  Evidence: {} {}", evidence.source, evidence.id),
                }
            }
        }
    }
    println!("\n{}", response.disclaimer);
    println!("Call ID: {}", classification.call_id);
    Ok(())
}

fn cmd_eval(
    config: &Config,
    golden: &Path,
    k: usize,
    metrics_path: Option<PathBuf>,
    classify: bool,
    json: bool,
) -> Result<()> {
    let storage = open_storage(config)?;
    let retriever = build_retriever(config, &storage)?;
    let cases = load_golden(golden)?;

    let classifier = classify.then(|| {
        let gate = EvidenceGate::new(GatePolicy::from_config(&config.gate));
        Classifier::new(Arc::clone(&retriever), Box::new(OfflineReasoning), gate)
    });
    let mut eval = GoldenEval::new(&retriever);
    if let Some(classifier) = &classifier {
        eval = eval.with_classifier(classifier);
    }
    let metrics = eval.run(&cases, k)?;

    let metrics_path = match metrics_path {
        Some(path) => path,
        None => expand_path(&config.storage.data_dir)?.join("eval").join("metrics.json"),
    };
    write_metrics(&metrics_path, &metrics)?;

    if json {
        return print_json(&metrics);
    }

    println!("✓ Evaluated {} cases", metrics.cases);
    println!("  Recall@{}: {:.3} ({} hits)", metrics.k, metrics.recall_at_k, metrics.hits_at_k);
    println!("  MRR:       {:.3}", metrics.mrr);
    if metrics.degraded_queries > 0 {
        println!("  ⚠ Degraded queries: {} (lexical ranking only)", metrics.degraded_queries);
    }
    if let Some(classification) = &metrics.classification {
        println!(
            "  Classify:  {:.3} accuracy, {} answered, {} abstained",
            classification.accuracy, classification.answered, classification.abstained
        );
    }
    println!("  Metrics written to: {}", metrics_path.display());
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;

    println!("hts-copilot Status");
    println!("==================");
    println!("\nDatabase: {}", storage.database_path().display());
    println!("  Size: {}", StorageStats::format_size(stats.data_dir_size));
    println!("\nCorpus:");
    println!(
        "  Documents: {} ({} versions)",
        stats.db.document_count, stats.db.version_count
    );
    println!(
        "  Chunks:    {} ({} embedded)",
        stats.db.chunk_count, stats.db.embedded_chunk_count
    );
    println!("  Tariff rows: {}", stats.db.tariff_row_count);
    println!("\nAudit:");
    println!("  Index builds:      {}", stats.db.index_build_count);
    println!("  Evidence records:  {}", stats.db.evidence_count);

    let history = storage.database.index_history(5)?;
    if !history.is_empty() {
        println!("\nRecent index builds:");
        for audit in history {
            println!(
                "  {} {} [{}] {}",
                audit.built_at.format("%Y-%m-%d %H:%M:%S"),
                audit.name,
                audit.version,
                if audit.ok { "ok" } else { "failed" }
            );
        }
    }

    println!("\nEmbedding provider: {}", config.embedding.provider);
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, profile: Option<String>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let rendered = toml::to_string_pretty(&config)?;
            println!("{}", rendered);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| HtsError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'hts-copilot config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        hts_copilot::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| HtsError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| HtsError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| HtsError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
