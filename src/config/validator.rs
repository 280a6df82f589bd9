use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::FastEmbedProvider;
use crate::error::{HtsError, Result, ValidationError};
use crate::retrieval::MAX_TOP_K;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_gate(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HtsError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let c = &config.chunking;

        // overlap >= window can never advance; reject instead of clamping
        if c.window_chars == 0 || c.overlap_chars >= c.window_chars {
            errors.push(ValidationError::new(
                "chunking.overlap_chars",
                format!(
                    "Overlap ({}) must be smaller than a non-zero window ({})",
                    c.overlap_chars, c.window_chars
                ),
            ));
        }

        if c.max_tokens == 0 || c.overlap_tokens >= c.max_tokens {
            errors.push(ValidationError::new(
                "chunking.overlap_tokens",
                format!(
                    "Overlap ({}) must be smaller than a non-zero token budget ({})",
                    c.overlap_tokens, c.max_tokens
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        match provider.as_str() {
            "disabled" => {}
            "fastembed" => match FastEmbedProvider::model_dimension(&config.embedding.model) {
                Some(dim) if dim != config.indexing.vector_dim => {
                    errors.push(ValidationError::new(
                        "indexing.vector_dim",
                        format!(
                            "Model {} produces {}D vectors but vector_dim is {}",
                            config.embedding.model, dim, config.indexing.vector_dim
                        ),
                    ));
                }
                Some(_) => {}
                None => errors.push(ValidationError::new(
                    "embedding.model",
                    format!("Unsupported fastembed model: {}", config.embedding.model),
                )),
            },
            other => errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be 'disabled' or 'fastembed', got '{}'", other),
            )),
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.retrieval;

        if !r.bm25_k1.is_finite() || r.bm25_k1 <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.bm25_k1",
                format!("k1 must be positive, got {}", r.bm25_k1),
            ));
        }
        if !(0.0..=1.0).contains(&r.bm25_b) {
            errors.push(ValidationError::new(
                "retrieval.bm25_b",
                format!("b must be between 0.0 and 1.0, got {}", r.bm25_b),
            ));
        }
        if !(0.0..=1.0).contains(&r.fusion_alpha) {
            errors.push(ValidationError::new(
                "retrieval.fusion_alpha",
                format!("Alpha must be between 0.0 and 1.0, got {}", r.fusion_alpha),
            ));
        }
        if r.top_k == 0 || r.top_k > MAX_TOP_K {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                format!("top_k must be between 1 and {}, got {}", MAX_TOP_K, r.top_k),
            ));
        }
        if r.snippet_chars == 0 {
            errors.push(ValidationError::new(
                "retrieval.snippet_chars",
                "Snippet length must be greater than 0",
            ));
        }
    }

    fn validate_gate(config: &Config, errors: &mut Vec<ValidationError>) {
        let g = &config.gate;

        for (path, value) in [
            ("gate.min_confidence", g.min_confidence),
            ("gate.top_floor", g.top_floor),
            ("gate.second_floor", g.second_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }

        if g.disclaimer.trim().is_empty() {
            errors.push(ValidationError::new(
                "gate.disclaimer",
                "Disclaimer cannot be empty",
            ));
        }
    }
}
