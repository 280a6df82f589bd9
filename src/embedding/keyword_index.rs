/// In-memory BM25 keyword index over tokenized text
use ahash::{HashMap, HashMapExt};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeywordIndexError {
    #[error("Invalid BM25 parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("valid word regex"))
}

/// Lower-cased runs of Unicode word characters. No stemming, no stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    word_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// BM25 tuning constants, treated as opaque hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    k1: f32,
    b: f32,
}

impl Bm25Params {
    pub fn new(k1: f32, b: f32) -> Result<Self, KeywordIndexError> {
        if !k1.is_finite() || k1 <= 0.0 {
            return Err(KeywordIndexError::InvalidParameter {
                name: "k1",
                value: k1,
            });
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(KeywordIndexError::InvalidParameter {
                name: "b",
                value: b,
            });
        }
        Ok(Self { k1, b })
    }

    pub fn k1(&self) -> f32 {
        self.k1
    }

    pub fn b(&self) -> f32 {
        self.b
    }
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.4, b: 0.8 }
    }
}

/// Ranked keyword hit
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSearchResult {
    /// Position of the document in the corpus the index was built from
    pub position: usize,
    /// BM25 relevance score
    pub score: f32,
}

/// BM25 Okapi ranking model
///
/// Built once over an ordered corpus; scores are index-aligned with that corpus.
/// IDF uses the `ln(1 + (N - df + 0.5) / (df + 0.5))` form, which stays positive
/// even for terms present in every document of a tiny corpus.
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    params: Bm25Params,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<f32>,
    avg_doc_len: f32,
    idf: HashMap<String, f32>,
}

impl KeywordIndex {
    /// Build from pre-tokenized documents.
    ///
    /// Returns `None` for an empty corpus: the index is simply unavailable.
    pub fn build(corpus: &[Vec<String>], params: Bm25Params) -> Option<Self> {
        if corpus.is_empty() {
            return None;
        }

        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut total_len = 0usize;

        for tokens in corpus {
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += tokens.len();
            doc_lens.push(tokens.len() as f32);
            term_freqs.push(tf);
        }

        let n = corpus.len() as f32;
        let avg_doc_len = total_len as f32 / n;
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f32;
                (term, (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        Some(Self {
            params,
            term_freqs,
            doc_lens,
            avg_doc_len: if avg_doc_len > 0.0 { avg_doc_len } else { 1.0 },
            idf,
        })
    }

    /// Tokenize and build in one step
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>, params: Bm25Params) -> Option<Self> {
        let corpus: Vec<Vec<String>> = texts.into_iter().map(tokenize).collect();
        Self::build(&corpus, params)
    }

    /// Raw BM25 score of every document, index-aligned with the corpus
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let Bm25Params { k1, b } = self.params;

        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(tf, &dl)| {
                let norm = k1 * (1.0 - b + b * dl / self.avg_doc_len);
                query_tokens
                    .iter()
                    .filter_map(|term| {
                        let freq = *tf.get(term)? as f32;
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        Some(idf * (freq * (k1 + 1.0)) / (freq + norm))
                    })
                    .sum()
            })
            .collect()
    }

    /// Documents with a positive score, best first, ties broken by corpus order
    pub fn search(&self, query: &str, limit: usize) -> Vec<KeywordSearchResult> {
        let mut results: Vec<KeywordSearchResult> = self
            .scores(&tokenize(query))
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .map(|(position, score)| KeywordSearchResult { position, score })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.position.cmp(&b.position))
        });
        results.truncate(limit);
        results
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Number of documents in the index
    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    /// Always false: empty corpora never produce an index
    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }
}
