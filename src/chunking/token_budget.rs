//! Word-walking chunker with an approximate token budget

use super::ChunkingError;

/// Cheap token estimate: a quarter of the character count, at least one
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChunk {
    pub position: usize,
    pub text: String,
    pub tokens: usize,
}

/// Token-budgeted chunker for free-form text without byte offsets
///
/// Words accumulate until the next one would exceed `max_tokens`; the chunk is
/// emitted and the next chunk is seeded with trailing words worth at least
/// `overlap_tokens`. A word larger than the remaining budget always opens a new
/// chunk, so no chunk is ever empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudgetChunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl TokenBudgetChunker {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Result<Self, ChunkingError> {
        if max_tokens == 0 {
            return Err(ChunkingError::Configuration(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if overlap_tokens >= max_tokens {
            return Err(ChunkingError::Configuration(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                overlap_tokens, max_tokens
            )));
        }
        Ok(Self {
            max_tokens,
            overlap_tokens,
        })
    }

    pub fn chunk(&self, text: &str) -> Vec<TokenChunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        for word in text.split_whitespace() {
            let size = estimate_tokens(word);

            if !current.is_empty() && current_tokens + size > self.max_tokens {
                Self::emit(&mut chunks, &current);

                let keep = self.overlap_tail(&current);
                let keep_tokens: usize = keep.iter().map(|w| estimate_tokens(w)).sum();

                if keep_tokens + size > self.max_tokens {
                    // the incoming word cannot share a chunk with the overlap tail
                    current.clear();
                    current_tokens = 0;
                } else {
                    current = keep;
                    current_tokens = keep_tokens;
                }
            }

            current.push(word);
            current_tokens += size;
        }

        if !current.is_empty() {
            Self::emit(&mut chunks, &current);
        }

        chunks
    }

    /// Trailing words whose cumulative estimate first reaches the overlap target
    fn overlap_tail<'a>(&self, words: &[&'a str]) -> Vec<&'a str> {
        if self.overlap_tokens == 0 {
            return Vec::new();
        }

        let mut tokens = 0;
        let mut start = words.len();
        while start > 0 {
            start -= 1;
            tokens += estimate_tokens(words[start]);
            if tokens >= self.overlap_tokens {
                break;
            }
        }
        words[start..].to_vec()
    }

    fn emit(chunks: &mut Vec<TokenChunk>, words: &[&str]) {
        let text = words.join(" ");
        let tokens = estimate_tokens(&text);
        chunks.push(TokenChunk {
            position: chunks.len(),
            text,
            tokens,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_budget() {
        assert!(TokenBudgetChunker::new(0, 0).is_err());
        assert!(TokenBudgetChunker::new(64, 64).is_err());
        assert!(TokenBudgetChunker::new(512, 64).is_ok());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = TokenBudgetChunker::new(512, 64).unwrap();
        let chunks = chunker.chunk("Static converters for telecommunication apparatus");
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].text,
            "Static converters for telecommunication apparatus"
        );
    }

    #[test]
    fn test_overlap_seeds_next_chunk() {
        // every word estimates to exactly one token
        let chunker = TokenBudgetChunker::new(3, 1).unwrap();
        let chunks = chunker.chunk("aa bb cc dd ee");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aa bb cc", "cc dd ee"]);
    }

    #[test]
    fn test_deterministic_output() {
        let chunker = TokenBudgetChunker::new(8, 2).unwrap();
        let text = "The merchandise at issue is a lithium-ion battery charger that converts \
                    alternating current into direct current for portable devices.";
        assert_eq!(chunker.chunk(text), chunker.chunk(text));
    }

    #[test]
    fn test_oversized_token_becomes_own_chunk() {
        let chunker = TokenBudgetChunker::new(4, 1).unwrap();
        let giant = "x".repeat(400);
        let text = format!("aa {} bb", giant);

        let chunks = chunker.chunk(&text);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        assert_eq!(texts, vec!["aa", giant.as_str(), "bb"]);
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn test_oversized_token_alone() {
        let chunker = TokenBudgetChunker::new(2, 0).unwrap();
        let giant = "y".repeat(100);
        let chunks = chunker.chunk(&giant);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, giant);
    }

    #[test]
    fn test_empty_text() {
        let chunker = TokenBudgetChunker::new(4, 1).unwrap();
        assert!(chunker.chunk("   \n  ").is_empty());
    }
}
