//! Fixed-size character windows with overlap

use super::ChunkingError;

/// One emitted window: ordinal, byte offset into the source and the span itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a> {
    pub position: usize,
    pub offset: usize,
    pub text: &'a str,
}

/// Character-budget window chunker
///
/// The window advances by `window - overlap` characters, so consecutive windows
/// share exactly `overlap` characters. Construction rejects `overlap >= window`,
/// which is the only configuration that could fail to advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChunker {
    window: usize,
    overlap: usize,
}

impl WindowChunker {
    pub fn new(window: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if window == 0 {
            return Err(ChunkingError::Configuration(
                "window size must be greater than 0".to_string(),
            ));
        }
        if overlap >= window {
            return Err(ChunkingError::Configuration(format!(
                "overlap ({}) must be smaller than window ({})",
                overlap, window
            )));
        }
        Ok(Self { window, overlap })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily iterate the windows of `text`. The iterator is `Clone`, so a
    /// consumer can restart from any point and get the same sequence.
    pub fn windows<'a>(&self, text: &'a str) -> Windows<'a> {
        Windows {
            text,
            window: self.window,
            step: self.window - self.overlap,
            start: 0,
            position: 0,
            done: text.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Windows<'a> {
    text: &'a str,
    window: usize,
    step: usize,
    start: usize,
    position: usize,
    done: bool,
}

impl<'a> Windows<'a> {
    /// Byte index `chars` characters after `from`, or the end of the text
    fn advance(&self, from: usize, chars: usize) -> usize {
        self.text[from..]
            .char_indices()
            .nth(chars)
            .map(|(i, _)| from + i)
            .unwrap_or(self.text.len())
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let end = self.advance(self.start, self.window);
        let item = Window {
            position: self.position,
            offset: self.start,
            text: &self.text[self.start..end],
        };

        if end >= self.text.len() {
            self.done = true;
        } else {
            // step < window, so the next start always lies strictly before `end`
            self.start = self.advance(self.start, self.step);
            self.position += 1;
        }

        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(windows: &[Window<'_>], overlap: usize) -> String {
        let mut out = String::new();
        for (i, w) in windows.iter().enumerate() {
            if i == 0 {
                out.push_str(w.text);
            } else {
                out.extend(w.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_window() {
        assert!(WindowChunker::new(10, 10).is_err());
        assert!(WindowChunker::new(10, 12).is_err());
        assert!(WindowChunker::new(0, 0).is_err());
        assert!(WindowChunker::new(10, 9).is_ok());
    }

    #[test]
    fn test_reconstructs_original_text() {
        let text = "Electrical transformers, static converters (for example, rectifiers) \
                    and inductors; parts thereof.";
        let chunker = WindowChunker::new(16, 5).unwrap();
        let windows: Vec<_> = chunker.windows(text).collect();

        assert!(windows.len() > 2);
        assert_eq!(reconstruct(&windows, chunker.overlap()), text);
    }

    #[test]
    fn test_multibyte_text_stays_on_char_boundaries() {
        let text = "Käse – Emmentaler “Spezial” für Export ✓ ✓ ✓";
        let chunker = WindowChunker::new(7, 3).unwrap();
        let windows: Vec<_> = chunker.windows(text).collect();

        for w in &windows {
            assert!(text.is_char_boundary(w.offset));
            assert!(w.text.chars().count() <= 7);
        }
        assert_eq!(reconstruct(&windows, 3), text);
    }

    #[test]
    fn test_last_window_may_be_short() {
        let chunker = WindowChunker::new(4, 1).unwrap();
        let windows: Vec<_> = chunker.windows("abcdefghij").collect();
        let texts: Vec<&str> = windows.iter().map(|w| w.text).collect();

        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        assert_eq!(windows[2].offset, 6);

        let windows: Vec<_> = chunker.windows("abcdefgh").collect();
        assert_eq!(windows.last().unwrap().text, "gh");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let chunker = WindowChunker::new(4, 1).unwrap();
        assert_eq!(chunker.windows("").count(), 0);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let chunker = WindowChunker::new(5, 2).unwrap();
        let mut iter = chunker.windows("the quick brown fox");
        iter.next();
        let snapshot = iter.clone();

        let rest: Vec<_> = iter.collect();
        let replay: Vec<_> = snapshot.collect();
        assert_eq!(rest, replay);
    }
}
