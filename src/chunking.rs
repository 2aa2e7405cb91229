//! Overlapping fixed-size chunking of extracted document text.
//!
//! The chunker operates on characters, not bytes, so multi-byte text never
//! splits mid-codepoint. Consecutive spans overlap by exactly
//! `chunk_overlap` characters: each new span starts `chunk_overlap`
//! characters before the previous span ended, which makes reconstruction
//! trivial — concatenate the first span with every later span minus its
//! leading overlap and the original text comes back byte-for-byte.
//!
//! Cuts prefer a paragraph break, then a sentence end, inside the tail half
//! of the window; only when neither exists does the window close with a
//! hard cut at `chunk_size`.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ChunkError {
    #[error("input text is empty or whitespace-only")]
    #[diagnostic(
        code(paperweave::chunking::empty_input),
        help("Check text extraction output before chunking.")
    )]
    EmptyInput,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    #[diagnostic(code(paperweave::chunking::invalid_config))]
    InvalidConfig { size: usize, overlap: usize },
}

#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ChunkError::InvalidConfig {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits `text` into ordered overlapping spans.
    ///
    /// The last span may be shorter than `chunk_size`; every other pair of
    /// consecutive spans shares exactly `chunk_overlap` characters.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>, ChunkError> {
        if text.trim().is_empty() {
            return Err(ChunkError::EmptyInput);
        }
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total <= self.chunk_size {
            return Ok(vec![text.to_string()]);
        }

        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end < total {
                self.preferred_cut(&chars, start, hard_end)
            } else {
                total
            };
            spans.push(chars[start..end].iter().collect());
            if end == total {
                break;
            }
            start = end - self.chunk_overlap;
        }
        Ok(spans)
    }

    /// Earliest permissible cut position; keeps every span longer than the
    /// overlap so the cursor always moves forward.
    fn floor(&self, start: usize) -> usize {
        start + (self.chunk_size / 2).max(self.chunk_overlap + 1)
    }

    fn preferred_cut(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = self.floor(start);

        // Paragraph break: cut just after a blank line.
        let mut i = hard_end;
        while i > floor {
            if chars[i - 1] == '\n' && i >= 2 && chars[i - 2] == '\n' {
                return i;
            }
            i -= 1;
        }

        // Sentence end: cut just after terminal punctuation followed by
        // whitespace.
        let mut i = hard_end;
        while i > floor {
            let c = chars[i - 1];
            let followed_by_space = chars.get(i).is_none_or(|next| next.is_whitespace());
            if matches!(c, '.' | '!' | '?') && followed_by_space {
                return i;
            }
            i -= 1;
        }

        hard_end
    }
}

/// Rebuilds the original text from chunk spans by trimming each later
/// span's leading overlap. Inverse of [`TextChunker::chunk`].
pub fn reconstruct(spans: &[String], chunk_overlap: usize) -> String {
    let mut out = String::new();
    for (idx, span) in spans.iter().enumerate() {
        if idx == 0 {
            out.push_str(span);
        } else {
            out.extend(span.chars().skip(chunk_overlap));
        }
    }
    out
}
