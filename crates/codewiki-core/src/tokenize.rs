//! Token counting seam for the chunker.
//!
//! The chunker never measures text by bytes or characters directly; it asks
//! a [`Tokenizer`] where tokens begin. Slicing on those offsets keeps every
//! passage aligned to whole tokens, so a model-specific BPE tokenizer can be
//! plugged in without touching the chunking logic.

/// Approximate characters-per-token ratio used by [`CharTokenizer`].
pub const CHARS_PER_TOKEN: usize = 4;

/// Splits text into tokens for budgeting purposes.
pub trait Tokenizer: Send + Sync {
    /// Byte offsets (ascending, on char boundaries) where each token begins.
    ///
    /// The first offset is always `0` for non-empty text; empty text has no
    /// tokens.
    fn token_starts(&self, text: &str) -> Vec<usize>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.token_starts(text).len()
    }
}

/// Heuristic tokenizer: every [`CHARS_PER_TOKEN`] characters form one token.
///
/// ```rust
/// use codewiki_core::tokenize::{CharTokenizer, Tokenizer};
///
/// let t = CharTokenizer;
/// assert_eq!(t.count(""), 0);
/// assert_eq!(t.count("abcd"), 1);
/// assert_eq!(t.count("abcde"), 2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn token_starts(&self, text: &str) -> Vec<usize> {
        text.char_indices()
            .step_by(CHARS_PER_TOKEN)
            .map(|(i, _)| i)
            .collect()
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}
