//! Token-aware contextual chunker.
//!
//! Turns source files and generated documentation pages into passages that
//! fit an embedding model's token budget while keeping enough context in
//! each passage to stand on its own.
//!
//! # Algorithm
//!
//! 1. Split the input into logical units: declarations for code
//!    ([`Chunker::chunk_code`]), a summary plus `## ` sections for documents
//!    ([`Chunker::chunk_document`]).
//! 2. Build a context header per unit: `// File: <path>` plus the file's
//!    import block for code, `[Feature: <title>] [Section: <heading>]` for
//!    documents.
//! 3. If `header + body` exceeds `max_tokens`, slice the body on token
//!    boundaries into pieces of `max(max_tokens - header_tokens,
//!    min_slice_tokens)` and re-prepend the header to every piece.
//!
//! # Guarantees
//!
//! - Every emitted chunk counts at most `max_tokens` tokens.
//! - The bodies of the emitted chunks, in order, concatenate to the input
//!   (for documents: to the page body, after the summary chunk).
//! - Empty or whitespace-only input produces no chunks.
//! - Output is a pure function of the input.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use codewiki_core::chunk::{ChunkBudget, Chunker};
//! use codewiki_core::tokenize::CharTokenizer;
//!
//! let chunker = Chunker::new(Arc::new(CharTokenizer), ChunkBudget::default());
//! let chunks = chunker.chunk_code("src/lib.rs", "use std::fmt;\n\npub fn a() {}\n\npub fn b() {}\n");
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[1].symbol.as_deref(), Some("a"));
//! ```

mod code;
mod document;

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::models::PassageKind;
use crate::tokenize::Tokenizer;

/// Default maximum tokens per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 1024;

/// Default minimum body slice, so huge headers still make progress.
pub const DEFAULT_MIN_SLICE_TOKENS: usize = 64;

/// Token limits applied to every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    pub max_tokens: usize,
    pub min_slice_tokens: usize,
}

impl ChunkBudget {
    /// Builds a budget, clamping `min_slice_tokens` into `1..=max_tokens / 2`.
    pub fn new(max_tokens: usize, min_slice_tokens: usize) -> Self {
        let max_tokens = max_tokens.max(2);
        let min_slice_tokens = min_slice_tokens.clamp(1, max_tokens / 2);
        Self {
            max_tokens,
            min_slice_tokens,
        }
    }

    /// Largest header that still leaves room for a minimum slice.
    fn header_limit(&self) -> usize {
        self.max_tokens - self.min_slice_tokens
    }
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS, DEFAULT_MIN_SLICE_TOKENS)
    }
}

/// A budget-compliant piece of text ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub kind: PassageKind,
    pub source_file: Option<String>,
    /// Declaration name for code units, when one was recognized.
    pub symbol: Option<String>,
    /// Section heading for document units.
    pub section: Option<String>,
    /// True for the leading summary chunk of a document.
    pub is_summary: bool,
    pub header: String,
    pub body: String,
}

impl TextChunk {
    /// Header followed by body; this is the text that gets embedded.
    pub fn content(&self) -> String {
        let mut s = String::with_capacity(self.header.len() + self.body.len());
        s.push_str(&self.header);
        s.push_str(&self.body);
        s
    }
}

/// Hex SHA-256 of `text`, used to deduplicate passages.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A logical unit before budgeting.
struct Unit<'a> {
    symbol: Option<String>,
    section: Option<String>,
    is_summary: bool,
    header: String,
    body: &'a str,
}

/// Splits code and documents into budgeted [`TextChunk`]s.
#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    budget: ChunkBudget,
}

impl Chunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, budget: ChunkBudget) -> Self {
        Self { tokenizer, budget }
    }

    pub fn budget(&self) -> ChunkBudget {
        self.budget
    }

    /// Number of tokens in `text` according to this chunker's tokenizer.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// Chunk one source file along declaration boundaries.
    pub fn chunk_code(&self, path: &str, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let file_line = format!("// File: {}\n", path);
        let imports = code::import_block(text);
        let full_header = format!("{}{}", file_line, imports);
        let header = self.fit_header(full_header, Some(&file_line));

        let units = code::split_units(path, text)
            .into_iter()
            .map(|(symbol, body)| Unit {
                symbol,
                section: None,
                is_summary: false,
                header: header.clone(),
                body,
            });

        let mut out = Vec::new();
        for unit in units {
            self.emit(PassageKind::Code, Some(path), unit, &mut out);
        }
        out
    }

    /// Chunk a documentation page: a summary chunk, then one unit per
    /// `## ` section of `body`.
    pub fn chunk_document(&self, title: &str, summary: &str, body: &str) -> Vec<TextChunk> {
        let title = title.trim();
        let mut out = Vec::new();

        if !title.is_empty() || !summary.trim().is_empty() {
            let header = self.fit_header(format!("[Feature: {}]\n", title), None);
            self.emit(
                PassageKind::Document,
                None,
                Unit {
                    symbol: None,
                    section: None,
                    is_summary: true,
                    header,
                    body: summary,
                },
                &mut out,
            );
        }

        if body.trim().is_empty() {
            return out;
        }

        for (heading, section_body) in document::split_sections(body) {
            let label = match &heading {
                Some(h) => format!("[Feature: {}] [Section: {}]\n", title, h),
                None => format!("[Feature: {}]\n", title),
            };
            let header = self.fit_header(label, None);
            self.emit(
                PassageKind::Document,
                None,
                Unit {
                    symbol: None,
                    section: heading,
                    is_summary: false,
                    header,
                    body: section_body,
                },
                &mut out,
            );
        }
        out
    }

    /// Reduce a header until it leaves at least `min_slice_tokens` of room:
    /// first fall back to `fallback` (the bare file line), then truncate on
    /// a token boundary.
    fn fit_header(&self, header: String, fallback: Option<&str>) -> String {
        let limit = self.budget.header_limit();
        if self.tokenizer.count(&header) <= limit {
            return header;
        }
        let header = match fallback {
            Some(f) if self.tokenizer.count(f) <= limit => return f.to_string(),
            Some(f) => f.to_string(),
            None => header,
        };

        let starts = self.tokenizer.token_starts(&header);
        let mut keep = limit.min(starts.len());
        loop {
            let cut = starts.get(keep).copied().unwrap_or(header.len());
            let mut candidate = header[..cut].trim_end_matches('\n').to_string();
            candidate.push('\n');
            if keep == 0 || self.tokenizer.count(&candidate) <= limit {
                return candidate;
            }
            keep -= 1;
        }
    }

    fn emit(&self, kind: PassageKind, source_file: Option<&str>, unit: Unit<'_>, out: &mut Vec<TextChunk>) {
        let max = self.budget.max_tokens;
        let make = |body: &str| TextChunk {
            kind,
            source_file: source_file.map(str::to_string),
            symbol: unit.symbol.clone(),
            section: unit.section.clone(),
            is_summary: unit.is_summary,
            header: unit.header.clone(),
            body: body.to_string(),
        };

        let whole = format!("{}{}", unit.header, unit.body);
        if self.tokenizer.count(&whole) <= max {
            out.push(make(unit.body));
            return;
        }

        let header_tokens = self.tokenizer.count(&unit.header);
        let room = max
            .saturating_sub(header_tokens)
            .max(self.budget.min_slice_tokens);
        let starts = self.tokenizer.token_starts(unit.body);
        let byte_at = |idx: usize| starts.get(idx).copied().unwrap_or(unit.body.len());

        let mut pos = 0;
        while pos < starts.len() {
            let mut end = (pos + room).min(starts.len());
            let piece = loop {
                let piece = &unit.body[byte_at(pos)..byte_at(end)];
                let joined = format!("{}{}", unit.header, piece);
                if end == pos + 1 || self.tokenizer.count(&joined) <= max {
                    break piece;
                }
                end -= 1;
            };
            debug_assert!(
                self.tokenizer.count(&format!("{}{}", unit.header, piece)) <= max,
                "chunk exceeds token budget"
            );
            out.push(make(piece));
            pos = end;
        }
    }
}
