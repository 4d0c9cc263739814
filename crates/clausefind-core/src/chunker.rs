//! Turns parser output into retrieval chunks.
//!
//! Paragraphs below the length threshold become one chunk each. Longer
//! paragraphs are split into sentences and regrouped into overlapping
//! windows; table rows are joined cell by cell and never windowed.

use std::ops::Range;

use tracing::debug;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::{Chunk, Meta, OriginalIndex, RawBlock, SourceType};

pub const CELL_DELIMITER: &str = " | ";

const ABBREVIATIONS: &[&str] = &[
    "e.g.", "i.e.", "art.", "sec.", "inc.", "ltd.", "co.", "mr.", "mrs.", "ms.", "dr.", "vs.", "etc.",
];

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk blocks in document order. Fails only when a block's bytes are
    /// not valid UTF-8; the error names that block's position.
    pub fn chunk(&self, blocks: &[RawBlock]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for block in blocks {
            match block {
                RawBlock::Paragraph { index, bytes } => {
                    let text = normalize(decode(bytes, block.position())?);
                    if text.is_empty() {
                        continue;
                    }
                    chunks.extend(self.chunk_paragraph(*index, &text));
                }
                RawBlock::TableRow { table, row, cells } => {
                    let mut normalized = Vec::with_capacity(cells.len());
                    for cell in cells {
                        normalized.push(normalize(decode(cell, block.position())?));
                    }
                    if normalized.iter().all(String::is_empty) {
                        continue;
                    }
                    let text = normalize(&normalized.join(CELL_DELIMITER));
                    let mut metadata = Meta::new();
                    metadata.insert("table_index".into(), (*table).into());
                    metadata.insert("row_index".into(), (*row).into());
                    metadata.insert("cell_count".into(), cells.len().into());
                    chunks.push(Chunk {
                        text,
                        original_index: OriginalIndex::TableRow { table: *table, row: *row },
                        source_type: SourceType::TableRow,
                        metadata,
                    });
                }
            }
        }
        debug!(blocks = blocks.len(), chunks = chunks.len(), "chunked document");
        Ok(chunks)
    }

    fn chunk_paragraph(&self, index: usize, text: &str) -> Vec<Chunk> {
        let original_index = OriginalIndex::Paragraph { index };
        let whole = || Chunk {
            text: text.to_string(),
            original_index,
            source_type: SourceType::Paragraph,
            metadata: Meta::new(),
        };
        if text.chars().count() < self.config.threshold {
            return vec![whole()];
        }
        let sentences = split_sentences(text);
        if sentences.len() <= self.config.window {
            return vec![whole()];
        }
        let windows = window_ranges(sentences.len(), self.config.window, self.config.overlap);
        let window_count = windows.len();
        windows
            .into_iter()
            .enumerate()
            .map(|(window_index, w)| {
                let span = sentences[w.start].start..sentences[w.end - 1].end;
                let mut metadata = Meta::new();
                metadata.insert("window_index".into(), window_index.into());
                metadata.insert("window_count".into(), window_count.into());
                metadata.insert("overlap".into(), self.config.overlap.into());
                Chunk {
                    text: text[span].to_string(),
                    original_index,
                    source_type: SourceType::Paragraph,
                    metadata,
                }
            })
            .collect()
    }
}

fn decode(bytes: &[u8], position: OriginalIndex) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::InputFormat { position, reason: e.to_string() })
}

/// Collapse whitespace runs to a single space and trim the ends.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '」' | '』' | '）')
}

fn ends_with_abbreviation(text: &str, dot: usize) -> bool {
    let word_start = text[..dot].rfind(char::is_whitespace).map_or(0, |i| i + 1);
    let word = &text[word_start..=dot];
    // `No. 5` is a numbering abbreviation; a sentence ending in "no." is not.
    if word == "No." {
        return text[dot + 1..].trim_start().starts_with(|c: char| c.is_ascii_digit());
    }
    ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

/// Split normalized text into sentence byte spans.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of
/// the text, or at a full-width `。`, `！`, `？`. Trailing closing quotes and
/// brackets stay with their sentence. Known abbreviations do not end one.
pub fn split_sentences(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let full_width = matches!(c, '。' | '！' | '？');
        if !full_width && !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !is_closer(next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let at_boundary = match chars.peek() {
            None => true,
            Some(&(_, next)) => full_width || next.is_whitespace(),
        };
        if !at_boundary || (c == '.' && ends_with_abbreviation(text, i)) {
            continue;
        }
        if !text[start..end].trim().is_empty() {
            spans.push(trim_span(text, start..end));
        }
        start = end;
    }
    if !text[start..].trim().is_empty() {
        spans.push(trim_span(text, start..text.len()));
    }
    spans
}

fn trim_span(text: &str, span: Range<usize>) -> Range<usize> {
    let slice = &text[span.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    span.start + lead..span.end - trail
}

/// Sentence index ranges for a sliding window over `n` sentences.
///
/// Windows advance by `window - overlap`; the last one may be short and
/// always reaches the final sentence.
pub fn window_ranges(n: usize, window: usize, overlap: usize) -> Vec<Range<usize>> {
    let stride = window.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut i = 0;
    while i < n {
        out.push(i..(i + window).min(n));
        if i + window >= n {
            break;
        }
        i += stride;
    }
    out
}
