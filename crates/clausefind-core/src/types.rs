//! Domain types shared by the chunker, the retrieval engine and the facade.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar metadata value attached to a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Bool(v) => write!(f, "{v}"),
            MetaValue::Text(v) => f.write_str(v),
        }
    }
}

/// Ordered so that serialized chunks are stable across runs.
pub type Meta = BTreeMap<String, MetaValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Paragraph,
    TableRow,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Paragraph => f.write_str("paragraph"),
            SourceType::TableRow => f.write_str("table_row"),
        }
    }
}

/// Position of a block inside the source document.
///
/// Used for provenance and highlighting only; ranking never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OriginalIndex {
    Paragraph { index: usize },
    TableRow { table: usize, row: usize },
}

impl fmt::Display for OriginalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginalIndex::Paragraph { index } => write!(f, "paragraph {index}"),
            OriginalIndex::TableRow { table, row } => write!(f, "table {table} row {row}"),
        }
    }
}

/// A raw block as produced by a document parser, before decoding and
/// normalization. Text is carried as bytes so that undecodable content is
/// reported by the chunker together with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBlock {
    Paragraph { index: usize, bytes: Vec<u8> },
    TableRow { table: usize, row: usize, cells: Vec<Vec<u8>> },
}

impl RawBlock {
    pub fn paragraph(index: usize, text: impl Into<String>) -> Self {
        RawBlock::Paragraph { index, bytes: text.into().into_bytes() }
    }

    pub fn table_row<I, S>(table: usize, row: usize, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cells = cells.into_iter().map(|c| c.into().into_bytes()).collect();
        RawBlock::TableRow { table, row, cells }
    }

    pub fn position(&self) -> OriginalIndex {
        match self {
            RawBlock::Paragraph { index, .. } => OriginalIndex::Paragraph { index: *index },
            RawBlock::TableRow { table, row, .. } => OriginalIndex::TableRow { table: *table, row: *row },
        }
    }
}

/// A retrieval unit.
///
/// - `text`: normalized, never empty
/// - `original_index`: where the span came from in the source document
/// - `source_type`: paragraph or table row
/// - `metadata`: window or table coordinates, overlap size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub original_index: OriginalIndex,
    pub source_type: SourceType,
    pub metadata: Meta,
}

/// One ranked hit returned by a search.
///
/// `score` is the reranker's raw output; only its order within a single
/// query is meaningful. `coarse_score` is the cosine similarity from the
/// first stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub original_index: OriginalIndex,
    pub source_type: SourceType,
    pub metadata: Meta,
    pub score: f32,
    pub coarse_score: f32,
}

impl SearchResult {
    pub fn from_chunk(chunk: &Chunk, score: f32, coarse_score: f32) -> Self {
        Self {
            text: chunk.text.clone(),
            original_index: chunk.original_index,
            source_type: chunk.source_type,
            metadata: chunk.metadata.clone(),
            score,
            coarse_score,
        }
    }
}
