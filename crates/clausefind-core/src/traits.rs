use std::path::Path;

use crate::error::Result;
use crate::types::RawBlock;

/// Bi-encoder: maps texts independently into a shared vector space.
///
/// Implementations return L2-normalized vectors of length `dim()`.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Cross-encoder: scores `(query, candidate)` pairs jointly.
///
/// Scores are on whatever scale the model emits; only their relative order
/// within one call is meaningful.
pub trait Reranker: Send + Sync {
    fn score_pairs(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>>;
}

/// Reads a document file into ordered raw blocks.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<RawBlock>>;
}
