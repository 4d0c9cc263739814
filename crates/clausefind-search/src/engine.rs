//! Two-stage retrieval over one loaded document.
//!
//! `load_document` encodes every chunk with the bi-encoder and swaps in a new
//! [`DocumentTable`]. `search` scans the table by cosine similarity, hands the
//! best `coarse_width` candidates to the cross-encoder and returns the
//! reranked top `k`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use clausefind_core::chunker::normalize;
use clausefind_core::config::{RetrievalConfig, Settings};
use clausefind_core::error::{Error, Result, ValidationError};
use clausefind_core::traits::{Embedder, Reranker};
use clausefind_core::types::{Chunk, SearchResult};
use clausefind_embed::EncoderPair;

use crate::similarity::{descending, top_n};

/// Chunks and their embeddings; row `i` belongs to chunk `i`.
#[derive(Debug, Default)]
pub struct DocumentTable {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl DocumentTable {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }
}

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    coarse_width: usize,
    batch_size: usize,
    table: RwLock<Option<Arc<DocumentTable>>>,
    load_lock: Mutex<()>,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn Embedder>, reranker: Arc<dyn Reranker>, retrieval: &RetrievalConfig, batch_size: usize) -> Self {
        Self {
            embedder,
            reranker,
            coarse_width: retrieval.coarse_width.max(1),
            batch_size: batch_size.max(1),
            table: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    pub fn from_pair(pair: &EncoderPair, settings: &Settings) -> Self {
        Self::new(
            Arc::clone(&pair.bi_encoder),
            Arc::clone(&pair.cross_encoder),
            &settings.retrieval,
            settings.models.batch_size,
        )
    }

    /// The table currently served, if any document has been loaded.
    pub fn table(&self) -> Option<Arc<DocumentTable>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.table().is_some()
    }

    pub fn load_document(&self, chunks: Vec<Chunk>) -> Result<usize> {
        self.load_document_with(chunks, &AtomicBool::new(false))
    }

    /// Encode `chunks` and replace the current table.
    ///
    /// Loads are serialized. `cancel` is checked between batches and before
    /// the swap; a cancelled load leaves the previous table in place.
    pub fn load_document_with(&self, chunks: Vec<Chunk>, cancel: &AtomicBool) -> Result<usize> {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let pb = progress(texts.len(), self.batch_size);
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            if cancel.load(Ordering::SeqCst) {
                pb.abandon();
                return Err(Error::Cancelled("load_document"));
            }
            let embedded = self.embedder.embed_batch(batch)?;
            if embedded.len() != batch.len() {
                return Err(Error::Inference(format!("encoder returned {} vectors for {} texts", embedded.len(), batch.len())));
            }
            vectors.extend(embedded);
            pb.inc(batch.len() as u64);
        }
        let count = chunks.len();
        let table = Arc::new(DocumentTable { chunks, vectors });
        {
            // Checked under the write lock so a cancel never races the swap.
            let mut current = self.table.write().unwrap_or_else(PoisonError::into_inner);
            if cancel.load(Ordering::SeqCst) {
                pb.abandon();
                return Err(Error::Cancelled("load_document"));
            }
            *current = Some(table);
        }
        pb.finish_and_clear();
        info!(chunks = count, elapsed_ms = started.elapsed().as_millis() as u64, "document loaded");
        Ok(count)
    }

    /// Normalize the query and check `top_k` before any inference runs.
    pub fn validate(query: &str, top_k: usize) -> Result<String> {
        let query = normalize(query);
        if query.is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }
        if top_k == 0 {
            return Err(ValidationError::InvalidTopK(top_k).into());
        }
        Ok(query)
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let query = Self::validate(query, top_k)?;
        let table = self.table().ok_or(ValidationError::NoDocumentLoaded)?;
        if table.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let n_coarse = self.coarse_width.max(top_k).min(table.len());
        let top_k = top_k.min(table.len());

        let query_vec = self
            .embedder
            .embed_batch(std::slice::from_ref(&query))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Inference("encoder returned no query vector".into()))?;
        let candidates = top_n(&query_vec, &table.vectors, n_coarse);

        let texts: Vec<&str> = candidates.iter().map(|(i, _)| table.chunks[*i].text.as_str()).collect();
        let scores = self.reranker.score_pairs(&query, &texts)?;
        if scores.len() != candidates.len() {
            return Err(Error::Inference(format!("reranker returned {} scores for {} candidates", scores.len(), candidates.len())));
        }

        let mut ranked: Vec<((usize, f32), f32)> = candidates.into_iter().zip(scores).collect();
        // Stable: equal scores keep coarse order.
        ranked.sort_by(|a, b| descending(a.1, b.1));
        ranked.truncate(top_k);

        debug!(candidates = n_coarse, returned = ranked.len(), elapsed_ms = started.elapsed().as_millis() as u64, "search done");
        Ok(ranked
            .into_iter()
            .map(|((i, coarse), score)| SearchResult::from_chunk(&table.chunks[i], score, coarse))
            .collect())
    }
}

fn progress(total: usize, batch_size: usize) -> ProgressBar {
    if total <= batch_size {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%)")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use clausefind_core::types::{OriginalIndex, SourceType};
    use clausefind_embed::{FakeEmbedder, FakeReranker};

    fn chunk(i: usize, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            original_index: OriginalIndex::Paragraph { index: i },
            source_type: SourceType::Paragraph,
            metadata: Default::default(),
        }
    }

    fn engine(coarse_width: usize) -> RetrievalEngine {
        let retrieval = RetrievalConfig { coarse_width, default_top_k: 10 };
        RetrievalEngine::new(Arc::new(FakeEmbedder::new(64)), Arc::new(FakeReranker), &retrieval, 2)
    }

    #[test]
    fn validation_precedes_state_checks() {
        let e = engine(5);
        assert!(matches!(e.search("   ", 3), Err(Error::Validation(ValidationError::EmptyQuery))));
        assert!(matches!(e.search("x", 0), Err(Error::Validation(ValidationError::InvalidTopK(0)))));
        assert!(matches!(e.search("x", 3), Err(Error::Validation(ValidationError::NoDocumentLoaded))));
    }

    #[test]
    fn cancelled_load_keeps_previous_table() {
        let e = engine(5);
        e.load_document(vec![chunk(0, "alpha clause")]).unwrap();
        let cancel = AtomicBool::new(true);
        let err = e.load_document_with(vec![chunk(0, "beta"), chunk(1, "gamma")], &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled("load_document")));
        assert_eq!(e.table().unwrap().chunks()[0].text, "alpha clause");
    }

    #[test]
    fn table_rows_match_chunks() {
        let e = engine(5);
        let n = e.load_document((0..5).map(|i| chunk(i, &format!("clause number {i}"))).collect()).unwrap();
        let table = e.table().unwrap();
        assert_eq!(n, 5);
        assert_eq!(table.len(), 5);
        assert_eq!(table.vectors.len(), 5);
        assert!(table.vectors.iter().all(|v| v.len() == 64));
    }
}
