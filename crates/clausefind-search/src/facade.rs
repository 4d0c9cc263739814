//! Entry points for callers outside the core: initialise the models, load
//! one document, query it. Blocking work runs on tokio's blocking pool under
//! the configured timeouts.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use clausefind_core::config::Settings;
use clausefind_core::error::{Error, Result, ValidationError};
use clausefind_core::parser::parser_for;
use clausefind_core::traits::DocumentParser;
use clausefind_core::types::{Chunk, RawBlock, SearchResult};
use clausefind_core::Chunker;
use clausefind_embed::{DevicePlacementWarning, ModelProvider};

use crate::engine::RetrievalEngine;

pub struct ContractSearch {
    settings: Settings,
    chunker: Chunker,
    provider: ModelProvider,
    engine: OnceCell<Arc<RetrievalEngine>>,
}

impl ContractSearch {
    /// Facade over the configured models. Nothing is loaded yet.
    pub fn new(settings: Settings) -> Result<Self> {
        let provider = ModelProvider::from_settings(&settings);
        Self::with_provider(settings, provider)
    }

    pub fn with_provider(settings: Settings, provider: ModelProvider) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::new(settings.chunking)?;
        Ok(Self { settings, chunker, provider, engine: OnceCell::new() })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Load both models, waiting at most `timeouts.model_ready_secs`. Any
    /// failure leaves the facade uninitialised; a later call retries.
    pub async fn init_engine(&self) -> Result<()> {
        self.engine().await.map(|_| ())
    }

    /// Warnings from degraded device placement, once the models are loaded.
    pub fn placement_warnings(&self) -> Vec<DevicePlacementWarning> {
        self.provider.try_get().map(|pair| pair.warnings.clone()).unwrap_or_default()
    }

    /// Parse and chunk `path` without touching the models.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<Chunk>> {
        let parser = parser_for(path)?;
        self.chunk_with(parser.as_ref(), path)
    }

    pub fn chunk_with(&self, parser: &dyn DocumentParser, path: &Path) -> Result<Vec<Chunk>> {
        let blocks = parser.parse(path)?;
        self.chunker.chunk(&blocks)
    }

    /// Parse, chunk and load a document, replacing any previous one.
    /// Returns the number of chunks now searchable.
    pub async fn process_document(&self, path: &Path) -> Result<usize> {
        let chunks = self.chunk_file(path)?;
        info!(path = %path.display(), chunks = chunks.len(), "document chunked");
        self.load_chunks(chunks).await
    }

    /// Load blocks produced by an external parser.
    pub async fn process_blocks(&self, blocks: &[RawBlock]) -> Result<usize> {
        let chunks = self.chunker.chunk(blocks)?;
        self.load_chunks(chunks).await
    }

    pub async fn load_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let engine = self.engine().await?;
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let after = Duration::from_secs(self.settings.timeouts.load_document_secs);
        let task = tokio::task::spawn_blocking(move || engine.load_document_with(chunks, &flag));
        match tokio::time::timeout(after, task).await {
            Ok(joined) => joined.map_err(Error::inference)?,
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                warn!(?after, "document load timed out, cancelling");
                Err(Error::Timeout { operation: "load_document", after })
            }
        }
    }

    /// Search the loaded document. `top_k` defaults to
    /// `retrieval.default_top_k`. Never loads models: without a loaded
    /// document this fails with `NoDocumentLoaded`.
    pub async fn search_query(&self, text: &str, top_k: Option<usize>) -> Result<Vec<SearchResult>> {
        let top_k = top_k.unwrap_or(self.settings.retrieval.default_top_k);
        let query = RetrievalEngine::validate(text, top_k)?;
        let engine = match self.engine.get() {
            Some(engine) if engine.is_loaded() => Arc::clone(engine),
            _ => return Err(ValidationError::NoDocumentLoaded.into()),
        };
        let after = Duration::from_secs(self.settings.timeouts.search_secs);
        let task = tokio::task::spawn_blocking(move || engine.search(&query, top_k));
        match tokio::time::timeout(after, task).await {
            Ok(joined) => joined.map_err(Error::inference)?,
            Err(_) => Err(Error::Timeout { operation: "search", after }),
        }
    }

    async fn engine(&self) -> Result<Arc<RetrievalEngine>> {
        self.engine
            .get_or_try_init(|| async {
                let after = Duration::from_secs(self.settings.timeouts.model_ready_secs);
                let pair = self.provider.get(after).await?;
                for w in &pair.warnings {
                    warn!(warning = %w, "running degraded");
                }
                Ok::<_, Error>(Arc::new(RetrievalEngine::from_pair(&pair, &self.settings)))
            })
            .await
            .map(Arc::clone)
    }
}
