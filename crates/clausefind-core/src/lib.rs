//! clausefind-core
//!
//! Data model, error taxonomy, configuration and the chunker. Model
//! inference lives in `clausefind-embed`; retrieval in `clausefind-search`.

pub mod chunker;
pub mod config;
pub mod error;
pub mod parser;
pub mod traits;
pub mod types;

pub use chunker::Chunker;
pub use error::{Error, Result, ValidationError};
pub use types::{Chunk, Meta, MetaValue, OriginalIndex, RawBlock, SearchResult, SourceType};
