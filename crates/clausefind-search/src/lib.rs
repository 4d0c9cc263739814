//! clausefind-search
//!
//! The retrieval engine (cosine scan + cross-encoder rerank) and the
//! [`ContractSearch`] facade.

pub mod engine;
pub mod facade;
pub mod similarity;

pub use engine::{DocumentTable, RetrievalEngine};
pub use facade::ContractSearch;
