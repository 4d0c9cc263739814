use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::OriginalIndex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query is empty after normalization")]
    EmptyQuery,

    #[error("top_k must be a positive integer, got {0}")]
    InvalidTopK(usize),

    #[error("no document loaded")]
    NoDocumentLoaded,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Undecodable block at {position}: {reason}")]
    InputFormat { position: OriginalIndex, reason: String },

    #[error("Unsupported format for {}: {hint}", path.display())]
    UnsupportedFormat { path: PathBuf, hint: String },

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// `status` is the HTTP status of the failed request, when there was one.
    #[error("Failed to acquire model {repo} after {attempts} attempt(s): {cause}")]
    ModelAcquisition { repo: String, attempts: u32, cause: String, status: Option<u16> },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cancelled: {0}")]
    Cancelled(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn inference(e: impl std::fmt::Display) -> Self {
        Error::Inference(e.to_string())
    }

    /// Whether a failed acquisition attempt is worth repeating.
    ///
    /// Client errors (4xx other than 408 and 429) are permanent; network
    /// failures without a status, 5xx and rate limits are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ModelAcquisition { status: Some(s), .. } => !is_permanent_status(*s),
            Error::ModelAcquisition { status: None, .. } => true,
            Error::Io(_) | Error::Timeout { .. } => true,
            _ => false,
        }
    }
}

fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

pub type Result<T> = std::result::Result<T, Error>;
