//! Retrieval error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("API request failed: {0}")]
    Request(String),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    ResponseShape(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("image encode failed: {0}")]
    ImageEncode(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<reqwest::Error> for RetrievalError {
    fn from(e: reqwest::Error) -> Self {
        RetrievalError::Request(e.to_string())
    }
}
