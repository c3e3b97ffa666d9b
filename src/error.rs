//! Crate-wide error types.
//!
//! Typed `thiserror` errors at module boundaries, `anyhow` at the edges
//! (binaries, job closures).

use thiserror::Error;

/// Errors surfaced by the watermark store, checkpoint store, and HTTP
/// adapter core.
#[derive(Debug, Error)]
pub enum IngestError {
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("circuit open for adapter {adapter}; retry after {retry_after_secs:.1}s")]
    CircuitOpen {
        adapter: String,
        retry_after_secs: f64,
    },

    #[error("http request failed: {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("xml parse error: {0}")]
    Xml(String),

    #[error("no document found at {0}")]
    NoDocumentFound(String),

    #[error("job {0} is not registered")]
    UnknownJob(String),

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
