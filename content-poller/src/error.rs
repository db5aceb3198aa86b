//! Error taxonomy for the ingestion pipeline.
//!
//! `Auth` and `Fetch` abort a whole cycle before anything is written.
//! `Duplicate` and `Store` are raised per item and never stop a cycle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Credential exchange or login failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport or HTTP failure while retrieving content
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Identity already present in the store at insert time
    #[error("duplicate content identity: {0}")]
    Duplicate(String),

    /// Storage backend failure other than a uniqueness violation
    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn auth(message: impl Into<String>) -> Self {
        IngestError::Auth(message.into())
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        IngestError::Fetch(message.into())
    }

    /// Whether the error ends the current cycle with zero writes.
    pub fn aborts_cycle(&self) -> bool {
        matches!(self, IngestError::Auth(_) | IngestError::Fetch(_))
    }
}

impl From<diesel::result::Error> for IngestError {
    fn from(err: diesel::result::Error) -> Self {
        IngestError::Store(err.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for IngestError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        IngestError::Store(format!("connection pool: {}", err))
    }
}

/// A scraped block that was dropped because an expected field was missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseGap {
    /// Zero-based position of the block on the page
    pub block_index: usize,
    pub missing: &'static str,
}

impl std::fmt::Display for ParseGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block {} is missing its {}", self.block_index, self.missing)
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
