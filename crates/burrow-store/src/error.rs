//! Store error type.

/// Errors returned by the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown backend name passed to `open`.
    #[error("unknown backend: {0}")]
    BackendNotFound(String),
    /// Database environment could not be opened.
    #[error("db open failed: {0}")]
    DbOpen(String),
    /// Read transaction could not be begun or ended.
    #[error("db txn failed: {0}")]
    DbTxn(String),
    /// Event JSON was rejected on the write path.
    #[error("ingest failed: {0}")]
    Ingest(String),
    /// Reader-path failure.
    #[error("query failed: {0}")]
    Query(String),
    /// Full-text search failure.
    #[error("text search failed: {0}")]
    TextSearch(String),
    /// Single-entity lookup found nothing.
    #[error("not found")]
    NotFound,
    /// An allocation was refused.
    #[error("out of memory")]
    OutOfMemory,
}
