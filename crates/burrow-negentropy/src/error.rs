//! Negentropy error type.

/// Errors returned by the negentropy layer.
///
/// Malformed input never corrupts a session; after an error the session
/// stays usable and produces no-op builds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed hex, message layout, truncated varint or bad bound.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The datasource failed while iterating.
    #[error("datasource error: {0}")]
    Datasource(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
