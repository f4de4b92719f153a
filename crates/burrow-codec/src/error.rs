//! Codec error type.

/// Errors returned by the codec layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// JSON parse or serialize failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Hex decode failure.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// A hex field had the wrong length.
    #[error("invalid {field} length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Field name.
        field: &'static str,
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        got: usize,
    },
    /// An ingest line was neither an event object nor an EVENT envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    /// A magnet URI was missing required parts or malformed.
    #[error("invalid magnet uri: {0}")]
    InvalidMagnet(String),
}
