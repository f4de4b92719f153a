//! Welcome storage.
//!
//! A `Welcome` is a parsed kind-444 invitation keyed by its rumor event
//! id; a `ProcessedWelcome` is the dedup record for the gift-wrap event
//! that carried it.

use nostr::EventId;
use thiserror::Error;

use crate::Pagination;

pub mod types;

use self::types::{ProcessedWelcome, Welcome};

/// Welcome storage failure.
#[derive(Debug, Error)]
pub enum WelcomeError {
    /// Caller passed something unusable.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),
}

/// Welcome persistence operations.
pub trait WelcomeStorage {
    /// Inserts or replaces a welcome.
    fn save_welcome(&self, welcome: Welcome) -> Result<(), WelcomeError>;

    /// Looks a welcome up by rumor event id.
    fn find_welcome_by_event_id(&self, event_id: &EventId)
    -> Result<Option<Welcome>, WelcomeError>;

    /// Welcomes still awaiting accept or decline, newest first by event
    /// id. Fails with [`WelcomeError::InvalidParameters`] on a zero or
    /// over-cap page limit.
    fn pending_welcomes(
        &self,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Welcome>, WelcomeError>;

    /// Inserts or replaces a processed-welcome record.
    fn save_processed_welcome(
        &self,
        processed_welcome: ProcessedWelcome,
    ) -> Result<(), WelcomeError>;

    /// Looks a processed-welcome record up by wrapper event id.
    fn find_processed_welcome_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<ProcessedWelcome>, WelcomeError>;
}
