//! Message storage.
//!
//! Two record families: `Message` is a decrypted group message (the rumor
//! plus bookkeeping), `ProcessedMessage` is the per-wrapper dedup and
//! retry record keyed by the outer kind-445 event id.

use nostr::EventId;
use thiserror::Error;

use crate::GroupId;

pub mod types;

use self::types::{Message, ProcessedMessage};

/// Message storage failure.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Caller passed something unusable.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),
    /// Message does not exist or is not in the expected state.
    #[error("message not found")]
    NotFound,
}

/// Message persistence operations.
pub trait MessageStorage {
    /// Inserts or replaces a message.
    fn save_message(&self, message: Message) -> Result<(), MessageError>;

    /// Looks a message up by rumor event id within one group. The group id
    /// is part of the key so messages of different groups cannot clobber
    /// each other.
    fn find_message_by_event_id(
        &self,
        mls_group_id: &GroupId,
        event_id: &EventId,
    ) -> Result<Option<Message>, MessageError>;

    /// Inserts or replaces a processed-message record.
    fn save_processed_message(
        &self,
        processed_message: ProcessedMessage,
    ) -> Result<(), MessageError>;

    /// Looks a processed-message record up by wrapper event id.
    fn find_processed_message_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<ProcessedMessage>, MessageError>;

    /// Wrapper event ids of records in `Retryable` state for one group,
    /// the queue `retry_pending_messages` works through after commits
    /// advance the epoch.
    fn find_retryable_messages(&self, group_id: &GroupId) -> Result<Vec<EventId>, MessageError>;
}
