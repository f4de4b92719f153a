//! Group message handling (MIP-03)
//!
//! Messages travel as kind 445 Nostr events. The inner rumor is encrypted
//! with the MLS group keys, then the resulting MLS ciphertext is NIP-44
//! encrypted with a key derived from the group's exporter secret and signed
//! by an ephemeral Nostr key. This module covers creating outgoing messages,
//! processing incoming wrappers, and tracking per-wrapper processing state.

mod application;
mod commit;
mod create;
mod decryption;
mod error_handling;
mod process;
mod validation;

pub use create::CreateMessageOptions;

use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::messages::types as message_types;
use burrow_marmot_storage::{GroupId, MarmotStorageProvider, Pagination};
use nostr::{EventId, Timestamp};

use crate::Marmot;
use crate::error::Error;

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Builds a ProcessedMessage record stamped with the current time.
pub(crate) fn create_processed_message_record(
    wrapper_event_id: EventId,
    message_event_id: Option<EventId>,
    epoch: Option<u64>,
    mls_group_id: Option<GroupId>,
    state: message_types::ProcessedMessageState,
    failure_reason: Option<String>,
) -> message_types::ProcessedMessage {
    message_types::ProcessedMessage {
        wrapper_event_id,
        message_event_id,
        processed_at: Timestamp::now(),
        epoch,
        mls_group_id,
        state,
        failure_reason,
    }
}

/// The possible outcomes of processing a wrapper event
pub enum MessageProcessingResult {
    /// An application message (usually a chat message)
    ApplicationMessage(message_types::Message),
    /// Commit message that was merged into the group state
    Commit {
        /// The MLS group ID this commit applies to
        mls_group_id: GroupId,
    },
    /// Proposal message stored by the MLS layer but not committed
    PendingProposal {
        /// The MLS group ID this pending proposal belongs to
        mls_group_id: GroupId,
    },
    /// External join proposal
    ExternalJoinProposal {
        /// The MLS group ID this proposal belongs to
        mls_group_id: GroupId,
    },
    /// Message from a future epoch, recorded for retry once the group
    /// catches up
    Retryable {
        /// The MLS group ID of the message
        mls_group_id: GroupId,
    },
    /// Unprocessable message
    Unprocessable {
        /// The MLS group ID of the message that could not be processed
        mls_group_id: GroupId,
    },
    /// Message was previously marked as failed and cannot be reprocessed
    ///
    /// Unlike `Unprocessable`, this carries no MLS group ID because the
    /// group ID may not be extractable from malformed messages.
    PreviouslyFailed,
}

impl std::fmt::Debug for MessageProcessingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApplicationMessage(msg) => f
                .debug_struct("ApplicationMessage")
                .field("id", &msg.id)
                .field("pubkey", &msg.pubkey)
                .field("kind", &msg.kind)
                .field("mls_group_id", &"[REDACTED]")
                .field("created_at", &msg.created_at)
                .field("state", &msg.state)
                .finish(),
            Self::Commit { .. } => f
                .debug_struct("Commit")
                .field("mls_group_id", &"[REDACTED]")
                .finish(),
            Self::PendingProposal { .. } => f
                .debug_struct("PendingProposal")
                .field("mls_group_id", &"[REDACTED]")
                .finish(),
            Self::ExternalJoinProposal { .. } => f
                .debug_struct("ExternalJoinProposal")
                .field("mls_group_id", &"[REDACTED]")
                .finish(),
            Self::Retryable { .. } => f
                .debug_struct("Retryable")
                .field("mls_group_id", &"[REDACTED]")
                .finish(),
            Self::Unprocessable { .. } => f
                .debug_struct("Unprocessable")
                .field("mls_group_id", &"[REDACTED]")
                .finish(),
            Self::PreviouslyFailed => f.debug_struct("PreviouslyFailed").finish(),
        }
    }
}

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Retrieves a message by its Nostr event ID within a specific group
    ///
    /// Requiring both the event ID and group ID prevents messages from
    /// different groups from overwriting each other.
    pub fn get_message(
        &self,
        mls_group_id: &GroupId,
        event_id: &EventId,
    ) -> Result<Option<message_types::Message>> {
        self.storage()
            .find_message_by_event_id(mls_group_id, event_id)
            .map_err(|_e| Error::Message("Storage error while finding message".to_string()))
    }

    /// Retrieves messages for a group with optional pagination
    ///
    /// Messages are ordered newest first. With no pagination the default
    /// page size applies.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Get messages with default pagination
    /// let messages = marmot.get_messages(&group_id, None)?;
    ///
    /// // Get first 100 messages
    /// use burrow_marmot_storage::Pagination;
    /// let messages = marmot.get_messages(&group_id, Some(Pagination::new(Some(100), Some(0))))?;
    /// ```
    pub fn get_messages(
        &self,
        mls_group_id: &GroupId,
        pagination: Option<Pagination>,
    ) -> Result<Vec<message_types::Message>> {
        self.storage()
            .messages(mls_group_id, pagination)
            .map_err(|_e| Error::Message("Storage error while getting messages".to_string()))
    }

    /// Returns the most recent message in a group
    pub fn get_last_message(
        &self,
        mls_group_id: &GroupId,
    ) -> Result<Option<message_types::Message>> {
        self.storage()
            .last_message(mls_group_id)
            .map_err(|_e| Error::Message("Storage error while getting last message".to_string()))
    }

    /// Returns wrapper event IDs of messages recorded as retryable for a
    /// group, oldest first
    ///
    /// Clients should re-fetch these wrappers and run them through
    /// [`process_message`](Self::process_message) again after the group has
    /// advanced past the epoch the messages were sent in.
    pub fn pending_retries(&self, mls_group_id: &GroupId) -> Result<Vec<EventId>> {
        self.storage()
            .find_retryable_messages(mls_group_id)
            .map_err(|_e| {
                Error::Message("Storage error while finding retryable messages".to_string())
            })
    }

    // =========================================================================
    // Storage Save Helpers
    // =========================================================================

    /// Saves a message record to storage with standardized error handling
    pub(crate) fn save_message_record(&self, message: message_types::Message) -> Result<()> {
        self.storage()
            .save_message(message)
            .map_err(|_e| Error::Message("Storage error while saving message".to_string()))
    }

    /// Saves a processed message record to storage with standardized error handling
    pub(crate) fn save_processed_message_record(
        &self,
        processed_message: message_types::ProcessedMessage,
    ) -> Result<()> {
        self.storage()
            .save_processed_message(processed_message)
            .map_err(|_e| {
                Error::Message("Storage error while saving processed message".to_string())
            })
    }

    /// Saves a group record to storage with standardized error handling
    pub(crate) fn save_group_record(&self, group: group_types::Group) -> Result<()> {
        self.storage()
            .save_group(group)
            .map_err(|_e| Error::Group("Storage error while saving group".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use burrow_marmot_storage::Pagination;
    use nostr::EventId;

    use crate::test_util::*;
    use crate::tests::create_test_marmot;

    #[test]
    fn test_get_message_not_found() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);
        let non_existent_event_id = EventId::all_zeros();

        let result = marmot.get_message(&group_id, &non_existent_event_id);
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_get_messages_empty_group() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let messages = marmot
            .get_messages(&group_id, None)
            .expect("Failed to get messages");
        assert!(messages.is_empty());
    }

    #[test]
    fn test_get_messages_with_pagination() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        for i in 0..15 {
            let rumor = create_test_rumor(&creator, &format!("Message {}", i));
            marmot
                .create_message(&group_id, rumor)
                .expect("Failed to create message");
        }

        let page1 = marmot
            .get_messages(&group_id, Some(Pagination::new(Some(10), Some(0))))
            .expect("Failed to get first page");
        assert_eq!(page1.len(), 10, "First page should have 10 messages");

        let page2 = marmot
            .get_messages(&group_id, Some(Pagination::new(Some(10), Some(10))))
            .expect("Failed to get second page");
        assert_eq!(page2.len(), 5, "Second page should have 5 messages");

        let page1_ids: HashSet<_> = page1.iter().map(|m| m.id).collect();
        let page2_ids: HashSet<_> = page2.iter().map(|m| m.id).collect();
        assert!(
            page1_ids.is_disjoint(&page2_ids),
            "Pages should not have duplicate messages"
        );

        let all_messages = marmot
            .get_messages(&group_id, None)
            .expect("Failed to get all messages");
        assert_eq!(all_messages.len(), 15);

        let page3 = marmot
            .get_messages(&group_id, Some(Pagination::new(Some(10), Some(20))))
            .expect("Failed to get third page");
        assert!(
            page3.is_empty(),
            "Should return empty when offset exceeds message count"
        );
    }

    #[test]
    fn test_get_messages_for_group() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let rumor1 = create_test_rumor(&creator, "First message");
        let rumor2 = create_test_rumor(&creator, "Second message");

        marmot
            .create_message(&group_id, rumor1)
            .expect("Failed to create first message");
        marmot
            .create_message(&group_id, rumor2)
            .expect("Failed to create second message");

        let messages = marmot
            .get_messages(&group_id, None)
            .expect("Failed to get messages");

        assert_eq!(messages.len(), 2);

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"First message"));
        assert!(contents.contains(&"Second message"));

        for message in &messages {
            assert_eq!(message.mls_group_id, group_id.clone());
        }
    }

    #[test]
    fn test_get_messages_nonexistent_group() {
        let marmot = create_test_marmot();
        let non_existent_group_id = crate::GroupId::from_slice(&[9, 9, 9, 9]);

        let result = marmot.get_messages(&non_existent_group_id, None);
        assert!(result.is_err(), "Should return error for non-existent group");
    }

    #[test]
    fn test_pending_retries_empty() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let retries = marmot
            .pending_retries(&group_id)
            .expect("Failed to get pending retries");
        assert!(retries.is_empty());
    }
}
