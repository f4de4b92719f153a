//! Error recovery and failure persistence

use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::messages::types as message_types;
use burrow_marmot_storage::{GroupId, MarmotStorageProvider};
use nostr::{Event, EventId, Timestamp};

use crate::Marmot;
use crate::error::Error;

use super::{MessageProcessingResult, Result};

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Sanitizes an error into a safe-to-expose failure reason
    ///
    /// Maps internal errors to generic failure categories that don't leak
    /// implementation details or sensitive information.
    pub(super) fn sanitize_error_reason(error: &Error) -> &'static str {
        match error {
            Error::UnexpectedEvent { .. } => "invalid_event_type",
            Error::MissingGroupIdTag => "invalid_event_format",
            Error::InvalidGroupIdFormat(_) => "invalid_event_format",
            Error::MultipleGroupIdTags(_) => "invalid_event_format",
            Error::InvalidTimestamp(_) => "invalid_event_format",
            Error::GroupNotFound => "group_not_found",
            Error::CannotDecryptOwnMessage => "own_message",
            Error::AuthorMismatch => "authentication_failed",
            Error::CommitFromNonAdmin => "authorization_failed",
            _ => "processing_failed",
        }
    }

    /// Records a failed message processing attempt to prevent reprocessing
    ///
    /// Saves a failed processing record with a sanitized error reason.
    /// Falls back to any existing record's context for fields not provided.
    pub(super) fn record_failure(
        &self,
        event_id: EventId,
        error: &Error,
        mls_group_id: Option<&GroupId>,
        epoch: Option<u64>,
    ) -> Result<()> {
        let sanitized_reason = Self::sanitize_error_reason(error);

        tracing::warn!(
            target: "burrow_marmot::messages::record_failure",
            "Message processing failed for event {}: {}",
            event_id,
            sanitized_reason
        );

        let existing_record = match self.storage().find_processed_message_by_event_id(&event_id) {
            Ok(record) => record,
            Err(_e) => {
                tracing::warn!(
                    target: "burrow_marmot::messages::record_failure",
                    "Failed to fetch existing record for context preservation"
                );
                None
            }
        };

        // Preserve fields from an existing record when the caller has less
        // context than a previous attempt had
        let message_event_id = existing_record.as_ref().and_then(|r| r.message_event_id);
        let epoch = epoch.or_else(|| existing_record.as_ref().and_then(|r| r.epoch));
        let mls_group_id = mls_group_id
            .cloned()
            .or_else(|| existing_record.and_then(|r| r.mls_group_id));

        let processed_message = super::create_processed_message_record(
            event_id,
            message_event_id,
            epoch,
            mls_group_id,
            message_types::ProcessedMessageState::Failed,
            Some(sanitized_reason.to_string()),
        );

        self.save_processed_message_record(processed_message)?;

        Ok(())
    }

    /// Records a failure and returns an Unprocessable result
    pub(super) fn fail_unprocessable(
        &self,
        event_id: EventId,
        error: &Error,
        group: &group_types::Group,
    ) -> Result<MessageProcessingResult> {
        self.record_failure(
            event_id,
            error,
            Some(&group.mls_group_id),
            Some(group.epoch),
        )?;

        Ok(MessageProcessingResult::Unprocessable {
            mls_group_id: group.mls_group_id.clone(),
        })
    }

    /// Returns a Commit result for our own already-processed commit
    ///
    /// Syncs group metadata before returning so the stored group matches
    /// the MLS state the commit produced.
    pub(super) fn return_own_commit(
        &self,
        group: &group_types::Group,
    ) -> Result<MessageProcessingResult> {
        if let Err(_e) = self.sync_group_metadata_from_mls(&group.mls_group_id) {
            tracing::warn!(
                target: "burrow_marmot::messages::return_own_commit",
                "Failed to sync group metadata"
            );
            return Err(Error::Message("Failed to sync group metadata".to_string()));
        }

        Ok(MessageProcessingResult::Commit {
            mls_group_id: group.mls_group_id.clone(),
        })
    }

    /// Handles processing errors with specific error recovery logic
    ///
    /// Covers processing our own messages, epoch mismatches in both
    /// directions, and authorization failures.
    pub(super) fn handle_processing_error(
        &self,
        error: Error,
        event: &Event,
        group: &group_types::Group,
    ) -> Result<MessageProcessingResult> {
        match error {
            Error::CannotDecryptOwnMessage => {
                tracing::debug!(target: "burrow_marmot::messages::process_message", "Cannot decrypt own message, checking for cached message");

                let mut processed_message = self
                    .storage()
                    .find_processed_message_by_event_id(&event.id)
                    .map_err(|_e| {
                        Error::Message("Storage error while finding processed message".to_string())
                    })?
                    .ok_or(Error::Message("Processed message not found".to_string()))?;

                match processed_message.state {
                    message_types::ProcessedMessageState::Created => {
                        // Our own freshly created message came back from a
                        // relay: flip it to Processed
                        let message_event_id: EventId = processed_message
                            .message_event_id
                            .ok_or(Error::Message("Message event ID not found".to_string()))?;

                        let mut message = self
                            .get_message(&group.mls_group_id, &message_event_id)?
                            .ok_or(Error::Message("Message not found".to_string()))?;

                        message.state = message_types::MessageState::Processed;
                        self.save_message_record(message)?;

                        processed_message.state = message_types::ProcessedMessageState::Processed;
                        self.save_processed_message_record(processed_message)?;

                        tracing::debug!(target: "burrow_marmot::messages::process_message", "Updated state of own cached message");
                        let message = self
                            .get_message(&group.mls_group_id, &message_event_id)?
                            .ok_or(Error::Message("Message not found".to_string()))?;
                        Ok(MessageProcessingResult::ApplicationMessage(message))
                    }
                    message_types::ProcessedMessageState::Retryable => {
                        // Our own message marked for retry: the cached
                        // content lets us recover without decrypting
                        if let Some(message_event_id) = processed_message.message_event_id
                            && let Some(mut message) =
                                self.get_message(&group.mls_group_id, &message_event_id)?
                        {
                            message.state = message_types::MessageState::Processed;
                            self.save_message_record(message)?;

                            processed_message.state =
                                message_types::ProcessedMessageState::Processed;
                            processed_message.failure_reason = None;
                            processed_message.processed_at = Timestamp::now();
                            self.save_processed_message_record(processed_message)?;

                            let message = self
                                .get_message(&group.mls_group_id, &message_event_id)?
                                .ok_or(Error::Message("Message not found".to_string()))?;
                            return Ok(MessageProcessingResult::ApplicationMessage(message));
                        }

                        tracing::warn!(
                            target: "burrow_marmot::messages::process_message",
                            "Retryable own message has no cached content"
                        );
                        Ok(MessageProcessingResult::Unprocessable {
                            mls_group_id: group.mls_group_id.clone(),
                        })
                    }
                    message_types::ProcessedMessageState::ProcessedCommit => {
                        tracing::debug!(target: "burrow_marmot::messages::process_message", "Message already processed as a commit");
                        self.return_own_commit(group)
                    }
                    message_types::ProcessedMessageState::Processed
                    | message_types::ProcessedMessageState::Failed => {
                        tracing::debug!(target: "burrow_marmot::messages::process_message", "Message cannot be processed (already processed or failed)");
                        Ok(MessageProcessingResult::Unprocessable {
                            mls_group_id: group.mls_group_id.clone(),
                        })
                    }
                }
            }
            Error::WrongEpoch(msg_epoch) => {
                if msg_epoch > group.epoch {
                    // A message from an epoch we have not reached yet. The
                    // missing commits may still arrive, so keep the wrapper
                    // retryable within the forward window.
                    let distance = msg_epoch - group.epoch;
                    if distance <= u64::from(self.config.maximum_forward_distance) {
                        tracing::info!(
                            target: "burrow_marmot::messages::process_message",
                            "Message from future epoch {} (group at {}), marking retryable",
                            msg_epoch,
                            group.epoch
                        );

                        let processed_message = super::create_processed_message_record(
                            event.id,
                            None,
                            Some(msg_epoch),
                            Some(group.mls_group_id.clone()),
                            message_types::ProcessedMessageState::Retryable,
                            None,
                        );
                        self.save_processed_message_record(processed_message)?;

                        return Ok(MessageProcessingResult::Retryable {
                            mls_group_id: group.mls_group_id.clone(),
                        });
                    }

                    let err = Error::ForwardFromFuture {
                        message_epoch: msg_epoch,
                        group_epoch: group.epoch,
                    };
                    self.record_failure(
                        event.id,
                        &err,
                        Some(&group.mls_group_id),
                        Some(msg_epoch),
                    )?;
                    return Err(err);
                }

                // Epoch behind the group: possibly our own already-merged
                // commit coming back from a relay
                if let Ok(Some(processed_message)) =
                    self.storage().find_processed_message_by_event_id(&event.id)
                    && processed_message.state
                        == message_types::ProcessedMessageState::ProcessedCommit
                {
                    tracing::debug!(target: "burrow_marmot::messages::process_message", "Found own commit with epoch mismatch, syncing group metadata");
                    return self.return_own_commit(group);
                }

                tracing::error!(target: "burrow_marmot::messages::process_message", "Epoch mismatch for message that is not our own commit");
                self.fail_unprocessable(event.id, &error, group)
            }
            Error::WrongGroupId => {
                tracing::error!(target: "burrow_marmot::messages::process_message", "Group ID mismatch");
                self.fail_unprocessable(event.id, &error, group)
            }
            Error::UseAfterEviction => {
                tracing::error!(target: "burrow_marmot::messages::process_message", "Attempted to use group after eviction");
                self.fail_unprocessable(event.id, &error, group)
            }
            Error::CommitFromNonAdmin => {
                // Authorization errors propagate as errors rather than being
                // silently swallowed
                if let Err(_save_err) = self.record_failure(
                    event.id,
                    &error,
                    Some(&group.mls_group_id),
                    Some(group.epoch),
                ) {
                    tracing::warn!(
                        target: "burrow_marmot::messages::handle_processing_error",
                        "Failed to persist failure record for commit from non-admin"
                    );
                }
                Err(error)
            }
            _ => {
                tracing::error!(target: "burrow_marmot::messages::process_message", "Unexpected error processing message");
                self.fail_unprocessable(event.id, &error, group)
            }
        }
    }

    /// Extracts the MLS group ID from an event's h tag
    ///
    /// Returns `None` when the h tag is missing or malformed, or when the
    /// group is not in storage.
    pub(super) fn extract_mls_group_id_from_event(&self, event: &Event) -> Option<GroupId> {
        let nostr_group_id = self.extract_nostr_group_id(event).ok()?;

        self.storage()
            .find_group_by_nostr_group_id(&nostr_group_id)
            .ok()
            .flatten()
            .map(|group| group.mls_group_id)
    }
}
