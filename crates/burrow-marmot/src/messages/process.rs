//! Main message processing orchestration

use burrow_marmot_storage::MarmotStorageProvider;
use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::messages::types as message_types;
use nostr::Event;
use openmls::group::{ProcessMessageError, ValidationError};
use openmls::prelude::{
    ContentType, MlsGroup, MlsMessageIn, ProcessedMessage, ProcessedMessageContent,
};
use tls_codec::Deserialize as TlsDeserialize;

use crate::Marmot;
use crate::error::Error;

use super::{MessageProcessingResult, Result};

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Processes an incoming MLS message at the protocol level
    ///
    /// Deserializes the MLS message, checks it targets this group, and runs
    /// it through OpenMLS. Epoch and own-message validation failures are
    /// mapped to dedicated errors so the caller can recover.
    pub(super) fn process_mls_message(
        &self,
        group: &mut MlsGroup,
        message_bytes: &[u8],
    ) -> Result<ProcessedMessage> {
        let mls_message = MlsMessageIn::tls_deserialize_exact(message_bytes)?;
        let protocol_message = mls_message.try_into_protocol_message()?;

        if protocol_message.group_id() != group.group_id() {
            return Err(Error::ProtocolGroupIdMismatch);
        }

        // Capture epoch in case we need it for error reporting
        let msg_epoch = protocol_message.epoch().as_u64();
        let content_type = protocol_message.content_type();

        tracing::debug!(
            target: "burrow_marmot::messages::process_mls_message",
            "Received MLS message (epoch={}, content_type={:?})",
            msg_epoch,
            content_type
        );

        let processed_message = match group.process_message(&self.provider, protocol_message) {
            Ok(processed_message) => processed_message,
            Err(ProcessMessageError::ValidationError(ValidationError::WrongEpoch)) => {
                return Err(Error::WrongEpoch(msg_epoch));
            }
            Err(ProcessMessageError::ValidationError(ValidationError::CannotDecryptOwnMessage)) => {
                // A commit of ours that we still hold pending locally is
                // merged rather than decrypted
                if content_type == ContentType::Commit && group.pending_commit().is_some() {
                    return Err(Error::OwnCommitPending);
                }
                return Err(Error::CannotDecryptOwnMessage);
            }
            Err(e) => {
                tracing::error!(target: "burrow_marmot::messages::process_mls_message", "Error processing MLS message");
                return Err(e.into());
            }
        };

        tracing::debug!(
            target: "burrow_marmot::messages::process_mls_message",
            "Processed MLS message (epoch={}, content_type={:?})",
            msg_epoch,
            content_type
        );

        Ok(processed_message)
    }

    /// Routes the decrypted MLS message by its content type
    pub(super) fn dispatch_by_content_type(
        &self,
        group: group_types::Group,
        mls_group: &mut MlsGroup,
        message_bytes: &[u8],
        event: &Event,
    ) -> Result<MessageProcessingResult> {
        match self.process_mls_message(mls_group, message_bytes) {
            Ok(processed_mls_message) => {
                // Clone sender info for validation before consuming
                let sender_credential = processed_mls_message.credential().clone();
                let message_sender = processed_mls_message.sender().clone();

                match processed_mls_message.into_content() {
                    ProcessedMessageContent::ApplicationMessage(application_message) => {
                        Ok(MessageProcessingResult::ApplicationMessage(
                            self.process_application_message(
                                group,
                                mls_group.epoch().as_u64(),
                                event,
                                application_message,
                                sender_credential,
                            )?,
                        ))
                    }
                    ProcessedMessageContent::ProposalMessage(_staged_proposal) => {
                        // OpenMLS stored the proposal; a later commit from an
                        // admin picks it up
                        let processed_message = super::create_processed_message_record(
                            event.id,
                            None,
                            Some(mls_group.epoch().as_u64()),
                            Some(group.mls_group_id.clone()),
                            message_types::ProcessedMessageState::Processed,
                            None,
                        );
                        self.save_processed_message_record(processed_message)?;

                        Ok(MessageProcessingResult::PendingProposal {
                            mls_group_id: group.mls_group_id.clone(),
                        })
                    }
                    ProcessedMessageContent::StagedCommitMessage(staged_commit) => {
                        self.process_commit(mls_group, event, *staged_commit, &message_sender)?;
                        Ok(MessageProcessingResult::Commit {
                            mls_group_id: group.mls_group_id.clone(),
                        })
                    }
                    ProcessedMessageContent::ExternalJoinProposalMessage(
                        _external_join_proposal,
                    ) => {
                        let processed_message = super::create_processed_message_record(
                            event.id,
                            None,
                            Some(mls_group.epoch().as_u64()),
                            Some(group.mls_group_id.clone()),
                            message_types::ProcessedMessageState::Processed,
                            None,
                        );

                        self.save_processed_message_record(processed_message)?;

                        Ok(MessageProcessingResult::ExternalJoinProposal {
                            mls_group_id: group.mls_group_id.clone(),
                        })
                    }
                }
            }
            Err(Error::OwnCommitPending) => {
                // Our own commit came back from a relay while still pending
                // locally. Merge it instead of decrypting.
                tracing::debug!(
                    target: "burrow_marmot::messages::dispatch_by_content_type",
                    "Merging pending own commit"
                );

                mls_group
                    .merge_pending_commit(&self.provider)
                    .map_err(|_e| Error::Message("Failed to merge pending commit".to_string()))?;

                // The commit may have removed us
                if mls_group.own_leaf().is_none() {
                    return match self.handle_local_member_eviction(&group.mls_group_id, event) {
                        Ok(_) => Ok(MessageProcessingResult::Commit {
                            mls_group_id: group.mls_group_id.clone(),
                        }),
                        Err(e) => Err(e),
                    };
                }

                self.exporter_secret(&group.mls_group_id)?;
                self.sync_group_metadata_from_mls(&group.mls_group_id)?;
                self.prune_exporter_secrets(&group.mls_group_id, mls_group.epoch().as_u64())?;

                let processed_message = super::create_processed_message_record(
                    event.id,
                    None,
                    Some(mls_group.epoch().as_u64()),
                    Some(group.mls_group_id.clone()),
                    message_types::ProcessedMessageState::ProcessedCommit,
                    None,
                );

                self.save_processed_message_record(processed_message)?;

                Ok(MessageProcessingResult::Commit {
                    mls_group_id: group.mls_group_id.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Processes an incoming kind 445 event containing an MLS message
    ///
    /// This is the main entry point for received messages:
    /// 0. Checks if the wrapper was already processed (deduplication)
    /// 1. Validates the event and extracts the Nostr group ID
    /// 2. Loads the group and decrypts the wrapper content
    /// 3. Dispatches the MLS message by content type
    /// 4. Applies recovery logic on processing errors
    ///
    /// Validation and decryption failures are persisted so the same invalid
    /// wrapper is never reprocessed from scratch.
    pub fn process_message(&self, event: &Event) -> Result<MessageProcessingResult> {
        // Step 0: deduplication
        if let Some(processed) = self
            .storage()
            .find_processed_message_by_event_id(&event.id)
            .map_err(|_e| {
                Error::Message("Storage error while checking for processed message".to_string())
            })?
        {
            tracing::debug!(
                target: "burrow_marmot::messages::process_message",
                "Message already processed with state: {:?}",
                processed.state
            );

            // Only Failed blocks reprocessing. Created, Processed and
            // ProcessedCommit continue so own messages coming back from a
            // relay flow normally, and Retryable continues so future-epoch
            // messages can be retried once the group catches up.
            if processed.state == message_types::ProcessedMessageState::Failed {
                return match self.extract_mls_group_id_from_event(event) {
                    Some(mls_group_id) => {
                        Ok(MessageProcessingResult::Unprocessable { mls_group_id })
                    }
                    None => Ok(MessageProcessingResult::PreviouslyFailed),
                };
            }

            if processed.state == message_types::ProcessedMessageState::Retryable {
                tracing::info!(
                    target: "burrow_marmot::messages::process_message",
                    "Retrying previously deferred message (event_id: {})",
                    event.id
                );
            }
        }

        // Step 1: validate event and extract group ID
        let nostr_group_id = match self
            .validate_event(event)
            .and_then(|()| self.extract_nostr_group_id(event))
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(_save_err) = self.record_failure(event.id, &e, None, None) {
                    tracing::warn!(
                        target: "burrow_marmot::messages::process_message",
                        "Failed to persist failure record; error details redacted"
                    );
                }
                return Err(e);
            }
        };

        // Step 2: load group and decrypt
        let (group, mut mls_group, message_bytes) =
            match self.decrypt_message(nostr_group_id, event) {
                Ok(result) => result,
                Err(e) => {
                    // Epoch is unknown for decryption failures
                    let mls_group_id = self
                        .storage()
                        .find_group_by_nostr_group_id(&nostr_group_id)
                        .ok()
                        .flatten()
                        .map(|g| g.mls_group_id);
                    if let Err(_save_err) =
                        self.record_failure(event.id, &e, mls_group_id.as_ref(), None)
                    {
                        tracing::warn!(
                            target: "burrow_marmot::messages::process_message",
                            "Failed to persist failure record; error details redacted"
                        );
                    }
                    return Err(e);
                }
            };

        // Step 3: dispatch, with Step 4 recovery on error
        match self.dispatch_by_content_type(group.clone(), &mut mls_group, &message_bytes, event) {
            Ok(result) => Ok(result),
            Err(error) => self.handle_processing_error(error, event, &group),
        }
    }
}
