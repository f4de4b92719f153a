//! Application message processing

use burrow_marmot_storage::MarmotStorageProvider;
use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::messages::types as message_types;
use nostr::{Event, EventId, JsonUtil, Timestamp, UnsignedEvent};
use openmls::prelude::ApplicationMessage;

use crate::Marmot;

use super::Result;

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Processes a decrypted application message from a group member
    ///
    /// Deserializes the plaintext as a Nostr rumor, binds the rumor author
    /// to the authenticated MLS sender, persists tracking records, and
    /// updates the group's last message metadata. Rumors whose kind is in
    /// `config.ephemeral_kinds` are returned to the caller without being
    /// persisted.
    pub(super) fn process_application_message(
        &self,
        mut group: group_types::Group,
        mls_epoch: u64,
        event: &Event,
        application_message: ApplicationMessage,
        sender_credential: openmls::credentials::Credential,
    ) -> Result<message_types::Message> {
        let bytes = application_message.into_bytes();
        let mut rumor: UnsignedEvent = UnsignedEvent::from_json(bytes)?;

        self.verify_rumor_author(&rumor.pubkey, sender_credential)?;

        let rumor_id: EventId = rumor.id();

        let is_ephemeral = self.config.ephemeral_kinds.contains(&rumor.kind);

        let now = Timestamp::now();
        let message = message_types::Message {
            id: rumor_id,
            pubkey: rumor.pubkey,
            kind: rumor.kind,
            mls_group_id: group.mls_group_id.clone(),
            created_at: rumor.created_at,
            processed_at: now,
            content: rumor.content.clone(),
            tags: rumor.tags.clone(),
            event: rumor.clone(),
            wrapper_event_id: event.id,
            state: message_types::MessageState::Processed,
            epoch: Some(mls_epoch),
        };

        if !is_ephemeral {
            let processed_message = super::create_processed_message_record(
                event.id,
                Some(rumor_id),
                Some(mls_epoch),
                Some(group.mls_group_id.clone()),
                message_types::ProcessedMessageState::Processed,
                None,
            );

            self.save_message_record(message.clone())?;
            self.save_processed_message_record(processed_message)?;

            // Only bump last_message_* when this message sorts first in the
            // canonical display order
            if group.update_last_message_if_newer(&message) {
                self.save_group_record(group)?;
            }
        }

        tracing::debug!(
            target: "burrow_marmot::messages::process_message",
            "Processed application message"
        );
        Ok(message)
    }
}
