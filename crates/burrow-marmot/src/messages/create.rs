//! Message creation and encryption

use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::messages::types as message_types;
use burrow_marmot_storage::{GroupId, MarmotStorageProvider};
use nostr::{Event, EventId, JsonUtil, Tag, Timestamp, UnsignedEvent};
use openmls::prelude::MlsGroup;
use openmls_basic_credential::SignatureKeyPair;
use tls_codec::Serialize as TlsSerialize;

use crate::Marmot;
use crate::error::Error;

use super::Result;

/// Options for controlling message creation behavior.
#[derive(Debug, Clone, Default)]
pub struct CreateMessageOptions {
    /// When true, the message and processed-message records are not persisted
    /// to storage. The MLS ratchet still advances but the message tables stay
    /// clean. Useful for ephemeral signals such as typing indicators that
    /// should not pollute chat history.
    pub skip_storage: bool,

    /// Extra tags to include on the outer kind 445 wrapper event.
    ///
    /// These tags are added before the wrapper is signed with an ephemeral
    /// key, so the sender's real identity is never leaked. A common use is a
    /// NIP-40 `expiration` tag so relays can auto-purge the event.
    pub extra_wrapper_tags: Vec<Tag>,
}

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// MLS-encrypts an unsigned Nostr event as an application message.
    ///
    /// The rumor gets an ID if it lacks one, is serialized to JSON, and is
    /// encrypted with the sender's current MLS keys.
    pub(crate) fn create_mls_message_payload(
        &self,
        group: &mut MlsGroup,
        rumor: &mut UnsignedEvent,
    ) -> Result<Vec<u8>> {
        let signer: SignatureKeyPair = self.load_mls_signer(group)?;

        rumor.ensure_id();

        let json: String = rumor.as_json();

        let message_out = group.create_message(&self.provider, &signer, json.as_bytes())?;

        let serialized_message = message_out.tls_serialize_detached()?;

        Ok(serialized_message)
    }

    /// Creates a complete encrypted kind 445 event for an MLS group message
    ///
    /// The rumor is MLS-encrypted, the ciphertext is NIP-44 encrypted with a
    /// key derived from the group's exporter secret, and the wrapper event is
    /// signed with an ephemeral key. The message is tracked in storage so the
    /// sender sees it in chat history without processing its own wrapper.
    pub fn create_message(&self, mls_group_id: &GroupId, rumor: UnsignedEvent) -> Result<Event> {
        self.create_message_with_options(mls_group_id, rumor, CreateMessageOptions::default())
    }

    /// Creates an encrypted kind 445 event with caller-controlled options.
    ///
    /// See [`CreateMessageOptions`] for the available knobs.
    pub fn create_message_with_options(
        &self,
        mls_group_id: &GroupId,
        mut rumor: UnsignedEvent,
        options: CreateMessageOptions,
    ) -> Result<Event> {
        let mut mls_group = self
            .load_mls_group(mls_group_id)?
            .ok_or(Error::GroupNotFound)?;

        let mut group: group_types::Group = self
            .get_group(mls_group_id)
            .map_err(|_e| Error::Group("Storage error while getting group".to_string()))?
            .ok_or(Error::GroupNotFound)?;

        // A member that left or was removed must not keep sending
        if group.state != group_types::GroupState::Active {
            return Err(Error::UseAfterEviction);
        }

        let message: Vec<u8> = self.create_mls_message_payload(&mut mls_group, &mut rumor)?;

        let rumor_id: EventId = rumor.id();

        let event =
            self.build_message_event_with_tags(mls_group_id, message, &options.extra_wrapper_tags)?;

        if !options.skip_storage {
            let now = Timestamp::now();
            let message: message_types::Message = message_types::Message {
                id: rumor_id,
                pubkey: rumor.pubkey,
                kind: rumor.kind,
                mls_group_id: mls_group_id.clone(),
                created_at: rumor.created_at,
                processed_at: now,
                content: rumor.content.clone(),
                tags: rumor.tags.clone(),
                event: rumor.clone(),
                wrapper_event_id: event.id,
                state: message_types::MessageState::Created,
                epoch: Some(mls_group.epoch().as_u64()),
            };

            let processed_message = super::create_processed_message_record(
                event.id,
                Some(rumor_id),
                Some(mls_group.epoch().as_u64()),
                Some(mls_group_id.clone()),
                message_types::ProcessedMessageState::Created,
                None,
            );

            self.save_message_record(message.clone())?;
            self.save_processed_message_record(processed_message)?;

            group.update_last_message_if_newer(&message);
            self.save_group_record(group)?;
        }

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use burrow_marmot_storage::GroupId;
    use burrow_marmot_storage::groups::types as group_types;
    use burrow_marmot_storage::messages::types as message_types;
    use nostr::{Keys, Kind, TagKind};

    use super::CreateMessageOptions;
    use crate::error::Error;
    use crate::test_util::*;
    use crate::tests::create_test_marmot;

    #[test]
    fn test_create_message_success() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let mut rumor = create_test_rumor(&creator, "Hello, world!");
        let rumor_id = rumor.id();

        let event = marmot
            .create_message(&group_id, rumor)
            .expect("Failed to create message");
        assert_eq!(event.kind, Kind::MlsGroupMessage);

        let stored_message = marmot
            .get_message(&group_id, &rumor_id)
            .expect("Failed to get message")
            .expect("Message should exist");

        assert_eq!(stored_message.id, rumor_id);
        assert_eq!(stored_message.content, "Hello, world!");
        assert_eq!(stored_message.state, message_types::MessageState::Created);
        assert_eq!(stored_message.wrapper_event_id, event.id);
    }

    #[test]
    fn test_create_message_group_not_found() {
        let marmot = create_test_marmot();
        let creator = Keys::generate();
        let rumor = create_test_rumor(&creator, "Hello, world!");
        let non_existent_group_id = GroupId::from_slice(&[1, 2, 3, 4]);

        let result = marmot.create_message(&non_existent_group_id, rumor);
        assert!(matches!(result.unwrap_err(), Error::GroupNotFound));
    }

    #[test]
    fn test_create_message_rejected_for_inactive_group() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let mut group = marmot.get_group(&group_id).unwrap().unwrap();
        group.state = group_types::GroupState::Inactive;
        marmot.save_group_record(group).unwrap();

        let rumor = create_test_rumor(&creator, "too late");
        let result = marmot.create_message(&group_id, rumor);
        assert!(matches!(result.unwrap_err(), Error::UseAfterEviction));
    }

    #[test]
    fn test_create_message_updates_group_metadata() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let initial_group = marmot
            .get_group(&group_id)
            .expect("Failed to get group")
            .expect("Group should exist");
        assert!(initial_group.last_message_at.is_none());
        assert!(initial_group.last_message_id.is_none());

        let mut rumor = create_test_rumor(&creator, "Hello, world!");
        let rumor_id = rumor.id();
        let rumor_timestamp = rumor.created_at;

        marmot
            .create_message(&group_id, rumor)
            .expect("Failed to create message");

        let updated_group = marmot
            .get_group(&group_id)
            .expect("Failed to get group")
            .expect("Group should exist");

        assert_eq!(updated_group.last_message_at, Some(rumor_timestamp));
        assert_eq!(updated_group.last_message_id, Some(rumor_id));
    }

    #[test]
    fn test_message_content_preservation() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let test_cases = vec![
            "Simple text message",
            "Message with\nmultiple\nlines",
            "Message with special chars: !@#$%^&*()",
        ];

        for content in test_cases {
            let mut rumor = create_test_rumor(&creator, content);
            let rumor_id = rumor.id();

            marmot
                .create_message(&group_id, rumor)
                .expect("Failed to create message");

            let stored_message = marmot
                .get_message(&group_id, &rumor_id)
                .expect("Failed to get message")
                .expect("Message should exist");

            assert_eq!(stored_message.content, content);
            assert_eq!(stored_message.pubkey, creator.public_key());
        }
    }

    #[test]
    fn test_wrapper_event_structure() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let rumor = create_test_rumor(&creator, "structure check");
        let event = marmot
            .create_message(&group_id, rumor)
            .expect("Failed to create message");

        // Wrapper is signed by an ephemeral key, not the sender
        assert_eq!(event.kind, Kind::MlsGroupMessage);
        assert_ne!(event.pubkey, creator.public_key());

        // Exactly one h tag carrying the hex nostr group id
        let group = marmot.get_group(&group_id).unwrap().unwrap();
        let h_tags: Vec<_> = event
            .tags
            .iter()
            .filter(|t| t.kind() == TagKind::h())
            .collect();
        assert_eq!(h_tags.len(), 1);
        assert_eq!(
            h_tags[0].content().unwrap(),
            hex::encode(group.nostr_group_id)
        );
    }

    #[test]
    fn test_skip_storage_option() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let mut rumor = create_test_rumor(&creator, "typing...");
        let rumor_id = rumor.id();

        let options = CreateMessageOptions {
            skip_storage: true,
            ..Default::default()
        };
        marmot
            .create_message_with_options(&group_id, rumor, options)
            .expect("Failed to create message");

        let stored = marmot.get_message(&group_id, &rumor_id).unwrap();
        assert!(stored.is_none(), "Ephemeral message should not be stored");
    }

    #[test]
    fn test_extra_wrapper_tags() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();
        let group_id = create_test_group(&marmot, &creator, &members, &admins);

        let rumor = create_test_rumor(&creator, "expires soon");
        let options = CreateMessageOptions {
            extra_wrapper_tags: vec![nostr::Tag::expiration(nostr::Timestamp::from(
                4_000_000_000u64,
            ))],
            ..Default::default()
        };
        let event = marmot
            .create_message_with_options(&group_id, rumor, options)
            .expect("Failed to create message");

        assert!(
            event
                .tags
                .iter()
                .any(|t| t.kind() == TagKind::Expiration),
            "Wrapper should carry the expiration tag"
        );
    }
}
