//! Welcome processing (MIP-02)

use nostr::{EventId, Kind, Tag, TagKind, Timestamp, UnsignedEvent};
use openmls::prelude::*;
use tls_codec::Deserialize as TlsDeserialize;

use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::welcomes::types as welcome_types;
use burrow_marmot_storage::{GroupId, MarmotStorageProvider, Pagination};

use crate::Marmot;
use crate::error::Error;
use crate::extension::NostrGroupDataExtension;
use crate::util::{ContentEncoding, decode_content};

/// Welcome preview
#[derive(Debug)]
pub struct WelcomePreview {
    /// Staged welcome
    pub staged_welcome: StagedWelcome,
    /// Nostr data
    pub nostr_group_data: NostrGroupDataExtension,
}

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Gets a welcome by event id
    pub fn get_welcome(&self, event_id: &EventId) -> Result<Option<welcome_types::Welcome>, Error> {
        let welcome = self
            .storage()
            .find_welcome_by_event_id(event_id)
            .map_err(|e| Error::Welcome(e.to_string()))?;

        Ok(welcome)
    }

    /// Gets pending welcomes with optional pagination
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Get pending welcomes with default pagination
    /// let welcomes = marmot.get_pending_welcomes(None)?;
    ///
    /// // Get first 10 pending welcomes
    /// use burrow_marmot_storage::Pagination;
    /// let welcomes = marmot.get_pending_welcomes(Some(Pagination::new(Some(10), Some(0))))?;
    /// ```
    pub fn get_pending_welcomes(
        &self,
        pagination: Option<Pagination>,
    ) -> Result<Vec<welcome_types::Welcome>, Error> {
        let welcomes = self
            .storage()
            .pending_welcomes(pagination)
            .map_err(|e| Error::Welcome(e.to_string()))?;
        Ok(welcomes)
    }

    /// Validates that a welcome event conforms to MIP-02 structure
    ///
    /// # Validation Rules
    ///
    /// - Event kind must be 444 (MlsWelcome)
    /// - Must have the 4 required tags: relays, e (key package reference),
    ///   client, and encoding. Tag order is not enforced.
    /// - Tag values must be non-empty
    /// - Encoding tag must be "base64"
    fn validate_welcome_event(event: &UnsignedEvent) -> Result<(), Error> {
        if event.kind != Kind::MlsWelcome {
            return Err(Error::InvalidWelcomeMessage);
        }

        let tags: Vec<&Tag> = event.tags.iter().collect();
        if tags.len() < 4 {
            return Err(Error::InvalidWelcomeMessage);
        }

        let mut has_relays = false;
        let mut has_event_ref = false;
        let mut has_client = false;
        let mut has_encoding = false;

        for tag in &tags {
            match tag.kind() {
                TagKind::Relays => {
                    let relay_slice = tag.as_slice();
                    if relay_slice.len() > 1 {
                        for relay_url in relay_slice.iter().skip(1) {
                            if nostr::RelayUrl::parse(relay_url).is_err() {
                                return Err(Error::InvalidWelcomeMessage);
                            }
                        }
                        has_relays = true;
                    }
                }
                kind if kind == TagKind::e() => {
                    if tag.content().is_some() && tag.content() != Some("") {
                        has_event_ref = true;
                    }
                }
                TagKind::Client => {
                    if tag.content().is_some() && tag.content() != Some("") {
                        has_client = true;
                    }
                }
                TagKind::Custom(name) if name.as_ref() == "encoding" => {
                    // Welcomes are always base64 per MIP-02
                    if tag.content() == Some("base64") {
                        has_encoding = true;
                    } else {
                        return Err(Error::InvalidWelcomeMessage);
                    }
                }
                _ => {}
            }
        }

        if !has_relays || !has_event_ref || !has_client || !has_encoding {
            return Err(Error::InvalidWelcomeMessage);
        }

        Ok(())
    }

    /// Processes a welcome rumor and stores it.
    ///
    /// Each wrapper event is processed at most once: a welcome that was
    /// already processed returns the stored record, and one that previously
    /// failed returns [`Error::WelcomePreviouslyFailed`].
    ///
    /// When the MLS payload fails validation the behavior depends on
    /// [`MarmotConfig::strict_welcome_validation`](crate::MarmotConfig::strict_welcome_validation):
    /// in strict mode the failure is recorded and an error returned; in the
    /// default lax mode a pending welcome is stored with whatever metadata
    /// could be recovered from the rumor tags, so the user can still see and
    /// discard the invitation.
    pub fn process_welcome(
        &self,
        wrapper_event_id: &EventId,
        rumor_event: &UnsignedEvent,
    ) -> Result<welcome_types::Welcome, Error> {
        Self::validate_welcome_event(rumor_event)?;

        if let Some(processed_welcome) = self
            .storage()
            .find_processed_welcome_by_event_id(wrapper_event_id)
            .map_err(|e| Error::Welcome(e.to_string()))?
        {
            // Retries of failed welcomes are not supported
            if processed_welcome.state == welcome_types::ProcessedWelcomeState::Failed {
                let reason = processed_welcome
                    .failure_reason
                    .unwrap_or_else(|| "unknown reason".to_string());
                return Err(Error::WelcomePreviouslyFailed(reason));
            }

            // Successfully processed before: return the stored welcome
            return match processed_welcome.welcome_event_id {
                Some(welcome_event_id) => self
                    .storage()
                    .find_welcome_by_event_id(&welcome_event_id)
                    .map_err(|e| Error::Welcome(e.to_string()))?
                    .ok_or_else(|| {
                        Error::Welcome("welcome record missing for processed welcome".to_string())
                    }),
                None => Err(Error::Welcome(
                    "processed welcome missing welcome_event_id".to_string(),
                )),
            };
        }

        let welcome_preview = match self.preview_welcome(wrapper_event_id, rumor_event) {
            Ok(preview) => preview,
            Err(e) if !self.config.strict_welcome_validation => {
                return self.store_unvalidated_welcome(wrapper_event_id, rumor_event, &e);
            }
            Err(e) => return Err(e),
        };

        // Create a pending group
        let group = group_types::Group {
            mls_group_id: welcome_preview
                .staged_welcome
                .group_context()
                .group_id()
                .into(),
            nostr_group_id: welcome_preview.nostr_group_data.nostr_group_id,
            name: welcome_preview.nostr_group_data.name.clone(),
            description: welcome_preview.nostr_group_data.description.clone(),
            admin_pubkeys: welcome_preview.nostr_group_data.admins.clone(),
            last_message_id: None,
            last_message_at: None,
            last_message_processed_at: None,
            epoch: welcome_preview
                .staged_welcome
                .group_context()
                .epoch()
                .as_u64(),
            state: group_types::GroupState::Pending,
        };

        let mls_group_id = group.mls_group_id.clone();

        self.storage()
            .save_group(group)
            .map_err(|e| Error::Group(e.to_string()))?;

        self.storage()
            .replace_group_relays(
                &mls_group_id,
                welcome_preview.nostr_group_data.relays.clone(),
            )
            .map_err(|e| Error::Group(e.to_string()))?;

        let processed_welcome = welcome_types::ProcessedWelcome {
            wrapper_event_id: *wrapper_event_id,
            welcome_event_id: rumor_event.id,
            processed_at: Timestamp::now(),
            state: welcome_types::ProcessedWelcomeState::Processed,
            failure_reason: None,
        };

        let rumor_event_id = rumor_event.id.ok_or(Error::MissingRumorEventId)?;

        let welcome = welcome_types::Welcome {
            id: rumor_event_id,
            event: rumor_event.clone(),
            mls_group_id,
            nostr_group_id: welcome_preview.nostr_group_data.nostr_group_id,
            group_name: welcome_preview.nostr_group_data.name,
            group_description: welcome_preview.nostr_group_data.description,
            group_admin_pubkeys: welcome_preview
                .nostr_group_data
                .admins
                .iter()
                .copied()
                .collect(),
            group_relays: welcome_preview
                .nostr_group_data
                .relays
                .iter()
                .cloned()
                .collect(),
            welcomer: rumor_event.pubkey,
            member_count: welcome_preview.staged_welcome.members().count() as u32,
            state: welcome_types::WelcomeState::Pending,
            wrapper_event_id: *wrapper_event_id,
        };

        self.storage()
            .save_processed_welcome(processed_welcome)
            .map_err(|e| Error::Welcome(e.to_string()))?;

        self.storage()
            .save_welcome(welcome.clone())
            .map_err(|e| Error::Welcome(e.to_string()))?;

        Ok(welcome)
    }

    /// Stores a pending welcome for a rumor whose MLS payload failed
    /// validation (lax mode).
    ///
    /// Only the metadata recoverable from the rumor itself is recorded:
    /// relays from the tags and the welcomer pubkey. Accepting such a
    /// welcome fails, declining it works.
    fn store_unvalidated_welcome(
        &self,
        wrapper_event_id: &EventId,
        rumor_event: &UnsignedEvent,
        cause: &Error,
    ) -> Result<welcome_types::Welcome, Error> {
        let rumor_event_id = rumor_event.id.ok_or(Error::MissingRumorEventId)?;

        tracing::warn!(
            target: "burrow_marmot::welcomes::process_welcome",
            error = %cause,
            "Storing welcome with unvalidated MLS payload"
        );

        let relays: Vec<nostr::RelayUrl> = rumor_event
            .tags
            .iter()
            .find(|t| t.kind() == TagKind::Relays)
            .map(|t| {
                t.as_slice()
                    .iter()
                    .skip(1)
                    .filter_map(|s| nostr::RelayUrl::parse(s).ok())
                    .collect()
            })
            .unwrap_or_default();

        let welcome = welcome_types::Welcome {
            id: rumor_event_id,
            event: rumor_event.clone(),
            mls_group_id: GroupId::from_slice(&[]),
            nostr_group_id: [0u8; 32],
            group_name: String::new(),
            group_description: String::new(),
            group_admin_pubkeys: Vec::new(),
            group_relays: relays,
            welcomer: rumor_event.pubkey,
            member_count: 0,
            state: welcome_types::WelcomeState::Pending,
            wrapper_event_id: *wrapper_event_id,
        };

        // Overwrites the Failed record the preview wrote for this wrapper
        let processed_welcome = welcome_types::ProcessedWelcome {
            wrapper_event_id: *wrapper_event_id,
            welcome_event_id: rumor_event.id,
            processed_at: Timestamp::now(),
            state: welcome_types::ProcessedWelcomeState::Processed,
            failure_reason: None,
        };

        self.storage()
            .save_processed_welcome(processed_welcome)
            .map_err(|e| Error::Welcome(e.to_string()))?;

        self.storage()
            .save_welcome(welcome.clone())
            .map_err(|e| Error::Welcome(e.to_string()))?;

        Ok(welcome)
    }

    /// Accepts a welcome and joins the group
    pub fn accept_welcome(&self, welcome: &welcome_types::Welcome) -> Result<(), Error> {
        let welcome_preview = self.preview_welcome(&welcome.wrapper_event_id, &welcome.event)?;
        let mls_group = welcome_preview.staged_welcome.into_group(&self.provider)?;

        let mut welcome = welcome.clone();
        welcome.state = welcome_types::WelcomeState::Accepted;
        self.storage()
            .save_welcome(welcome)
            .map_err(|e| Error::Welcome(e.to_string()))?;

        // Activate the pending group
        if let Some(mut group) = self.get_group(&mls_group.group_id().into())? {
            let mls_group_id = group.mls_group_id.clone();

            group.state = group_types::GroupState::Active;

            self.storage()
                .save_group(group)
                .map_err(|e| Error::Group(e.to_string()))?;

            self.storage()
                .replace_group_relays(&mls_group_id, welcome_preview.nostr_group_data.relays)
                .map_err(|e| Error::Group(e.to_string()))?;
        }

        Ok(())
    }

    /// Declines a welcome
    ///
    /// Works even for welcomes whose MLS payload never validated, so that
    /// invitations stored in lax mode can still be discarded.
    pub fn decline_welcome(&self, welcome: &welcome_types::Welcome) -> Result<(), Error> {
        let preview = self.preview_welcome(&welcome.wrapper_event_id, &welcome.event);

        let mut updated = welcome.clone();
        updated.state = welcome_types::WelcomeState::Declined;
        self.storage()
            .save_welcome(updated)
            .map_err(|e| Error::Welcome(e.to_string()))?;

        match preview {
            Ok(welcome_preview) => {
                let mls_group_id: GroupId = welcome_preview
                    .staged_welcome
                    .group_context()
                    .group_id()
                    .into();
                if let Some(mut group) = self.get_group(&mls_group_id)? {
                    group.state = group_types::GroupState::Inactive;
                    self.storage()
                        .save_group(group)
                        .map_err(|e| Error::Group(e.to_string()))?;
                }
            }
            Err(e) => {
                tracing::debug!(
                    target: "burrow_marmot::welcomes",
                    error = %e,
                    "Declined welcome without valid MLS payload"
                );
            }
        }

        Ok(())
    }

    /// Parses a serialized welcome message and extracts group information.
    fn parse_serialized_welcome(
        &self,
        mut welcome_message: &[u8],
    ) -> Result<(StagedWelcome, NostrGroupDataExtension), Error> {
        let welcome_message_in = MlsMessageIn::tls_deserialize(&mut welcome_message)?;

        let welcome: Welcome = match welcome_message_in.extract() {
            MlsMessageBodyIn::Welcome(welcome) => welcome,
            _ => return Err(Error::InvalidWelcomeMessage),
        };

        let sender_ratchet_config = SenderRatchetConfiguration::new(
            self.config.out_of_order_tolerance,
            self.config.maximum_forward_distance,
        );
        let mls_group_config = MlsGroupJoinConfig::builder()
            .use_ratchet_tree_extension(true)
            .sender_ratchet_configuration(sender_ratchet_config)
            .build();

        let staged_welcome =
            StagedWelcome::build_from_welcome(&self.provider, &mls_group_config, welcome)?
                .replace_old_group()
                .build()?;

        let nostr_group_data =
            NostrGroupDataExtension::from_group_context(staged_welcome.group_context())?;

        Ok((staged_welcome, nostr_group_data))
    }

    /// Previews a welcome message without joining the group.
    ///
    /// Failures are recorded as failed processed welcomes so the same
    /// wrapper is never re-validated from scratch.
    fn preview_welcome(
        &self,
        wrapper_event_id: &EventId,
        welcome_event: &UnsignedEvent,
    ) -> Result<WelcomePreview, Error> {
        // The encoding tag is mandatory per MIP-02
        let encoding = match ContentEncoding::from_tags(welcome_event.tags.iter()) {
            Some(enc) => enc,
            None => {
                return Err(self.record_welcome_failure(
                    wrapper_event_id,
                    welcome_event,
                    "Missing required encoding tag".to_string(),
                )?);
            }
        };

        let decoded_content = match decode_content(&welcome_event.content, encoding, "welcome") {
            Ok(content) => content,
            Err(e) => {
                return Err(self.record_welcome_failure(
                    wrapper_event_id,
                    welcome_event,
                    format!(
                        "Error decoding welcome event content ({}): {}",
                        encoding.as_tag_value(),
                        e
                    ),
                )?);
            }
        };

        match self.parse_serialized_welcome(&decoded_content) {
            Ok((staged_welcome, nostr_group_data)) => Ok(WelcomePreview {
                staged_welcome,
                nostr_group_data,
            }),
            Err(e) => Err(self.record_welcome_failure(
                wrapper_event_id,
                welcome_event,
                format!("Error previewing welcome: {:?}", e),
            )?),
        }
    }

    /// Persists a failed processed-welcome record and returns the failure as
    /// an error value for the caller to raise.
    fn record_welcome_failure(
        &self,
        wrapper_event_id: &EventId,
        welcome_event: &UnsignedEvent,
        error_string: String,
    ) -> Result<Error, Error> {
        let processed_welcome = welcome_types::ProcessedWelcome {
            wrapper_event_id: *wrapper_event_id,
            welcome_event_id: welcome_event.id,
            processed_at: Timestamp::now(),
            state: welcome_types::ProcessedWelcomeState::Failed,
            failure_reason: Some(error_string.clone()),
        };

        self.storage()
            .save_processed_welcome(processed_welcome)
            .map_err(|e| Error::Welcome(e.to_string()))?;

        tracing::error!(
            target: "burrow_marmot::welcomes::process_welcome",
            "Error processing welcome: {}",
            error_string
        );

        Ok(Error::Welcome(error_string))
    }
}

#[cfg(test)]
mod tests {
    use nostr::{EventBuilder, Keys, RelayUrl};

    use super::*;
    use crate::MarmotConfig;
    use crate::test_util::*;
    use crate::tests::{create_test_marmot, create_test_marmot_with_config};

    #[test]
    fn test_welcome_event_structure() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();

        let member_kp_event = create_key_package_event(&marmot, &members[0]);
        let create_result = marmot
            .create_group(
                &creator.public_key(),
                vec![member_kp_event.clone()],
                create_nostr_group_config_data(admins),
            )
            .expect("Failed to create group");

        let welcome_rumor = &create_result.welcome_rumors[0];

        assert_eq!(welcome_rumor.kind, Kind::MlsWelcome);
        assert_eq!(welcome_rumor.tags.len(), 4);

        // e tag references the member's key package event
        let e_tag = welcome_rumor
            .tags
            .iter()
            .find(|t| t.kind() == TagKind::e())
            .expect("Welcome should have an e tag");
        assert_eq!(e_tag.content().unwrap(), member_kp_event.id.to_hex());

        // Welcome content is base64 with an explicit encoding tag
        let encoding = ContentEncoding::from_tags(welcome_rumor.tags.iter());
        assert_eq!(encoding, Some(ContentEncoding::Base64));

        Marmot::<burrow_marmot_memory::MarmotMemoryStorage>::validate_welcome_event(welcome_rumor)
            .expect("Welcome rumor should validate");
    }

    #[test]
    fn test_welcome_validation_rejects_invalid_events() {
        let keys = Keys::generate();

        // Wrong kind
        let wrong_kind = EventBuilder::new(Kind::TextNote, "test").build(keys.public_key());
        assert!(matches!(
            Marmot::<burrow_marmot_memory::MarmotMemoryStorage>::validate_welcome_event(
                &wrong_kind
            ),
            Err(Error::InvalidWelcomeMessage)
        ));

        // Missing tags
        let no_tags = EventBuilder::new(Kind::MlsWelcome, "payload").build(keys.public_key());
        assert!(matches!(
            Marmot::<burrow_marmot_memory::MarmotMemoryStorage>::validate_welcome_event(&no_tags),
            Err(Error::InvalidWelcomeMessage)
        ));

        // Wrong encoding value
        let bad_encoding = EventBuilder::new(Kind::MlsWelcome, "payload")
            .tags(vec![
                Tag::from_standardized(nostr::TagStandard::Relays(vec![
                    RelayUrl::parse("wss://relay.example.com").unwrap(),
                ])),
                Tag::event(EventId::all_zeros()),
                Tag::client("burrow/0.1.0"),
                Tag::custom(TagKind::Custom("encoding".into()), ["hex"]),
            ])
            .build(keys.public_key());
        assert!(matches!(
            Marmot::<burrow_marmot_memory::MarmotMemoryStorage>::validate_welcome_event(
                &bad_encoding
            ),
            Err(Error::InvalidWelcomeMessage)
        ));
    }

    #[test]
    fn test_welcome_processing_flow() {
        // Same instance for creator and member to share the MLS key store
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();

        let member_kp_event = create_key_package_event(&marmot, &members[0]);
        let create_result = marmot
            .create_group(
                &creator.public_key(),
                vec![member_kp_event],
                create_nostr_group_config_data(admins),
            )
            .expect("Failed to create group");

        let welcome_rumor = &create_result.welcome_rumors[0];
        let wrapper_event_id = EventId::all_zeros();

        let welcome = marmot
            .process_welcome(&wrapper_event_id, welcome_rumor)
            .expect("Failed to process welcome");

        assert_eq!(welcome.state, welcome_types::WelcomeState::Pending);
        assert_eq!(welcome.wrapper_event_id, wrapper_event_id);
        assert_eq!(welcome.group_name, "Test Group");
        assert!(welcome.member_count >= 2);
        assert_eq!(
            welcome.mls_group_id, create_result.group.mls_group_id,
            "Welcome references the created group"
        );

        // The group is stored as pending until the welcome is accepted
        let group = marmot
            .get_group(&welcome.mls_group_id)
            .unwrap()
            .expect("Pending group should be stored");
        assert_eq!(group.state, group_types::GroupState::Pending);

        // Re-processing the same wrapper returns the stored welcome
        let again = marmot
            .process_welcome(&wrapper_event_id, welcome_rumor)
            .expect("Re-processing should succeed");
        assert_eq!(again.id, welcome.id);
    }

    #[test]
    fn test_accept_welcome_activates_group() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();

        let member_kp_event = create_key_package_event(&marmot, &members[0]);
        let create_result = marmot
            .create_group(
                &creator.public_key(),
                vec![member_kp_event],
                create_nostr_group_config_data(admins),
            )
            .expect("Failed to create group");

        let welcome = marmot
            .process_welcome(&EventId::all_zeros(), &create_result.welcome_rumors[0])
            .expect("Failed to process welcome");

        marmot
            .accept_welcome(&welcome)
            .expect("Failed to accept welcome");

        let group = marmot.get_group(&welcome.mls_group_id).unwrap().unwrap();
        assert_eq!(group.state, group_types::GroupState::Active);

        let stored = marmot.get_welcome(&welcome.id).unwrap().unwrap();
        assert_eq!(stored.state, welcome_types::WelcomeState::Accepted);
    }

    #[test]
    fn test_decline_welcome() {
        let marmot = create_test_marmot();
        let (creator, members, admins) = create_test_group_members();

        let member_kp_event = create_key_package_event(&marmot, &members[0]);
        let create_result = marmot
            .create_group(
                &creator.public_key(),
                vec![member_kp_event],
                create_nostr_group_config_data(admins),
            )
            .expect("Failed to create group");

        let welcome = marmot
            .process_welcome(&EventId::all_zeros(), &create_result.welcome_rumors[0])
            .expect("Failed to process welcome");

        marmot
            .decline_welcome(&welcome)
            .expect("Failed to decline welcome");

        let stored = marmot.get_welcome(&welcome.id).unwrap().unwrap();
        assert_eq!(stored.state, welcome_types::WelcomeState::Declined);

        let group = marmot.get_group(&welcome.mls_group_id).unwrap().unwrap();
        assert_eq!(group.state, group_types::GroupState::Inactive);
    }

    fn garbage_welcome_rumor(keys: &Keys, content: &str) -> UnsignedEvent {
        EventBuilder::new(Kind::MlsWelcome, content)
            .tags(vec![
                Tag::from_standardized(nostr::TagStandard::Relays(vec![
                    RelayUrl::parse("wss://relay.example.com").unwrap(),
                ])),
                Tag::event(EventId::all_zeros()),
                Tag::client("burrow/0.1.0"),
                Tag::custom(TagKind::Custom("encoding".into()), ["base64"]),
            ])
            .build(keys.public_key())
    }

    #[test]
    fn test_lax_mode_stores_unvalidated_welcome() {
        let marmot = create_test_marmot();
        let keys = Keys::generate();
        let rumor = garbage_welcome_rumor(&keys, "bm90IGEgd2VsY29tZQ==");
        let wrapper_id = EventId::all_zeros();

        let welcome = marmot
            .process_welcome(&wrapper_id, &rumor)
            .expect("Lax mode should store the welcome");

        assert_eq!(welcome.state, welcome_types::WelcomeState::Pending);
        assert_eq!(welcome.welcomer, keys.public_key());
        assert_eq!(welcome.member_count, 0);
        assert_eq!(welcome.group_relays.len(), 1);

        // Accepting fails since the MLS payload never validated
        assert!(marmot.accept_welcome(&welcome).is_err());

        // Declining still works
        marmot
            .decline_welcome(&welcome)
            .expect("Declining an unvalidated welcome should work");
        let stored = marmot.get_welcome(&welcome.id).unwrap().unwrap();
        assert_eq!(stored.state, welcome_types::WelcomeState::Declined);
    }

    #[test]
    fn test_strict_mode_rejects_invalid_welcome() {
        let config = MarmotConfig {
            strict_welcome_validation: true,
            ..Default::default()
        };
        let marmot = create_test_marmot_with_config(config);
        let keys = Keys::generate();
        let rumor = garbage_welcome_rumor(&keys, "bm90IGEgd2VsY29tZQ==");
        let wrapper_id = EventId::all_zeros();

        let err = marmot.process_welcome(&wrapper_id, &rumor).unwrap_err();
        assert!(matches!(err, Error::Welcome(_)));

        // The failure is remembered; retries report the original failure
        let err = marmot.process_welcome(&wrapper_id, &rumor).unwrap_err();
        assert!(matches!(err, Error::WelcomePreviouslyFailed(_)));
    }

    #[test]
    fn test_get_pending_welcomes_empty() {
        let marmot = create_test_marmot();
        let welcomes = marmot.get_pending_welcomes(None).unwrap();
        assert!(welcomes.is_empty());
    }

    #[test]
    fn test_get_pending_welcomes_with_pagination() {
        let marmot = create_test_marmot();
        let keys = Keys::generate();

        // Lax mode lets us store welcomes without full MLS payloads
        for i in 0..3u8 {
            let rumor = garbage_welcome_rumor(&keys, &format!("cGF5bG9hZA{}=", i));
            let wrapper_id = EventId::from_slice(&[i; 32]).unwrap();
            marmot
                .process_welcome(&wrapper_id, &rumor)
                .expect("Failed to store welcome");
        }

        let all = marmot.get_pending_welcomes(None).unwrap();
        assert_eq!(all.len(), 3);

        let page = marmot
            .get_pending_welcomes(Some(Pagination::new(Some(2), Some(0))))
            .unwrap();
        assert_eq!(page.len(), 2);

        let rest = marmot
            .get_pending_welcomes(Some(Pagination::new(Some(2), Some(2))))
            .unwrap();
        assert_eq!(rest.len(), 1);
    }
}
