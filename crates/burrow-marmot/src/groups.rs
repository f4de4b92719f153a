//! Marmot groups
//!
//! This module provides functionality for managing MLS groups in Nostr:
//! - Group creation and configuration
//! - Group state updates and synchronization
//! - Group metadata handling
//! - Exporter secret management
//!
//! Groups have both an MLS group ID and a Nostr group ID. The MLS group ID
//! is used internally by the MLS protocol, while the Nostr group ID is used
//! for relay-based message routing. The Nostr group ID is derived
//! deterministically as the SHA-256 of the MLS group ID.

use std::collections::BTreeSet;

use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::messages::types as message_types;
use burrow_marmot_storage::{GroupId, MarmotStorageProvider, Secret};
use nostr::prelude::*;
use openmls::prelude::*;
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::random::OpenMlsRand;
use tls_codec::Serialize as TlsSerialize;

use super::Marmot;
use super::extension::NostrGroupDataExtension;
use crate::error::Error;
use crate::util::{ContentEncoding, encode_content};

/// Result of creating a new MLS group
#[derive(Debug)]
pub struct GroupResult {
    /// The stored group
    pub group: group_types::Group,
    /// Kind 444 welcome rumors to be gift-wrapped to members added during creation.
    pub welcome_rumors: Vec<UnsignedEvent>,
}

/// Result of updating a group
#[derive(Debug)]
pub struct UpdateGroupResult {
    /// A kind 445 event containing the proposal or commit message. To be published to the group relays.
    pub evolution_event: Event,
    /// Kind 444 welcome rumors for any members added as part of the update.
    pub welcome_rumors: Option<Vec<UnsignedEvent>>,
    /// The MLS group ID this update applies to
    pub mls_group_id: GroupId,
}

/// Configuration data for a new group
#[derive(Debug, Clone)]
pub struct NostrGroupConfigData {
    /// Group name
    pub name: String,
    /// Group description
    pub description: String,
    /// Relays used by the group
    pub relays: Vec<RelayUrl>,
    /// Group admins
    pub admins: Vec<PublicKey>,
}

impl NostrGroupConfigData {
    /// Creates NostrGroupConfigData
    pub fn new(
        name: String,
        description: String,
        relays: Vec<RelayUrl>,
        admins: Vec<PublicKey>,
    ) -> Self {
        Self {
            name,
            description,
            relays,
            admins,
        }
    }
}

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Gets the current user's public key from an MLS group
    pub(crate) fn get_own_pubkey(&self, group: &MlsGroup) -> Result<PublicKey, Error> {
        let own_leaf = group.own_leaf().ok_or(Error::OwnLeafNotFound)?;
        let credentials: BasicCredential =
            BasicCredential::try_from(own_leaf.credential().clone())?;
        self.parse_credential_identity(credentials.identity())
    }

    /// Checks if a leaf node belongs to an admin of the group
    pub(crate) fn is_leaf_node_admin(
        &self,
        group_id: &GroupId,
        leaf_node: &LeafNode,
    ) -> Result<bool, Error> {
        let pubkey = self.pubkey_for_leaf_node(leaf_node)?;
        let mls_group = self.load_mls_group(group_id)?.ok_or(Error::GroupNotFound)?;
        let group_data = NostrGroupDataExtension::from_group(&mls_group)?;
        Ok(group_data.admins.contains(&pubkey))
    }

    /// Extracts the public key from a leaf node
    pub(crate) fn pubkey_for_leaf_node(&self, leaf_node: &LeafNode) -> Result<PublicKey, Error> {
        let credentials: BasicCredential =
            BasicCredential::try_from(leaf_node.credential().clone())?;
        self.parse_credential_identity(credentials.identity())
    }

    /// Extracts the public key from a member
    pub(crate) fn pubkey_for_member(&self, member: &Member) -> Result<PublicKey, Error> {
        let credentials: BasicCredential = BasicCredential::try_from(member.credential.clone())?;
        self.parse_credential_identity(credentials.identity())
    }

    /// Loads the signature key pair for the current member in an MLS group
    pub(crate) fn load_mls_signer(&self, group: &MlsGroup) -> Result<SignatureKeyPair, Error> {
        let own_leaf: &LeafNode = group.own_leaf().ok_or(Error::OwnLeafNotFound)?;
        let public_key: &[u8] = own_leaf.signature_key().as_slice();

        SignatureKeyPair::read(
            self.provider.storage(),
            public_key,
            group.ciphersuite().signature_algorithm(),
        )
        .ok_or(Error::CantLoadSigner)
    }

    /// Loads an MLS group from the MLS provider's storage by its ID
    pub(crate) fn load_mls_group(&self, group_id: &GroupId) -> Result<Option<MlsGroup>, Error> {
        MlsGroup::load(self.provider.storage(), &group_id.into())
            .map_err(|e| Error::Provider(e.to_string()))
    }

    /// Exports the current epoch's secret key from an MLS group.
    ///
    /// This secret keys the NIP-44 encryption of kind 445 group message
    /// events. The secret is cached in storage so it isn't re-exported for
    /// each message, and so that recent past epochs stay decryptable.
    pub(crate) fn exporter_secret(
        &self,
        group_id: &GroupId,
    ) -> Result<group_types::GroupExporterSecret, Error> {
        let group = self.load_mls_group(group_id)?.ok_or(Error::GroupNotFound)?;

        match self
            .storage()
            .get_group_exporter_secret(group_id, group.epoch().as_u64())
            .map_err(|e| Error::Group(e.to_string()))?
        {
            Some(group_exporter_secret) => Ok(group_exporter_secret),
            // Not cached yet: export and save
            None => {
                let export_secret: [u8; 32] = group
                    .export_secret(self.provider.crypto(), "nostr", b"nostr", 32)?
                    .try_into()
                    .map_err(|_| {
                        Error::Group("Failed to convert export secret to [u8; 32]".to_string())
                    })?;
                let group_exporter_secret = group_types::GroupExporterSecret {
                    mls_group_id: group_id.clone(),
                    epoch: group.epoch().as_u64(),
                    secret: Secret::new(export_secret),
                    created_at: Timestamp::now(),
                };

                self.storage()
                    .save_group_exporter_secret(group_exporter_secret.clone())
                    .map_err(|e| Error::Group(e.to_string()))?;

                Ok(group_exporter_secret)
            }
        }
    }

    /// Deletes exporter secrets older than the retention window.
    ///
    /// A secret survives while it is within `exporter_secret_retention`
    /// epochs of the current one OR younger than `exporter_secret_ttl_secs`,
    /// whichever keeps it longer. Called after every merged commit so that
    /// key material for long-gone epochs doesn't accumulate. Deleted secrets
    /// are zeroized on drop.
    pub(crate) fn prune_exporter_secrets(
        &self,
        group_id: &GroupId,
        current_epoch: u64,
    ) -> Result<(), Error> {
        let mut min_epoch = current_epoch.saturating_sub(self.config.exporter_secret_retention);

        // Walk the epoch boundary down past any secret still inside the
        // wall-clock TTL, so epoch-count pruning never beats the TTL.
        let ttl_floor = Timestamp::now()
            .as_secs()
            .saturating_sub(self.config.exporter_secret_ttl_secs);
        while min_epoch > 0 {
            let keep = self
                .storage()
                .get_group_exporter_secret(group_id, min_epoch - 1)
                .map_err(|e| Error::Group(e.to_string()))?
                .is_some_and(|secret| secret.created_at.as_secs() > ttl_floor);
            if !keep {
                break;
            }
            min_epoch -= 1;
        }

        let pruned = self
            .storage()
            .delete_group_exporter_secrets_before(group_id, min_epoch)
            .map_err(|e| Error::Group(e.to_string()))?;

        if pruned > 0 {
            tracing::debug!(
                target: "burrow_marmot::groups",
                pruned,
                min_epoch,
                "Pruned old exporter secrets"
            );
        }

        Ok(())
    }

    /// Retrieves a stored group by its MLS group ID
    pub fn get_group(&self, group_id: &GroupId) -> Result<Option<group_types::Group>, Error> {
        self.storage()
            .find_group_by_mls_group_id(group_id)
            .map_err(|e| Error::Group(e.to_string()))
    }

    /// Retrieves all stored groups
    pub fn get_groups(&self) -> Result<Vec<group_types::Group>, Error> {
        self.storage()
            .all_groups()
            .map_err(|e| Error::Group(e.to_string()))
    }

    /// Gets the public keys of all members in an MLS group
    pub fn get_members(&self, group_id: &GroupId) -> Result<BTreeSet<PublicKey>, Error> {
        let group = self.load_mls_group(group_id)?.ok_or(Error::GroupNotFound)?;

        group
            .members()
            .map(|m| self.pubkey_for_member(&m))
            .collect()
    }

    /// Gets the relays configured for a group
    pub fn get_relays(&self, group_id: &GroupId) -> Result<BTreeSet<RelayUrl>, Error> {
        let relays = self
            .storage()
            .group_relays(group_id)
            .map_err(|e| Error::Group(e.to_string()))?;
        Ok(relays.into_iter().map(|r| r.relay_url).collect())
    }

    /// Creates a new MLS group with the given members and configuration.
    ///
    /// The MLS group ID is 32 random bytes; the public Nostr group ID is
    /// derived from it as SHA-256, so the two never need separate
    /// coordination. The creator's initial Add commit is merged locally and
    /// intentionally NOT published: at creation time only the creator exists
    /// in the group, invited members receive complete group state via their
    /// welcome rumors, and publishing the commit would only leak metadata to
    /// relays.
    ///
    /// # Arguments
    ///
    /// * `creator_public_key` - The creator's Nostr public key
    /// * `member_key_package_events` - Kind 443 events of the initial members
    /// * `config` - Group name, description, relays and admins
    pub fn create_group(
        &self,
        creator_public_key: &PublicKey,
        member_key_package_events: Vec<Event>,
        config: NostrGroupConfigData,
    ) -> Result<GroupResult, Error> {
        let member_pubkeys = member_key_package_events
            .iter()
            .map(|e| e.pubkey)
            .collect::<Vec<PublicKey>>();

        let admins = config.admins.clone();

        self.validate_group_members(creator_public_key, &member_pubkeys, &admins)?;

        let (credential, signer) = self.generate_credential_with_key(creator_public_key)?;

        let mls_group_id_bytes: [u8; 32] = self
            .provider
            .rand()
            .random_array()
            .map_err(|e| Error::Provider(e.to_string()))?;
        let mls_group_id = openmls::group::GroupId::from_slice(&mls_group_id_bytes);

        let group_data = NostrGroupDataExtension::new(
            &mls_group_id,
            config.name,
            config.description,
            admins.iter().copied().collect(),
            config.relays.iter().cloned().collect(),
        );

        let extension = group_data.to_extension()?;
        let required_capabilities_extension = self.required_capabilities_extension();
        let extensions = Extensions::from_vec(vec![extension, required_capabilities_extension])?;

        let capabilities = self.capabilities();
        let sender_ratchet_config = SenderRatchetConfiguration::new(
            self.config.out_of_order_tolerance,
            self.config.maximum_forward_distance,
        );
        let group_config = MlsGroupCreateConfig::builder()
            .ciphersuite(self.ciphersuite)
            .use_ratchet_tree_extension(true)
            .capabilities(capabilities)
            .with_group_context_extensions(extensions)
            .sender_ratchet_configuration(sender_ratchet_config)
            .build();

        let mut mls_group = MlsGroup::new_with_group_id(
            &self.provider,
            &signer,
            &group_config,
            mls_group_id,
            credential.clone(),
        )?;

        let mut key_packages_vec: Vec<KeyPackage> = Vec::new();
        for event in &member_key_package_events {
            let key_package: KeyPackage = self.parse_key_package(event)?;
            key_packages_vec.push(key_package);
        }

        // Single-member groups have no members to add and no welcomes to send.
        let welcome_rumors = if key_packages_vec.is_empty() {
            Vec::new()
        } else {
            let (_, welcome_out, _group_info) =
                mls_group.add_members(&self.provider, &signer, &key_packages_vec)?;

            mls_group.merge_pending_commit(&self.provider)?;

            let serialized_welcome_message = welcome_out.tls_serialize_detached()?;

            self.build_welcome_rumors_for_key_packages(
                &mls_group,
                serialized_welcome_message,
                member_key_package_events,
                &config.relays,
            )?
            .ok_or(Error::Welcome("Error creating welcome rumors".to_string()))?
        };

        let group = group_types::Group {
            mls_group_id: mls_group.group_id().into(),
            nostr_group_id: group_data.nostr_group_id,
            name: group_data.name.clone(),
            description: group_data.description.clone(),
            admin_pubkeys: group_data.admins.clone(),
            last_message_id: None,
            last_message_at: None,
            last_message_processed_at: None,
            epoch: mls_group.epoch().as_u64(),
            state: group_types::GroupState::Active,
        };

        self.storage()
            .save_group(group.clone())
            .map_err(|e| Error::Group(e.to_string()))?;

        self.storage()
            .replace_group_relays(&group.mls_group_id, config.relays.into_iter().collect())
            .map_err(|e| Error::Group(e.to_string()))?;

        Ok(GroupResult {
            group,
            welcome_rumors,
        })
    }

    /// Rotates the current member's leaf node in an MLS group.
    ///
    /// Generates a fresh signature keypair and creates a self-update commit
    /// that other members must process. The commit is NOT merged here:
    /// clients must call [`merge_pending_commit`](Self::merge_pending_commit)
    /// after successfully publishing the commit event to relays.
    pub fn self_update(&self, group_id: &GroupId) -> Result<UpdateGroupResult, Error> {
        let mut mls_group = self.load_mls_group(group_id)?.ok_or(Error::GroupNotFound)?;

        tracing::debug!(
            target: "burrow_marmot::groups::self_update",
            "Current epoch: {:?}",
            mls_group.epoch().as_u64()
        );

        let current_signer: SignatureKeyPair = self.load_mls_signer(&mls_group)?;

        let own_leaf = mls_group.own_leaf().ok_or(Error::OwnLeafNotFound)?;

        let new_signature_keypair = SignatureKeyPair::new(self.ciphersuite.signature_algorithm())?;

        new_signature_keypair
            .store(self.provider.storage())
            .map_err(|e| Error::Provider(e.to_string()))?;

        let pubkey = BasicCredential::try_from(own_leaf.credential().clone())?
            .identity()
            .to_vec();

        let new_credential: BasicCredential = BasicCredential::new(pubkey);
        let new_credential_with_key = CredentialWithKey {
            credential: new_credential.into(),
            signature_key: new_signature_keypair.public().into(),
        };

        let new_signer_bundle = NewSignerBundle {
            signer: &new_signature_keypair,
            credential_with_key: new_credential_with_key.clone(),
        };

        let leaf_node_params = LeafNodeParameters::builder()
            .with_credential_with_key(new_credential_with_key)
            .with_capabilities(own_leaf.capabilities().clone())
            .with_extensions(own_leaf.extensions().clone())
            .build();

        let commit_message_bundle = mls_group.self_update_with_new_signer(
            &self.provider,
            &current_signer,
            new_signer_bundle,
            leaf_node_params,
        )?;

        let serialized_commit_message = commit_message_bundle.commit().tls_serialize_detached()?;

        let commit_event =
            self.build_message_event(&mls_group.group_id().into(), serialized_commit_message)?;

        let processed_message = message_types::ProcessedMessage {
            wrapper_event_id: commit_event.id,
            message_event_id: None,
            processed_at: Timestamp::now(),
            epoch: Some(mls_group.epoch().as_u64()),
            mls_group_id: Some(mls_group.group_id().into()),
            state: message_types::ProcessedMessageState::ProcessedCommit,
            failure_reason: None,
        };

        self.storage()
            .save_processed_message(processed_message)
            .map_err(|e| Error::Message(e.to_string()))?;

        // A self update never adds members
        if commit_message_bundle.welcome().is_some() {
            return Err(Error::Group(
                "Found welcomes when performing a self update".to_string(),
            ));
        }

        Ok(UpdateGroupResult {
            evolution_event: commit_event,
            welcome_rumors: None,
            mls_group_id: group_id.clone(),
        })
    }

    /// Leaves the group.
    ///
    /// Creates a leave proposal that must be committed by another member
    /// (typically an admin), since a member cannot commit themselves out of
    /// the tree. The local group is marked [`GroupState::Inactive`]
    /// immediately and irreversibly: after this call,
    /// [`create_message`](Self::create_message) returns
    /// [`Error::UseAfterEviction`] for this group.
    ///
    /// [`GroupState::Inactive`]: group_types::GroupState::Inactive
    ///
    /// # Returns
    /// * `Ok(UpdateGroupResult)` - Contains the leave proposal event to publish to the group relays
    pub fn leave_group(&self, group_id: &GroupId) -> Result<UpdateGroupResult, Error> {
        let mut group = self.load_mls_group(group_id)?.ok_or(Error::GroupNotFound)?;

        let signer: SignatureKeyPair = self.load_mls_signer(&group)?;

        let leave_message = group
            .leave_group(&self.provider, &signer)
            .map_err(|e| Error::Group(e.to_string()))?;

        let serialized_message_out = leave_message
            .tls_serialize_detached()
            .map_err(|e| Error::Group(e.to_string()))?;

        let evolution_event =
            self.build_message_event(&group.group_id().into(), serialized_message_out)?;

        let processed_message = message_types::ProcessedMessage {
            wrapper_event_id: evolution_event.id,
            message_event_id: None,
            processed_at: Timestamp::now(),
            epoch: Some(group.epoch().as_u64()),
            mls_group_id: Some(group.group_id().into()),
            state: message_types::ProcessedMessageState::ProcessedCommit,
            failure_reason: None,
        };

        self.storage()
            .save_processed_message(processed_message)
            .map_err(|e| Error::Message(e.to_string()))?;

        // Leaving is local-first: stop sending through this group right away
        // rather than waiting for another member to commit the proposal.
        let mut stored_group = self.get_group(group_id)?.ok_or(Error::GroupNotFound)?;
        stored_group.state = group_types::GroupState::Inactive;
        self.storage()
            .save_group(stored_group)
            .map_err(|e| Error::Group(e.to_string()))?;

        Ok(UpdateGroupResult {
            evolution_event,
            welcome_rumors: None,
            mls_group_id: group_id.clone(),
        })
    }

    /// Merge any pending commits.
    ///
    /// This should be called AFTER publishing the kind 445 event that
    /// contains a commit message, to mitigate race conditions.
    pub fn merge_pending_commit(&self, group_id: &GroupId) -> Result<(), Error> {
        let mut mls_group = self.load_mls_group(group_id)?.ok_or(Error::GroupNotFound)?;
        mls_group.merge_pending_commit(&self.provider)?;

        let new_epoch = mls_group.epoch().as_u64();

        // Sync the stored group metadata with the updated MLS group state,
        // cache the new epoch's exporter secret and drop expired ones.
        self.sync_group_metadata_from_mls(group_id)?;
        self.exporter_secret(group_id)?;
        self.prune_exporter_secrets(group_id, new_epoch)?;

        Ok(())
    }

    /// Synchronizes the stored group metadata with the current MLS group state.
    ///
    /// Should be called after any operation that changes the group state or
    /// its extensions. The group-data extension is validated before any
    /// stored state is touched.
    pub fn sync_group_metadata_from_mls(&self, group_id: &GroupId) -> Result<(), Error> {
        let mls_group = self.load_mls_group(group_id)?.ok_or(Error::GroupNotFound)?;
        let mut stored_group = self.get_group(group_id)?.ok_or(Error::GroupNotFound)?;

        let group_data = NostrGroupDataExtension::from_group(&mls_group)?;

        stored_group.epoch = mls_group.epoch().as_u64();
        stored_group.name = group_data.name;
        stored_group.description = group_data.description;
        stored_group.admin_pubkeys = group_data.admins;
        stored_group.nostr_group_id = group_data.nostr_group_id;

        self.storage()
            .replace_group_relays(group_id, group_data.relays)
            .map_err(|e| Error::Group(e.to_string()))?;

        self.storage()
            .save_group(stored_group)
            .map_err(|e| Error::Group(e.to_string()))?;

        Ok(())
    }

    /// Validates the members and admins of a group during creation
    ///
    /// # Validation Rules
    /// - Creator must be an admin but not included in the member list
    /// - All admins must also be members (except the creator)
    fn validate_group_members(
        &self,
        creator_pubkey: &PublicKey,
        member_pubkeys: &[PublicKey],
        admin_pubkeys: &[PublicKey],
    ) -> Result<(), Error> {
        if !admin_pubkeys.contains(creator_pubkey) {
            return Err(Error::Group("Creator must be an admin".to_string()));
        }

        if member_pubkeys.contains(creator_pubkey) {
            return Err(Error::Group(
                "Creator must not be included as a member".to_string(),
            ));
        }

        for pubkey in admin_pubkeys.iter() {
            if !member_pubkeys.contains(pubkey) && creator_pubkey != pubkey {
                return Err(Error::Group("Admin must be a member".to_string()));
            }
        }

        Ok(())
    }

    /// Creates a NIP-44 encrypted kind 445 event signed with an ephemeral keypair.
    pub(crate) fn build_message_event(
        &self,
        group_id: &GroupId,
        serialized_content: Vec<u8>,
    ) -> Result<Event, Error> {
        self.build_message_event_with_tags(group_id, serialized_content, &[])
    }

    /// Like [`build_message_event`](Self::build_message_event) but allows extra
    /// tags on the outer wrapper (e.g. NIP-40 `expiration`).
    pub(crate) fn build_message_event_with_tags(
        &self,
        group_id: &GroupId,
        serialized_content: Vec<u8>,
        extra_tags: &[Tag],
    ) -> Result<Event, Error> {
        let group = self.get_group(group_id)?.ok_or(Error::GroupNotFound)?;

        let secret: group_types::GroupExporterSecret = self.exporter_secret(group_id)?;

        // The exporter secret doubles as a secp256k1 key for the NIP-44
        // conversation with itself.
        let secret_key: SecretKey =
            SecretKey::from_slice(secret.secret.as_ref()).map_err(|_| Error::GroupExporterSecret)?;
        let export_nostr_keys: Keys = Keys::new(secret_key);

        // At some group size this will exceed NIP-44 or relay event size
        // limits. We're not sure yet what size, but it's something to be
        // aware of.
        let encrypted_content: String = nip44::encrypt(
            export_nostr_keys.secret_key(),
            &export_nostr_keys.public_key,
            &serialized_content,
            nip44::Version::default(),
        )?;

        // The outer wrapper is signed by a throwaway key so the sender's
        // identity key never appears on relays.
        let ephemeral_nostr_keys: Keys = Keys::generate();

        let h_tag: Tag = Tag::custom(TagKind::h(), [hex::encode(group.nostr_group_id)]);

        let mut builder = EventBuilder::new(Kind::MlsGroupMessage, encrypted_content).tag(h_tag);

        for t in extra_tags {
            builder = builder.tag(t.clone());
        }

        let event = builder.sign_with_keys(&ephemeral_nostr_keys)?;

        Ok(event)
    }

    /// Builds one kind 444 welcome rumor per key package event.
    ///
    /// Welcome content is base64 encoded and the rumor carries an explicit
    /// `["encoding", "base64"]` tag per MIP-02.
    pub(crate) fn build_welcome_rumors_for_key_packages(
        &self,
        group: &MlsGroup,
        serialized_welcome: Vec<u8>,
        key_package_events: Vec<Event>,
        group_relays: &[RelayUrl],
    ) -> Result<Option<Vec<UnsignedEvent>>, Error> {
        let committer_pubkey = self.get_own_pubkey(group)?;
        let mut welcome_rumors_vec = Vec::new();

        let encoding = ContentEncoding::Base64;
        let encoded_welcome = encode_content(&serialized_welcome, encoding);

        for event in key_package_events {
            let tags = vec![
                Tag::from_standardized(TagStandard::Relays(group_relays.to_vec())),
                Tag::event(event.id),
                Tag::client(format!("burrow/{}", env!("CARGO_PKG_VERSION"))),
                Tag::custom(
                    TagKind::Custom("encoding".into()),
                    [encoding.as_tag_value()],
                ),
            ];

            let welcome_rumor = EventBuilder::new(Kind::MlsWelcome, encoded_welcome.clone())
                .tags(tags)
                .build(committer_pubkey);

            welcome_rumors_vec.push(welcome_rumor);
        }

        if welcome_rumors_vec.is_empty() {
            Ok(None)
        } else {
            Ok(Some(welcome_rumors_vec))
        }
    }
}

#[cfg(test)]
mod tests {
    use burrow_marmot_storage::groups::GroupStorage;
    use burrow_marmot_storage::groups::types::GroupState;
    use nostr::Keys;
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::test_util::*;
    use crate::tests::create_test_marmot;

    #[test]
    fn test_validate_group_members() {
        let marmot = create_test_marmot();
        let creator = Keys::generate().public_key();
        let member1 = Keys::generate().public_key();
        let member2 = Keys::generate().public_key();

        // Valid: creator is admin, not a member
        marmot
            .validate_group_members(&creator, &[member1, member2], &[creator, member1])
            .expect("Valid group members should pass");

        // Creator not admin
        assert!(
            marmot
                .validate_group_members(&creator, &[member1], &[member1])
                .is_err()
        );

        // Creator in member list
        assert!(
            marmot
                .validate_group_members(&creator, &[creator, member1], &[creator])
                .is_err()
        );

        // Admin not a member
        assert!(
            marmot
                .validate_group_members(&creator, &[member1], &[creator, member2])
                .is_err()
        );
    }

    #[test]
    fn test_create_group_basic() {
        let creator_marmot = create_test_marmot();
        let (creator_keys, member_keys, admins) = create_test_group_members();

        let mut key_package_events = Vec::new();
        for member in &member_keys {
            let member_marmot = create_test_marmot();
            key_package_events.push(create_key_package_event(&member_marmot, member));
        }

        let result = creator_marmot
            .create_group(
                &creator_keys.public_key(),
                key_package_events,
                create_nostr_group_config_data(admins.clone()),
            )
            .expect("Failed to create group");

        assert_eq!(result.group.name, "Test Group");
        assert_eq!(result.group.state, GroupState::Active);
        assert_eq!(result.group.epoch, 1, "Add commit merged locally");
        assert_eq!(result.welcome_rumors.len(), member_keys.len());
        assert_eq!(
            result.group.admin_pubkeys,
            admins.iter().copied().collect()
        );

        // Nostr group ID is SHA-256 of the MLS group ID
        let expected: [u8; 32] = Sha256::digest(result.group.mls_group_id.as_slice()).into();
        assert_eq!(result.group.nostr_group_id, expected);

        // Relays persisted
        let relays = creator_marmot
            .get_relays(&result.group.mls_group_id)
            .expect("Failed to get relays");
        assert!(!relays.is_empty());
    }

    #[test]
    fn test_create_single_member_group() {
        let marmot = create_test_marmot();
        let creator_keys = Keys::generate();

        let result = marmot
            .create_group(
                &creator_keys.public_key(),
                vec![],
                create_nostr_group_config_data(vec![creator_keys.public_key()]),
            )
            .expect("Failed to create single-member group");

        assert!(result.welcome_rumors.is_empty());
        assert_eq!(result.group.epoch, 0, "No commit for single-member group");

        let members = marmot
            .get_members(&result.group.mls_group_id)
            .expect("Failed to get members");
        assert_eq!(members.len(), 1);
        assert!(members.contains(&creator_keys.public_key()));
    }

    #[test]
    fn test_get_nonexistent_group() {
        let marmot = create_test_marmot();
        let missing = GroupId::from_slice(&[0xAB; 32]);

        assert!(marmot.get_group(&missing).unwrap().is_none());
        assert!(matches!(
            marmot.get_members(&missing),
            Err(Error::GroupNotFound)
        ));
    }

    #[test]
    fn test_self_update_rotates_epoch_and_secret() {
        let marmot = create_test_marmot();
        let creator_keys = Keys::generate();

        let result = marmot
            .create_group(
                &creator_keys.public_key(),
                vec![],
                create_nostr_group_config_data(vec![creator_keys.public_key()]),
            )
            .expect("Failed to create group");
        let group_id = result.group.mls_group_id.clone();

        let secret_before = marmot
            .exporter_secret(&group_id)
            .expect("Failed to export secret");

        let update = marmot.self_update(&group_id).expect("Failed to self update");
        assert_eq!(update.mls_group_id, group_id);
        assert!(update.welcome_rumors.is_none());
        assert_eq!(update.evolution_event.kind, Kind::MlsGroupMessage);

        marmot
            .merge_pending_commit(&group_id)
            .expect("Failed to merge commit");

        let group = marmot.get_group(&group_id).unwrap().unwrap();
        assert_eq!(group.epoch, secret_before.epoch + 1);

        let secret_after = marmot
            .exporter_secret(&group_id)
            .expect("Failed to export secret");
        assert_eq!(secret_after.epoch, group.epoch);
        assert_ne!(
            secret_before.secret.as_ref(),
            secret_after.secret.as_ref(),
            "Exporter secret must rotate with the epoch"
        );
    }

    #[test]
    fn test_exporter_secret_pruning() {
        // TTL of zero so the epoch-count window alone drives pruning
        let config = crate::MarmotConfig {
            exporter_secret_retention: 2,
            exporter_secret_ttl_secs: 0,
            ..Default::default()
        };
        let marmot = crate::tests::create_test_marmot_with_config(config);
        let creator_keys = Keys::generate();

        let result = marmot
            .create_group(
                &creator_keys.public_key(),
                vec![],
                create_nostr_group_config_data(vec![creator_keys.public_key()]),
            )
            .expect("Failed to create group");
        let group_id = result.group.mls_group_id.clone();

        // Advance several epochs
        for _ in 0..4 {
            marmot.self_update(&group_id).expect("Failed to self update");
            marmot
                .merge_pending_commit(&group_id)
                .expect("Failed to merge commit");
        }

        let group = marmot.get_group(&group_id).unwrap().unwrap();
        assert_eq!(group.epoch, 4);

        // Secrets older than epoch 2 are gone
        assert!(
            marmot
                .storage()
                .get_group_exporter_secret(&group_id, 0)
                .unwrap()
                .is_none()
        );
        assert!(
            marmot
                .storage()
                .get_group_exporter_secret(&group_id, 1)
                .unwrap()
                .is_none()
        );
        assert!(
            marmot
                .storage()
                .get_group_exporter_secret(&group_id, 4)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_exporter_secret_ttl_outlives_epoch_window() {
        // Tight epoch window but a generous TTL: freshly created secrets
        // must survive even though the group churned past the window.
        let config = crate::MarmotConfig {
            exporter_secret_retention: 1,
            ..Default::default()
        };
        let marmot = crate::tests::create_test_marmot_with_config(config);
        let creator_keys = Keys::generate();

        let result = marmot
            .create_group(
                &creator_keys.public_key(),
                vec![],
                create_nostr_group_config_data(vec![creator_keys.public_key()]),
            )
            .expect("Failed to create group");
        let group_id = result.group.mls_group_id.clone();

        for _ in 0..3 {
            marmot.self_update(&group_id).expect("Failed to self update");
            marmot
                .merge_pending_commit(&group_id)
                .expect("Failed to merge commit");
        }

        for epoch in 0..=3 {
            assert!(
                marmot
                    .storage()
                    .get_group_exporter_secret(&group_id, epoch)
                    .unwrap()
                    .is_some(),
                "secret for epoch {} should be kept by the TTL",
                epoch
            );
        }
    }

    #[test]
    fn test_leave_group_marks_inactive() {
        let marmot = create_test_marmot();
        let creator_keys = Keys::generate();
        let (member_keys, member_marmot) = (Keys::generate(), create_test_marmot());

        let key_package = create_key_package_event(&member_marmot, &member_keys);

        let result = marmot
            .create_group(
                &creator_keys.public_key(),
                vec![key_package],
                create_nostr_group_config_data(vec![
                    creator_keys.public_key(),
                    member_keys.public_key(),
                ]),
            )
            .expect("Failed to create group");
        let group_id = result.group.mls_group_id.clone();

        let leave = marmot.leave_group(&group_id).expect("Failed to leave group");
        assert_eq!(leave.evolution_event.kind, Kind::MlsGroupMessage);

        let group = marmot.get_group(&group_id).unwrap().unwrap();
        assert_eq!(group.state, GroupState::Inactive);
    }
}
