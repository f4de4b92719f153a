//! Event and identity validation

use burrow_marmot_storage::MarmotStorageProvider;
use nostr::{Event, Kind, TagKind, Timestamp};
use openmls::prelude::{BasicCredential, MlsGroup, Proposal, Sender, StagedCommit};

use crate::Marmot;
use crate::error::Error;

use super::Result;

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Verifies that a rumor's author matches the MLS sender's credential
    ///
    /// The Nostr identity of the inner rumor must be bound to the
    /// authenticated MLS sender, otherwise a member could attribute a
    /// message to someone else.
    pub(crate) fn verify_rumor_author(
        &self,
        rumor_pubkey: &nostr::PublicKey,
        sender_credential: openmls::credentials::Credential,
    ) -> Result<()> {
        let basic_credential = BasicCredential::try_from(sender_credential)?;
        let mls_sender_pubkey = self.parse_credential_identity(basic_credential.identity())?;
        if *rumor_pubkey != mls_sender_pubkey {
            tracing::warn!(
                target: "burrow_marmot::messages::verify_rumor_author",
                "author mismatch: rumor pubkey {} does not match MLS sender {}",
                rumor_pubkey,
                mls_sender_pubkey
            );
            return Err(Error::AuthorMismatch);
        }
        Ok(())
    }

    /// Rejects a change of a member's Nostr identity
    ///
    /// Identity fields are immutable per MIP-00. Allowing a change would
    /// enable impersonation and misattribution of past messages.
    pub(super) fn validate_identity_unchanged(
        current_identity: nostr::PublicKey,
        new_identity: nostr::PublicKey,
    ) -> Result<()> {
        if current_identity != new_identity {
            return Err(Error::IdentityChangeNotAllowed {
                original_identity: current_identity.to_hex(),
                new_identity: new_identity.to_hex(),
            });
        }
        Ok(())
    }

    /// Checks if a staged commit is a pure self-update commit
    ///
    /// A pure self-update only refreshes the sender's own leaf node. Any
    /// member may create one to rotate key material; everything else
    /// requires admin privileges.
    pub(super) fn is_pure_self_update_commit(
        &self,
        staged_commit: &StagedCommit,
        sender_leaf_index: &openmls::prelude::LeafNodeIndex,
    ) -> bool {
        // Require at least one self-update signal, either an UpdatePath or
        // an Update proposal. Empty commits are rejected.
        if staged_commit.update_path_leaf_node().is_none()
            && staged_commit.update_proposals().next().is_none()
        {
            return false;
        }

        // Whitelist: only Update proposals are acceptable. Any other
        // proposal type, including future ones, needs admin privileges.
        if !staged_commit
            .queued_proposals()
            .all(|p| matches!(p.proposal(), Proposal::Update(_)))
        {
            return false;
        }

        // Every update must target the sender's own leaf
        staged_commit
            .update_proposals()
            .all(|p| matches!(p.sender(), Sender::Member(idx) if idx == sender_leaf_index))
    }

    /// Validates that a staged commit does not change any member's identity
    pub(super) fn validate_commit_identities(
        &self,
        mls_group: &MlsGroup,
        staged_commit: &StagedCommit,
        commit_sender: &Sender,
    ) -> Result<()> {
        for update_proposal in staged_commit.update_proposals() {
            if let Sender::Member(sender_leaf_index) = update_proposal.sender() {
                let current_identity = match mls_group.member_at(*sender_leaf_index) {
                    Some(member) => {
                        let credential = BasicCredential::try_from(member.credential.clone())?;
                        self.parse_credential_identity(credential.identity())?
                    }
                    None => continue,
                };

                let new_leaf_node = update_proposal.update_proposal().leaf_node();
                let new_credential = BasicCredential::try_from(new_leaf_node.credential().clone())?;
                let new_identity = self.parse_credential_identity(new_credential.identity())?;

                Self::validate_identity_unchanged(current_identity, new_identity)?;
            }
        }

        // The update path carries the committer's own leaf update
        if let Some(update_path_leaf_node) = staged_commit.update_path_leaf_node()
            && let Sender::Member(committer_leaf_index) = commit_sender
            && let Some(committer_member) = mls_group.member_at(*committer_leaf_index)
        {
            let current_credential =
                BasicCredential::try_from(committer_member.credential.clone())?;
            let current_identity = self.parse_credential_identity(current_credential.identity())?;

            let new_credential =
                BasicCredential::try_from(update_path_leaf_node.credential().clone())?;
            let new_identity = self.parse_credential_identity(new_credential.identity())?;

            if current_identity != new_identity {
                tracing::warn!(
                    target: "burrow_marmot::messages::validate_commit_identities",
                    "Identity change not allowed in commit update path: committer {} attempted to change identity to {}",
                    current_identity,
                    new_identity
                );
            }
            Self::validate_identity_unchanged(current_identity, new_identity)?;
        }

        Ok(())
    }

    /// Validates that the commit sender is authorized to create this commit.
    ///
    /// Admins can create any commit. Non-admins can only create pure
    /// self-update commits.
    pub(super) fn validate_commit_authorization(
        &self,
        mls_group: &MlsGroup,
        staged_commit: &StagedCommit,
        commit_sender: &Sender,
    ) -> Result<()> {
        match commit_sender {
            Sender::Member(leaf_index) => {
                let member = mls_group
                    .member_at(*leaf_index)
                    .ok_or(Error::MessageFromNonMember)?;

                let basic_cred = BasicCredential::try_from(member.credential.clone())?;
                let sender_pubkey = self.parse_credential_identity(basic_cred.identity())?;
                let group_data = crate::extension::NostrGroupDataExtension::from_group(mls_group)?;
                let sender_is_admin = group_data.admins.contains(&sender_pubkey);

                let is_pure_self_update =
                    self.is_pure_self_update_commit(staged_commit, leaf_index);

                match (sender_is_admin, is_pure_self_update) {
                    (true, _) => Ok(()),
                    (false, true) => {
                        tracing::debug!(
                            target: "burrow_marmot::messages::process_commit",
                            "Allowing self-update commit from non-admin member at leaf index {:?}",
                            leaf_index
                        );
                        Ok(())
                    }
                    (false, false) => {
                        tracing::warn!(
                            target: "burrow_marmot::messages::process_commit",
                            "Received non-self-update commit from non-admin member at leaf index {:?}",
                            leaf_index
                        );
                        Err(Error::CommitFromNonAdmin)
                    }
                }
            }
            _ => {
                tracing::warn!(
                    target: "burrow_marmot::messages::process_commit",
                    "Received commit from non-member sender."
                );
                Err(Error::MessageFromNonMember)
            }
        }
    }

    /// Validates that an event's timestamp is within acceptable bounds
    ///
    /// Rejects events too far in the future (beyond the configured clock
    /// skew) and events older than the configured max age.
    pub(super) fn validate_created_at(&self, event: &Event) -> Result<()> {
        let now = Timestamp::now();

        if event.created_at.as_secs()
            > now
                .as_secs()
                .saturating_add(self.config.max_future_skew_secs)
        {
            return Err(Error::InvalidTimestamp(format!(
                "event timestamp {} is too far in the future (current time: {})",
                event.created_at.as_secs(),
                now.as_secs()
            )));
        }

        let min_timestamp = now.as_secs().saturating_sub(self.config.max_event_age_secs);
        if event.created_at.as_secs() < min_timestamp {
            return Err(Error::InvalidTimestamp(format!(
                "event timestamp {} is too old (minimum acceptable: {})",
                event.created_at.as_secs(),
                min_timestamp
            )));
        }

        Ok(())
    }

    /// Extracts the Nostr group ID from event tags
    ///
    /// MIP-03 requires exactly one h tag whose content is the 32-byte group
    /// id as 64 hex characters.
    pub(super) fn extract_nostr_group_id(&self, event: &Event) -> Result<[u8; 32]> {
        let h_tags: Vec<_> = event
            .tags
            .iter()
            .filter(|tag| tag.kind() == TagKind::h())
            .collect();

        if h_tags.is_empty() {
            return Err(Error::MissingGroupIdTag);
        }

        if h_tags.len() > 1 {
            return Err(Error::MultipleGroupIdTags(h_tags.len()));
        }

        let group_id_hex = h_tags[0]
            .content()
            .ok_or_else(|| Error::InvalidGroupIdFormat("h tag has no content".to_string()))?;

        // Length check before decoding prevents unbounded allocation
        if group_id_hex.len() != 64 {
            return Err(Error::InvalidGroupIdFormat(format!(
                "expected 64 hex characters (32 bytes), got {} characters",
                group_id_hex.len()
            )));
        }

        let bytes = hex::decode(group_id_hex)
            .map_err(|e| Error::InvalidGroupIdFormat(format!("hex decode failed: {}", e)))?;

        let nostr_group_id: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::InvalidGroupIdFormat(format!("expected 32 bytes, got {} bytes", v.len()))
        })?;

        Ok(nostr_group_id)
    }

    /// Validates the incoming wrapper event structure
    ///
    /// Nostr signature verification happens in the relay pool before events
    /// reach this point.
    pub(super) fn validate_event(&self, event: &Event) -> Result<()> {
        if event.kind != Kind::MlsGroupMessage {
            return Err(Error::UnexpectedEvent {
                expected: Kind::MlsGroupMessage,
                received: event.kind,
            });
        }

        self.validate_created_at(event)?;

        Ok(())
    }
}
