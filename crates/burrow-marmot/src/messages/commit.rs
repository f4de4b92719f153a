//! Commit message processing

use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::messages::types as message_types;
use burrow_marmot_storage::{GroupId, MarmotStorageProvider};
use nostr::Event;
use openmls::prelude::{MlsGroup, Sender, StagedCommit};

use crate::Marmot;
use crate::error::Error;

use super::Result;

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Processes a commit message from a group member
    ///
    /// Validates the sender's authorization, merges the staged commit into
    /// the MLS group, and rolls the stored metadata forward to the new
    /// epoch. Non-admin members may only commit pure self-updates; all
    /// other commits require admin privileges.
    ///
    /// When this commit removed the local member, the stored group is set
    /// to `Inactive` and exporter secret derivation is skipped, since the
    /// evicted member no longer has epoch key material.
    pub(super) fn process_commit(
        &self,
        mls_group: &mut MlsGroup,
        event: &Event,
        staged_commit: StagedCommit,
        commit_sender: &Sender,
    ) -> Result<()> {
        self.validate_commit_authorization(mls_group, &staged_commit, commit_sender)?;
        self.validate_commit_identities(mls_group, &staged_commit, commit_sender)?;

        let group_id: GroupId = mls_group.group_id().into();

        mls_group
            .merge_staged_commit(&self.provider, staged_commit)
            .map_err(|_e| Error::Message("Failed to merge staged commit".to_string()))?;

        if mls_group.own_leaf().is_none() {
            return self.handle_local_member_eviction(&group_id, event);
        }

        let new_epoch = mls_group.epoch().as_u64();

        // New epoch key material first, then metadata sync and cleanup
        self.exporter_secret(&group_id)?;
        self.sync_group_metadata_from_mls(&group_id)?;
        self.prune_exporter_secrets(&group_id, new_epoch)?;

        let processed_message = super::create_processed_message_record(
            event.id,
            None,
            Some(new_epoch),
            Some(group_id.clone()),
            message_types::ProcessedMessageState::ProcessedCommit,
            None,
        );

        self.save_processed_message_record(processed_message)?;
        Ok(())
    }

    /// Handles a commit that removed the local member from the group
    ///
    /// Marks the stored group `Inactive` and records the wrapper as
    /// processed so it is never retried.
    pub(super) fn handle_local_member_eviction(
        &self,
        group_id: &GroupId,
        event: &Event,
    ) -> Result<()> {
        tracing::info!(
            target: "burrow_marmot::messages::process_commit",
            "Local member was removed from group, setting group state to Inactive"
        );

        let group_epoch = match self.get_group(group_id)? {
            Some(mut group) => {
                let epoch = group.epoch;
                group.state = group_types::GroupState::Inactive;
                self.save_group_record(group)?;
                Some(epoch)
            }
            None => {
                tracing::warn!(
                    target: "burrow_marmot::messages::process_commit",
                    "Group not found in storage while handling eviction"
                );
                None
            }
        };

        let processed_message = super::create_processed_message_record(
            event.id,
            None,
            group_epoch,
            Some(group_id.clone()),
            message_types::ProcessedMessageState::Processed,
            None,
        );

        self.save_processed_message_record(processed_message)?;

        Ok(())
    }
}
