//! `GroupStorage` over the in-memory maps.

use std::collections::BTreeSet;

use burrow_marmot_storage::groups::types::{Group, GroupExporterSecret, GroupRelay};
use burrow_marmot_storage::groups::{GroupError, GroupStorage};
use burrow_marmot_storage::messages::types::Message;
use burrow_marmot_storage::{GroupId, MAX_PAGE_LIMIT, Pagination};
use nostr::{PublicKey, RelayUrl};

use crate::MarmotMemoryStorage;

impl GroupStorage for MarmotMemoryStorage {
    fn all_groups(&self) -> Result<Vec<Group>, GroupError> {
        Ok(self.inner.read().groups.values().cloned().collect())
    }

    fn find_group_by_mls_group_id(&self, group_id: &GroupId) -> Result<Option<Group>, GroupError> {
        Ok(self.inner.read().groups.get(group_id).cloned())
    }

    fn find_group_by_nostr_group_id(
        &self,
        nostr_group_id: &[u8; 32],
    ) -> Result<Option<Group>, GroupError> {
        let inner = self.inner.read();
        Ok(inner
            .groups_by_nostr_id
            .get(nostr_group_id)
            .and_then(|id| inner.groups.get(id))
            .cloned())
    }

    fn save_group(&self, group: Group) -> Result<(), GroupError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        // A Nostr group id must not point at two different MLS groups.
        if let Some(existing) = inner.groups_by_nostr_id.get(&group.nostr_group_id)
            && *existing != group.mls_group_id
        {
            return Err(GroupError::InvalidParameters(
                "nostr group id already mapped to a different group".into(),
            ));
        }
        // Drop the stale reverse mapping when the Nostr id rotated.
        if let Some(existing) = inner.groups.get(&group.mls_group_id)
            && existing.nostr_group_id != group.nostr_group_id
        {
            let stale = existing.nostr_group_id;
            inner.groups_by_nostr_id.remove(&stale);
        }

        inner
            .groups_by_nostr_id
            .insert(group.nostr_group_id, group.mls_group_id.clone());
        inner.groups.insert(group.mls_group_id.clone(), group);
        Ok(())
    }

    fn messages(
        &self,
        group_id: &GroupId,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Message>, GroupError> {
        let pagination = pagination.unwrap_or_default();
        let limit = pagination.limit();
        let offset = pagination.offset();
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(GroupError::InvalidParameters(format!(
                "limit must be in 1..={MAX_PAGE_LIMIT}, got {limit}"
            )));
        }

        let inner = self.inner.read();
        if !inner.groups.contains_key(group_id) {
            return Err(GroupError::NotFound);
        }
        let Some(by_id) = inner.messages.get(group_id) else {
            return Ok(Vec::new());
        };
        let mut messages: Vec<Message> = by_id.values().cloned().collect();
        messages.sort_by(|a, b| b.display_order_cmp(a));
        let start = offset.min(messages.len());
        let end = (offset + limit).min(messages.len());
        Ok(messages[start..end].to_vec())
    }

    fn last_message(&self, group_id: &GroupId) -> Result<Option<Message>, GroupError> {
        let inner = self.inner.read();
        if !inner.groups.contains_key(group_id) {
            return Err(GroupError::NotFound);
        }
        Ok(inner
            .messages
            .get(group_id)
            .and_then(|by_id| by_id.values().max_by(|a, b| a.display_order_cmp(b)))
            .cloned())
    }

    fn admins(&self, group_id: &GroupId) -> Result<BTreeSet<PublicKey>, GroupError> {
        match self.find_group_by_mls_group_id(group_id)? {
            Some(group) => Ok(group.admin_pubkeys),
            None => Err(GroupError::NotFound),
        }
    }

    fn group_relays(&self, group_id: &GroupId) -> Result<BTreeSet<GroupRelay>, GroupError> {
        let inner = self.inner.read();
        if !inner.groups.contains_key(group_id) {
            return Err(GroupError::NotFound);
        }
        Ok(inner.group_relays.get(group_id).cloned().unwrap_or_default())
    }

    fn replace_group_relays(
        &self,
        group_id: &GroupId,
        relays: BTreeSet<RelayUrl>,
    ) -> Result<(), GroupError> {
        let mut inner = self.inner.write();
        if !inner.groups.contains_key(group_id) {
            return Err(GroupError::NotFound);
        }
        let group_relays: BTreeSet<GroupRelay> = relays
            .into_iter()
            .map(|relay_url| GroupRelay {
                relay_url,
                mls_group_id: group_id.clone(),
            })
            .collect();
        inner.group_relays.insert(group_id.clone(), group_relays);
        Ok(())
    }

    fn get_group_exporter_secret(
        &self,
        group_id: &GroupId,
        epoch: u64,
    ) -> Result<Option<GroupExporterSecret>, GroupError> {
        let inner = self.inner.read();
        if !inner.groups.contains_key(group_id) {
            return Err(GroupError::NotFound);
        }
        Ok(inner
            .exporter_secrets
            .peek(&(group_id.clone(), epoch))
            .cloned())
    }

    fn save_group_exporter_secret(
        &self,
        group_exporter_secret: GroupExporterSecret,
    ) -> Result<(), GroupError> {
        let mut inner = self.inner.write();
        let key = (
            group_exporter_secret.mls_group_id.clone(),
            group_exporter_secret.epoch,
        );
        inner.exporter_secrets.put(key, group_exporter_secret);
        Ok(())
    }

    fn delete_group_exporter_secrets_before(
        &self,
        group_id: &GroupId,
        min_epoch: u64,
    ) -> Result<usize, GroupError> {
        let mut inner = self.inner.write();
        let expired: Vec<(GroupId, u64)> = inner
            .exporter_secrets
            .iter()
            .filter(|((id, epoch), _)| id == group_id && *epoch < min_epoch)
            .map(|(key, _)| key.clone())
            .collect();
        let removed = expired.len();
        for key in expired {
            // Secret zeroizes on drop.
            inner.exporter_secrets.pop(&key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use burrow_marmot_storage::Secret;
    use burrow_marmot_storage::groups::types::GroupState;
    use nostr::Timestamp;

    use super::*;

    fn test_group(mls_id: &[u8], nostr_id: [u8; 32]) -> Group {
        Group {
            mls_group_id: GroupId::from_slice(mls_id),
            nostr_group_id: nostr_id,
            name: "g".into(),
            description: String::new(),
            admin_pubkeys: BTreeSet::new(),
            last_message_id: None,
            last_message_at: None,
            last_message_processed_at: None,
            epoch: 1,
            state: GroupState::Active,
        }
    }

    fn secret_for(mls_id: &[u8], epoch: u64) -> GroupExporterSecret {
        GroupExporterSecret {
            mls_group_id: GroupId::from_slice(mls_id),
            epoch,
            secret: Secret::new([epoch as u8; 32]),
            created_at: Timestamp::from(1_700_000_000 + epoch),
        }
    }

    #[test]
    fn save_and_find_by_both_ids() {
        let storage = MarmotMemoryStorage::new();
        let group = test_group(&[1], [0xaa; 32]);
        storage.save_group(group.clone()).unwrap();

        let by_mls = storage
            .find_group_by_mls_group_id(&group.mls_group_id)
            .unwrap();
        assert_eq!(by_mls, Some(group.clone()));
        let by_nostr = storage.find_group_by_nostr_group_id(&[0xaa; 32]).unwrap();
        assert_eq!(by_nostr, Some(group));
    }

    #[test]
    fn nostr_id_collision_is_rejected() {
        let storage = MarmotMemoryStorage::new();
        storage.save_group(test_group(&[1], [0xaa; 32])).unwrap();
        let err = storage.save_group(test_group(&[2], [0xaa; 32]));
        assert!(matches!(err, Err(GroupError::InvalidParameters(_))));
    }

    #[test]
    fn nostr_id_rotation_drops_stale_mapping() {
        let storage = MarmotMemoryStorage::new();
        storage.save_group(test_group(&[1], [0xaa; 32])).unwrap();
        storage.save_group(test_group(&[1], [0xbb; 32])).unwrap();
        assert!(
            storage
                .find_group_by_nostr_group_id(&[0xaa; 32])
                .unwrap()
                .is_none()
        );
        assert!(
            storage
                .find_group_by_nostr_group_id(&[0xbb; 32])
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn exporter_secret_pruning_counts_removed_epochs() {
        let storage = MarmotMemoryStorage::new();
        storage.save_group(test_group(&[1], [0xaa; 32])).unwrap();
        for epoch in 1..=5 {
            storage
                .save_group_exporter_secret(secret_for(&[1], epoch))
                .unwrap();
        }
        let gid = GroupId::from_slice(&[1]);
        let removed = storage
            .delete_group_exporter_secrets_before(&gid, 4)
            .unwrap();
        assert_eq!(removed, 3);
        assert!(
            storage
                .get_group_exporter_secret(&gid, 3)
                .unwrap()
                .is_none()
        );
        assert!(
            storage
                .get_group_exporter_secret(&gid, 4)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn queries_on_unknown_groups_fail() {
        let storage = MarmotMemoryStorage::new();
        let gid = GroupId::from_slice(&[9]);
        assert!(matches!(storage.admins(&gid), Err(GroupError::NotFound)));
        assert!(matches!(
            storage.messages(&gid, None),
            Err(GroupError::NotFound)
        ));
        assert!(matches!(
            storage.group_relays(&gid),
            Err(GroupError::NotFound)
        ));
    }

    #[test]
    fn message_limit_bounds_are_enforced() {
        let storage = MarmotMemoryStorage::new();
        storage.save_group(test_group(&[1], [0xaa; 32])).unwrap();
        let gid = GroupId::from_slice(&[1]);
        let err = storage.messages(&gid, Some(Pagination::new(Some(0), None)));
        assert!(matches!(err, Err(GroupError::InvalidParameters(_))));
        let err = storage.messages(&gid, Some(Pagination::new(Some(MAX_PAGE_LIMIT + 1), None)));
        assert!(matches!(err, Err(GroupError::InvalidParameters(_))));
    }
}
