//! Group storage.
//!
//! Groups are keyed by MLS group id and looked up either by that id or by
//! the 32-byte Nostr group id published in events. Exporter secrets are
//! kept per `(group, epoch)` so older epochs' messages stay decryptable
//! inside the retention window.

use std::collections::BTreeSet;

use nostr::{PublicKey, RelayUrl};
use thiserror::Error;

use crate::messages::types::Message;
use crate::{GroupId, Pagination};

pub mod types;

use self::types::{Group, GroupExporterSecret, GroupRelay};

/// Group storage failure.
#[derive(Debug, Error)]
pub enum GroupError {
    /// Caller passed something unusable.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),
    /// Group does not exist.
    #[error("group not found")]
    NotFound,
}

/// Group persistence operations.
pub trait GroupStorage {
    /// All stored groups, in unspecified order.
    fn all_groups(&self) -> Result<Vec<Group>, GroupError>;

    /// Looks a group up by MLS group id.
    fn find_group_by_mls_group_id(&self, group_id: &GroupId) -> Result<Option<Group>, GroupError>;

    /// Looks a group up by its published Nostr group id.
    fn find_group_by_nostr_group_id(
        &self,
        nostr_group_id: &[u8; 32],
    ) -> Result<Option<Group>, GroupError>;

    /// Inserts or replaces a group record.
    fn save_group(&self, group: Group) -> Result<(), GroupError>;

    /// Messages of a group, newest first by `(created_at, processed_at,
    /// id)`. Fails with [`GroupError::InvalidParameters`] on a zero or
    /// over-cap limit and with [`GroupError::NotFound`] for unknown groups.
    fn messages(
        &self,
        group_id: &GroupId,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Message>, GroupError>;

    /// The newest message of a group, if any.
    fn last_message(&self, group_id: &GroupId) -> Result<Option<Message>, GroupError>;

    /// Admin pubkeys of a group.
    fn admins(&self, group_id: &GroupId) -> Result<BTreeSet<PublicKey>, GroupError>;

    /// Relays the group publishes to.
    fn group_relays(&self, group_id: &GroupId) -> Result<BTreeSet<GroupRelay>, GroupError>;

    /// Atomically replaces the group's relay set.
    fn replace_group_relays(
        &self,
        group_id: &GroupId,
        relays: BTreeSet<RelayUrl>,
    ) -> Result<(), GroupError>;

    /// Exporter secret for one epoch, if retained.
    fn get_group_exporter_secret(
        &self,
        group_id: &GroupId,
        epoch: u64,
    ) -> Result<Option<GroupExporterSecret>, GroupError>;

    /// Stores an epoch's exporter secret.
    fn save_group_exporter_secret(
        &self,
        group_exporter_secret: GroupExporterSecret,
    ) -> Result<(), GroupError>;

    /// Drops retained exporter secrets with `epoch < min_epoch`, returning
    /// how many were removed. Backends must zeroize the dropped material.
    fn delete_group_exporter_secrets_before(
        &self,
        group_id: &GroupId,
        min_epoch: u64,
    ) -> Result<usize, GroupError>;
}
