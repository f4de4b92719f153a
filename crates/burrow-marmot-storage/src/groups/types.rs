//! Persisted group records.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use nostr::{EventId, PublicKey, RelayUrl, Timestamp};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::GroupError;
use crate::messages::types::Message;
use crate::{GroupId, Secret};

/// Membership state of a group, mirroring the MLS group lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupState {
    /// Member in good standing.
    Active,
    /// Left or evicted. Terminal; an inactive group never becomes active
    /// again.
    Inactive,
    /// Invited but not yet joined.
    Pending,
}

impl GroupState {
    /// Lowercase wire form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GroupState {
    type Err = GroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "pending" => Ok(Self::Pending),
            _ => Err(GroupError::InvalidParameters(format!(
                "unknown group state: {s}"
            ))),
        }
    }
}

impl Serialize for GroupState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GroupState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A stored group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// MLS group id; primary key, never changes.
    pub mls_group_id: GroupId,
    /// Group id used in published Nostr events; may rotate over time.
    pub nostr_group_id: [u8; 32],
    /// Display name, as carried in the group data extension.
    pub name: String,
    /// Description, as carried in the group data extension.
    pub description: String,
    /// Admin pubkeys.
    pub admin_pubkeys: BTreeSet<PublicKey>,
    /// Event id of the newest message.
    pub last_message_id: Option<EventId>,
    /// Sender timestamp of the newest message.
    pub last_message_at: Option<Timestamp>,
    /// Local reception time of the newest message; tiebreaker when
    /// `last_message_at` values collide.
    pub last_message_processed_at: Option<Timestamp>,
    /// Current MLS epoch.
    pub epoch: u64,
    /// Membership state.
    pub state: GroupState,
}

impl Group {
    /// Updates the last-message fields if `message` sorts newer than the
    /// current record under `(created_at, processed_at, id)` descending.
    /// Returns whether the fields changed.
    pub fn update_last_message_if_newer(&mut self, message: &Message) -> bool {
        let newer = match (self.last_message_at, self.last_message_processed_at) {
            (None, _) => true,
            (Some(at), Some(processed_at)) => {
                (message.created_at, message.processed_at, message.id)
                    > (at, processed_at, self.last_message_id.unwrap_or(message.id))
            }
            // Record predates the processed_at field; a tie on created_at
            // goes to the incoming message, which has real data.
            (Some(at), None) => message.created_at >= at,
        };
        if newer {
            self.last_message_id = Some(message.id);
            self.last_message_at = Some(message.created_at);
            self.last_message_processed_at = Some(message.processed_at);
        }
        newer
    }
}

/// One relay a group publishes to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupRelay {
    /// The relay URL.
    pub relay_url: RelayUrl,
    /// Owning group.
    pub mls_group_id: GroupId,
}

/// The exporter secret of one group epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupExporterSecret {
    /// Owning group.
    pub mls_group_id: GroupId,
    /// Epoch the secret belongs to.
    pub epoch: u64,
    /// 32-byte exporter secret; zeroized on drop.
    pub secret: Secret<[u8; 32]>,
    /// When the secret was stored; drives TTL-based pruning.
    pub created_at: Timestamp,
}
