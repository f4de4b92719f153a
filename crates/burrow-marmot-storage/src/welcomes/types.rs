//! Persisted welcome records.

use std::fmt;
use std::str::FromStr;

use nostr::{EventId, PublicKey, RelayUrl, Timestamp, UnsignedEvent};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::WelcomeError;
use crate::GroupId;

/// A parsed group invitation (kind-444 rumor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Rumor event id; primary key.
    pub id: EventId,
    /// The full unsigned rumor event.
    pub event: UnsignedEvent,
    /// MLS group id of the group being joined.
    pub mls_group_id: GroupId,
    /// Nostr group id from the group data extension.
    pub nostr_group_id: [u8; 32],
    /// Group name from the extension.
    pub group_name: String,
    /// Group description from the extension.
    pub group_description: String,
    /// Admin pubkeys from the extension.
    pub group_admin_pubkeys: Vec<PublicKey>,
    /// Relays the group publishes to.
    pub group_relays: Vec<RelayUrl>,
    /// Pubkey of the member who sent the invitation.
    pub welcomer: PublicKey,
    /// Member count after our join, as seen in the welcome.
    pub member_count: u32,
    /// Lifecycle state.
    pub state: WelcomeState,
    /// Event id of the gift-wrap that carried this welcome.
    pub wrapper_event_id: EventId,
}

/// Lifecycle of a welcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WelcomeState {
    /// Awaiting a user decision.
    Pending,
    /// Join completed.
    Accepted,
    /// Explicitly declined; terminal.
    Declined,
    /// Silently dropped by the user.
    Ignored,
    /// Aged out before a decision was made.
    Expired,
}

impl WelcomeState {
    /// Lowercase wire form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Ignored => "ignored",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for WelcomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WelcomeState {
    type Err = WelcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "ignored" => Ok(Self::Ignored),
            "expired" => Ok(Self::Expired),
            _ => Err(WelcomeError::InvalidParameters(format!(
                "unknown welcome state: {s}"
            ))),
        }
    }
}

impl Serialize for WelcomeState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WelcomeState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Dedup record for one gift-wrap event that carried a welcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedWelcome {
    /// Wrapper event id; primary key.
    pub wrapper_event_id: EventId,
    /// Rumor event id, when parsing got that far.
    pub welcome_event_id: Option<EventId>,
    /// When processing happened.
    pub processed_at: Timestamp,
    /// Outcome.
    pub state: ProcessedWelcomeState,
    /// Failure detail for `Failed` records.
    pub failure_reason: Option<String>,
}

/// Outcome of processing one welcome wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessedWelcomeState {
    /// Parsed and persisted.
    Processed,
    /// Parsing or validation failed.
    Failed,
}

impl ProcessedWelcomeState {
    /// Lowercase wire form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessedWelcomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessedWelcomeState {
    type Err = WelcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(WelcomeError::InvalidParameters(format!(
                "unknown processed welcome state: {s}"
            ))),
        }
    }
}

impl Serialize for ProcessedWelcomeState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessedWelcomeState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
