//! Persisted message records.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use nostr::event::Kind;
use nostr::{EventId, PublicKey, Tags, Timestamp, UnsignedEvent};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::MessageError;
use crate::GroupId;

/// A decrypted group message: the inner rumor plus local bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Rumor event id.
    pub id: EventId,
    /// Author of the rumor.
    pub pubkey: PublicKey,
    /// Rumor kind.
    pub kind: Kind,
    /// Owning group.
    pub mls_group_id: GroupId,
    /// Sender timestamp from the rumor.
    pub created_at: Timestamp,
    /// When this client decrypted and stored the message. Sorting on this
    /// avoids reordering under sender clock skew.
    pub processed_at: Timestamp,
    /// Rumor content.
    pub content: String,
    /// Rumor tags.
    pub tags: Tags,
    /// The full unsigned rumor event.
    pub event: UnsignedEvent,
    /// Event id of the kind-445 wrapper this came in.
    pub wrapper_event_id: EventId,
    /// Epoch the message was decrypted at, when known.
    pub epoch: Option<u64>,
    /// Lifecycle state.
    pub state: MessageState,
}

impl Message {
    /// Newest-first display ordering: `created_at DESC, processed_at DESC,
    /// id DESC`. Returns [`Ordering::Greater`] when `self` sorts before
    /// `other`. All backends must order with this single comparison.
    pub fn display_order_cmp(&self, other: &Self) -> Ordering {
        (self.created_at, self.processed_at, self.id).cmp(&(
            other.created_at,
            other.processed_at,
            other.id,
        ))
    }
}

/// Lifecycle of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageState {
    /// Authored locally and stored; publication to relays is unconfirmed.
    Created,
    /// Received, decrypted and stored.
    Processed,
    /// Deleted by the original sender via a delete event.
    Deleted,
}

impl MessageState {
    /// Lowercase wire form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Processed => "processed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageState {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "processed" => Ok(Self::Processed),
            "deleted" => Ok(Self::Deleted),
            _ => Err(MessageError::InvalidParameters(format!(
                "unknown message state: {s}"
            ))),
        }
    }
}

impl Serialize for MessageState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Dedup and retry record for one kind-445 wrapper event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMessage {
    /// Wrapper event id; primary key.
    pub wrapper_event_id: EventId,
    /// Rumor event id, when decryption got that far.
    pub message_event_id: Option<EventId>,
    /// When processing happened.
    pub processed_at: Timestamp,
    /// Epoch at processing time, when known.
    pub epoch: Option<u64>,
    /// Owning group, when known. Decryption failures before group
    /// resolution leave this empty.
    pub mls_group_id: Option<GroupId>,
    /// Outcome.
    pub state: ProcessedMessageState,
    /// Failure detail for `Failed` records.
    pub failure_reason: Option<String>,
}

/// Outcome of processing one wrapper event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessedMessageState {
    /// Authored locally. MLS cannot decrypt our own ciphertext, so the
    /// wrapper is recorded at send time and skipped on receipt.
    Created,
    /// Application message decrypted and stored.
    Processed,
    /// Commit applied; there is no rumor to store.
    ProcessedCommit,
    /// Ciphertext from a future epoch, buffered for reprocessing once the
    /// intervening commits arrive.
    Retryable,
    /// Processing failed terminally.
    Failed,
}

impl ProcessedMessageState {
    /// Lowercase wire form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Processed => "processed",
            Self::ProcessedCommit => "processed_commit",
            Self::Retryable => "retryable",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessedMessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessedMessageState {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "processed" => Ok(Self::Processed),
            "processed_commit" => Ok(Self::ProcessedCommit),
            "retryable" => Ok(Self::Retryable),
            "failed" => Ok(Self::Failed),
            _ => Err(MessageError::InvalidParameters(format!(
                "unknown processed message state: {s}"
            ))),
        }
    }
}

impl Serialize for ProcessedMessageState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessedMessageState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(created_at: u64, processed_at: u64, id_byte: u8) -> Message {
        let pubkey = PublicKey::from_hex(
            "8a9de562cbbed225b6ea0118dd3997a02df92c0bffd2224f71081a7450c3e549",
        )
        .unwrap();
        let ca = Timestamp::from(created_at);
        Message {
            id: EventId::from_slice(&[id_byte; 32]).unwrap(),
            pubkey,
            kind: Kind::from(9u16),
            mls_group_id: GroupId::from_slice(&[1]),
            created_at: ca,
            processed_at: Timestamp::from(processed_at),
            content: String::new(),
            tags: Tags::new(),
            event: UnsignedEvent::new(pubkey, ca, Kind::from(9u16), Tags::new(), String::new()),
            wrapper_event_id: EventId::all_zeros(),
            epoch: None,
            state: MessageState::Processed,
        }
    }

    #[test]
    fn display_order_prefers_created_at() {
        let newer = test_message(200, 100, 1);
        let older = test_message(100, 999, 2);
        assert_eq!(newer.display_order_cmp(&older), Ordering::Greater);
    }

    #[test]
    fn display_order_ties_break_on_processed_at_then_id() {
        let a = test_message(100, 110, 1);
        let b = test_message(100, 100, 9);
        assert_eq!(a.display_order_cmp(&b), Ordering::Greater);

        let c = test_message(100, 100, 5);
        let d = test_message(100, 100, 3);
        assert_eq!(c.display_order_cmp(&d), Ordering::Greater);
    }

    #[test]
    fn states_round_trip_through_strings() {
        for state in [
            ProcessedMessageState::Created,
            ProcessedMessageState::Processed,
            ProcessedMessageState::ProcessedCommit,
            ProcessedMessageState::Retryable,
            ProcessedMessageState::Failed,
        ] {
            assert_eq!(ProcessedMessageState::from_str(state.as_str()).unwrap(), state);
        }
        for state in [
            MessageState::Created,
            MessageState::Processed,
            MessageState::Deleted,
        ] {
            assert_eq!(MessageState::from_str(state.as_str()).unwrap(), state);
        }
        assert!(ProcessedMessageState::from_str("nope").is_err());
    }

    #[test]
    fn message_serde_round_trip() {
        let msg = test_message(100, 105, 4);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
