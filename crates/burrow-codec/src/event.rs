//! The Nostr event primitive.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::hex_util::serde_hex;

/// A signed Nostr event.
///
/// `id` is the sha256 of the canonical serialization
/// `[0, pubkey, created_at, kind, tags, content]`. Events are immutable once
/// created; equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte content hash, hex on the wire.
    #[serde(with = "serde_hex")]
    pub id: [u8; 32],
    /// Author public key.
    #[serde(with = "serde_hex")]
    pub pubkey: [u8; 32],
    /// Second-precision Unix timestamp.
    pub created_at: u64,
    /// 16-bit event kind.
    pub kind: u16,
    /// Ordered sequence of ordered string sequences.
    pub tags: Vec<Vec<String>>,
    /// Payload; may be base64 or ciphertext depending on kind.
    pub content: String,
    /// 64-byte Schnorr signature, hex on the wire.
    #[serde(with = "serde_hex")]
    pub sig: [u8; 64],
}

impl Event {
    /// Parses an event from its JSON object form.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes to the canonical JSON object form.
    pub fn as_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Computes the content id over the canonical array form.
    pub fn compute_id(&self) -> Result<[u8; 32], Error> {
        let canonical = serde_json::to_string(&(
            0u8,
            hex::encode(self.pubkey),
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(digest.into())
    }

    /// Whether the stored id matches the canonical hash.
    pub fn verify_id(&self) -> Result<bool, Error> {
        Ok(self.compute_id()? == self.id)
    }

    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().is_some_and(|n| n == name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All values carried by tags named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.first().is_some_and(|n| n == name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;

    /// Builds an event with a valid canonical id and a zero signature.
    pub fn make_event(kind: u16, created_at: u64, content: &str, tags: Vec<Vec<String>>) -> Event {
        let mut event = Event {
            id: [0u8; 32],
            pubkey: [0x11; 32],
            created_at,
            kind,
            tags,
            content: content.to_owned(),
            sig: [0u8; 64],
        };
        event.id = event.compute_id().unwrap();
        event
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::make_event;
    use super::*;

    #[test]
    fn json_roundtrip() {
        let event = make_event(1, 1_700_000_000, "hello", vec![vec!["t".into(), "x".into()]]);
        let json = event.as_json().unwrap();
        let parsed = Event::from_json(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn id_is_canonical_hash() {
        let event = make_event(1, 1_700_000_000, "hello", vec![]);
        assert!(event.verify_id().unwrap());
        let mut tampered = event.clone();
        tampered.content = "world".into();
        assert!(!tampered.verify_id().unwrap());
    }

    #[test]
    fn parses_wire_form() {
        let json = format!(
            r#"{{"id":"{}","pubkey":"{}","created_at":1700000000,"kind":1,"tags":[["e","{}"]],"content":"hi","sig":"{}"}}"#,
            "00".repeat(32),
            "11".repeat(32),
            "22".repeat(32),
            "33".repeat(64),
        );
        let event = Event::from_json(&json).unwrap();
        assert_eq!(event.kind, 1);
        assert_eq!(event.tag_value("e"), Some("22".repeat(32)).as_deref());
    }

    #[test]
    fn rejects_short_id() {
        let json = format!(
            r#"{{"id":"abcd","pubkey":"{}","created_at":0,"kind":0,"tags":[],"content":"","sig":"{}"}}"#,
            "11".repeat(32),
            "33".repeat(64),
        );
        assert!(Event::from_json(&json).is_err());
    }

    #[test]
    fn tag_values_filters_by_name() {
        let event = make_event(
            7,
            10,
            "",
            vec![
                vec!["p".into(), "aa".into()],
                vec!["e".into(), "bb".into()],
                vec!["p".into(), "cc".into()],
            ],
        );
        let ps: Vec<&str> = event.tag_values("p").collect();
        assert_eq!(ps, vec!["aa", "cc"]);
    }
}
