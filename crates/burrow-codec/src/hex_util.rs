//! Fixed-size hex helpers.

use crate::error::Error;

/// Decodes a lowercase hex string into a fixed-size array.
pub fn decode_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N], Error> {
    let bytes = hex::decode(s)?;
    let got = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::InvalidLength {
            field,
            expected: N,
            got,
        })
}

/// Decodes a 32-byte id or pubkey.
pub fn decode_id(field: &'static str, s: &str) -> Result<[u8; 32], Error> {
    decode_fixed::<32>(field, s)
}

/// Serde adapter for fixed-size byte arrays as lowercase hex strings.
pub mod serde_hex {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes `bytes` as a lowercase hex string.
    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    /// Deserializes a lowercase hex string of exactly `N` bytes.
    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| D::Error::custom(format!("expected {N} bytes, got {}", b.len())))
    }
}
