//! Shared encoding helpers

use nostr::base64::Engine;
use nostr::base64::engine::general_purpose::STANDARD as BASE64;
use nostr::nips::nip44;
use nostr::{Keys, SecretKey, Tag, TagKind};

use burrow_marmot_storage::groups::types::GroupExporterSecret;

use crate::error::Error;

/// Formats MLS protocol values for Nostr tags as `0xXXXX` hex.
pub(crate) trait NostrTagFormat {
    fn to_nostr_tag(&self) -> String;
}

impl NostrTagFormat for openmls::prelude::Ciphersuite {
    fn to_nostr_tag(&self) -> String {
        format!("0x{:04x}", u16::from(*self))
    }
}

impl NostrTagFormat for openmls::prelude::ExtensionType {
    fn to_nostr_tag(&self) -> String {
        format!("0x{:04x}", u16::from(*self))
    }
}

/// Content encoding of serialized MLS payloads carried in event content.
///
/// Key packages (kind 443) are hex encoded without an `encoding` tag.
/// Welcomes (kind 444) are base64 encoded and must carry an explicit
/// `["encoding", "base64"]` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentEncoding {
    /// Lowercase hex, no tag.
    Hex,
    /// RFC 4648 standard base64 with padding.
    Base64,
}

impl ContentEncoding {
    pub(crate) fn as_tag_value(&self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::Base64 => "base64",
        }
    }

    /// Reads the encoding from an event's tags. Returns `None` when no
    /// `encoding` tag is present or its value is unknown; callers that
    /// require the tag reject the event in that case.
    pub(crate) fn from_tags<'a, I>(tags: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        for tag in tags {
            if let TagKind::Custom(name) = tag.kind()
                && name.as_ref() == "encoding"
            {
                return match tag.content() {
                    Some("hex") => Some(Self::Hex),
                    Some("base64") => Some(Self::Base64),
                    _ => None,
                };
            }
        }
        None
    }
}

pub(crate) fn encode_content(bytes: &[u8], encoding: ContentEncoding) -> String {
    match encoding {
        ContentEncoding::Hex => hex::encode(bytes),
        ContentEncoding::Base64 => BASE64.encode(bytes),
    }
}

pub(crate) fn decode_content(
    content: &str,
    encoding: ContentEncoding,
    context: &str,
) -> Result<Vec<u8>, String> {
    match encoding {
        ContentEncoding::Hex => {
            hex::decode(content).map_err(|e| format!("Failed to decode {} hex: {}", context, e))
        }
        ContentEncoding::Base64 => BASE64
            .decode(content)
            .map_err(|e| format!("Failed to decode {} base64: {}", context, e)),
    }
}

/// Decrypts a NIP-44 payload keyed by a group epoch exporter secret.
///
/// The secret is interpreted as a secp256k1 scalar; its derived keypair is
/// used for a self-addressed NIP-44 conversation key.
pub(crate) fn decrypt_with_exporter_secret(
    secret: &GroupExporterSecret,
    content: &str,
) -> Result<Vec<u8>, Error> {
    let secret_key =
        SecretKey::from_slice(secret.secret.as_ref()).map_err(|_| Error::GroupExporterSecret)?;
    let keys = Keys::new(secret_key);

    let decrypted = nip44::decrypt_to_bytes(keys.secret_key(), &keys.public_key, content)?;

    Ok(decrypted)
}
