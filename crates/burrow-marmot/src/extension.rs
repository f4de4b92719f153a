//! Marmot group data extension (MIP-01)
//!
//! Every Marmot group carries an unknown GREASE-safe group context extension
//! (type `0xF2EE`) holding the Nostr-facing group metadata: the public group
//! identifier, name, description, admin pubkeys and relays. The extension is
//! required via the group's required capabilities so that every member agrees
//! on the metadata at every epoch.

use std::collections::BTreeSet;

use nostr::{PublicKey, RelayUrl};
use openmls::extensions::{Extension, ExtensionType, Extensions};
use openmls::group::{GroupContext, GroupId, MlsGroup};
use sha2::{Digest, Sha256};
use tls_codec::{
    DeserializeBytes, Serialize, TlsDeserialize, TlsDeserializeBytes, TlsSerialize,
    TlsSerializeBytes, TlsSize,
};

use crate::constant::NOSTR_GROUP_DATA_EXTENSION_TYPE;
use crate::error::Error;

/// Current wire version of the group data extension.
pub const CURRENT_VERSION: u16 = 1;

/// TLS wire form of [`NostrGroupDataExtension`].
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsDeserializeBytes, TlsSerializeBytes, TlsSize)]
struct TlsMarmotGroupData {
    version: u16,
    nostr_group_id: [u8; 32],
    name: Vec<u8>,
    description: Vec<u8>,
    admin_pubkeys: Vec<Vec<u8>>,
    relays: Vec<Vec<u8>>,
}

/// Nostr group data stored in the MLS group context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NostrGroupDataExtension {
    /// Public group identifier published in `h` tags.
    pub nostr_group_id: [u8; 32],
    /// Human-readable group name.
    pub name: String,
    /// Human-readable group description.
    pub description: String,
    /// Pubkeys allowed to send commits.
    pub admins: BTreeSet<PublicKey>,
    /// Relays the group publishes to.
    pub relays: BTreeSet<RelayUrl>,
}

impl NostrGroupDataExtension {
    /// Extension type identifier.
    pub const EXTENSION_TYPE: u16 = NOSTR_GROUP_DATA_EXTENSION_TYPE;

    /// Creates group data for a new group.
    ///
    /// The public `nostr_group_id` is derived deterministically from the MLS
    /// group ID so that it never needs separate coordination.
    pub fn new(
        group_id: &GroupId,
        name: String,
        description: String,
        admins: BTreeSet<PublicKey>,
        relays: BTreeSet<RelayUrl>,
    ) -> Self {
        Self {
            nostr_group_id: derive_nostr_group_id(group_id),
            name,
            description,
            admins,
            relays,
        }
    }

    /// Extracts the group data from a group context.
    pub fn from_group_context(group_context: &GroupContext) -> Result<Self, Error> {
        let ext = extension_payload(group_context.extensions())?;
        Self::deserialize_bytes(ext)
    }

    /// Extracts the group data from a loaded MLS group.
    pub fn from_group(group: &MlsGroup) -> Result<Self, Error> {
        let ext = extension_payload(group.extensions())?;
        Self::deserialize_bytes(ext)
    }

    /// Deserializes the extension payload, rejecting trailing bytes.
    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let (raw, remainder) = TlsMarmotGroupData::tls_deserialize_bytes(bytes)
            .map_err(|e| Error::ExtensionFormat(e.to_string()))?;
        if !remainder.is_empty() {
            return Err(Error::ExtensionFormat(format!(
                "{} trailing bytes after group data",
                remainder.len()
            )));
        }
        Self::from_raw(raw)
    }

    /// Serializes the group data into the raw extension payload.
    pub fn as_raw(&self) -> Result<Vec<u8>, Error> {
        let raw = TlsMarmotGroupData {
            version: CURRENT_VERSION,
            nostr_group_id: self.nostr_group_id,
            name: self.name.clone().into_bytes(),
            description: self.description.clone().into_bytes(),
            admin_pubkeys: self
                .admins
                .iter()
                .map(|pk| pk.to_hex().into_bytes())
                .collect(),
            relays: self
                .relays
                .iter()
                .map(|url| url.to_string().into_bytes())
                .collect(),
        };
        Ok(raw.tls_serialize_detached()?)
    }

    /// Builds the MLS extension carrying this group data.
    pub fn to_extension(&self) -> Result<Extension, Error> {
        Ok(Extension::Unknown(
            Self::EXTENSION_TYPE,
            openmls::extensions::UnknownExtension(self.as_raw()?),
        ))
    }

    /// Hex-encoded public group identifier.
    pub fn nostr_group_id_hex(&self) -> String {
        hex::encode(self.nostr_group_id)
    }

    fn from_raw(raw: TlsMarmotGroupData) -> Result<Self, Error> {
        if raw.version == 0 {
            return Err(Error::InvalidExtensionVersion(raw.version));
        }
        if raw.version > CURRENT_VERSION {
            // Newer versions append fields; parse the ones we know.
            tracing::warn!(
                target: "burrow_marmot::extension",
                version = raw.version,
                "group data extension from a future version"
            );
        }

        let mut admins = BTreeSet::new();
        for pk in &raw.admin_pubkeys {
            let hex_str = str::from_utf8(pk)?;
            admins.insert(PublicKey::from_hex(hex_str)?);
        }

        let mut relays = BTreeSet::new();
        for url in &raw.relays {
            relays.insert(RelayUrl::parse(str::from_utf8(url)?)?);
        }

        Ok(Self {
            nostr_group_id: raw.nostr_group_id,
            name: String::from_utf8(raw.name)?,
            description: String::from_utf8(raw.description)?,
            admins,
            relays,
        })
    }
}

/// Derives the public Nostr group identifier from an MLS group ID.
pub fn derive_nostr_group_id(group_id: &GroupId) -> [u8; 32] {
    let digest = Sha256::digest(group_id.as_slice());
    digest.into()
}

fn extension_payload(extensions: &Extensions<GroupContext>) -> Result<&[u8], Error> {
    let extension = extensions
        .iter()
        .find(|ext| {
            ext.extension_type()
                == ExtensionType::Unknown(NostrGroupDataExtension::EXTENSION_TYPE)
        })
        .ok_or(Error::GroupDataExtensionNotFound)?;

    match extension {
        Extension::Unknown(_, payload) => Ok(&payload.0),
        _ => Err(Error::UnexpectedExtensionType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NostrGroupDataExtension {
        let admin =
            PublicKey::from_hex("79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                .unwrap();
        NostrGroupDataExtension::new(
            &GroupId::from_slice(&[7u8; 32]),
            "Rust nerds".to_string(),
            "A group for rust nerds".to_string(),
            BTreeSet::from([admin]),
            BTreeSet::from([RelayUrl::parse("wss://relay.damus.io").unwrap()]),
        )
    }

    #[test]
    fn test_round_trip() {
        let data = sample();
        let raw = data.as_raw().unwrap();
        let parsed = NostrGroupDataExtension::deserialize_bytes(&raw).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn test_nostr_group_id_is_deterministic() {
        let id = GroupId::from_slice(&[7u8; 32]);
        assert_eq!(derive_nostr_group_id(&id), derive_nostr_group_id(&id));
        assert_eq!(sample().nostr_group_id, derive_nostr_group_id(&id));

        let other = GroupId::from_slice(&[8u8; 32]);
        assert_ne!(derive_nostr_group_id(&id), derive_nostr_group_id(&other));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut raw = sample().as_raw().unwrap();
        raw.push(0);
        let err = NostrGroupDataExtension::deserialize_bytes(&raw).unwrap_err();
        assert!(matches!(err, Error::ExtensionFormat(_)));
    }

    #[test]
    fn test_rejects_version_zero() {
        let mut raw = sample().as_raw().unwrap();
        // version is the first u16 of the payload
        raw[0] = 0;
        raw[1] = 0;
        let err = NostrGroupDataExtension::deserialize_bytes(&raw).unwrap_err();
        assert_eq!(err, Error::InvalidExtensionVersion(0));
    }
}
