//! Key package events (MIP-00)
//!
//! Key packages are published as kind 443 events. The content is the
//! lowercase hex encoding of the TLS-serialized MLS KeyPackage and the tags
//! advertise the protocol version, ciphersuite, extensions and relays.

use burrow_marmot_storage::MarmotStorageProvider;
use nostr::{Event, Kind, PublicKey, RelayUrl, Tag, TagKind};
use openmls::ciphersuite::hash_ref::HashReference;
use openmls::key_packages::KeyPackage;
use openmls::prelude::*;
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::storage::StorageProvider;
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize};

use crate::Marmot;
use crate::constant::{DEFAULT_CIPHERSUITE, TAG_EXTENSIONS};
use crate::error::Error;
use crate::util::{ContentEncoding, NostrTagFormat, decode_content, encode_content};

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Creates a key package for a kind 443 Nostr event.
    ///
    /// Generates an MLS key package with the user's credential and returns
    /// the hex-encoded content along with the tags the event must carry.
    ///
    /// **Note**: This function does NOT add the NIP-70 protected tag. Many
    /// popular relays reject protected events. If you need the protected tag,
    /// use [`create_key_package_for_event_with_options`](Self::create_key_package_for_event_with_options).
    ///
    /// # Returns
    ///
    /// A tuple containing:
    /// * A hex-encoded string containing the serialized key package
    /// * A vector of tags for the Nostr event:
    ///   - `mls_protocol_version` - MLS protocol version ("1.0")
    ///   - `mls_ciphersuite` - Ciphersuite identifier (e.g., "0x0001")
    ///   - `mls_extensions` - Required MLS extensions
    ///   - `relays` - Relay URLs for distribution
    ///   - `client` - Client identifier and version
    /// * The serialized hash ref of the key package, for later deletion
    pub fn create_key_package_for_event<I>(
        &self,
        public_key: &PublicKey,
        relays: I,
    ) -> Result<(String, Vec<Tag>, Vec<u8>), Error>
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        self.create_key_package_for_event_internal(public_key, relays, false)
    }

    /// Same as [`create_key_package_for_event`](Self::create_key_package_for_event)
    /// but lets the caller request the NIP-70 protected tag (`["-"]`).
    ///
    /// Only set `protected` when publishing to relays known to accept
    /// NIP-70 protected events.
    pub fn create_key_package_for_event_with_options<I>(
        &self,
        public_key: &PublicKey,
        relays: I,
        protected: bool,
    ) -> Result<(String, Vec<Tag>, Vec<u8>), Error>
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        self.create_key_package_for_event_internal(public_key, relays, protected)
    }

    fn create_key_package_for_event_internal<I>(
        &self,
        public_key: &PublicKey,
        relays: I,
        protected: bool,
    ) -> Result<(String, Vec<Tag>, Vec<u8>), Error>
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        let (credential, signature_keypair) = self.generate_credential_with_key(public_key)?;

        let capabilities: Capabilities = self.capabilities();

        let key_package_bundle = KeyPackage::builder()
            .leaf_node_capabilities(capabilities)
            .mark_as_last_resort()
            .build(
                self.ciphersuite,
                &self.provider,
                &signature_keypair,
                credential,
            )?;

        // Compute the hash ref while the KeyPackage is at hand so callers
        // can delete it later without re-parsing.
        let hash_ref = key_package_bundle
            .key_package()
            .hash_ref(self.provider.crypto())?;
        let hash_ref_bytes = hash_ref.tls_serialize_detached()?;

        let key_package_serialized = key_package_bundle.key_package().tls_serialize_detached()?;

        // Kind 443 content is always lowercase hex per MIP-00, no encoding tag.
        let encoded_content = encode_content(&key_package_serialized, ContentEncoding::Hex);

        tracing::debug!(
            target: "burrow_marmot::key_packages",
            "Created key package (protected: {})",
            protected
        );

        let mut tags = vec![
            Tag::custom(TagKind::MlsProtocolVersion, ["1.0"]),
            Tag::custom(TagKind::MlsCiphersuite, [self.ciphersuite_value()]),
            Tag::custom(TagKind::MlsExtensions, self.extensions_value()),
            Tag::relays(relays),
        ];

        if protected {
            tags.push(Tag::protected());
        }

        tags.push(Tag::client(format!("burrow/{}", env!("CARGO_PKG_VERSION"))));

        Ok((encoded_content, tags, hash_ref_bytes))
    }

    /// Parses and validates a hex-encoded serialized key package.
    fn parse_serialized_key_package(&self, key_package_str: &str) -> Result<KeyPackage, Error> {
        let key_package_bytes =
            decode_content(key_package_str, ContentEncoding::Hex, "key package")
                .map_err(Error::KeyPackage)?;

        let key_package_in = KeyPackageIn::tls_deserialize(&mut key_package_bytes.as_slice())?;

        let key_package =
            key_package_in.validate(self.provider.crypto(), ProtocolVersion::Mls10)?;

        Ok(key_package)
    }

    /// Parses and validates an MLS KeyPackage from a Nostr event.
    ///
    /// Performs full validation before deserializing:
    /// 1. Verifies the event is of kind `MlsKeyPackage` (443)
    /// 2. Validates the required tags per MIP-00
    ///    (`mls_protocol_version`, `mls_ciphersuite`, `mls_extensions`, `relays`)
    /// 3. Deserializes and validates the TLS-encoded key package
    /// 4. Verifies the identity binding between the event signer and the
    ///    credential identity
    ///
    /// The identity binding check prevents an attacker from publishing a
    /// kind 443 event whose BasicCredential claims a victim's Nostr public
    /// key while signing with their own key.
    pub fn parse_key_package(&self, event: &Event) -> Result<KeyPackage, Error> {
        if event.kind != Kind::MlsKeyPackage {
            return Err(Error::UnexpectedEvent {
                expected: Kind::MlsKeyPackage,
                received: event.kind,
            });
        }

        self.validate_key_package_tags(event)?;

        let key_package = self.parse_serialized_key_package(&event.content)?;

        let credential = BasicCredential::try_from(key_package.leaf_node().credential().clone())?;
        let credential_identity = self.parse_credential_identity(credential.identity())?;

        if credential_identity != event.pubkey {
            return Err(Error::KeyPackageIdentityMismatch {
                credential_identity: credential_identity.to_hex(),
                event_signer: event.pubkey.to_hex(),
            });
        }

        Ok(key_package)
    }

    /// Validates that key package event tags match MIP-00.
    fn validate_key_package_tags(&self, event: &Event) -> Result<(), Error> {
        let require = |kind: TagKind, name: &str| {
            event
                .tags
                .iter()
                .find(|t| t.kind() == kind)
                .ok_or_else(|| Error::KeyPackage(format!("Missing required tag: {}", name)))
        };

        let pv = require(TagKind::MlsProtocolVersion, "mls_protocol_version")?;
        let cs = require(TagKind::MlsCiphersuite, "mls_ciphersuite")?;
        let ext = require(TagKind::MlsExtensions, "mls_extensions")?;
        let relays = require(TagKind::Relays, "relays")?;

        self.validate_protocol_version_tag(pv)?;
        self.validate_ciphersuite_tag(cs)?;
        self.validate_extensions_tag(ext)?;
        self.validate_relays_tag(relays)?;

        Ok(())
    }

    /// Per MIP-00, only protocol version "1.0" is currently supported.
    fn validate_protocol_version_tag(&self, tag: &Tag) -> Result<(), Error> {
        let version_value = tag.content().ok_or_else(|| {
            Error::KeyPackage("Protocol version tag must have a value".to_string())
        })?;

        if version_value != "1.0" {
            return Err(Error::KeyPackage(format!(
                "Unsupported protocol version: {}. Only version 1.0 is supported",
                version_value
            )));
        }

        Ok(())
    }

    /// Validates ciphersuite tag format and value per MIP-00.
    ///
    /// Currently only accepts "0x0001" (MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519).
    fn validate_ciphersuite_tag(&self, tag: &Tag) -> Result<(), Error> {
        let ciphersuite_value = tag
            .content()
            .ok_or_else(|| Error::KeyPackage("Ciphersuite tag must have a value".to_string()))?;

        validate_hex_u16(ciphersuite_value)
            .map_err(|msg| Error::KeyPackage(format!("Ciphersuite {}", msg)))?;

        let expected_hex = DEFAULT_CIPHERSUITE.to_nostr_tag();
        if ciphersuite_value.to_lowercase() != expected_hex {
            return Err(Error::KeyPackage(format!(
                "Unsupported ciphersuite: {}. Only {} is supported",
                ciphersuite_value, expected_hex
            )));
        }

        Ok(())
    }

    /// Validates extensions tag format and values per MIP-00.
    ///
    /// Required extensions (as separate hex values):
    /// - 0x000a (LastResort)
    /// - 0xf2ee (NostrGroupData)
    fn validate_extensions_tag(&self, tag: &Tag) -> Result<(), Error> {
        let extension_values: Vec<&str> = tag
            .as_slice()
            .iter()
            .skip(1)
            .map(|s| s.as_str())
            .collect();

        if extension_values.is_empty() {
            return Err(Error::KeyPackage(
                "Extensions tag must have at least one value".to_string(),
            ));
        }

        for (idx, ext_value) in extension_values.iter().enumerate() {
            validate_hex_u16(ext_value)
                .map_err(|msg| Error::KeyPackage(format!("Extension {} {}", idx, msg)))?;
        }

        // Case-insensitive comparison against the required set
        let normalized: std::collections::HashSet<String> =
            extension_values.iter().map(|s| s.to_lowercase()).collect();

        for required_ext in TAG_EXTENSIONS.iter() {
            let required_hex = required_ext.to_nostr_tag();
            if !normalized.contains(&required_hex) {
                return Err(Error::KeyPackage(format!(
                    "Missing required extension: {}",
                    required_hex
                )));
            }
        }

        Ok(())
    }

    /// Per MIP-00 the relays tag is mandatory and must contain at least one
    /// valid relay URL, so that key packages are routable.
    fn validate_relays_tag(&self, tag: &Tag) -> Result<(), Error> {
        let relay_slice = tag.as_slice();

        if relay_slice.len() <= 1 {
            return Err(Error::KeyPackage(
                "Relays tag must have at least one relay URL".to_string(),
            ));
        }

        for (idx, relay_url_str) in relay_slice.iter().skip(1).enumerate() {
            RelayUrl::parse(relay_url_str).map_err(|e| {
                Error::KeyPackage(format!(
                    "Invalid relay URL at index {}: {} ({})",
                    idx, relay_url_str, e
                ))
            })?;
        }

        Ok(())
    }

    /// Deletes a key package from the MLS provider's storage.
    pub fn delete_key_package_from_storage(&self, key_package: &KeyPackage) -> Result<(), Error> {
        let hash_ref = key_package.hash_ref(self.provider.crypto())?;

        self.provider
            .storage()
            .delete_key_package(&hash_ref)
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(())
    }

    /// Deletes a key package using previously serialized hash ref bytes.
    ///
    /// The `hash_ref_bytes` should be the bytes returned as the third element
    /// of [`create_key_package_for_event`](Self::create_key_package_for_event).
    pub fn delete_key_package_from_storage_by_hash_ref(
        &self,
        hash_ref_bytes: &[u8],
    ) -> Result<(), Error> {
        let hash_ref = HashReference::tls_deserialize(&mut &*hash_ref_bytes)?;

        self.provider
            .storage()
            .delete_key_package(&hash_ref)
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(())
    }

    /// Generates a credential with a signature keypair for MLS operations.
    ///
    /// The credential identity is the raw 32-byte Nostr public key. The
    /// generated keypair is stored in the MLS provider's storage.
    pub(crate) fn generate_credential_with_key(
        &self,
        public_key: &PublicKey,
    ) -> Result<(CredentialWithKey, SignatureKeyPair), Error> {
        let public_key_bytes: Vec<u8> = public_key.to_bytes().to_vec();

        let credential = BasicCredential::new(public_key_bytes);
        let signature_keypair = SignatureKeyPair::new(self.ciphersuite.signature_algorithm())?;

        signature_keypair
            .store(self.provider.storage())
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok((
            CredentialWithKey {
                credential: credential.into(),
                signature_key: signature_keypair.public().into(),
            },
            signature_keypair,
        ))
    }

    /// Parses a public key from credential identity bytes.
    ///
    /// Per MIP-00, the credential identity must be exactly 32 bytes
    /// containing the raw Nostr public key.
    pub(crate) fn parse_credential_identity(
        &self,
        identity_bytes: &[u8],
    ) -> Result<PublicKey, Error> {
        if identity_bytes.len() != 32 {
            return Err(Error::KeyPackage(format!(
                "Invalid credential identity length: {} (expected 32)",
                identity_bytes.len()
            )));
        }

        PublicKey::from_slice(identity_bytes)
            .map_err(|e| Error::KeyPackage(format!("Invalid public key: {}", e)))
    }
}

/// Checks `0x` + 4 hex digit formatting used by ciphersuite and extension tags.
fn validate_hex_u16(value: &str) -> Result<(), String> {
    if value.len() != 6 {
        return Err(format!(
            "hex value must be 6 characters (0xXXXX), got: {}",
            value
        ));
    }

    value
        .strip_prefix("0x")
        .filter(|hex| hex.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|_| ())
        .ok_or_else(|| {
            format!(
                "value must be 0x followed by 4 hex digits, got: {}",
                value
            )
        })
}
