//! Protocol constants

use openmls::prelude::{Ciphersuite, ExtensionType};

/// Extension type carrying the Nostr group data in the MLS group context.
pub const NOSTR_GROUP_DATA_EXTENSION_TYPE: u16 = 0xF2EE;

/// The only ciphersuite accepted on the wire per MIP-00.
pub const DEFAULT_CIPHERSUITE: Ciphersuite =
    Ciphersuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

/// Extensions advertised in leaf node capabilities.
pub const SUPPORTED_EXTENSIONS: [ExtensionType; 2] = [
    ExtensionType::LastResort,
    ExtensionType::Unknown(NOSTR_GROUP_DATA_EXTENSION_TYPE),
];

/// Extensions every member must support in the group context.
pub const GROUP_CONTEXT_REQUIRED_EXTENSIONS: [ExtensionType; 1] =
    [ExtensionType::Unknown(NOSTR_GROUP_DATA_EXTENSION_TYPE)];

/// Extensions enumerated in the kind-443 `mls_extensions` tag.
pub const TAG_EXTENSIONS: [ExtensionType; 2] = SUPPORTED_EXTENSIONS;
