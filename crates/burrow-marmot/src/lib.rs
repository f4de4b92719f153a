//! MLS group messaging over Nostr events.
//!
//! This crate implements the Marmot protocol flows (MIP-00 through MIP-03):
//! key package publication, group creation, welcomes, and encrypted group
//! messages, integrating OpenMLS with Nostr's event system.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc = include_str!("../README.md")]

use burrow_marmot_storage::MarmotStorageProvider;
use burrow_marmot_storage::groups::GroupStorage;
use openmls::prelude::*;
use openmls_rust_crypto::OpenMlsRustCrypto;

mod constant;
pub mod error;
pub mod extension;
pub mod groups;
pub mod key_packages;
pub mod messages;
pub mod prelude;
#[cfg(test)]
pub mod test_util;
mod util;
pub mod welcomes;

use self::constant::{
    DEFAULT_CIPHERSUITE, GROUP_CONTEXT_REQUIRED_EXTENSIONS, SUPPORTED_EXTENSIONS,
};
pub use self::error::Error;
use self::util::NostrTagFormat;

// Re-export GroupId for convenience
pub use burrow_marmot_storage::GroupId;

/// Configuration for Marmot engine behavior
///
/// All fields have secure defaults.
///
/// # Examples
///
/// ```rust
/// use burrow_marmot::MarmotConfig;
///
/// // Use defaults (recommended for most cases)
/// let config = MarmotConfig::default();
///
/// // Custom configuration
/// let config = MarmotConfig {
///     max_event_age_secs: 86400,  // 1 day instead of 45
///     out_of_order_tolerance: 50, // Stricter forward secrecy
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct MarmotConfig {
    /// Maximum age for accepted events in seconds.
    ///
    /// Events older than this are rejected during validation to limit replay
    /// of old messages and processing of stale backlogs. The 45-day window
    /// accommodates extended offline periods.
    ///
    /// Default: 3888000 (45 days)
    pub max_event_age_secs: u64,

    /// Maximum future timestamp skew allowed in seconds.
    ///
    /// Events with timestamps further in the future than this are rejected.
    /// The default 5-minute window accounts for clock skew between clients.
    ///
    /// Default: 300 (5 minutes)
    pub max_future_skew_secs: u64,

    /// Number of past message decryption secrets to retain for out-of-order delivery.
    ///
    /// Nostr relays do not guarantee message ordering, so a higher value
    /// improves reliability when messages are reordered. Higher values reduce
    /// forward secrecy within an epoch.
    ///
    /// Default: 100
    pub out_of_order_tolerance: u32,

    /// Maximum number of messages that can be skipped before decryption fails.
    ///
    /// Controls how far ahead the sender ratchet can advance when messages
    /// are dropped or lost. Also bounds how far ahead of the local epoch a
    /// ciphertext may be before it is rejected rather than kept for retry.
    ///
    /// Default: 1000
    pub maximum_forward_distance: u32,

    /// Number of past epochs for which exporter secrets are retained.
    ///
    /// Retained secrets let late-arriving messages from recent epochs still
    /// decrypt. Secrets older than this many epochs behind the current one
    /// are deleted and zeroized after every merged commit.
    ///
    /// Default: 5
    pub exporter_secret_retention: u64,

    /// Wall-clock time in seconds for which exporter secrets are retained.
    ///
    /// A secret survives pruning while it is within
    /// [`exporter_secret_retention`](Self::exporter_secret_retention) epochs
    /// of the current one OR younger than this TTL, whichever keeps it
    /// longer. Protects late-arriving messages when a group churns through
    /// many epochs in a short time.
    ///
    /// Default: 604800 (7 days)
    pub exporter_secret_ttl_secs: u64,

    /// Whether a welcome whose MLS payload fails validation is rejected.
    ///
    /// When `false` (the default), such welcomes are stored as pending with
    /// whatever metadata could be recovered so the user can still see and
    /// discard the invitation. When `true`, they are recorded as failed and
    /// an error is returned.
    ///
    /// Default: false
    pub strict_welcome_validation: bool,

    /// Inner-rumor kinds that should NOT be persisted to storage.
    ///
    /// When a received application message is decrypted and the inner rumor's
    /// `kind` matches one of these values, the message and processed-message
    /// records are skipped.  The `Message` struct is still returned to the
    /// caller so it can be handled in memory (e.g. typing indicators).
    ///
    /// Default: empty (all kinds are stored)
    pub ephemeral_kinds: Vec<nostr::Kind>,
}

impl Default for MarmotConfig {
    fn default() -> Self {
        Self {
            max_event_age_secs: 3888000,    // 45 days
            max_future_skew_secs: 300,      // 5 minutes
            out_of_order_tolerance: 100,    // 100 past messages
            maximum_forward_distance: 1000, // 1000 forward messages
            exporter_secret_retention: 5,
            exporter_secret_ttl_secs: 604800, // 7 days
            strict_welcome_validation: false,
            ephemeral_kinds: Vec::new(),
        }
    }
}

impl MarmotConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }
}

/// Builder for constructing [`Marmot`] instances
///
/// # Examples
///
/// ```no_run
/// use burrow_marmot::{Marmot, MarmotConfig};
/// use burrow_marmot_memory::MarmotMemoryStorage;
///
/// // Simple usage with defaults
/// let marmot = Marmot::new(MarmotMemoryStorage::default());
///
/// // With custom configuration
/// let marmot = Marmot::builder(MarmotMemoryStorage::default())
///     .with_config(MarmotConfig::new())
///     .build();
/// ```
#[derive(Debug)]
pub struct MarmotBuilder<Storage> {
    storage: Storage,
    config: MarmotConfig,
}

impl<Storage> MarmotBuilder<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Create a new builder with the given storage
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            config: MarmotConfig::default(),
        }
    }

    /// Set a custom configuration
    pub fn with_config(mut self, config: MarmotConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Marmot instance with the configured settings
    pub fn build(self) -> Marmot<Storage> {
        // Prune exporter secrets that outlived the retention window on
        // startup for persistent backends, so key material doesn't linger
        // across restarts.
        if self.storage.backend().is_persistent()
            && let Ok(groups) = self.storage.all_groups()
        {
            let ttl_floor = nostr::Timestamp::now()
                .as_secs()
                .saturating_sub(self.config.exporter_secret_ttl_secs);
            for group in groups {
                let mut min_epoch =
                    group.epoch.saturating_sub(self.config.exporter_secret_retention);
                // Secrets still inside the wall-clock TTL survive the
                // epoch-count cutoff
                while min_epoch > 0 {
                    let keep = self
                        .storage
                        .get_group_exporter_secret(&group.mls_group_id, min_epoch - 1)
                        .ok()
                        .flatten()
                        .is_some_and(|secret| secret.created_at.as_secs() > ttl_floor);
                    if !keep {
                        break;
                    }
                    min_epoch -= 1;
                }
                match self
                    .storage
                    .delete_group_exporter_secrets_before(&group.mls_group_id, min_epoch)
                {
                    Ok(pruned) if pruned > 0 => {
                        tracing::info!(
                            target: "burrow_marmot",
                            pruned,
                            min_epoch,
                            "Pruned expired exporter secrets on startup"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            target: "burrow_marmot",
                            error = %e,
                            "Failed to prune exporter secrets on startup"
                        );
                    }
                }
            }
        }

        Marmot {
            ciphersuite: DEFAULT_CIPHERSUITE,
            extensions: SUPPORTED_EXTENSIONS.to_vec(),
            provider: MarmotProvider {
                mls: OpenMlsRustCrypto::default(),
                storage: self.storage,
            },
            config: self.config,
        }
    }
}

/// The main entry point for the Marmot protocol engine.
///
/// Provides the core functionality for MLS operations over Nostr:
/// - Group management (creation, updates, leaving)
/// - Message handling (encryption, decryption, processing)
/// - Key management (key packages, welcome messages)
///
/// It uses a generic storage provider implementing [`MarmotStorageProvider`]
/// for the Nostr-facing state (groups, messages, welcomes, exporter secrets).
#[derive(Debug)]
pub struct Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// The MLS ciphersuite used for cryptographic operations
    pub ciphersuite: Ciphersuite,
    /// Required MLS extensions for Nostr functionality
    pub extensions: Vec<ExtensionType>,
    /// The OpenMLS provider implementation for cryptographic and storage operations
    pub provider: MarmotProvider<Storage>,
    /// Engine configuration
    pub config: MarmotConfig,
}

/// Provider implementation for OpenMLS that integrates with Nostr.
///
/// MLS protocol state (key material, ratchet trees, group state) lives in
/// the OpenMLS rust-crypto provider. The Nostr-facing state lives in the
/// generic `Storage`, which the engine reaches through [`Marmot`] accessors.
#[derive(Debug, Default)]
pub struct MarmotProvider<Storage>
where
    Storage: MarmotStorageProvider,
{
    mls: OpenMlsRustCrypto,
    storage: Storage,
}

impl<Storage> OpenMlsProvider for MarmotProvider<Storage>
where
    Storage: MarmotStorageProvider,
{
    type CryptoProvider = <OpenMlsRustCrypto as OpenMlsProvider>::CryptoProvider;
    type RandProvider = <OpenMlsRustCrypto as OpenMlsProvider>::RandProvider;
    type StorageProvider = <OpenMlsRustCrypto as OpenMlsProvider>::StorageProvider;

    fn storage(&self) -> &Self::StorageProvider {
        self.mls.storage()
    }

    fn crypto(&self) -> &Self::CryptoProvider {
        self.mls.crypto()
    }

    fn rand(&self) -> &Self::RandProvider {
        self.mls.rand()
    }
}

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Create a builder for constructing a Marmot instance
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use burrow_marmot::Marmot;
    /// # use burrow_marmot_memory::MarmotMemoryStorage;
    /// let marmot = Marmot::builder(MarmotMemoryStorage::default()).build();
    /// ```
    pub fn builder(storage: Storage) -> MarmotBuilder<Storage> {
        MarmotBuilder::new(storage)
    }

    /// Construct a new Marmot instance with default configuration
    pub fn new(storage: Storage) -> Self {
        Self::builder(storage).build()
    }

    /// Get MLS capabilities with GREASE values for extensibility.
    ///
    /// GREASE (Generate Random Extensions And Sustain Extensibility) values
    /// are injected into capabilities as per RFC 9420 Section 13.5 so that
    /// peers correctly handle unknown values.
    #[inline]
    pub(crate) fn capabilities(&self) -> Capabilities {
        Capabilities::new(
            None,
            Some(&[self.ciphersuite]),
            Some(&self.extensions),
            None,
            None,
        )
        .with_grease(self.provider.crypto())
    }

    /// Get the group's required capabilities extension
    #[inline]
    pub(crate) fn required_capabilities_extension(&self) -> Extension {
        Extension::RequiredCapabilities(RequiredCapabilitiesExtension::new(
            &GROUP_CONTEXT_REQUIRED_EXTENSIONS,
            &[],
            &[],
        ))
    }

    /// Get the ciphersuite value formatted for Nostr tags (hex with 0x prefix)
    pub(crate) fn ciphersuite_value(&self) -> String {
        self.ciphersuite.to_nostr_tag()
    }

    /// Get the extensions value formatted for Nostr tags (array of hex values)
    pub(crate) fn extensions_value(&self) -> Vec<String> {
        self.extensions.iter().map(|e| e.to_nostr_tag()).collect()
    }

    /// Get the Nostr-facing storage provider
    pub(crate) fn storage(&self) -> &Storage {
        &self.provider.storage
    }
}
