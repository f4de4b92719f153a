//! Public prelude
//!
//! Re-exports the types most callers need. External dependencies such as
//! `nostr` and `openmls` should be imported directly.
//!
//! ## Usage
//!
//! ```rust
//! use burrow_marmot::prelude::*;
//! use burrow_marmot_memory::MarmotMemoryStorage;
//! use nostr::{EventBuilder, Keys, Kind}; // Import nostr types directly
//!
//! let marmot = Marmot::new(MarmotMemoryStorage::default());
//! ```

// === Core types ===
/// Error type
pub use crate::Error;
/// The main entry point for Marmot protocol operations
pub use crate::Marmot;
/// Runtime configuration knobs
pub use crate::MarmotConfig;
/// OpenMLS provider integration
pub use crate::MarmotProvider;
/// MLS group identifier
pub use burrow_marmot_storage::GroupId;

// === Operation results ===
/// Nostr group data extension
pub use crate::extension::NostrGroupDataExtension;
/// Group operation results
pub use crate::groups::{GroupResult, NostrGroupConfigData, UpdateGroupResult};
/// Options for create_message_with_options
pub use crate::messages::CreateMessageOptions;
/// Message processing result variants
pub use crate::messages::MessageProcessingResult;
/// Welcome preview returned before joining a group
pub use crate::welcomes::WelcomePreview;

// === Storage traits (users need these to provide storage implementations) ===
pub use burrow_marmot_storage::{Backend, MarmotStorageProvider, Pagination};

// === Storage type aliases ===
pub use burrow_marmot_storage::groups::types as group_types;
pub use burrow_marmot_storage::messages::types as message_types;
pub use burrow_marmot_storage::welcomes::types as welcome_types;
