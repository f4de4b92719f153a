#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod group_id;
pub mod groups;
pub mod messages;
pub mod secret;
pub mod welcomes;

pub use self::group_id::GroupId;
pub use self::secret::{Secret, Zeroize};

use self::groups::GroupStorage;
use self::messages::MessageStorage;
use self::welcomes::WelcomeStorage;

/// Storage backend discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Volatile in-process storage.
    Memory,
    /// LMDB-backed storage.
    Lmdb,
}

impl Backend {
    /// Whether data survives process restart. Everything except
    /// [`Backend::Memory`] is persistent.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

/// Default page size for paginated queries.
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Hard cap on a single page.
pub const MAX_PAGE_LIMIT: usize = 10_000;

/// Limit/offset pagination for message and welcome queries.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Maximum records to return; `None` means [`DEFAULT_PAGE_LIMIT`].
    pub limit: Option<usize>,
    /// Records to skip; `None` means 0.
    pub offset: Option<usize>,
}

impl Pagination {
    /// Creates a pagination window.
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self { limit, offset }
    }

    /// Effective limit.
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)
    }

    /// Effective offset.
    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: Some(DEFAULT_PAGE_LIMIT),
            offset: Some(0),
        }
    }
}

/// The combined storage surface the Marmot engine runs against.
///
/// Implementors persist group metadata, welcome records, messages and
/// processed-message dedup state. MLS-internal cryptographic state is
/// handled separately by the OpenMLS provider and is not part of this
/// trait.
pub trait MarmotStorageProvider: GroupStorage + MessageStorage + WelcomeStorage {
    /// Which backend this is.
    fn backend(&self) -> Backend;
}
