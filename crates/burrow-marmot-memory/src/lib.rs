#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;

use burrow_marmot_storage::groups::types::{Group, GroupExporterSecret, GroupRelay};
use burrow_marmot_storage::messages::types::{Message, ProcessedMessage};
use burrow_marmot_storage::welcomes::types::{ProcessedWelcome, Welcome};
use burrow_marmot_storage::{Backend, GroupId, MarmotStorageProvider};
use lru::LruCache;
use nostr::EventId;
use parking_lot::RwLock;

mod groups;
mod messages;
mod welcomes;

/// Retained exporter secrets across all groups before LRU eviction.
const EXPORTER_SECRET_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(v) => v,
    None => panic!("cache size must be non-zero"),
};

struct Inner {
    groups: HashMap<GroupId, Group>,
    groups_by_nostr_id: HashMap<[u8; 32], GroupId>,
    group_relays: HashMap<GroupId, BTreeSet<GroupRelay>>,
    exporter_secrets: LruCache<(GroupId, u64), GroupExporterSecret>,
    messages: HashMap<GroupId, HashMap<EventId, Message>>,
    processed_messages: HashMap<EventId, ProcessedMessage>,
    welcomes: HashMap<EventId, Welcome>,
    processed_welcomes: HashMap<EventId, ProcessedWelcome>,
}

/// Volatile storage backend.
pub struct MarmotMemoryStorage {
    inner: RwLock<Inner>,
}

impl MarmotMemoryStorage {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                groups: HashMap::new(),
                groups_by_nostr_id: HashMap::new(),
                group_relays: HashMap::new(),
                exporter_secrets: LruCache::new(EXPORTER_SECRET_CACHE_SIZE),
                messages: HashMap::new(),
                processed_messages: HashMap::new(),
                welcomes: HashMap::new(),
                processed_welcomes: HashMap::new(),
            }),
        }
    }
}

impl Default for MarmotMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MarmotStorageProvider for MarmotMemoryStorage {
    fn backend(&self) -> Backend {
        Backend::Memory
    }
}
