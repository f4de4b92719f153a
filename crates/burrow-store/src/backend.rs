//! The backend capability set.

use burrow_codec::Filter;
use burrow_negentropy::Item;

use crate::error::StoreError;
use crate::options::TextSearchConfig;

/// Outcome of writing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Freshly stored; carries the id and the stored JSON for
    /// subscription dispatch.
    Stored {
        /// Event id.
        id: [u8; 32],
        /// Stored event JSON.
        json: String,
    },
    /// Already present; ingest is idempotent on id.
    Duplicate,
}

/// Sealed capability set every store driver implements.
///
/// Reader operations run against the per-thread transaction state the
/// driver manages internally; callers bracket them with
/// `begin_query`/`end_query`.
pub trait Backend: Send + Sync {
    /// Driver name as registered with [`Store::open`](crate::Store::open).
    fn name(&self) -> &'static str;

    /// Acquires (or references) this thread's read transaction.
    fn begin_query(&self) -> Result<(), StoreError>;

    /// Releases one reference on this thread's read transaction.
    fn end_query(&self) -> Result<(), StoreError>;

    /// Writes one normalized event. Idempotent on id.
    fn write_event(&self, json: &str, skip_validation: bool) -> Result<WriteOutcome, StoreError>;

    /// Runs parsed filters, returning event JSON newest-first.
    fn query(&self, filters: &[Filter]) -> Result<Vec<String>, StoreError>;

    /// Word-intersection full-text search.
    fn text_search(&self, query: &str, cfg: &TextSearchConfig) -> Result<Vec<String>, StoreError>;

    /// Direct note lookup by id.
    fn get_note_by_id(&self, id: &[u8; 32]) -> Result<String, StoreError>;

    /// Latest kind-0 for `pubkey`.
    fn get_profile_by_pubkey(&self, pubkey: &[u8; 32]) -> Result<String, StoreError>;

    /// Backend statistics as JSON.
    fn stat_json(&self) -> String;

    /// Closes this thread's cached transaction if unreferenced.
    fn invalidate_txn_cache(&self);

    /// Closes this thread's cached transaction unconditionally.
    fn force_close_txn_cache(&self);

    /// `(created_at, id)` pairs for negentropy reconciliation.
    fn reconcile_items(&self) -> Result<Vec<Item>, StoreError>;

    /// Publishes teardown; called once before the store drops the driver.
    fn shutdown(&self);
}
