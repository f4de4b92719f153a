#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod backend;
pub mod datasource;
pub mod error;
mod ingest;
pub mod lmdb;
pub mod memory;
pub mod options;
mod subscription;

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use burrow_codec::envelope;
use burrow_codec::{Event, Filter};
use burrow_negentropy::{Session, SessionOptions};

pub use self::backend::{Backend, WriteOutcome};
pub use self::datasource::StoreDatasource;
pub use self::error::StoreError;
pub use self::options::{Order, StoreOptions, TextSearchConfig};

use self::ingest::Ingester;
use self::lmdb::LmdbBackend;
use self::memory::MemoryBackend;
use self::subscription::Subscriptions;

/// Scope guard for a cached read transaction on the calling thread.
///
/// Dropping the token releases the reference. The token is deliberately
/// not `Send`: the cached transaction belongs to the thread that began it.
pub struct QueryToken<'a> {
    store: &'a Store,
    _not_send: PhantomData<*const ()>,
}

impl Drop for QueryToken<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.backend.end_query() {
            tracing::debug!(target: "burrow_store", error = %e, "end_query on drop failed");
        }
    }
}

/// An embedded event store.
///
/// Writes flow through a channel-fed writer pool; reads run against a
/// per-thread cached LMDB read transaction. The handle is cheap to share
/// behind an [`Arc`].
pub struct Store {
    backend: Arc<dyn Backend>,
    subs: Arc<Subscriptions>,
    ingester: Ingester,
    closed: AtomicBool,
}

impl Store {
    /// Opens an LMDB-backed store at `path` with default options.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Opens an LMDB-backed store at `path`.
    pub fn open_with(path: &Path, opts: StoreOptions) -> Result<Self, StoreError> {
        let backend = Arc::new(LmdbBackend::open(path, &opts)?);
        Self::from_backend(backend, opts)
    }

    /// Opens an ephemeral in-memory store, mainly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_backend(Arc::new(MemoryBackend::new()), StoreOptions::default())
    }

    /// Opens a store by backend name. `"lmdb"` opens a database directory
    /// at `path`; `"memory"` ignores `path`. Any other name fails with
    /// [`StoreError::BackendNotFound`].
    pub fn open_backend(name: &str, path: &Path, opts: StoreOptions) -> Result<Self, StoreError> {
        match name {
            "lmdb" => {
                let backend = Arc::new(LmdbBackend::open(path, &opts)?);
                Self::from_backend(backend, opts)
            }
            "memory" => Self::from_backend(Arc::new(MemoryBackend::new()), opts),
            other => Err(StoreError::BackendNotFound(other.to_owned())),
        }
    }

    fn from_backend(backend: Arc<dyn Backend>, opts: StoreOptions) -> Result<Self, StoreError> {
        let subs = Arc::new(Subscriptions::new());
        let ingester = Ingester::spawn(
            Arc::clone(&backend),
            Arc::clone(&subs),
            opts.ingester_threads,
            opts.ingest_skip_validation,
        )
        .map_err(|e| StoreError::DbOpen(format!("writer pool: {e}")))?;
        tracing::info!(
            target: "burrow_store",
            backend = backend.name(),
            writers = opts.ingester_threads.max(1),
            "store opened"
        );
        Ok(Self {
            backend,
            subs,
            ingester,
            closed: AtomicBool::new(false),
        })
    }

    /// Backend name, `"lmdb"` or `"memory"`.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Queues one event for ingestion. Accepts a bare event object or a
    /// relay `["EVENT", subid, {...}]` envelope; a missing `tags` field is
    /// normalized to `[]`. `relay_hint` names the relay the event was seen
    /// on and is traced for provenance. Returns once the event is queued,
    /// not once it is committed.
    pub fn ingest_event(&self, json: &str, relay_hint: Option<&str>) -> Result<(), StoreError> {
        let raw = envelope::extract_event_json(json)
            .map_err(|e| StoreError::Ingest(e.to_string()))?;
        let normalized =
            envelope::normalize_tags(raw).map_err(|e| StoreError::Ingest(e.to_string()))?;
        if let Some(relay) = relay_hint {
            tracing::trace!(target: "burrow_store", relay, "queueing event seen on relay");
        }
        self.ingester.submit(normalized.into_owned())
    }

    /// Writes one event on the calling thread, bypassing the pool. Useful
    /// when the caller needs the outcome before its next read.
    pub fn ingest_event_sync(&self, json: &str) -> Result<WriteOutcome, StoreError> {
        let raw = envelope::extract_event_json(json)
            .map_err(|e| StoreError::Ingest(e.to_string()))?;
        let normalized =
            envelope::normalize_tags(raw).map_err(|e| StoreError::Ingest(e.to_string()))?;
        let outcome = self.backend.write_event(&normalized, false)?;
        if let WriteOutcome::Stored { json, .. } = &outcome {
            match Event::from_json(json) {
                Ok(event) => self.subs.dispatch(&event, json),
                Err(e) => {
                    tracing::warn!(target: "burrow_store", error = %e, "stored event failed to reparse");
                }
            }
        }
        Ok(outcome)
    }

    /// Queues every line of a line-delimited JSON buffer. Blank lines are
    /// skipped; a malformed line aborts with its error. `relay_hint`
    /// applies to every line. Returns the number of queued events.
    pub fn ingest_ldjson(&self, buf: &str, relay_hint: Option<&str>) -> Result<usize, StoreError> {
        let mut queued = 0usize;
        for line in envelope::iter_ldjson(buf) {
            let line = line.map_err(|e| StoreError::Ingest(e.to_string()))?;
            self.ingest_event(line, relay_hint)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Pins this thread's cached read transaction until the returned token
    /// drops. Nested calls on the same thread share one snapshot.
    pub fn begin_query(&self) -> Result<QueryToken<'_>, StoreError> {
        self.backend.begin_query()?;
        Ok(QueryToken {
            store: self,
            _not_send: PhantomData,
        })
    }

    /// Releases `token`. Equivalent to dropping it.
    pub fn end_query(&self, token: QueryToken<'_>) {
        drop(token);
    }

    /// Runs a filter set and returns matching event JSON, newest first,
    /// deduplicated across filters.
    pub fn query(&self, filters: &[Filter]) -> Result<Vec<String>, StoreError> {
        self.backend.query(filters)
    }

    /// Like [`query`](Self::query) but takes a JSON filter array (or a
    /// single filter object).
    pub fn query_json(&self, filters_json: &str) -> Result<Vec<String>, StoreError> {
        let parts =
            envelope::split_filters(filters_json).map_err(|e| StoreError::Query(e.to_string()))?;
        let mut filters = Vec::with_capacity(parts.len());
        for part in parts {
            filters.push(Filter::from_json(part).map_err(|e| StoreError::Query(e.to_string()))?);
        }
        self.query(&filters)
    }

    /// Full-text search over event content. Terms are conjunctive.
    pub fn text_search(
        &self,
        query: &str,
        cfg: &TextSearchConfig,
    ) -> Result<Vec<String>, StoreError> {
        self.backend.text_search(query, cfg)
    }

    /// Fetches one event by exact id.
    pub fn get_note_by_id(&self, id: &[u8; 32]) -> Result<String, StoreError> {
        self.backend.get_note_by_id(id)
    }

    /// Fetches the latest kind-0 profile event for `pubkey`.
    pub fn get_profile_by_pubkey(&self, pubkey: &[u8; 32]) -> Result<String, StoreError> {
        self.backend.get_profile_by_pubkey(pubkey)
    }

    /// Store statistics as a JSON object.
    pub fn stat_json(&self) -> String {
        self.backend.stat_json()
    }

    /// Registers a live subscription over `filters`.
    pub fn subscribe(&self, filters: Vec<Filter>) -> u64 {
        self.subs.subscribe(filters)
    }

    /// Drains up to `max` queued events for a subscription, oldest first.
    pub fn poll(&self, sub_id: u64, max: usize) -> Vec<String> {
        self.subs.poll(sub_id, max)
    }

    /// Removes a subscription. Returns false for unknown ids.
    pub fn unsubscribe(&self, sub_id: u64) -> bool {
        self.subs.unsubscribe(sub_id)
    }

    /// Closes this thread's cached read transaction if it is unreferenced,
    /// forcing the next query onto a fresh snapshot.
    pub fn invalidate_txn_cache(&self) {
        self.backend.invalidate_txn_cache();
    }

    /// Builds a reconciliation session over the store's full `(created_at,
    /// id)` set.
    pub fn reconcile_session(&self, opts: SessionOptions) -> Session<StoreDatasource> {
        Session::new(StoreDatasource::new(Arc::clone(&self.backend)), opts)
    }

    /// Shuts the store down: drains the writer pool, closes this thread's
    /// cached transaction and tears the backend down. Idempotent; further
    /// ingests fail with [`StoreError::Ingest`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ingester.shutdown();
        self.backend.force_close_txn_cache();
        self.backend.shutdown();
        tracing::info!(target: "burrow_store", backend = self.backend.name(), "store closed");
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use burrow_codec::test_support::make_event;

    use super::*;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn event_json(kind: u16, created_at: u64, content: &str) -> String {
        make_event(kind, created_at, content, vec![])
            .as_json()
            .unwrap()
    }

    fn wait_for_count(store: &Store, filter: &Filter, want: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let got = store.query(std::slice::from_ref(filter)).unwrap();
            if got.len() >= want {
                return got;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {want} events");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn ingest_then_query_returns_newest_first() {
        let (_dir, store) = open_temp();
        store.ingest_event(&event_json(1, 100, "first"), None).unwrap();
        store.ingest_event(&event_json(1, 300, "third"), None).unwrap();
        store.ingest_event(&event_json(1, 200, "second"), None).unwrap();

        let mut filter = Filter::default();
        filter.kinds = Some(vec![1]);
        let got = wait_for_count(&store, &filter, 3);
        assert_eq!(got.len(), 3);
        assert!(got[0].contains("third"));
        assert!(got[2].contains("first"));
        store.close();
    }

    #[test]
    fn ingest_is_idempotent_on_id() {
        let (_dir, store) = open_temp();
        let json = event_json(1, 100, "only once");
        assert!(matches!(
            store.ingest_event_sync(&json).unwrap(),
            WriteOutcome::Stored { .. }
        ));
        assert!(matches!(
            store.ingest_event_sync(&json).unwrap(),
            WriteOutcome::Duplicate
        ));
        let stats: serde_json::Value = serde_json::from_str(&store.stat_json()).unwrap();
        assert_eq!(stats["notes"], 1);
    }

    #[test]
    fn envelope_and_missing_tags_are_normalized() {
        let (_dir, store) = open_temp();
        let event = make_event(1, 100, "wrapped", vec![]);
        let bare = event.as_json().unwrap();
        // Strip the tags field and wrap in a relay envelope.
        let no_tags = bare.replace(",\"tags\":[]", "");
        assert!(!no_tags.contains("tags"));
        let line = format!("[\"EVENT\",\"sub1\",{no_tags}]");
        assert!(matches!(
            store.ingest_event_sync(&line).unwrap(),
            WriteOutcome::Stored { .. }
        ));
        let stored = store.get_note_by_id(&event.id).unwrap();
        assert!(stored.contains("\"tags\":[]"));
    }

    #[test]
    fn invalid_id_is_rejected() {
        let (_dir, store) = open_temp();
        let mut event = make_event(1, 100, "tampered", vec![]);
        event.content = "altered after hashing".into();
        let err = store.ingest_event_sync(&event.as_json().unwrap());
        assert!(matches!(err, Err(StoreError::Ingest(_))));
    }

    #[test]
    fn query_filters_compose_and_dedupe() {
        let (_dir, store) = open_temp();
        store.ingest_event_sync(&event_json(1, 100, "note a")).unwrap();
        store.ingest_event_sync(&event_json(7, 200, "reaction")).unwrap();
        store.ingest_event_sync(&event_json(1, 300, "note b")).unwrap();

        let mut kind1 = Filter::default();
        kind1.kinds = Some(vec![1]);
        let mut recent = Filter::default();
        recent.since = Some(150);
        // "note b" matches both filters but must appear once.
        let got = store.query(&[kind1, recent]).unwrap();
        assert_eq!(got.len(), 3);

        let mut limited = Filter::default();
        limited.kinds = Some(vec![1]);
        limited.limit = Some(1);
        let got = store.query(&[limited]).unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].contains("note b"));
    }

    #[test]
    fn query_json_accepts_filter_array() {
        let (_dir, store) = open_temp();
        store.ingest_event_sync(&event_json(1, 100, "hello")).unwrap();
        let got = store.query_json(r#"[{"kinds":[1],"limit":10}]"#).unwrap();
        assert_eq!(got.len(), 1);
        assert!(store.query_json(r#"[{"kinds":[9]}]"#).unwrap().is_empty());
    }

    #[test]
    fn zero_limit_yields_nothing() {
        let (_dir, store) = open_temp();
        store.ingest_event_sync(&event_json(1, 100, "hidden")).unwrap();
        let mut filter = Filter::default();
        filter.limit = Some(0);
        assert!(store.query(&[filter]).unwrap().is_empty());
    }

    #[test]
    fn text_search_is_conjunctive() {
        let (_dir, store) = open_temp();
        store
            .ingest_event_sync(&event_json(1, 100, "rust systems programming"))
            .unwrap();
        store
            .ingest_event_sync(&event_json(1, 200, "rust web frameworks"))
            .unwrap();

        let cfg = TextSearchConfig::default();
        let got = store.text_search("rust systems", &cfg).unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].contains("systems"));

        let got = store.text_search("rust", &cfg).unwrap();
        assert_eq!(got.len(), 2);
        // Default order is newest first.
        assert!(got[0].contains("web"));

        assert!(store.text_search("absent", &cfg).unwrap().is_empty());
    }

    #[test]
    fn profile_lookup_returns_latest_kind0() {
        let (_dir, store) = open_temp();
        let old = make_event(0, 100, r"old profile", vec![]);
        let new = make_event(0, 200, r"new profile", vec![]);
        store.ingest_event_sync(&old.as_json().unwrap()).unwrap();
        store.ingest_event_sync(&new.as_json().unwrap()).unwrap();
        // make_event uses a fixed pubkey, so both rows share one author.
        let got = store.get_profile_by_pubkey(&new.pubkey).unwrap();
        assert!(got.contains("new profile"));
        assert!(matches!(
            store.get_profile_by_pubkey(&[0u8; 32]),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn get_note_by_id_round_trips() {
        let (_dir, store) = open_temp();
        let event = make_event(1, 100, "lookup me", vec![]);
        store.ingest_event_sync(&event.as_json().unwrap()).unwrap();
        let got = store.get_note_by_id(&event.id).unwrap();
        assert_eq!(got, event.as_json().unwrap());
        assert!(matches!(
            store.get_note_by_id(&[0xab; 32]),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn nested_query_tokens_share_a_snapshot() {
        let (_dir, store) = open_temp();
        store.ingest_event_sync(&event_json(1, 100, "before")).unwrap();

        let outer = store.begin_query().unwrap();
        let inner = store.begin_query().unwrap();
        let mut filter = Filter::default();
        filter.kinds = Some(vec![1]);
        assert_eq!(store.query(std::slice::from_ref(&filter)).unwrap().len(), 1);
        store.end_query(inner);
        // The outer token still pins the snapshot.
        assert_eq!(store.query(std::slice::from_ref(&filter)).unwrap().len(), 1);
        store.end_query(outer);
    }

    #[test]
    fn pinned_snapshot_ignores_later_writes() {
        let (_dir, store) = open_temp();
        store.ingest_event_sync(&event_json(1, 100, "visible")).unwrap();

        let token = store.begin_query().unwrap();
        let mut filter = Filter::default();
        filter.kinds = Some(vec![1]);
        assert_eq!(store.query(std::slice::from_ref(&filter)).unwrap().len(), 1);

        // Write from another thread so the writer does not touch this
        // thread's cached read transaction.
        std::thread::scope(|s| {
            s.spawn(|| {
                store.ingest_event_sync(&event_json(1, 200, "after pin")).unwrap();
            });
        });

        assert_eq!(
            store.query(std::slice::from_ref(&filter)).unwrap().len(),
            1,
            "pinned snapshot must not see the later write"
        );
        store.end_query(token);

        store.invalidate_txn_cache();
        assert_eq!(store.query(std::slice::from_ref(&filter)).unwrap().len(), 2);
    }

    #[test]
    fn ldjson_ingest_counts_lines() {
        let (_dir, store) = open_temp();
        let buf = format!(
            "{}\n\n{}\n",
            event_json(1, 100, "line one"),
            event_json(1, 200, "line two")
        );
        assert_eq!(store.ingest_ldjson(&buf, None).unwrap(), 2);
        let mut filter = Filter::default();
        filter.kinds = Some(vec![1]);
        let got = wait_for_count(&store, &filter, 2);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn subscriptions_see_pool_committed_events() {
        let (_dir, store) = open_temp();
        let mut filter = Filter::default();
        filter.kinds = Some(vec![1]);
        let sub = store.subscribe(vec![filter.clone()]);

        store.ingest_event(&event_json(1, 100, "live"), None).unwrap();
        store.ingest_event(&event_json(7, 100, "filtered out"), None).unwrap();
        wait_for_count(&store, &Filter::default(), 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = Vec::new();
        while got.is_empty() && Instant::now() < deadline {
            got = store.poll(sub, 10);
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(got.len(), 1);
        assert!(got[0].contains("live"));
        assert!(store.unsubscribe(sub));
    }

    #[test]
    fn close_rejects_further_ingest() {
        let (_dir, store) = open_temp();
        store.close();
        store.close();
        assert!(matches!(
            store.ingest_event(&event_json(1, 100, "late"), None),
            Err(StoreError::Ingest(_))
        ));
    }

    #[test]
    fn reconcile_sessions_converge_between_stores() {
        let (_dir_a, a) = open_temp();
        let (_dir_b, b) = open_temp();
        for i in 0..10u64 {
            let json = event_json(1, 100 + i, &format!("shared {i}"));
            a.ingest_event_sync(&json).unwrap();
            b.ingest_event_sync(&json).unwrap();
        }
        let only_b = make_event(1, 500, "only on b", vec![]);
        b.ingest_event_sync(&only_b.as_json().unwrap()).unwrap();

        let mut client = a.reconcile_session(SessionOptions::default());
        let mut server = b.reconcile_session(SessionOptions::default());
        let mut msg = client.build_initial().unwrap();
        for _ in 0..64 {
            server.handle_peer(&msg).unwrap();
            let reply = server.build_next().unwrap();
            if reply.is_empty() {
                break;
            }
            client.handle_peer(&reply).unwrap();
            msg = client.build_next().unwrap();
            if msg.is_empty() {
                break;
            }
        }
        let needed: Vec<_> = client
            .need_ids()
            .iter()
            .chain(server.need_ids())
            .copied()
            .collect();
        assert_eq!(needed, vec![only_b.id]);
    }

    #[test]
    fn stat_json_reports_tables() {
        let (_dir, store) = open_temp();
        store.ingest_event_sync(&event_json(1, 100, "a note")).unwrap();
        store.ingest_event_sync(&event_json(0, 100, "a profile")).unwrap();
        let stats: serde_json::Value = serde_json::from_str(&store.stat_json()).unwrap();
        assert_eq!(stats["backend"], "lmdb");
        assert_eq!(stats["notes"], 2);
        assert_eq!(stats["profiles"], 1);
        assert_eq!(stats["kinds"]["1"], 1);
        assert!(stats["total_bytes"].as_u64().unwrap() > 0);
    }

    #[test]
    fn open_backend_dispatches_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_backend("lmdb", dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.backend_name(), "lmdb");
        store.close();

        let store = Store::open_backend("memory", dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.backend_name(), "memory");

        let err = Store::open_backend("sqlite", dir.path(), StoreOptions::default());
        assert!(matches!(err, Err(StoreError::BackendNotFound(name)) if name == "sqlite"));
    }

    #[test]
    fn relay_hint_is_accepted_on_ingest() {
        let (_dir, store) = open_temp();
        store
            .ingest_event(&event_json(1, 100, "hinted"), Some("wss://relay.example.com"))
            .unwrap();
        let buf = format!("{}\n", event_json(1, 200, "hinted line"));
        assert_eq!(
            store.ingest_ldjson(&buf, Some("wss://relay.example.com")).unwrap(),
            1
        );
        let mut filter = Filter::default();
        filter.kinds = Some(vec![1]);
        let got = wait_for_count(&store, &filter, 2);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn map_full_surfaces_out_of_memory() {
        let dir = tempfile::tempdir().unwrap();
        let opts = StoreOptions {
            mapsize: 64 * 1024,
            ..StoreOptions::default()
        };
        let store = Store::open_backend("lmdb", dir.path(), opts).unwrap();
        let filler = "x".repeat(512);
        let mut saw_oom = false;
        for i in 0..2000u64 {
            match store.ingest_event_sync(&event_json(1, i, &filler)) {
                Ok(_) => {}
                Err(StoreError::OutOfMemory) => {
                    saw_oom = true;
                    break;
                }
                Err(other) => panic!("unexpected error filling the map: {other}"),
            }
        }
        assert!(saw_oom, "a 64 KiB map never reported out of memory");
    }

    #[test]
    fn memory_backend_mirrors_lmdb_semantics() {
        let store = Store::in_memory().unwrap();
        store.ingest_event_sync(&event_json(1, 100, "memories")).unwrap();
        assert_eq!(store.backend_name(), "memory");
        let mut filter = Filter::default();
        filter.kinds = Some(vec![1]);
        assert_eq!(store.query(&[filter]).unwrap().len(), 1);
        let got = store
            .text_search("memories", &TextSearchConfig::default())
            .unwrap();
        assert_eq!(got.len(), 1);
    }
}
