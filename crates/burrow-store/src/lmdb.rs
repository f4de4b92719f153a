//! The LMDB driver.
//!
//! Tables: `notes` (id to event JSON), `profiles` (pubkey to latest kind-0
//! pointer), `kind_index` ((kind, created_at, id) keys), `time_index`
//! ((created_at, id) keys) and `words` (token postings for full-text
//! search). Readers go through a per-thread cached transaction with
//! explicit reference counting; see [`begin_query`](LmdbBackend::begin_query).

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use burrow_codec::{Event, Filter};
use burrow_negentropy::Item;
use heed::types::{Bytes, Unit};
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use crate::backend::{Backend, WriteOutcome};
use crate::error::StoreError;
use crate::options::{Order, StoreOptions, TextSearchConfig};

/// LMDB's usual reader-table limit.
const MAX_READERS: u32 = 126;
/// Reuse window for an unreferenced cached transaction.
const TXN_REUSE_WINDOW: Duration = Duration::from_secs(2);
/// Begin retry policy: 10 ms doubling, capped at 200 ms, 50 attempts.
const BEGIN_RETRY_BASE: Duration = Duration::from_millis(10);
const BEGIN_RETRY_CAP: Duration = Duration::from_millis(200);
const BEGIN_RETRY_ATTEMPTS: u32 = 50;
/// Per-event serialization cap.
const MAX_EVENT_JSON: usize = 32 * 1024 * 1024;

static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

struct CachedTxn {
    txn: Option<Rc<RoTxn<'static>>>,
    refcount: usize,
    /// Original acquisition time; nested begins do not refresh it, so the
    /// transaction closes within a bounded window and stops pinning pages.
    last_used: Instant,
    alive: Arc<AtomicBool>,
}

impl Drop for CachedTxn {
    fn drop(&mut self) {
        // Thread-exit hook: after backend teardown only free the handle,
        // never touch the underlying environment.
        if !self.alive.load(Ordering::Acquire) {
            if let Some(txn) = self.txn.take() {
                std::mem::forget(txn);
            }
        }
    }
}

thread_local! {
    static TXN_CACHES: RefCell<HashMap<u64, CachedTxn>> = RefCell::new(HashMap::new());
}

/// LMDB-backed store driver.
pub struct LmdbBackend {
    id: u64,
    env: Env,
    alive: Arc<AtomicBool>,
    mapsize: usize,
    notes: Database<Bytes, Bytes>,
    profiles: Database<Bytes, Bytes>,
    kind_index: Database<Bytes, Unit>,
    time_index: Database<Bytes, Unit>,
    words: Database<Bytes, Unit>,
    total_bytes: AtomicU64,
}

impl LmdbBackend {
    /// Opens or creates the database directory.
    // heed marks env open unsafe: opening one path twice in a process
    // corrupts the map. The `Store` constructors own the path they pass.
    #[allow(unsafe_code)]
    pub fn open(path: &Path, opts: &StoreOptions) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)
            .map_err(|e| StoreError::DbOpen(format!("create {}: {e}", path.display())))?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(opts.mapsize)
                .max_dbs(5)
                .max_readers(MAX_READERS)
                .open(path)
        }
        .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let mut wtxn = env
            .write_txn()
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let notes = env
            .create_database(&mut wtxn, Some("notes"))
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let profiles = env
            .create_database(&mut wtxn, Some("profiles"))
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let kind_index = env
            .create_database(&mut wtxn, Some("kind_index"))
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let time_index = env
            .create_database(&mut wtxn, Some("time_index"))
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let words = env
            .create_database(&mut wtxn, Some("words"))
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let backend = Self {
            id: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            env,
            alive: Arc::new(AtomicBool::new(true)),
            mapsize: opts.mapsize,
            notes,
            profiles,
            kind_index,
            time_index,
            words,
            total_bytes: AtomicU64::new(0),
        };
        backend.restore_total_bytes()?;
        Ok(backend)
    }

    fn restore_total_bytes(&self) -> Result<(), StoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        let mut total = 0u64;
        let iter = self
            .notes
            .iter(&rtxn)
            .map_err(|e| StoreError::DbOpen(e.to_string()))?;
        for entry in iter {
            let (_, json) = entry.map_err(|e| StoreError::DbOpen(e.to_string()))?;
            total += json.len() as u64;
        }
        self.total_bytes.store(total, Ordering::Relaxed);
        Ok(())
    }

    /// Opens a fresh read transaction, retrying transient contention
    /// (reader-table exhaustion) with exponential backoff.
    fn open_read_txn(&self) -> Result<RoTxn<'static>, StoreError> {
        let mut delay = BEGIN_RETRY_BASE;
        let mut last_err = String::new();
        for attempt in 0..BEGIN_RETRY_ATTEMPTS {
            match self.env.clone().static_read_txn() {
                Ok(txn) => return Ok(txn),
                Err(e) => {
                    last_err = e.to_string();
                    tracing::warn!(
                        target: "burrow_store::txn",
                        attempt,
                        error = %last_err,
                        "read txn begin failed, backing off"
                    );
                    thread::sleep(delay);
                    delay = (delay * 2).min(BEGIN_RETRY_CAP);
                }
            }
        }
        Err(StoreError::DbTxn(last_err))
    }

    /// Runs `f` inside this thread's cached read transaction.
    fn with_txn<R>(
        &self,
        f: impl FnOnce(&RoTxn<'static>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.begin_query()?;
        let txn = TXN_CACHES
            .with(|caches| caches.borrow().get(&self.id).and_then(|e| e.txn.clone()))
            .ok_or_else(|| StoreError::DbTxn("cached txn missing after begin".into()))?;
        let result = f(&txn);
        let _ = self.end_query();
        result
    }

    fn load_note(&self, txn: &RoTxn<'_>, id: &[u8; 32]) -> Result<Option<String>, StoreError> {
        let Some(json) = self
            .notes
            .get(txn, id)
            .map_err(|e| StoreError::Query(e.to_string()))?
        else {
            return Ok(None);
        };
        if json.len() > MAX_EVENT_JSON {
            return Err(StoreError::Query(format!(
                "event {} exceeds the 32 MiB serialization cap",
                hex::encode(id)
            )));
        }
        let json = std::str::from_utf8(json)
            .map_err(|e| StoreError::Query(format!("stored note is not utf-8: {e}")))?;
        Ok(Some(json.to_owned()))
    }

    /// Collects `(created_at, id, json)` matches for one filter,
    /// newest-first, capped by the filter's limit.
    fn run_filter(
        &self,
        txn: &RoTxn<'_>,
        filter: &Filter,
    ) -> Result<Vec<(u64, [u8; 32], String)>, StoreError> {
        let limit = match filter.limit {
            Some(0) => return Ok(Vec::new()),
            Some(n) => n as usize,
            None => usize::MAX,
        };
        let mut matches: Vec<(u64, [u8; 32], String)> = Vec::new();

        if let Some(ids) = &filter.ids {
            for prefix in ids {
                for (id, json) in self.scan_id_prefix(txn, prefix)? {
                    push_if_match(filter, id, json, &mut matches)?;
                }
            }
        } else if let Some(kinds) = &filter.kinds {
            for kind in kinds {
                let lo = kind_key(*kind, filter.since.unwrap_or(0), &[0u8; 32]);
                let hi = kind_key_upper(*kind, filter.until);
                let iter = self
                    .kind_index
                    .rev_range(txn, &(Bound::Included(lo.as_slice()), Bound::Excluded(hi.as_slice())))
                    .map_err(|e| StoreError::Query(e.to_string()))?;
                let mut taken = 0usize;
                for entry in iter {
                    if taken >= limit {
                        break;
                    }
                    let (key, ()) = entry.map_err(|e| StoreError::Query(e.to_string()))?;
                    let id = id_from_key(&key[10..]);
                    if let Some(json) = self.load_note(txn, &id)?
                        && push_if_match(filter, id, json, &mut matches)?
                    {
                        taken += 1;
                    }
                }
            }
        } else {
            let lo = time_key(filter.since.unwrap_or(0), &[0u8; 32]);
            let hi = time_key_upper(filter.until);
            let iter = self
                .time_index
                .rev_range(txn, &(Bound::Included(lo.as_slice()), Bound::Excluded(hi.as_slice())))
                .map_err(|e| StoreError::Query(e.to_string()))?;
            for entry in iter {
                if matches.len() >= limit {
                    break;
                }
                let (key, ()) = entry.map_err(|e| StoreError::Query(e.to_string()))?;
                let id = id_from_key(&key[8..]);
                if let Some(json) = self.load_note(txn, &id)? {
                    push_if_match(filter, id, json, &mut matches)?;
                }
            }
        }

        matches.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        matches.truncate(limit);
        Ok(matches)
    }

    fn scan_id_prefix(
        &self,
        txn: &RoTxn<'_>,
        prefix: &str,
    ) -> Result<Vec<([u8; 32], String)>, StoreError> {
        let mut out = Vec::new();
        if prefix.len() == 64 {
            let id = burrow_codec::hex_util::decode_id("id", prefix)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            if let Some(json) = self.load_note(txn, &id)? {
                out.push((id, json));
            }
            return Ok(out);
        }
        // Whole-byte range scan; the residual hex-prefix check happens in
        // Filter::matches.
        let lo = hex::decode(&prefix[..prefix.len() - prefix.len() % 2])
            .map_err(|e| StoreError::Query(format!("bad id prefix: {e}")))?;
        let mut hi = lo.clone();
        loop {
            match hi.pop() {
                Some(0xff) => continue,
                Some(b) => {
                    hi.push(b + 1);
                    break;
                }
                None => {
                    // Prefix was all 0xff; scan to the end of the table.
                    hi = vec![0xff; 33];
                    break;
                }
            }
        }
        let iter = self
            .notes
            .range(txn, &(Bound::Included(lo.as_slice()), Bound::Excluded(hi.as_slice())))
            .map_err(|e| StoreError::Query(e.to_string()))?;
        for entry in iter {
            let (id, json) = entry.map_err(|e| StoreError::Query(e.to_string()))?;
            let id = id_from_key(id);
            if let Some(json) = std::str::from_utf8(json).ok().map(str::to_owned) {
                out.push((id, json));
            }
        }
        Ok(out)
    }
}

/// Parses `json`, applies the residual filter check and appends on match.
/// Returns whether the event was kept.
fn push_if_match(
    filter: &Filter,
    id: [u8; 32],
    json: String,
    out: &mut Vec<(u64, [u8; 32], String)>,
) -> Result<bool, StoreError> {
    let event = Event::from_json(&json).map_err(|e| StoreError::Query(e.to_string()))?;
    if filter.matches(&event) {
        out.push((event.created_at, id, json));
        return Ok(true);
    }
    Ok(false)
}

// Key builders. Indexes order big-endian so lexicographic scans follow
// numeric order.

fn time_key(created_at: u64, id: &[u8; 32]) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&created_at.to_be_bytes());
    key[8..].copy_from_slice(id);
    key
}

fn time_key_upper(until: Option<u64>) -> [u8; 40] {
    time_key(until.unwrap_or(u64::MAX).saturating_add(1), &[0u8; 32])
}

fn kind_key(kind: u16, created_at: u64, id: &[u8; 32]) -> [u8; 42] {
    let mut key = [0u8; 42];
    key[..2].copy_from_slice(&kind.to_be_bytes());
    key[2..10].copy_from_slice(&created_at.to_be_bytes());
    key[10..].copy_from_slice(id);
    key
}

fn kind_key_upper(kind: u16, until: Option<u64>) -> [u8; 42] {
    match until {
        Some(until) if until < u64::MAX => kind_key(kind, until + 1, &[0u8; 32]),
        _ => {
            let mut key = [0u8; 42];
            match kind.checked_add(1) {
                Some(next) => key[..2].copy_from_slice(&next.to_be_bytes()),
                None => key = [0xff; 42],
            }
            key
        }
    }
}

fn word_key(word: &str, created_at: u64, id: &[u8; 32]) -> Vec<u8> {
    let mut key = Vec::with_capacity(word.len() + 41);
    key.extend_from_slice(word.as_bytes());
    key.push(0);
    key.extend_from_slice(&created_at.to_be_bytes());
    key.extend_from_slice(id);
    key
}

/// Maps a write-path LMDB failure, surfacing a full map as
/// [`StoreError::OutOfMemory`].
fn write_err(e: heed::Error) -> StoreError {
    match e {
        heed::Error::Mdb(heed::MdbError::MapFull) => StoreError::OutOfMemory,
        other => StoreError::Ingest(other.to_string()),
    }
}

fn id_from_key(raw: &[u8]) -> [u8; 32] {
    let mut id = [0u8; 32];
    id.copy_from_slice(&raw[..32]);
    id
}

/// Lowercased alphanumeric tokens of at least two characters.
fn tokenize(content: &str) -> BTreeSet<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

impl Backend for LmdbBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    fn begin_query(&self) -> Result<(), StoreError> {
        TXN_CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let entry = caches.entry(self.id).or_insert_with(|| CachedTxn {
                txn: None,
                refcount: 0,
                last_used: Instant::now(),
                alive: Arc::clone(&self.alive),
            });
            if entry.refcount > 0 {
                // Nested begin on the same thread shares the snapshot and
                // does not refresh last_used.
                entry.refcount += 1;
                return Ok(());
            }
            let reusable =
                entry.txn.is_some() && entry.last_used.elapsed() < TXN_REUSE_WINDOW;
            if !reusable {
                entry.txn = None;
                entry.txn = Some(Rc::new(self.open_read_txn()?));
                entry.last_used = Instant::now();
            }
            entry.refcount = 1;
            Ok(())
        })
    }

    fn end_query(&self) -> Result<(), StoreError> {
        TXN_CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let entry = caches
                .get_mut(&self.id)
                .filter(|e| e.refcount > 0)
                .ok_or_else(|| StoreError::DbTxn("end_query without matching begin".into()))?;
            entry.refcount -= 1;
            Ok(())
        })
    }

    fn write_event(&self, json: &str, skip_validation: bool) -> Result<WriteOutcome, StoreError> {
        let event = Event::from_json(json).map_err(|e| StoreError::Ingest(e.to_string()))?;
        if !skip_validation
            && !event
                .verify_id()
                .map_err(|e| StoreError::Ingest(e.to_string()))?
        {
            return Err(StoreError::Ingest(format!(
                "id {} does not match content hash",
                hex::encode(event.id)
            )));
        }
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| StoreError::DbTxn(e.to_string()))?;
        let exists = self
            .notes
            .get(&wtxn, &event.id)
            .map_err(|e| StoreError::Ingest(e.to_string()))?
            .is_some();
        if exists {
            return Ok(WriteOutcome::Duplicate);
        }
        self.notes
            .put(&mut wtxn, &event.id, json.as_bytes())
            .map_err(write_err)?;
        self.time_index
            .put(&mut wtxn, &time_key(event.created_at, &event.id), &())
            .map_err(write_err)?;
        self.kind_index
            .put(
                &mut wtxn,
                &kind_key(event.kind, event.created_at, &event.id),
                &(),
            )
            .map_err(write_err)?;
        for word in tokenize(&event.content) {
            self.words
                .put(&mut wtxn, &word_key(&word, event.created_at, &event.id), &())
                .map_err(write_err)?;
        }
        if event.kind == 0 {
            let newer = match self
                .profiles
                .get(&wtxn, &event.pubkey)
                .map_err(|e| StoreError::Ingest(e.to_string()))?
            {
                Some(existing) => {
                    let mut ts = [0u8; 8];
                    ts.copy_from_slice(&existing[..8]);
                    u64::from_be_bytes(ts) < event.created_at
                }
                None => true,
            };
            if newer {
                let mut value = [0u8; 40];
                value[..8].copy_from_slice(&event.created_at.to_be_bytes());
                value[8..].copy_from_slice(&event.id);
                self.profiles
                    .put(&mut wtxn, &event.pubkey, &value)
                    .map_err(write_err)?;
            }
        }
        wtxn.commit().map_err(write_err)?;
        self.total_bytes
            .fetch_add(json.len() as u64, Ordering::Relaxed);
        Ok(WriteOutcome::Stored {
            id: event.id,
            json: json.to_owned(),
        })
    }

    fn query(&self, filters: &[Filter]) -> Result<Vec<String>, StoreError> {
        self.with_txn(|txn| {
            let mut seen: HashSet<[u8; 32]> = HashSet::new();
            let mut merged: Vec<(u64, [u8; 32], String)> = Vec::new();
            for filter in filters {
                for hit in self.run_filter(txn, filter)? {
                    if seen.insert(hit.1) {
                        merged.push(hit);
                    }
                }
            }
            merged.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
            Ok(merged.into_iter().map(|(_, _, json)| json).collect())
        })
    }

    fn text_search(&self, query: &str, cfg: &TextSearchConfig) -> Result<Vec<String>, StoreError> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.with_txn(|txn| {
            let mut postings: Option<HashMap<[u8; 32], u64>> = None;
            for term in &terms {
                let lo = word_key(term, 0, &[0u8; 32]);
                let mut hi: Vec<u8> = term.as_bytes().to_vec();
                hi.push(1);
                let iter = self
                    .words
                    .range(txn, &(Bound::Included(lo.as_slice()), Bound::Excluded(hi.as_slice())))
                    .map_err(|e| StoreError::TextSearch(e.to_string()))?;
                let mut hits: HashMap<[u8; 32], u64> = HashMap::new();
                for entry in iter {
                    let (key, ()) = entry.map_err(|e| StoreError::TextSearch(e.to_string()))?;
                    let rest = &key[term.len() + 1..];
                    let mut ts = [0u8; 8];
                    ts.copy_from_slice(&rest[..8]);
                    hits.insert(id_from_key(&rest[8..]), u64::from_be_bytes(ts));
                }
                postings = Some(match postings {
                    None => hits,
                    Some(prev) => prev
                        .into_iter()
                        .filter(|(id, _)| hits.contains_key(id))
                        .collect(),
                });
            }
            let mut ordered: Vec<([u8; 32], u64)> = postings
                .unwrap_or_default()
                .into_iter()
                .map(|(id, ts)| (id, ts))
                .collect();
            ordered.sort_unstable_by(|a, b| match cfg.order {
                Order::Asc => a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)),
                Order::Desc => b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)),
            });
            ordered.truncate(cfg.limit);
            let mut out = Vec::with_capacity(ordered.len());
            for (id, _) in ordered {
                if let Some(json) = self
                    .load_note(txn, &id)
                    .map_err(|e| StoreError::TextSearch(e.to_string()))?
                {
                    out.push(json);
                }
            }
            Ok(out)
        })
    }

    fn get_note_by_id(&self, id: &[u8; 32]) -> Result<String, StoreError> {
        self.with_txn(|txn| self.load_note(txn, id)?.ok_or(StoreError::NotFound))
    }

    fn get_profile_by_pubkey(&self, pubkey: &[u8; 32]) -> Result<String, StoreError> {
        self.with_txn(|txn| {
            let pointer = self
                .profiles
                .get(txn, pubkey)
                .map_err(|e| StoreError::Query(e.to_string()))?
                .ok_or(StoreError::NotFound)?;
            let id = id_from_key(&pointer[8..]);
            self.load_note(txn, &id)?.ok_or(StoreError::NotFound)
        })
    }

    fn stat_json(&self) -> String {
        let stats = self.with_txn(|txn| {
            let notes = self
                .notes
                .len(txn)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            let profiles = self
                .profiles
                .len(txn)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            let mut kinds: HashMap<u16, u64> = HashMap::new();
            let iter = self
                .kind_index
                .iter(txn)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            for entry in iter {
                let (key, ()) = entry.map_err(|e| StoreError::Query(e.to_string()))?;
                let kind = u16::from_be_bytes([key[0], key[1]]);
                *kinds.entry(kind).or_default() += 1;
            }
            Ok((notes, profiles, kinds))
        });
        match stats {
            Ok((notes, profiles, kinds)) => {
                let kinds: serde_json::Map<String, serde_json::Value> = kinds
                    .into_iter()
                    .map(|(k, n)| (k.to_string(), serde_json::Value::from(n)))
                    .collect();
                serde_json::json!({
                    "total_entries": notes + profiles,
                    "total_bytes": self.total_bytes.load(Ordering::Relaxed),
                    "notes": notes,
                    "profiles": profiles,
                    "kinds": kinds,
                    "backend": "lmdb",
                    "mapsize": self.mapsize,
                })
                .to_string()
            }
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        }
    }

    fn invalidate_txn_cache(&self) {
        TXN_CACHES.with(|caches| {
            if let Some(entry) = caches.borrow_mut().get_mut(&self.id) {
                if entry.refcount == 0 {
                    entry.txn = None;
                }
            }
        });
    }

    fn force_close_txn_cache(&self) {
        TXN_CACHES.with(|caches| {
            if let Some(entry) = caches.borrow_mut().get_mut(&self.id) {
                entry.txn = None;
                entry.refcount = 0;
            }
        });
    }

    fn reconcile_items(&self) -> Result<Vec<Item>, StoreError> {
        self.with_txn(|txn| {
            let mut items = Vec::new();
            let iter = self
                .time_index
                .iter(txn)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            for entry in iter {
                let (key, ()) = entry.map_err(|e| StoreError::Query(e.to_string()))?;
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&key[..8]);
                items.push(Item::new(u64::from_be_bytes(ts), id_from_key(&key[8..])));
            }
            Ok(items)
        })
    }

    fn shutdown(&self) {
        // Publish teardown before the environment drops so worker threads
        // exiting later skip the underlying close.
        self.alive.store(false, Ordering::Release);
        self.force_close_txn_cache();
    }
}
