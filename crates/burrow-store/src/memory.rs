//! In-memory driver. Linear scans instead of index tables; useful for
//! tests and ephemeral stores.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use burrow_codec::{Event, Filter};
use burrow_negentropy::Item;
use parking_lot::RwLock;

use crate::backend::{Backend, WriteOutcome};
use crate::error::StoreError;
use crate::options::{Order, TextSearchConfig};

#[derive(Default)]
struct Tables {
    /// id -> (created_at, kind, pubkey, json)
    notes: BTreeMap<[u8; 32], (u64, u16, [u8; 32], String)>,
    /// pubkey -> (created_at, note id) of the latest kind 0
    profiles: BTreeMap<[u8; 32], (u64, [u8; 32])>,
}

/// Heap-backed store driver.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    total_bytes: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn begin_query(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn end_query(&self) -> Result<(), StoreError> {
        Ok(())
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
        let mut tables = self.tables.write();
        if tables.notes.contains_key(&event.id) {
            return Ok(WriteOutcome::Duplicate);
        }
        tables.notes.insert(
            event.id,
            (event.created_at, event.kind, event.pubkey, json.to_owned()),
        );
        if event.kind == 0 {
            let newer = tables
                .profiles
                .get(&event.pubkey)
                .is_none_or(|(ts, _)| *ts < event.created_at);
            if newer {
                tables
                    .profiles
                    .insert(event.pubkey, (event.created_at, event.id));
            }
        }
        self.total_bytes
            .fetch_add(json.len() as u64, Ordering::Relaxed);
        Ok(WriteOutcome::Stored {
            id: event.id,
            json: json.to_owned(),
        })
    }

    fn query(&self, filters: &[Filter]) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read();
        let mut merged: BTreeMap<[u8; 32], (u64, String)> = BTreeMap::new();
        for filter in filters {
            let limit = match filter.limit {
                Some(0) => continue,
                Some(n) => n as usize,
                None => usize::MAX,
            };
            let mut hits: Vec<(u64, [u8; 32], String)> = Vec::new();
            for (id, (created_at, _, _, json)) in tables.notes.iter() {
                let event = Event::from_json(json).map_err(|e| StoreError::Query(e.to_string()))?;
                if filter.matches(&event) {
                    hits.push((*created_at, *id, json.clone()));
                }
            }
            hits.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
            hits.truncate(limit);
            for (ts, id, json) in hits {
                merged.entry(id).or_insert((ts, json));
            }
        }
        let mut out: Vec<(u64, [u8; 32], String)> = merged
            .into_iter()
            .map(|(id, (ts, json))| (ts, id, json))
            .collect();
        out.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(out.into_iter().map(|(_, _, json)| json).collect())
    }

    fn text_search(&self, query: &str, cfg: &TextSearchConfig) -> Result<Vec<String>, StoreError> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 2)
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let tables = self.tables.read();
        let mut hits: Vec<(u64, [u8; 32], String)> = Vec::new();
        for (id, (created_at, _, _, json)) in tables.notes.iter() {
            let event =
                Event::from_json(json).map_err(|e| StoreError::TextSearch(e.to_string()))?;
            let content = event.content.to_lowercase();
            if terms.iter().all(|t| content.contains(t.as_str())) {
                hits.push((*created_at, *id, json.clone()));
            }
        }
        hits.sort_unstable_by(|a, b| match cfg.order {
            Order::Asc => a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)),
            Order::Desc => b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)),
        });
        hits.truncate(cfg.limit);
        Ok(hits.into_iter().map(|(_, _, json)| json).collect())
    }

    fn get_note_by_id(&self, id: &[u8; 32]) -> Result<String, StoreError> {
        self.tables
            .read()
            .notes
            .get(id)
            .map(|(_, _, _, json)| json.clone())
            .ok_or(StoreError::NotFound)
    }

    fn get_profile_by_pubkey(&self, pubkey: &[u8; 32]) -> Result<String, StoreError> {
        let tables = self.tables.read();
        let (_, id) = tables.profiles.get(pubkey).ok_or(StoreError::NotFound)?;
        tables
            .notes
            .get(id)
            .map(|(_, _, _, json)| json.clone())
            .ok_or(StoreError::NotFound)
    }

    fn stat_json(&self) -> String {
        let tables = self.tables.read();
        let mut kinds: BTreeMap<String, u64> = BTreeMap::new();
        for (_, kind, _, _) in tables.notes.values() {
            *kinds.entry(kind.to_string()).or_default() += 1;
        }
        serde_json::json!({
            "total_entries": tables.notes.len() + tables.profiles.len(),
            "total_bytes": self.total_bytes.load(Ordering::Relaxed),
            "notes": tables.notes.len(),
            "profiles": tables.profiles.len(),
            "kinds": kinds,
            "backend": "memory",
        })
        .to_string()
    }

    fn invalidate_txn_cache(&self) {}

    fn force_close_txn_cache(&self) {}

    fn reconcile_items(&self) -> Result<Vec<Item>, StoreError> {
        let tables = self.tables.read();
        let mut items: Vec<Item> = tables
            .notes
            .iter()
            .map(|(id, (ts, _, _, _))| Item::new(*ts, *id))
            .collect();
        items.sort_unstable_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }

    fn shutdown(&self) {}
}
