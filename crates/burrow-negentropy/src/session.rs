//! The reconciliation session state machine.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::bound::{Bound, Prefix};
use crate::datasource::{Datasource, snapshot};
use crate::error::Error;
use crate::fingerprint::Accumulator;
use crate::message::{Payload, Range, decode_message, encode_message};

/// Caps bounding a session's work.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Maximum ranges per message, sent and accepted.
    pub max_ranges: usize,
    /// Threshold below which a range resolves by explicit id list.
    pub max_idlist_items: usize,
    /// Hard stop on processed peer messages.
    pub max_round_trips: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_ranges: 16,
            max_idlist_items: 20,
            max_round_trips: 32,
        }
    }
}

/// Counters surfaced to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Binary bytes emitted.
    pub bytes_sent: u64,
    /// Binary bytes consumed.
    pub bytes_received: u64,
    /// Peer messages processed.
    pub rounds: u64,
    /// Range bounds emitted.
    pub ranges_sent: u64,
    /// Range bounds consumed.
    pub ranges_received: u64,
    /// Ids emitted inside id lists.
    pub ids_sent: u64,
    /// Ids consumed from peer id lists.
    pub ids_received: u64,
    /// Skip responses for matched ranges.
    pub skips_sent: u64,
    /// Id-list payloads emitted.
    pub idlists_sent: u64,
}

/// What this side last said about a prefix. Guards against id-list
/// ping-pong and distinguishes peer answers from peer probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SentKind {
    Fingerprint,
    IdList,
    Reconciled,
}

type PrefixKey = (u16, [u8; 32]);

fn key_of(prefix: &Prefix) -> PrefixKey {
    (prefix.bit_len(), *prefix.bytes())
}

/// A reconciliation session over one datasource.
///
/// Not thread-safe; one caller drives it at a time. Malformed peer input
/// returns an error and leaves the session usable.
pub struct Session<D: Datasource> {
    source: D,
    opts: SessionOptions,
    stats: Stats,
    /// Split children that did not fit the current message.
    pending: VecDeque<Prefix>,
    /// Response assembled by the last `handle_peer`.
    prepared: Vec<Range>,
    need_ids: Vec<[u8; 32]>,
    need_set: HashSet<[u8; 32]>,
    sent: HashMap<PrefixKey, SentKind>,
    complete: bool,
}

impl<D: Datasource> Session<D> {
    /// Creates a session over `source`.
    pub fn new(source: D, opts: SessionOptions) -> Self {
        Self {
            source,
            opts,
            stats: Stats::default(),
            pending: VecDeque::new(),
            prepared: Vec::new(),
            need_ids: Vec::new(),
            need_set: HashSet::new(),
            sent: HashMap::new(),
            complete: false,
        }
    }

    /// Ids the peer holds and this side does not, in arrival order.
    pub fn need_ids(&self) -> &[[u8; 32]] {
        &self.need_ids
    }

    /// Session counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Whether the exchange reached a fixed point or the round budget.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Builds the opening message: one all-covering bound carrying the
    /// fingerprint of the full local set.
    pub fn build_initial(&mut self) -> Result<String, Error> {
        let items = snapshot(&mut self.source)?;
        let mut acc = Accumulator::new();
        for item in &items {
            acc.add(&item.id);
        }
        let root = Prefix::root();
        self.sent.insert(key_of(&root), SentKind::Fingerprint);
        self.emit(vec![Range {
            bound: Bound::everything(),
            payload: Payload::Fingerprint(acc.fingerprint()),
        }])
    }

    /// Consumes one peer message and prepares the response for the next
    /// [`build_next`](Session::build_next).
    pub fn handle_peer(&mut self, msg_hex: &str) -> Result<(), Error> {
        let buf = hex::decode(msg_hex.trim())
            .map_err(|e| Error::invalid(format!("bad hex: {e}")))?;
        self.stats.bytes_received += buf.len() as u64;
        let ranges = decode_message(&buf, self.opts.max_ranges)?;
        self.stats.rounds += 1;
        self.stats.ranges_received += ranges.len() as u64;

        let items = snapshot(&mut self.source)?;
        let local: HashSet<[u8; 32]> = items.iter().map(|it| it.id).collect();

        let mut splits: Vec<Prefix> = Vec::new();
        let mut skips: Vec<Range> = Vec::new();
        let mut idlists: Vec<Range> = Vec::new();
        let mut echoes: Vec<Range> = Vec::new();

        for range in ranges {
            let prefix = range.bound.prefix;
            let key = key_of(&prefix);
            let in_range: Vec<[u8; 32]> = items
                .iter()
                .filter(|it| prefix.matches(&it.id))
                .map(|it| it.id)
                .collect();
            match range.payload {
                Payload::Skip => {
                    // An answer to something we sent needs no reply; a fresh
                    // prefix is a probe from a peer split.
                    if !self.sent.contains_key(&key) {
                        let mut acc = Accumulator::new();
                        for id in &in_range {
                            acc.add(id);
                        }
                        echoes.push(Range {
                            bound: Bound::for_prefix(prefix),
                            payload: Payload::Fingerprint(acc.fingerprint()),
                        });
                        self.sent.insert(key, SentKind::Fingerprint);
                    }
                }
                Payload::Fingerprint(peer_fp) => {
                    let mut acc = Accumulator::new();
                    for id in &in_range {
                        acc.add(id);
                    }
                    if acc.fingerprint() == peer_fp {
                        self.stats.skips_sent += 1;
                        skips.push(Range {
                            bound: Bound::for_prefix(prefix),
                            payload: Payload::Skip,
                        });
                        self.sent.insert(key, SentKind::Reconciled);
                    } else if in_range.len() <= self.opts.max_idlist_items
                        || prefix.child(false).is_none()
                    {
                        idlists.push(self.idlist_range(prefix, in_range));
                    } else {
                        self.push_split(&prefix, &mut splits);
                    }
                }
                Payload::IdList(peer_ids) => {
                    self.stats.ids_received += peer_ids.len() as u64;
                    for id in &peer_ids {
                        if !local.contains(id) && self.need_set.insert(*id) {
                            self.need_ids.push(*id);
                        }
                    }
                    match self.sent.get(&key) {
                        Some(SentKind::IdList) | Some(SentKind::Reconciled) => {
                            // Both sides listed this range; nothing left.
                            self.stats.skips_sent += 1;
                            skips.push(Range {
                                bound: Bound::for_prefix(prefix),
                                payload: Payload::Skip,
                            });
                            self.sent.insert(key, SentKind::Reconciled);
                        }
                        _ if in_range.len() <= self.opts.max_idlist_items => {
                            idlists.push(self.idlist_range(prefix, in_range));
                        }
                        _ => self.push_split(&prefix, &mut splits),
                    }
                }
            }
        }

        // Preference order: split children, then skips, then id lists, then
        // echoed fingerprints. Overflow past the range cap waits in pending.
        let mut response = Vec::new();
        for prefix in splits {
            if response.len() < self.opts.max_ranges {
                response.push(Range {
                    bound: Bound::for_prefix(prefix),
                    payload: Payload::Skip,
                });
            } else {
                self.pending.push_back(prefix);
            }
        }
        for range in skips.into_iter().chain(idlists).chain(echoes) {
            if response.len() < self.opts.max_ranges {
                response.push(range);
            } else {
                self.pending.push_back(range.bound.prefix);
            }
        }
        self.prepared = response;
        Ok(())
    }

    /// Emits the prepared response plus drained pending ranges, or the
    /// empty string when reconciliation is done.
    pub fn build_next(&mut self) -> Result<String, Error> {
        if self.stats.rounds >= self.opts.max_round_trips {
            tracing::debug!(
                target: "burrow_negentropy::session",
                rounds = self.stats.rounds,
                "round budget exhausted, declaring incomplete"
            );
            self.complete = true;
            return Ok(String::new());
        }
        let mut out = std::mem::take(&mut self.prepared);
        while out.len() < self.opts.max_ranges {
            let Some(prefix) = self.pending.pop_front() else {
                break;
            };
            out.push(Range {
                bound: Bound::for_prefix(prefix),
                payload: Payload::Skip,
            });
        }
        if out.is_empty() {
            self.complete = true;
            return Ok(String::new());
        }
        self.emit(out)
    }

    fn idlist_range(&mut self, prefix: Prefix, mut ids: Vec<[u8; 32]>) -> Range {
        ids.truncate(self.opts.max_idlist_items);
        self.sent.insert(key_of(&prefix), SentKind::IdList);
        Range {
            bound: Bound::for_prefix(prefix),
            payload: Payload::IdList(ids),
        }
    }

    fn push_split(&self, prefix: &Prefix, splits: &mut Vec<Prefix>) {
        // child() only fails at full depth, which the callers rule out.
        if let (Some(zero), Some(one)) = (prefix.child(false), prefix.child(true)) {
            splits.push(zero);
            splits.push(one);
        }
    }

    fn emit(&mut self, ranges: Vec<Range>) -> Result<String, Error> {
        self.stats.ranges_sent += ranges.len() as u64;
        for range in &ranges {
            if let Payload::IdList(ids) = &range.payload {
                self.stats.idlists_sent += 1;
                self.stats.ids_sent += ids.len() as u64;
            }
        }
        let buf = encode_message(&ranges);
        self.stats.bytes_sent += buf.len() as u64;
        Ok(hex::encode(buf))
    }
}
