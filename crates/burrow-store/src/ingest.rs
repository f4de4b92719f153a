//! The writer pool.
//!
//! Raw event JSON flows through a bounded channel to a fixed set of writer
//! threads. Each event gets its own write transaction; a malformed or
//! invalid event is logged and skipped, it never stalls the pool.
//! Committed events are offered to live subscriptions by the worker that
//! stored them.

use std::sync::Arc;

use burrow_codec::Event;
use burrow_kernel::{Channel, ChannelError, WaitGroup, spawn_worker};

use crate::backend::{Backend, WriteOutcome};
use crate::error::StoreError;
use crate::subscription::Subscriptions;

/// Queued events before `submit` blocks.
const QUEUE_CAPACITY: usize = 1024;

pub(crate) struct Ingester {
    queue: Arc<Channel<String>>,
    wg: WaitGroup,
}

impl Ingester {
    /// Spawns `threads` writer workers over `backend`.
    pub(crate) fn spawn(
        backend: Arc<dyn Backend>,
        subs: Arc<Subscriptions>,
        threads: usize,
        skip_validation: bool,
    ) -> std::io::Result<Self> {
        let queue = Arc::new(Channel::bounded(QUEUE_CAPACITY));
        let wg = WaitGroup::new();
        for i in 0..threads.max(1) {
            let queue = Arc::clone(&queue);
            let backend = Arc::clone(&backend);
            let subs = Arc::clone(&subs);
            spawn_worker(&wg, &format!("burrow-writer-{i}"), move || {
                writer_loop(queue, backend, subs, skip_validation);
            })?;
        }
        Ok(Self { queue, wg })
    }

    /// Queues one event, blocking while the queue is full.
    pub(crate) fn submit(&self, json: String) -> Result<(), StoreError> {
        self.queue
            .send(json)
            .map_err(|_: ChannelError| StoreError::Ingest("store is closed".into()))
    }

    /// Closes the queue and waits for the workers to drain it.
    pub(crate) fn shutdown(&self) {
        self.queue.close();
        self.wg.wait();
    }
}

fn writer_loop(
    queue: Arc<Channel<String>>,
    backend: Arc<dyn Backend>,
    subs: Arc<Subscriptions>,
    skip_validation: bool,
) {
    while let Ok(json) = queue.recv() {
        match backend.write_event(&json, skip_validation) {
            Ok(WriteOutcome::Stored { json, .. }) => match Event::from_json(&json) {
                Ok(event) => subs.dispatch(&event, &json),
                Err(e) => {
                    tracing::warn!(target: "burrow_store::ingest", error = %e, "stored event failed to reparse");
                }
            },
            Ok(WriteOutcome::Duplicate) => {
                tracing::debug!(target: "burrow_store::ingest", "duplicate event skipped");
            }
            Err(e) => {
                tracing::warn!(target: "burrow_store::ingest", error = %e, "event rejected");
            }
        }
    }
}
