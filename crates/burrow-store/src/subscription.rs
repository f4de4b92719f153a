//! Live query subscriptions.
//!
//! A subscription registers a filter set and accumulates matching events
//! as the writer pool commits them. Consumers drain with
//! [`Subscriptions::poll`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use burrow_codec::{Event, Filter};
use parking_lot::Mutex;

/// Queued events per subscription before the oldest are dropped.
const MAX_QUEUED: usize = 1024;

struct Sub {
    filters: Vec<Filter>,
    queue: VecDeque<String>,
}

/// Subscription registry shared between the store handle and the writer
/// pool.
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: AtomicU64,
    subs: Mutex<HashMap<u64, Sub>>,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subs: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn subscribe(&self, filters: Vec<Filter>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.lock().insert(
            id,
            Sub {
                filters,
                queue: VecDeque::new(),
            },
        );
        id
    }

    /// Removes the subscription. Returns false for unknown ids.
    pub(crate) fn unsubscribe(&self, id: u64) -> bool {
        self.subs.lock().remove(&id).is_some()
    }

    /// Drains up to `max` queued events for `id`, oldest first.
    pub(crate) fn poll(&self, id: u64, max: usize) -> Vec<String> {
        let mut subs = self.subs.lock();
        let Some(sub) = subs.get_mut(&id) else {
            return Vec::new();
        };
        let take = max.min(sub.queue.len());
        sub.queue.drain(..take).collect()
    }

    /// Offers a freshly committed event to every subscription.
    pub(crate) fn dispatch(&self, event: &Event, json: &str) {
        let mut subs = self.subs.lock();
        for (id, sub) in subs.iter_mut() {
            if sub.filters.iter().any(|f| f.matches(event)) {
                if sub.queue.len() >= MAX_QUEUED {
                    tracing::warn!(
                        target: "burrow_store::sub",
                        sub = id,
                        "subscription queue full, dropping oldest event"
                    );
                    sub.queue.pop_front();
                }
                sub.queue.push_back(json.to_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_codec::test_support::make_event;

    #[test]
    fn dispatch_routes_by_filter() {
        let subs = Subscriptions::new();
        let mut wanted = Filter::default();
        wanted.kinds = Some(vec![1]);
        let mut unwanted = Filter::default();
        unwanted.kinds = Some(vec![7]);
        let a = subs.subscribe(vec![wanted]);
        let b = subs.subscribe(vec![unwanted]);

        let event = make_event(1, 100, "hello", vec![]);
        let json = event.as_json().unwrap();
        subs.dispatch(&event, &json);

        assert_eq!(subs.poll(a, 10).len(), 1);
        assert!(subs.poll(b, 10).is_empty());
    }

    #[test]
    fn poll_drains_in_order_and_respects_max() {
        let subs = Subscriptions::new();
        let id = subs.subscribe(vec![Filter::default()]);
        for i in 0..3u64 {
            let event = make_event(1, 100 + i, &format!("n{i}"), vec![]);
            subs.dispatch(&event, &event.as_json().unwrap());
        }
        let first = subs.poll(id, 2);
        assert_eq!(first.len(), 2);
        assert!(first[0].contains("n0"));
        assert_eq!(subs.poll(id, 10).len(), 1);
        assert!(subs.poll(id, 10).is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let subs = Subscriptions::new();
        let id = subs.subscribe(vec![Filter::default()]);
        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        let event = make_event(1, 1, "late", vec![]);
        subs.dispatch(&event, &event.as_json().unwrap());
        assert!(subs.poll(id, 10).is_empty());
    }
}
