//! Concurrency primitives for the burrow stack
//!
//! This crate provides the scheduling and synchronization building blocks the
//! other burrow crates are built on: bounded FIFO channels with close
//! semantics, wait groups, a tree-shaped cancellation context, periodic
//! tickers and ref-counted pointers with destructor closures. The model is
//! parallel OS threads with cooperative suspension at channel operations and
//! context waits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod channel;
pub mod context;
pub mod refptr;
pub mod ticker;
pub mod waitgroup;

pub use self::channel::{Channel, ChannelError};
pub use self::context::{CancelHandle, Context, ContextError};
pub use self::refptr::RefPtr;
pub use self::ticker::Ticker;
pub use self::waitgroup::{WaitGroup, WaitGroupGuard};

use std::thread::{self, JoinHandle};

/// Spawns a worker thread tied to a wait group.
///
/// The group is incremented before the thread starts and decremented when the
/// closure returns, even if it panics. Callers typically `wait()` on the
/// group to join a pool of workers.
pub fn spawn_worker<F>(wg: &WaitGroup, name: &str, f: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let guard = wg.guard();
    thread::Builder::new().name(name.to_owned()).spawn(move || {
        let _guard = guard;
        f();
    })
}
