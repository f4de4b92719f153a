//! Periodic signal source over a channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::Channel;

/// Sends `()` on its channel every interval from a background thread.
///
/// Ticks are coalesced under receiver backpressure (the channel holds at
/// most one pending tick); drift is not bounded. [`stop`](Ticker::stop) is
/// idempotent, joins the thread and closes the channel. Dropping the ticker
/// stops it.
pub struct Ticker {
    chan: Channel<()>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawns the ticker thread.
    pub fn new(interval: Duration) -> Self {
        let chan = Channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_chan = chan.clone();
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("ticker".to_owned())
            .spawn(move || {
                loop {
                    thread::sleep(interval);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    // Full buffer means the receiver is behind; coalesce.
                    match thread_chan.try_send(()) {
                        Ok(()) => {}
                        Err(crate::ChannelError::WouldBlock) => {}
                        Err(crate::ChannelError::Closed) => break,
                    }
                }
            })
            .ok();
        if handle.is_none() {
            tracing::warn!(target: "burrow_kernel::ticker", "failed to spawn ticker thread");
            chan.close();
        }
        Self { chan, stop, handle }
    }

    /// The channel ticks are delivered on.
    pub fn channel(&self) -> &Channel<()> {
        &self.chan
    }

    /// Stops the ticker: joins the thread and closes the channel.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.chan.close();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
