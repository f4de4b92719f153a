//! Bounded FIFO channels with close semantics
//!
//! A [`Channel`] carries opaque values between threads with a fixed capacity.
//! Capacity zero is a rendezvous channel: `send` completes only once a
//! receiver has taken the value. Closing is idempotent and wakes every
//! waiter; buffered values remain receivable after close.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Error returned by channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel was closed. Sends fail immediately; receives fail once
    /// the buffer has drained.
    #[error("channel closed")]
    Closed,
    /// A non-blocking operation could not complete without waiting.
    #[error("operation would block")]
    WouldBlock,
}

struct Inner<T> {
    buf: VecDeque<T>,
    closed: bool,
    recv_waiters: usize,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    send_cv: Condvar,
    recv_cv: Condvar,
    capacity: usize,
}

/// A bounded multi-producer multi-consumer FIFO channel.
///
/// Handles are cheap to clone and share one ring. Values are delivered FIFO
/// with respect to a single sender; there is no global ordering across
/// senders.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    /// Creates a channel with capacity `capacity`.
    ///
    /// Capacity zero yields rendezvous behavior: every `send` blocks until a
    /// receiver takes the value.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    buf: VecDeque::new(),
                    closed: false,
                    recv_waiters: 0,
                }),
                send_cv: Condvar::new(),
                recv_cv: Condvar::new(),
                capacity,
            }),
        }
    }

    fn slot_limit(&self) -> usize {
        // Rendezvous channels stage at most one in-flight value.
        self.shared.capacity.max(1)
    }

    /// Sends a value, blocking while the channel is full.
    ///
    /// Returns [`ChannelError::Closed`] if the channel is or becomes closed
    /// before the value is accepted.
    pub fn send(&self, value: T) -> Result<(), ChannelError> {
        let limit = self.slot_limit();
        let mut inner = self.shared.inner.lock();
        loop {
            if inner.closed {
                return Err(ChannelError::Closed);
            }
            if inner.buf.len() < limit {
                inner.buf.push_back(value);
                self.shared.recv_cv.notify_one();
                if self.shared.capacity == 0 {
                    // Rendezvous: hold the sender until the value is taken.
                    while !inner.buf.is_empty() && !inner.closed {
                        self.shared.send_cv.wait(&mut inner);
                    }
                }
                return Ok(());
            }
            self.shared.send_cv.wait(&mut inner);
        }
    }

    /// Non-blocking send.
    ///
    /// Fails with [`ChannelError::WouldBlock`] when the channel is full, or
    /// for a rendezvous channel when no receiver is currently waiting.
    pub fn try_send(&self, value: T) -> Result<(), ChannelError> {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return Err(ChannelError::Closed);
        }
        if self.shared.capacity == 0 {
            if inner.recv_waiters == 0 || !inner.buf.is_empty() {
                return Err(ChannelError::WouldBlock);
            }
        } else if inner.buf.len() >= self.shared.capacity {
            return Err(ChannelError::WouldBlock);
        }
        inner.buf.push_back(value);
        self.shared.recv_cv.notify_one();
        Ok(())
    }

    /// Receives the next value, blocking while the channel is empty.
    ///
    /// After close, buffered values drain first; once empty, receives fail
    /// with [`ChannelError::Closed`].
    pub fn recv(&self) -> Result<T, ChannelError> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(value) = inner.buf.pop_front() {
                self.shared.send_cv.notify_one();
                return Ok(value);
            }
            if inner.closed {
                return Err(ChannelError::Closed);
            }
            inner.recv_waiters += 1;
            self.shared.recv_cv.wait(&mut inner);
            inner.recv_waiters -= 1;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T, ChannelError> {
        let mut inner = self.shared.inner.lock();
        if let Some(value) = inner.buf.pop_front() {
            self.shared.send_cv.notify_one();
            return Ok(value);
        }
        if inner.closed {
            Err(ChannelError::Closed)
        } else {
            Err(ChannelError::WouldBlock)
        }
    }

    /// Closes the channel, waking all waiters. Idempotent.
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.shared.send_cv.notify_all();
        self.shared.recv_cv.notify_all();
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().buf.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
