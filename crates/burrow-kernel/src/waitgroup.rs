//! Wait groups for joining pools of workers.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct WgInner {
    count: Mutex<usize>,
    cv: Condvar,
}

/// A counter that callers can wait on until it returns to zero.
///
/// `add` before spawning work, `done` when each unit finishes, `wait` to
/// block until everything completed. Waiting on a zeroed group returns
/// immediately.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<WgInner>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    /// Creates an empty wait group.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WgInner {
                count: Mutex::new(0),
                cv: Condvar::new(),
            }),
        }
    }

    /// Raises the counter by `n`.
    pub fn add(&self, n: usize) {
        *self.inner.count.lock() += n;
    }

    /// Lowers the counter by one, waking waiters at zero.
    ///
    /// # Panics
    ///
    /// Panics when called on a zero counter; that is a programmer error.
    pub fn done(&self) {
        let mut count = self.inner.count.lock();
        assert!(*count > 0, "WaitGroup::done on a zero counter");
        *count -= 1;
        if *count == 0 {
            self.inner.cv.notify_all();
        }
    }

    /// Blocks until the counter reaches zero.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock();
        while *count > 0 {
            self.inner.cv.wait(&mut count);
        }
    }

    /// Registers one unit of work and returns a guard that calls [`done`]
    /// when dropped, including on panic.
    ///
    /// [`done`]: WaitGroup::done
    pub fn guard(&self) -> WaitGroupGuard {
        self.add(1);
        WaitGroupGuard { wg: self.clone() }
    }
}

/// RAII counterpart to [`WaitGroup::done`].
pub struct WaitGroupGuard {
    wg: WaitGroup,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        self.wg.done();
    }
}
