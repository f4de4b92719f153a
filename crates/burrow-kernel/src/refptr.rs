//! Ref-counted pointers with one-shot destructor closures.
//!
//! Unlike [`Arc`], the count here is driven explicitly through
//! [`RefPtr::retain`] and [`RefPtr::release`] and a destructor closure fires
//! exactly once when the count reaches zero, on the releasing thread. Memory
//! reclamation itself stays with `Arc`; the destructor models teardown of
//! the owned resource.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

type Destructor<T> = Box<dyn FnOnce(&T) + Send>;

struct RefInner<T> {
    value: T,
    count: AtomicUsize,
    dtor: Mutex<Option<Destructor<T>>>,
}

/// A shared value with an explicit reference count and destructor.
pub struct RefPtr<T> {
    inner: Arc<RefInner<T>>,
}

impl<T> Clone for RefPtr<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> RefPtr<T> {
    /// Wraps `value` with count 1 and the given destructor.
    pub fn new<F>(value: T, dtor: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        Self {
            inner: Arc::new(RefInner {
                value,
                count: AtomicUsize::new(1),
                dtor: Mutex::new(Some(Box::new(dtor))),
            }),
        }
    }

    /// Increments the count.
    ///
    /// # Panics
    ///
    /// Panics when the count already reached zero; resurrecting a released
    /// value is a programmer error.
    pub fn retain(&self) {
        let prev = self.inner.count.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "RefPtr::retain after release to zero");
    }

    /// Decrements the count; at zero the destructor fires exactly once.
    ///
    /// Returns `true` when this call ran the destructor.
    ///
    /// # Panics
    ///
    /// Panics on release below zero.
    pub fn release(&self) -> bool {
        let prev = self.inner.count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "RefPtr::release on a zero count");
        if prev == 1 {
            // The Option take makes the destructor one-shot even if a racing
            // caller misuses the count.
            if let Some(dtor) = self.inner.dtor.lock().take() {
                dtor(&self.inner.value);
                return true;
            }
        }
        false
    }

    /// Current count. Test and diagnostics aid; racy by nature.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }
}

impl<T> Deref for RefPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    #[test]
    fn destructor_fires_once_at_zero() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let ptr = RefPtr::new(42u32, move |v| {
            assert_eq!(*v, 42);
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        ptr.retain();
        assert!(!ptr.release());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(ptr.release());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_retain_release_single_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let ptr = RefPtr::new((), move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let ptr = ptr.clone();
                thread::spawn(move || {
                    ptr.retain();
                    ptr.release();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(ptr.release());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "zero count")]
    fn release_below_zero_panics() {
        let ptr = RefPtr::new((), |_| {});
        ptr.release();
        ptr.release();
    }
}
