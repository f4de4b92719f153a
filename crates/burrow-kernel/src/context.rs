//! Hierarchical cancellation contexts with optional deadlines.
//!
//! Ownership is strictly tree-shaped: a child holds a strong reference to
//! its parent, parents hold weak references down to children. Cancellation
//! walks the tree depth-first and synchronously; child cancellation never
//! affects the parent.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Reason a context stopped being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context or one of its ancestors was explicitly canceled.
    #[error("context canceled")]
    Canceled,
    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

struct CtxState {
    err: Option<ContextError>,
    children: Vec<Weak<CtxInner>>,
}

struct CtxInner {
    // Strong edge up the tree keeps ancestors alive for the child's lifetime.
    _parent: Option<Context>,
    state: Mutex<CtxState>,
    cv: Condvar,
}

/// A node in a cancellation tree.
#[derive(Clone)]
pub struct Context {
    inner: Arc<CtxInner>,
}

impl Context {
    /// Root context; never canceled.
    pub fn background() -> Self {
        Self::node(None, None)
    }

    fn node(parent: Option<Context>, err: Option<ContextError>) -> Self {
        Self {
            inner: Arc::new(CtxInner {
                _parent: parent,
                state: Mutex::new(CtxState {
                    err,
                    children: Vec::new(),
                }),
                cv: Condvar::new(),
            }),
        }
    }

    fn attach_child(&self, err_if_parent_dead: Option<ContextError>) -> Context {
        let mut state = self.inner.state.lock();
        // A child of an already-canceled parent starts canceled.
        let initial = state.err.or(err_if_parent_dead);
        let child = Context::node(Some(self.clone()), initial);
        if initial.is_none() {
            // Dropped children leave dead weak refs behind; sweep them here
            // so a long-lived parent's child list stays bounded.
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Derives a cancelable child. Canceling the parent cancels the child;
    /// the returned handle cancels just this subtree.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let child = self.attach_child(None);
        let handle = CancelHandle {
            ctx: child.clone(),
        };
        (child, handle)
    }

    /// Derives a child canceled when the wall clock reaches `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let child = self.attach_child(None);
        let inner = Arc::clone(&child.inner);
        // Timer thread parks on the child's own condvar so an early cancel
        // releases it before the deadline.
        let spawned = thread::Builder::new()
            .name("ctx-deadline".to_owned())
            .spawn(move || {
                let mut state = inner.state.lock();
                while state.err.is_none() {
                    if inner.cv.wait_until(&mut state, deadline).timed_out() {
                        if state.err.is_none() {
                            drop(state);
                            cancel_tree(&inner, ContextError::DeadlineExceeded);
                        }
                        return;
                    }
                }
            });
        if spawned.is_err() {
            cancel_tree(&child.inner, ContextError::DeadlineExceeded);
        }
        child
    }

    /// Convenience wrapper over [`with_deadline`](Context::with_deadline).
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// `None` while live, the cancellation reason afterwards.
    pub fn err(&self) -> Option<ContextError> {
        self.inner.state.lock().err
    }

    /// Whether the context has been canceled.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Blocks until the context is canceled and returns the reason.
    pub fn wait(&self) -> ContextError {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(err) = state.err {
                return err;
            }
            self.inner.cv.wait(&mut state);
        }
    }
}

/// Cancels the subtree rooted at `inner`. No-op once canceled.
fn cancel_tree(inner: &Arc<CtxInner>, err: ContextError) {
    let children = {
        let mut state = inner.state.lock();
        if state.err.is_some() {
            return;
        }
        state.err = Some(err);
        inner.cv.notify_all();
        std::mem::take(&mut state.children)
    };
    for child in children {
        if let Some(child) = child.upgrade() {
            cancel_tree(&child, ContextError::Canceled);
        }
    }
}

/// Cancels the context it was derived with. Idempotent, clone-friendly.
#[derive(Clone)]
pub struct CancelHandle {
    ctx: Context,
}

impl CancelHandle {
    /// Cancels the subtree.
    pub fn cancel(&self) {
        cancel_tree(&self.ctx.inner, ContextError::Canceled);
    }
}
