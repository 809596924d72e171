//! Per-request context — deadline, cancellation and request-scoped values.
//!
//! A [`Context`] is an immutable node in a tree. Every derivation
//! ([`with_cancel`](Context::with_cancel), [`with_timeout`](Context::with_timeout),
//! [`with_value`](Context::with_value)) returns a new child that points at its
//! parent; the parent is never touched. A child is done as soon as any
//! ancestor is done, and its deadline is the earliest deadline on the path to
//! the root.
//!
//! Cancellation is advisory. Handlers that want to stop early await
//! [`Context::done`] or poll [`Context::err`]; nothing is aborted for them.
//!
//! ```
//! use std::time::Duration;
//! use ravel::context::{Context, ContextError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let root = Context::background();
//! let (ctx, guard) = root.with_timeout(Duration::from_secs(2));
//! assert!(ctx.err().is_none());
//!
//! guard.cancel();
//! assert_eq!(ctx.done().await, ContextError::Canceled);
//! assert!(root.err().is_none());
//! # }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

type CancelState = Option<ContextError>;

struct Node {
    parent: Option<Context>,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<CancelState>>,
    value: Option<Box<dyn Any + Send + Sync>>,
}

/// Cheaply cloneable handle to an immutable context node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Node>,
}

impl Context {
    /// The root context: no deadline, never cancelled, no values.
    pub fn background() -> Self {
        Self::node(None, None, None, None)
    }

    fn node(
        parent: Option<Context>,
        deadline: Option<Instant>,
        cancel: Option<watch::Receiver<CancelState>>,
        value: Option<Box<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            inner: Arc::new(Node {
                parent,
                deadline,
                cancel,
                value,
            }),
        }
    }

    /// Derives a child that is cancelled when the returned guard is cancelled
    /// or dropped.
    pub fn with_cancel(&self) -> (Context, CancelGuard) {
        self.with_cancel_at(None)
    }

    /// Derives a child that is done at `deadline`, or earlier if the guard is
    /// cancelled or dropped.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelGuard) {
        self.with_cancel_at(Some(deadline))
    }

    /// [`with_deadline`](Self::with_deadline) at `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelGuard) {
        self.with_deadline(Instant::now() + timeout)
    }

    fn with_cancel_at(&self, deadline: Option<Instant>) -> (Context, CancelGuard) {
        let (tx, rx) = watch::channel(None);
        let ctx = Self::node(Some(self.clone()), deadline, Some(rx), None);
        (ctx, CancelGuard { tx, deadline })
    }

    /// Derives a child carrying `value`. Lookups by type find the nearest
    /// value of that type, so a child may shadow its parent's.
    pub fn with_value<T>(&self, value: T) -> Context
    where
        T: Send + Sync + 'static,
    {
        Self::node(Some(self.clone()), None, None, Some(Box::new(value)))
    }

    /// Nearest value of type `T` on the path to the root.
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        let mut node = self;
        loop {
            if let Some(found) = node.inner.value.as_ref().and_then(|v| v.downcast_ref::<T>()) {
                return Some(found);
            }
            node = node.inner.parent.as_ref()?;
        }
    }

    /// Earliest deadline on the path to the root.
    pub fn deadline(&self) -> Option<Instant> {
        self.ancestors().filter_map(|ctx| ctx.inner.deadline).min()
    }

    /// `Some` once this context or any ancestor is done.
    pub fn err(&self) -> Option<ContextError> {
        let now = Instant::now();
        for ctx in self.ancestors() {
            if let Some(err) = ctx.inner.cancel.as_ref().and_then(|rx| *rx.borrow()) {
                return Some(err);
            }
            if ctx.inner.deadline.is_some_and(|d| d <= now) {
                return Some(ContextError::DeadlineExceeded);
            }
        }
        None
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves when this context is done. Never resolves for
    /// [`Context::background`].
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }

        let mut cancelled = Vec::new();
        for ctx in self.ancestors() {
            if let Some(rx) = &ctx.inner.cancel {
                let mut rx = rx.clone();
                cancelled.push(
                    async move {
                        let state = rx.wait_for(Option::is_some).await.map(|state| *state);
                        match state {
                            Ok(err) => err.unwrap_or(ContextError::Canceled),
                            // Guard gone without a verdict cannot happen; wait on the deadline.
                            Err(_) => future::pending().await,
                        }
                    }
                    .boxed(),
                );
            }
        }

        let deadline = self.deadline();
        let expired = async move {
            match deadline {
                Some(at) => {
                    tokio::time::sleep_until(at).await;
                    ContextError::DeadlineExceeded
                }
                None => future::pending().await,
            }
        };

        if cancelled.is_empty() {
            return expired.await;
        }
        tokio::select! {
            (err, _, _) = future::select_all(cancelled) => err,
            err = expired => err,
        }
    }

    fn ancestors(&self) -> impl Iterator<Item = &Context> {
        std::iter::successors(Some(self), |ctx| ctx.inner.parent.as_ref())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish_non_exhaustive()
    }
}

/// Owner of a derived context's cancellation.
///
/// Dropping the guard cancels the context, so every exit path of the code
/// that derived it releases waiters. A guard dropped after its deadline
/// records [`ContextError::DeadlineExceeded`] rather than `Canceled`. The
/// first verdict sticks.
#[derive(Debug)]
pub struct CancelGuard {
    tx: watch::Sender<CancelState>,
    deadline: Option<Instant>,
}

impl CancelGuard {
    pub fn cancel(&self) {
        self.finish(ContextError::Canceled);
    }

    fn finish(&self, err: ContextError) {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(err);
            true
        });
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let reason = match self.deadline {
            Some(at) if Instant::now() >= at => ContextError::DeadlineExceeded,
            _ => ContextError::Canceled,
        };
        self.finish(reason);
    }
}
