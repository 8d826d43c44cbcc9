#![forbid(unsafe_code)]

//! Operator composition.
//!
//! An [`Operator`] turns a downstream callback into the callback installed
//! upstream. [`Preprocessor`] pairs an upstream [`Listenable`] with an
//! operator and is itself listenable, so operators chain.
//!
//! # Invariants
//!
//! 1. `wrap` is called once per `listen`, so per-listener state (debounce
//!    timers, async slots) is never shared between listeners.
//! 2. After the returned [`Disposable`] is disposed, the downstream callback
//!    is never invoked again, even by work that was already in flight.
//! 3. Panics in user closures are caught and delivered as
//!    [`StreamError::Panicked`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rill_core::{Callback, Disposable, Event, Listenable, StreamError, WorkQueue};

/// Transform from a downstream continuation to an upstream one.
pub trait Operator<I>: Send + Sync + 'static {
    type Out: Clone + Send + 'static;

    fn wrap(&self, downstream: Callback<Self::Out>) -> Callback<I>;
}

/// An upstream source composed with an operator.
pub struct Preprocessor<L, Op> {
    source: L,
    op: Arc<Op>,
}

impl<L, Op> Preprocessor<L, Op> {
    pub fn new(source: L, op: Op) -> Self {
        Self {
            source,
            op: Arc::new(op),
        }
    }

    pub fn source(&self) -> &L {
        &self.source
    }
}

impl<L, Op> Listenable for Preprocessor<L, Op>
where
    L: Listenable,
    Op: Operator<L::Out>,
{
    type Out = Op::Out;

    fn listen(&self, callback: Callback<Op::Out>) -> Disposable {
        let open = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&open);
        let gated = Callback::new(move |event| {
            if gate.load(Ordering::Acquire) {
                callback.call(event);
            }
        });
        let upstream = self.source.listen(self.op.wrap(gated));
        Disposable::new(move || {
            open.store(false, Ordering::Release);
            upstream.dispose();
        })
    }
}

impl<L: Clone, Op> Clone for Preprocessor<L, Op> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            op: Arc::clone(&self.op),
        }
    }
}

impl<L: fmt::Debug, Op> fmt::Debug for Preprocessor<L, Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preprocessor")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Run user code, turning a panic into an error.
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, StreamError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let reason = panic_message(payload.as_ref());
        tracing::warn!(message = "operator.panic", reason = %reason);
        StreamError::Panicked(reason)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ─── Value operators ─────────────────────────────────────────────────────────

/// `Value(x)` becomes `Value(f(x))`.
pub struct Map<F>(Arc<F>);

impl<F> Map<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<I, U, F> Operator<I> for Map<F>
where
    I: 'static,
    U: Clone + Send + 'static,
    F: Fn(I) -> U + Send + Sync + 'static,
{
    type Out = U;

    fn wrap(&self, downstream: Callback<U>) -> Callback<I> {
        let f = Arc::clone(&self.0);
        Callback::new(move |event| match event {
            Event::Value(v) => downstream.call(guarded(|| f(v)).into()),
            Event::Error(e) => downstream.call(Event::Error(e)),
        })
    }
}

/// Like [`Map`], but `f` may fail.
pub struct TryMap<F>(Arc<F>);

impl<F> TryMap<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<I, U, F> Operator<I> for TryMap<F>
where
    I: 'static,
    U: Clone + Send + 'static,
    F: Fn(I) -> Result<U, StreamError> + Send + Sync + 'static,
{
    type Out = U;

    fn wrap(&self, downstream: Callback<U>) -> Callback<I> {
        let f = Arc::clone(&self.0);
        Callback::new(move |event| match event {
            Event::Value(v) => downstream.call(guarded(|| f(v)).and_then(|r| r).into()),
            Event::Error(e) => downstream.call(Event::Error(e)),
        })
    }
}

/// Forwards values satisfying the predicate; others are swallowed.
pub struct Filter<P>(Arc<P>);

impl<P> Filter<P> {
    pub fn new(predicate: P) -> Self {
        Self(Arc::new(predicate))
    }
}

impl<I, P> Operator<I> for Filter<P>
where
    I: Clone + Send + 'static,
    P: Fn(&I) -> bool + Send + Sync + 'static,
{
    type Out = I;

    fn wrap(&self, downstream: Callback<I>) -> Callback<I> {
        let predicate = Arc::clone(&self.0);
        Callback::new(move |event| match event {
            Event::Value(v) => match guarded(|| predicate(&v)) {
                Ok(true) => downstream.call(Event::Value(v)),
                Ok(false) => {}
                Err(e) => downstream.call(Event::Error(e)),
            },
            Event::Error(e) => downstream.call(Event::Error(e)),
        })
    }
}

/// Maps and drops `None` results.
pub struct FilterMap<F>(Arc<F>);

impl<F> FilterMap<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<I, U, F> Operator<I> for FilterMap<F>
where
    I: 'static,
    U: Clone + Send + 'static,
    F: Fn(I) -> Option<U> + Send + Sync + 'static,
{
    type Out = U;

    fn wrap(&self, downstream: Callback<U>) -> Callback<I> {
        let f = Arc::clone(&self.0);
        Callback::new(move |event| match event {
            Event::Value(v) => match guarded(|| f(v)) {
                Ok(Some(u)) => downstream.call(Event::Value(u)),
                Ok(None) => {}
                Err(e) => downstream.call(Event::Error(e)),
            },
            Event::Error(e) => downstream.call(Event::Error(e)),
        })
    }
}

/// Rewrites whole events, including errors.
pub struct MapEvent<F>(Arc<F>);

impl<F> MapEvent<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<I, U, F> Operator<I> for MapEvent<F>
where
    I: 'static,
    U: Clone + Send + 'static,
    F: Fn(Event<I>) -> Event<U> + Send + Sync + 'static,
{
    type Out = U;

    fn wrap(&self, downstream: Callback<U>) -> Callback<I> {
        let f = Arc::clone(&self.0);
        Callback::new(move |event| downstream.call(guarded(|| f(event)).unwrap_or_else(Event::Error)))
    }
}

/// Observes each event before passing it on unchanged.
pub struct Inspect<F>(Arc<F>);

impl<F> Inspect<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<I, F> Operator<I> for Inspect<F>
where
    I: Clone + Send + 'static,
    F: Fn(&Event<I>) + Send + Sync + 'static,
{
    type Out = I;

    fn wrap(&self, downstream: Callback<I>) -> Callback<I> {
        let f = Arc::clone(&self.0);
        Callback::new(move |event| match guarded(|| f(&event)) {
            Ok(()) => downstream.call(event),
            Err(e) => downstream.call(Event::Error(e)),
        })
    }
}

/// Re-delivers every event on a work queue.
pub struct OnQueue(WorkQueue);

impl OnQueue {
    pub fn new(queue: WorkQueue) -> Self {
        Self(queue)
    }
}

impl<I: Clone + Send + 'static> Operator<I> for OnQueue {
    type Out = I;

    fn wrap(&self, downstream: Callback<I>) -> Callback<I> {
        let queue = self.0.clone();
        Callback::new(move |event| {
            let downstream = downstream.clone();
            queue.submit(Box::new(move || downstream.call(event)));
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
