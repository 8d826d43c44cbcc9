#![forbid(unsafe_code)]

//! Asynchronous value mapping.
//!
//! # Ordering
//!
//! [`MapAsync`] forwards results in the order their [`Completion`]s are
//! called, not the order inputs arrived. With several operations in flight,
//! a later input may produce an earlier output. Callers that need input
//! order must serialize the work themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rill_core::{Callback, Disposable, Event, Listenable, StreamError};

use crate::lifetime::Once;
use crate::operator::{Operator, guarded};

/// Single-shot handle delivering the result of one async operation.
///
/// Consuming methods make a second completion impossible; dropping the
/// handle without completing emits nothing.
pub struct Completion<U> {
    downstream: Callback<U>,
    settled: Arc<AtomicBool>,
}

impl<U> Completion<U> {
    pub fn complete(self, event: Event<U>) {
        if !self.settled.swap(true, Ordering::AcqRel) {
            self.downstream.call(event);
        }
    }

    pub fn fulfill(self, value: U) {
        self.complete(Event::Value(value));
    }

    pub fn reject(self, error: StreamError) {
        self.complete(Event::Error(error));
    }
}

impl<U> std::fmt::Debug for Completion<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.settled.load(Ordering::Acquire))
            .finish()
    }
}

/// Starts `f(value, completion)` for each value.
///
/// If `f` returns an error or panics before the completion was used, that
/// error is emitted instead.
pub struct MapAsync<F, U> {
    f: Arc<F>,
    _out: std::marker::PhantomData<fn() -> U>,
}

impl<F, U> MapAsync<F, U> {
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            _out: std::marker::PhantomData,
        }
    }
}

impl<I, U, F> Operator<I> for MapAsync<F, U>
where
    I: 'static,
    U: Clone + Send + 'static,
    F: Fn(I, Completion<U>) -> Result<(), StreamError> + Send + Sync + 'static,
{
    type Out = U;

    fn wrap(&self, downstream: Callback<U>) -> Callback<I> {
        let f = Arc::clone(&self.f);
        Callback::new(move |event| match event {
            Event::Value(v) => {
                let settled = Arc::new(AtomicBool::new(false));
                let completion = Completion {
                    downstream: downstream.clone(),
                    settled: Arc::clone(&settled),
                };
                let failure = match guarded(|| f(v, completion)) {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) | Err(e) => Some(e),
                };
                if let Some(e) = failure {
                    if !settled.swap(true, Ordering::AcqRel) {
                        downstream.call(Event::Error(e));
                    }
                }
            }
            Event::Error(e) => downstream.call(Event::Error(e)),
        })
    }
}

/// Listens to `f(value)` for each value and forwards its first event.
///
/// A newer upstream value cancels a still-pending inner listenable.
pub struct Then<F>(Arc<F>);

impl<F> Then<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<I, L, F> Operator<I> for Then<F>
where
    I: 'static,
    L: Listenable + 'static,
    F: Fn(I) -> L + Send + Sync + 'static,
{
    type Out = L::Out;

    fn wrap(&self, downstream: Callback<L::Out>) -> Callback<I> {
        let f = Arc::clone(&self.0);
        let pending: Mutex<Option<Disposable>> = Mutex::new(None);
        Callback::new(move |event| match event {
            Event::Value(v) => match guarded(|| f(v)) {
                Ok(next) => {
                    let inner = Once::new(next).listen(downstream.clone());
                    let previous = pending.lock().replace(inner);
                    drop(previous);
                }
                Err(e) => downstream.call(Event::Error(e)),
            },
            Event::Error(e) => downstream.call(Event::Error(e)),
        })
    }
}
