#![forbid(unsafe_code)]

//! The `listen` capability and the simplest cold sources.

use std::fmt;
use std::sync::Arc;

use crate::disposable::Disposable;
use crate::error::StreamError;
use crate::event::Event;

/// Shared event handler installed by `listen`.
///
/// Cloning shares the same closure.
pub struct Callback<T>(Arc<dyn Fn(Event<T>) + Send + Sync>);

impl<T> Callback<T> {
    pub fn new(f: impl Fn(Event<T>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Handle values only; errors are ignored.
    pub fn on_value(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::new(move |event| {
            if let Event::Value(v) = event {
                f(v);
            }
        })
    }

    /// Handle errors only; values are ignored.
    pub fn on_error(f: impl Fn(StreamError) + Send + Sync + 'static) -> Self {
        Self::new(move |event| {
            if let Event::Error(e) = event {
                f(e);
            }
        })
    }

    /// Split handlers for values and errors.
    pub fn split(
        on_value: impl Fn(T) + Send + Sync + 'static,
        on_error: impl Fn(StreamError) + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |event| match event {
            Event::Value(v) => on_value(v),
            Event::Error(e) => on_error(e),
        })
    }

    #[inline]
    pub fn call(&self, event: Event<T>) {
        (self.0)(event);
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").finish_non_exhaustive()
    }
}

/// A source of events that listeners can attach to.
///
/// `listen` must not block. Cold sources may invoke the callback inline,
/// before `listen` returns.
pub trait Listenable {
    type Out: Clone + Send + 'static;

    fn listen(&self, callback: Callback<Self::Out>) -> Disposable;
}

impl<L: Listenable + ?Sized> Listenable for Arc<L> {
    type Out = L::Out;

    fn listen(&self, callback: Callback<Self::Out>) -> Disposable {
        (**self).listen(callback)
    }
}

impl<L: Listenable + ?Sized> Listenable for Box<L> {
    type Out = L::Out;

    fn listen(&self, callback: Callback<Self::Out>) -> Disposable {
        (**self).listen(callback)
    }
}

impl<L: Listenable + ?Sized> Listenable for &L {
    type Out = L::Out;

    fn listen(&self, callback: Callback<Self::Out>) -> Disposable {
        (**self).listen(callback)
    }
}

/// A single event is a one-shot cold source.
impl<T: Clone + Send + 'static> Listenable for Event<T> {
    type Out = T;

    fn listen(&self, callback: Callback<T>) -> Disposable {
        callback.call(self.clone());
        Disposable::empty()
    }
}

/// Type-erased, shareable listenable.
pub struct AnyListenable<T>(Arc<dyn Listenable<Out = T> + Send + Sync>);

impl<T: Clone + Send + 'static> AnyListenable<T> {
    pub fn new(source: impl Listenable<Out = T> + Send + Sync + 'static) -> Self {
        Self(Arc::new(source))
    }
}

impl<T> Clone for AnyListenable<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone + Send + 'static> Listenable for AnyListenable<T> {
    type Out = T;

    fn listen(&self, callback: Callback<T>) -> Disposable {
        self.0.listen(callback)
    }
}

/// Emits one value to every new listener, synchronously.
#[derive(Debug, Clone)]
pub struct Constant<T>(pub T);

impl<T: Clone + Send + 'static> Listenable for Constant<T> {
    type Out = T;

    fn listen(&self, callback: Callback<T>) -> Disposable {
        callback.call(Event::Value(self.0.clone()));
        Disposable::empty()
    }
}

/// Replays a fixed sequence to every new listener, synchronously.
#[derive(Debug, Clone)]
pub struct FromIter<T> {
    items: Arc<[T]>,
}

impl<T> FromIterator<T> for FromIter<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Listenable for FromIter<T> {
    type Out = T;

    fn listen(&self, callback: Callback<T>) -> Disposable {
        for item in self.items.iter() {
            callback.call(Event::Value(item.clone()));
        }
        Disposable::empty()
    }
}
