#![forbid(unsafe_code)]

//! Mutable values that announce their changes.
//!
//! An [`ObservableCell`] couples a [`Storage`] with an optional
//! [`Broadcaster`]. The storage decides how the value is owned:
//!
//! | Storage       | Holds        | `get()` returns                   |
//! |---------------|--------------|-----------------------------------|
//! | [`Strong`]    | `T`          | `T`                               |
//! | [`WeakRef`]   | `Weak<V>`    | `Option<Arc<V>>`, `None` once gone |
//! | [`Unowned`]   | `Weak<V>`    | `Result<Arc<V>, StreamError>`     |
//!
//! [`Unowned`] is for referents the caller promises to keep alive; a broken
//! promise surfaces as [`StreamError::Released`] instead of a dangling read.
//!
//! # Invariants
//!
//! 1. `set` and `mutate` share one publish step that runs after the storage
//!    write, so the emitted event always carries the post-mutation value.
//! 2. The storage lock is released before listeners run; a listener may
//!    read or write the cell it is observing.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::broadcaster::Broadcaster;
use crate::disposable::Disposable;
use crate::error::StreamError;
use crate::event::Event;
use crate::listenable::{Callback, Listenable};

/// Ownership discipline of a cell's value.
pub trait Storage: Send + Sync + 'static {
    /// Value carried by change events.
    type Value: Clone + Send + 'static;
    /// Result of reading the cell.
    type Read;

    fn read(&self) -> Self::Read;
    fn write(&self, value: Self::Value);
    /// Apply `f` in place and return the resulting value.
    fn modify(&self, f: &mut dyn FnMut(&mut Self::Value)) -> Result<Self::Value, StreamError>;
}

/// The cell owns its value.
#[derive(Debug, Default)]
pub struct Strong<T>(Mutex<T>);

impl<T> Strong<T> {
    pub fn new(value: T) -> Self {
        Self(Mutex::new(value))
    }
}

impl<T: Clone + Send + 'static> Storage for Strong<T> {
    type Value = T;
    type Read = T;

    fn read(&self) -> T {
        self.0.lock().clone()
    }

    fn write(&self, value: T) {
        *self.0.lock() = value;
    }

    fn modify(&self, f: &mut dyn FnMut(&mut T)) -> Result<T, StreamError> {
        let mut slot = self.0.lock();
        f(&mut *slot);
        Ok(slot.clone())
    }
}

/// Non-owning reference that reads as `None` once the referent is dropped.
#[derive(Debug)]
pub struct WeakRef<V>(Mutex<Weak<V>>);

impl<V> WeakRef<V> {
    pub fn new(referent: Option<&Arc<V>>) -> Self {
        Self(Mutex::new(referent.map_or_else(Weak::new, Arc::downgrade)))
    }
}

impl<V: Send + Sync + 'static> Storage for WeakRef<V> {
    type Value = Option<Arc<V>>;
    type Read = Option<Arc<V>>;

    fn read(&self) -> Option<Arc<V>> {
        self.0.lock().upgrade()
    }

    fn write(&self, value: Option<Arc<V>>) {
        *self.0.lock() = value.as_ref().map_or_else(Weak::new, Arc::downgrade);
    }

    fn modify(
        &self,
        f: &mut dyn FnMut(&mut Option<Arc<V>>),
    ) -> Result<Option<Arc<V>>, StreamError> {
        let mut slot = self.0.lock();
        let mut current = slot.upgrade();
        f(&mut current);
        *slot = current.as_ref().map_or_else(Weak::new, Arc::downgrade);
        Ok(current)
    }
}

/// Non-owning reference whose referent must outlive the cell.
///
/// Reads after release return [`StreamError::Released`].
#[derive(Debug)]
pub struct Unowned<V>(Mutex<Weak<V>>);

impl<V> Unowned<V> {
    pub fn new(referent: &Arc<V>) -> Self {
        Self(Mutex::new(Arc::downgrade(referent)))
    }
}

impl<V: Send + Sync + 'static> Storage for Unowned<V> {
    type Value = Arc<V>;
    type Read = Result<Arc<V>, StreamError>;

    fn read(&self) -> Result<Arc<V>, StreamError> {
        self.0.lock().upgrade().ok_or(StreamError::Released)
    }

    fn write(&self, value: Arc<V>) {
        *self.0.lock() = Arc::downgrade(&value);
    }

    fn modify(&self, f: &mut dyn FnMut(&mut Arc<V>)) -> Result<Arc<V>, StreamError> {
        let mut slot = self.0.lock();
        let mut current = slot.upgrade().ok_or(StreamError::Released)?;
        f(&mut current);
        *slot = Arc::downgrade(&current);
        Ok(current)
    }
}

struct CellInner<S: Storage> {
    storage: S,
    broadcaster: Option<Broadcaster<S::Value>>,
}

/// A mutable value with an optional change broadcaster.
///
/// Clones share the same storage and broadcaster.
pub struct ObservableCell<S: Storage> {
    inner: Arc<CellInner<S>>,
}

impl<T: Clone + Send + 'static> ObservableCell<Strong<T>> {
    /// Owned value announcing changes through a fresh broadcaster.
    pub fn strong(value: T) -> Self {
        Self::new(Strong::new(value), Some(Broadcaster::new()))
    }
}

impl<V: Send + Sync + 'static> ObservableCell<WeakRef<V>> {
    pub fn weak(referent: Option<&Arc<V>>) -> Self {
        Self::new(WeakRef::new(referent), Some(Broadcaster::new()))
    }
}

impl<V: Send + Sync + 'static> ObservableCell<Unowned<V>> {
    pub fn unowned(referent: &Arc<V>) -> Self {
        Self::new(Unowned::new(referent), Some(Broadcaster::new()))
    }
}

impl<S: Storage> ObservableCell<S> {
    /// Cell over `storage`. Without a broadcaster, writes are silent.
    pub fn new(storage: S, broadcaster: Option<Broadcaster<S::Value>>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                storage,
                broadcaster,
            }),
        }
    }

    pub fn get(&self) -> S::Read {
        self.inner.storage.read()
    }

    /// Store `value` and announce it.
    pub fn set(&self, value: S::Value) {
        self.inner.storage.write(value.clone());
        self.publish(value);
    }

    /// Mutate the value in place and announce the result.
    ///
    /// Fails only for storages whose referent is gone; nothing is emitted
    /// in that case.
    pub fn mutate(&self, f: impl FnOnce(&mut S::Value)) -> Result<(), StreamError> {
        let mut f = Some(f);
        let updated = self.inner.storage.modify(&mut |value: &mut S::Value| {
            if let Some(f) = f.take() {
                f(value);
            }
        })?;
        self.publish(updated);
        Ok(())
    }

    /// Store `value` without announcing it.
    pub fn replace(&self, value: S::Value) {
        self.inner.storage.write(value);
    }

    /// Announce an error; the stored value is unchanged.
    pub fn send_error(&self, error: StreamError) {
        if let Some(broadcaster) = &self.inner.broadcaster {
            broadcaster.send_error(error);
        }
    }

    pub fn broadcaster(&self) -> Option<&Broadcaster<S::Value>> {
        self.inner.broadcaster.as_ref()
    }

    fn publish(&self, value: S::Value) {
        tracing::trace!(message = "cell.publish");
        if let Some(broadcaster) = &self.inner.broadcaster {
            broadcaster.emit(Event::Value(value));
        }
    }

    /// Write every value of `source` into this cell and forward its errors.
    pub fn bind_to_cell<L>(&self, source: &L) -> Disposable
    where
        L: Listenable<Out = S::Value>,
    {
        let cell = self.clone();
        source.listen(Callback::new(move |event| match event {
            Event::Value(v) => cell.set(v),
            Event::Error(e) => cell.send_error(e),
        }))
    }
}

impl<S: Storage> Listenable for ObservableCell<S> {
    type Out = S::Value;

    fn listen(&self, callback: Callback<S::Value>) -> Disposable {
        match &self.inner.broadcaster {
            Some(broadcaster) => broadcaster.listen(callback),
            None => Disposable::empty(),
        }
    }
}

impl<S: Storage> Clone for ObservableCell<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Storage + fmt::Debug> fmt::Debug for ObservableCell<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableCell")
            .field("storage", &self.inner.storage)
            .field("observed", &self.inner.broadcaster.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Constant;

    fn record<S: Storage>(cell: &ObservableCell<S>) -> (Arc<Mutex<Vec<Event<S::Value>>>>, Disposable) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let d = cell.listen(Callback::new(move |e| sink.lock().push(e)));
        (seen, d)
    }

    #[test]
    fn set_emits_new_value() {
        let cell = ObservableCell::strong(1);
        let (seen, _d) = record(&cell);
        cell.set(2);
        assert_eq!(cell.get(), 2);
        let values: Vec<_> = seen.lock().iter().filter_map(|e| e.value().copied()).collect();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn mutate_emits_post_mutation_value() {
        let cell = ObservableCell::strong(vec![1, 2]);
        let (seen, _d) = record(&cell);
        cell.mutate(|v| v.push(3)).unwrap();
        assert_eq!(cell.get(), vec![1, 2, 3]);
        assert_eq!(seen.lock()[0].value(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn send_error_keeps_value() {
        let cell = ObservableCell::strong("a".to_string());
        let (seen, _d) = record(&cell);
        cell.send_error(StreamError::msg("bad"));
        assert_eq!(cell.get(), "a");
        assert!(seen.lock()[0].is_error());
    }

    #[test]
    fn replace_is_silent() {
        let cell = ObservableCell::strong(0);
        let (seen, _d) = record(&cell);
        cell.replace(9);
        assert_eq!(cell.get(), 9);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn listener_may_read_cell_during_notification() {
        let cell = ObservableCell::strong(0);
        let observed = Arc::new(Mutex::new(None));
        let (c, o) = (cell.clone(), Arc::clone(&observed));
        let _d = cell.listen(Callback::on_value(move |_| *o.lock() = Some(c.get())));
        cell.set(4);
        assert_eq!(*observed.lock(), Some(4));
    }

    #[test]
    fn weak_cell_becomes_none_after_release() {
        let referent = Arc::new(String::from("hello"));
        let cell = ObservableCell::weak(Some(&referent));
        assert_eq!(cell.get().as_deref().map(String::as_str), Some("hello"));
        drop(referent);
        assert!(cell.get().is_none());
        // Mutating a released weak cell sees None and may install a value.
        let fresh = Arc::new(String::from("again"));
        let f = Arc::clone(&fresh);
        cell.mutate(move |slot| {
            assert!(slot.is_none());
            *slot = Some(f);
        })
        .unwrap();
        assert!(cell.get().is_some());
    }

    #[test]
    fn unowned_cell_reports_release() {
        let referent = Arc::new(5u32);
        let cell = ObservableCell::unowned(&referent);
        assert_eq!(*cell.get().unwrap(), 5);
        drop(referent);
        assert!(matches!(cell.get(), Err(StreamError::Released)));

        let (seen, _d) = record(&cell);
        assert!(cell.mutate(|_| {}).is_err());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn cell_without_broadcaster_is_silent() {
        let cell = ObservableCell::new(Strong::new(1), None);
        let (seen, _d) = record(&cell);
        cell.set(2);
        assert_eq!(cell.get(), 2);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn bind_to_cell_writes_through() {
        let cell = ObservableCell::strong(0);
        let _link = cell.bind_to_cell(&Constant(42));
        assert_eq!(cell.get(), 42);
    }
}
