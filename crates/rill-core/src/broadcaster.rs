#![forbid(unsafe_code)]

//! Multicast hot source.
//!
//! A [`Broadcaster`] keeps a registry of callbacks keyed by [`Token`] and
//! forwards every emitted event to each of them through its [`Dispatcher`].
//!
//! # Invariants
//!
//! 1. Tokens increase monotonically and are never reused for the lifetime
//!    of one broadcaster.
//! 2. Each `emit` snapshots the registry before dispatching. Listeners added
//!    or removed during dispatch affect only later emits.
//! 3. The token counter and the map are guarded by the same lock.
//! 4. Listeners are called in registration order.
//!
//! # Sync modes
//!
//! [`SyncMode::Unserialized`] holds the registry lock only while inserting,
//! removing or taking the snapshot; dispatch runs unlocked and concurrent
//! emits may interleave. [`SyncMode::Locked`] holds a re-entrant lock across
//! the whole operation, dispatch included, so emits from different threads
//! are serialized while a listener may still add, remove or dispose from
//! inside its own callback.
//!
//! # Failure Modes
//!
//! - A listener that blocks stalls the emitting thread under
//!   [`Dispatcher::Direct`], and every other emitter under
//!   [`SyncMode::Locked`].

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use ahash::AHashMap;
use parking_lot::{Mutex, ReentrantMutex};
use smallvec::SmallVec;

use crate::dispatch::{Dispatcher, WorkQueue};
use crate::disposable::Disposable;
use crate::error::StreamError;
use crate::event::Event;
use crate::listenable::{Callback, Listenable};

/// Identifies one registration inside a broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Locking discipline of a broadcaster's registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Lock only around registry access; dispatch is not serialized.
    #[default]
    Unserialized,
    /// Lock across add, remove and the full emit.
    Locked,
}

/// Construction options for [`Broadcaster`].
#[derive(Debug, Clone)]
pub struct BroadcasterConfig<T> {
    pub mode: SyncMode,
    pub dispatcher: Dispatcher<T>,
}

impl<T> Default for BroadcasterConfig<T> {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            dispatcher: Dispatcher::Direct,
        }
    }
}

impl<T> BroadcasterConfig<T> {
    #[must_use]
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher<T>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

type Snapshot<T> = SmallVec<[Callback<T>; 4]>;

struct Registry<T> {
    next: u64,
    slots: AHashMap<Token, Callback<T>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            next: 0,
            slots: AHashMap::new(),
        }
    }

    fn add(&mut self, callback: Callback<T>) -> Token {
        let token = Token(self.next);
        self.next += 1;
        self.slots.insert(token, callback);
        token
    }

    fn remove(&mut self, token: Token) -> bool {
        self.slots.remove(&token).is_some()
    }

    /// Registered callbacks in registration order.
    fn snapshot(&self) -> Snapshot<T> {
        let mut entries: SmallVec<[(Token, &Callback<T>); 4]> =
            self.slots.iter().map(|(token, cb)| (*token, cb)).collect();
        entries.sort_unstable_by_key(|(token, _)| *token);
        entries.into_iter().map(|(_, cb)| cb.clone()).collect()
    }
}

enum Guarded<T> {
    Unserialized(Mutex<Registry<T>>),
    Locked(ReentrantMutex<RefCell<Registry<T>>>),
}

struct Inner<T> {
    registry: Guarded<T>,
    dispatcher: Dispatcher<T>,
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn add(&self, callback: Callback<T>) -> Token {
        let token = match &self.registry {
            Guarded::Unserialized(m) => m.lock().add(callback),
            Guarded::Locked(m) => m.lock().borrow_mut().add(callback),
        };
        tracing::trace!(message = "broadcaster.add", token = token.0);
        token
    }

    fn remove(&self, token: Token) -> bool {
        let removed = match &self.registry {
            Guarded::Unserialized(m) => m.lock().remove(token),
            Guarded::Locked(m) => m.lock().borrow_mut().remove(token),
        };
        if removed {
            tracing::trace!(message = "broadcaster.remove", token = token.0);
        }
        removed
    }

    fn len(&self) -> usize {
        match &self.registry {
            Guarded::Unserialized(m) => m.lock().slots.len(),
            Guarded::Locked(m) => m.lock().borrow().slots.len(),
        }
    }

    fn emit(&self, event: Event<T>) {
        match &self.registry {
            Guarded::Unserialized(m) => {
                let snapshot = m.lock().snapshot();
                self.deliver(&snapshot, event);
            }
            Guarded::Locked(m) => {
                let guard = m.lock();
                // The RefCell borrow ends before dispatch so callbacks can
                // re-enter add/remove on this thread.
                let snapshot = guard.borrow().snapshot();
                self.deliver(&snapshot, event);
                drop(guard);
            }
        }
    }

    fn deliver(&self, snapshot: &Snapshot<T>, event: Event<T>) {
        tracing::trace!(message = "broadcaster.emit", listeners = snapshot.len());
        let Some((last, rest)) = snapshot.split_last() else {
            return;
        };
        for callback in rest {
            self.dispatcher.dispatch(callback, event.clone());
        }
        self.dispatcher.dispatch(last, event);
    }
}

/// Multicast hot source with a token-keyed listener registry.
///
/// Handles are cheap to clone and share one registry.
pub struct Broadcaster<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Unserialized registry, direct dispatch.
    pub fn new() -> Self {
        Self::with_config(BroadcasterConfig::default())
    }

    /// Locked registry, direct dispatch.
    pub fn locked() -> Self {
        Self::with_config(BroadcasterConfig::default().with_mode(SyncMode::Locked))
    }

    /// Unserialized registry, delivery on `queue`.
    pub fn on_queue(queue: WorkQueue) -> Self {
        Self::with_config(BroadcasterConfig::default().with_dispatcher(Dispatcher::Queue(queue)))
    }

    pub fn with_config(config: BroadcasterConfig<T>) -> Self {
        let registry = match config.mode {
            SyncMode::Unserialized => Guarded::Unserialized(Mutex::new(Registry::new())),
            SyncMode::Locked => Guarded::Locked(ReentrantMutex::new(RefCell::new(Registry::new()))),
        };
        Self {
            inner: Arc::new(Inner {
                registry,
                dispatcher: config.dispatcher,
            }),
        }
    }

    pub fn mode(&self) -> SyncMode {
        match self.inner.registry {
            Guarded::Unserialized(_) => SyncMode::Unserialized,
            Guarded::Locked(_) => SyncMode::Locked,
        }
    }

    /// Register `callback`; it receives every later emit until removed.
    pub fn add(&self, callback: Callback<T>) -> Token {
        self.inner.add(callback)
    }

    /// Unregister. Returns `false` if the token was not registered.
    pub fn remove(&self, token: Token) -> bool {
        self.inner.remove(token)
    }

    /// Deliver `event` to every listener registered when the call began.
    pub fn emit(&self, event: Event<T>) {
        self.inner.emit(event);
    }

    pub fn send(&self, value: T) {
        self.emit(Event::Value(value));
    }

    pub fn send_error(&self, error: StreamError) {
        self.emit(Event::Error(error));
    }

    pub fn listener_count(&self) -> usize {
        self.inner.len()
    }

    /// Forward every event of this broadcaster into `target`.
    pub fn bind_to(&self, target: &Broadcaster<T>) -> Disposable {
        let target = target.clone();
        self.listen(Callback::new(move |event| target.emit(event)))
    }
}

impl<T: Clone + Send + 'static> Listenable for Broadcaster<T> {
    type Out = T;

    fn listen(&self, callback: Callback<T>) -> Disposable {
        let token = self.inner.add(callback);
        let registry: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = registry.upgrade() {
                inner.remove(token);
            }
        })
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
