#![forbid(unsafe_code)]

//! One upstream subscription multiplexed to many listeners.
//!
//! Two connection policies:
//!
//! - [`ConnectionPolicy::Continuous`]: connect at construction and stay
//!   connected for the operator's lifetime.
//! - [`ConnectionPolicy::Repeatable`]: connect when the listener count goes
//!   from 0 to 1 and disconnect when it returns to 0. The count and the
//!   connection handle live under one lock.
//!
//! Two ownership variants:
//!
//! - [`Share`] owns its source. Every listener registration keeps the whole
//!   stage alive, so dropping the last `Share` handle does not interrupt
//!   existing listeners.
//! - [`Shared`] holds its source weakly. Registrations do not keep the stage
//!   alive: dropping the last `Shared` handle disconnects every listener,
//!   and once the source is released new listens are no-ops.
//!
//! # Failure Modes
//!
//! - Concurrent first listeners may briefly open two upstream connections;
//!   the surplus one is disposed as soon as it is detected.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rill_core::{Broadcaster, Callback, Disposable, Listenable};

/// When the upstream subscription exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionPolicy {
    #[default]
    Continuous,
    Repeatable,
}

#[derive(Default)]
struct Connection {
    listeners: usize,
    link: Option<Disposable>,
}

/// Fan-out point plus connection bookkeeping shared by both variants.
struct Hub<T> {
    output: Broadcaster<T>,
    policy: ConnectionPolicy,
    connection: Mutex<Connection>,
}

impl<T: Clone + Send + 'static> Hub<T> {
    fn new<L: Listenable<Out = T>>(source: &L, policy: ConnectionPolicy) -> Self {
        let hub = Self {
            output: Broadcaster::new(),
            policy,
            connection: Mutex::new(Connection::default()),
        };
        if policy == ConnectionPolicy::Continuous {
            let link = hub.connect(source);
            hub.connection.lock().link = Some(link);
        }
        hub
    }

    fn connect<L: Listenable<Out = T>>(&self, source: &L) -> Disposable {
        tracing::debug!(message = "share.connect", policy = ?self.policy);
        let output = self.output.clone();
        source.listen(Callback::new(move |event| output.emit(event)))
    }

    /// Register `callback`; for a repeatable hub, connect on the first
    /// listener. `source` is only consulted when a connection is needed.
    fn join<L, S>(&self, callback: Callback<T>, source: S) -> Disposable
    where
        L: Listenable<Out = T>,
        S: FnOnce() -> Option<L>,
    {
        let registration = self.output.listen(callback);
        if self.policy == ConnectionPolicy::Continuous {
            return registration;
        }

        let needs_link = {
            let mut connection = self.connection.lock();
            connection.listeners += 1;
            connection.link.is_none()
        };
        if needs_link {
            if let Some(source) = source() {
                let link = self.connect(&source);
                let surplus = {
                    let mut connection = self.connection.lock();
                    if connection.listeners > 0 && connection.link.is_none() {
                        connection.link = Some(link);
                        None
                    } else {
                        Some(link)
                    }
                };
                drop(surplus);
            }
        }
        registration
    }

    /// Undo one `join` of a repeatable hub.
    fn leave(&self) {
        if self.policy == ConnectionPolicy::Continuous {
            return;
        }
        let link = {
            let mut connection = self.connection.lock();
            connection.listeners = connection.listeners.saturating_sub(1);
            if connection.listeners == 0 {
                connection.link.take()
            } else {
                None
            }
        };
        if let Some(link) = link {
            tracing::debug!(message = "share.disconnect");
            link.dispose();
        }
    }

    fn listener_count(&self) -> usize {
        match self.policy {
            ConnectionPolicy::Continuous => self.output.listener_count(),
            ConnectionPolicy::Repeatable => self.connection.lock().listeners,
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .link
            .as_ref()
            .is_some_and(|link| !link.is_disposed())
    }
}

// ─── Share ───────────────────────────────────────────────────────────────────

struct ShareInner<L: Listenable> {
    source: L,
    hub: Hub<L::Out>,
}

/// Multicast stage that owns its source.
pub struct Share<L: Listenable> {
    inner: Arc<ShareInner<L>>,
}

impl<L> Share<L>
where
    L: Listenable + Send + Sync + 'static,
{
    pub fn new(source: L, policy: ConnectionPolicy) -> Self {
        let hub = Hub::new(&source, policy);
        Self {
            inner: Arc::new(ShareInner { source, hub }),
        }
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.inner.hub.policy
    }

    pub fn listener_count(&self) -> usize {
        self.inner.hub.listener_count()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.hub.is_connected()
    }
}

impl<L> Listenable for Share<L>
where
    L: Listenable + Send + Sync + 'static,
{
    type Out = L::Out;

    fn listen(&self, callback: Callback<L::Out>) -> Disposable {
        let registration = self
            .inner
            .hub
            .join(callback, || Some(&self.inner.source));
        let stage = Arc::clone(&self.inner);
        Disposable::new(move || {
            registration.dispose();
            stage.hub.leave();
        })
    }
}

impl<L: Listenable> Clone for Share<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: Listenable> fmt::Debug for Share<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("policy", &self.inner.hub.policy)
            .finish_non_exhaustive()
    }
}

// ─── Shared ──────────────────────────────────────────────────────────────────

struct SharedInner<L: Listenable> {
    source: Weak<L>,
    hub: Hub<L::Out>,
}

/// Multicast stage that holds its source weakly.
pub struct Shared<L: Listenable> {
    inner: Arc<SharedInner<L>>,
}

impl<L> Shared<L>
where
    L: Listenable + Send + Sync + 'static,
{
    pub fn new(source: &Arc<L>, policy: ConnectionPolicy) -> Self {
        let hub = Hub::new(source, policy);
        Self {
            inner: Arc::new(SharedInner {
                source: Arc::downgrade(source),
                hub,
            }),
        }
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.inner.hub.policy
    }

    pub fn listener_count(&self) -> usize {
        self.inner.hub.listener_count()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.hub.is_connected()
    }
}

impl<L> Listenable for Shared<L>
where
    L: Listenable + Send + Sync + 'static,
{
    type Out = L::Out;

    fn listen(&self, callback: Callback<L::Out>) -> Disposable {
        let Some(source) = self.inner.source.upgrade() else {
            tracing::warn!(message = "shared.source_released");
            return Disposable::empty();
        };
        let registration = self.inner.hub.join(callback, move || Some(source));
        let stage = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            registration.dispose();
            if let Some(stage) = stage.upgrade() {
                stage.hub.leave();
            }
        })
    }
}

impl<L: Listenable> Clone for Shared<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: Listenable> fmt::Debug for Shared<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("policy", &self.inner.hub.policy)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
