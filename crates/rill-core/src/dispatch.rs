#![forbid(unsafe_code)]

//! How a [`Broadcaster`](crate::Broadcaster) delivers an event to each
//! listener.
//!
//! - [`Dispatcher::Direct`] calls the listener on the emitting thread,
//!   before `emit` returns.
//! - [`Dispatcher::Queue`] hands the call to a named [`WorkQueue`] thread.
//!   Ordering relative to the emitting thread is lost; ordering of one
//!   listener's deliveries is kept because the queue is FIFO.
//! - [`Dispatcher::Custom`] passes the call to a caller-supplied function,
//!   e.g. to post it onto an external run loop.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use crate::event::Event;
use crate::listenable::Callback;

/// A unit of work run on a [`WorkQueue`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Delivery function for [`Dispatcher::Custom`].
pub type CustomDispatch<T> = Arc<dyn Fn(Callback<T>, Event<T>) + Send + Sync>;

/// Delivery strategy used by a broadcaster.
pub enum Dispatcher<T> {
    Direct,
    Queue(WorkQueue),
    Custom(CustomDispatch<T>),
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn custom(f: impl Fn(Callback<T>, Event<T>) + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Deliver `event` to `callback` according to the strategy.
    pub fn dispatch(&self, callback: &Callback<T>, event: Event<T>) {
        match self {
            Self::Direct => callback.call(event),
            Self::Queue(queue) => {
                let callback = callback.clone();
                queue.submit(Box::new(move || callback.call(event)));
            }
            Self::Custom(f) => f(callback.clone(), event),
        }
    }
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::Direct
    }
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct => Self::Direct,
            Self::Queue(queue) => Self::Queue(queue.clone()),
            Self::Custom(f) => Self::Custom(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("Direct"),
            Self::Queue(queue) => f.debug_tuple("Queue").field(&queue.name()).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

// ─── Work queue ──────────────────────────────────────────────────────────────

struct QueueInner {
    name: String,
    sender: mpsc::Sender<Job>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        tracing::debug!(message = "work_queue.stop", name = %self.name);
    }
}

/// A named worker thread running submitted jobs in FIFO order.
///
/// Handles are cheap to clone. The thread exits once every handle has been
/// dropped and the remaining jobs have run. Submission never blocks.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();

        thread::Builder::new().name(name.clone()).spawn(move || {
            while let Ok(job) = rx.recv() {
                job();
            }
        })?;
        tracing::debug!(message = "work_queue.start", name = %name);

        Ok(Self {
            inner: Arc::new(QueueInner { name, sender: tx }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue a job. Jobs submitted after the worker died are dropped.
    pub fn submit(&self, job: Job) {
        if self.inner.sender.send(job).is_err() {
            tracing::warn!(message = "work_queue.closed", name = %self.inner.name);
        }
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("name", &self.name()).finish()
    }
}
