#![forbid(unsafe_code)]

//! Pause/flush buffering driven by a boolean controller stream.
//!
//! While the gate is closed, data values queue up to `max_buffer_size`,
//! dropping the oldest entry on overflow. Opening the gate emits the queued
//! batch as one `Vec` and clears it; while open, each value is emitted as a
//! one-element `Vec`. Closing the gate discards anything still queued.
//!
//! `max_buffer_size` is an upper bound, not a reservation; pass `usize::MAX`
//! for an unbounded queue.
//!
//! # Ordering
//!
//! Emits happen outside the gate lock. With data and controller arriving on
//! different threads, a singleton sent while the gate is open may be
//! delivered before a batch flushed by a concurrent open. Feed both inputs
//! from one thread when batch-before-singleton order matters.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rill_core::{Broadcaster, Callback, Disposable, DisposableBag, Event, Listenable};

use crate::error::{Result, non_zero};

struct Gate<T> {
    open: bool,
    queue: VecDeque<T>,
}

struct SuspendInner<T> {
    max_buffer_size: usize,
    gate: Mutex<Gate<T>>,
    output: Broadcaster<Vec<T>>,
    upstream: DisposableBag,
}

impl<T: Clone + Send + 'static> SuspendInner<T> {
    fn accept(&self, event: Event<T>) {
        let value = match event {
            Event::Value(v) => v,
            Event::Error(e) => return self.output.send_error(e),
        };
        let mut gate = self.gate.lock();
        if gate.open {
            drop(gate);
            self.output.send(vec![value]);
            return;
        }
        if gate.queue.len() == self.max_buffer_size {
            gate.queue.pop_front();
            tracing::trace!(message = "suspend.drop_oldest");
        }
        gate.queue.push_back(value);
    }

    fn control(&self, event: Event<bool>) {
        let open = match event {
            Event::Value(open) => open,
            Event::Error(e) => return self.output.send_error(e),
        };
        let batch = {
            let mut gate = self.gate.lock();
            if gate.open == open {
                return;
            }
            gate.open = open;
            let batch: Vec<T> = gate.queue.drain(..).collect();
            if open { batch } else { Vec::new() }
        };
        if !batch.is_empty() {
            tracing::debug!(message = "suspend.flush", len = batch.len());
            self.output.send(batch);
        }
    }
}

/// Gated buffering stage; see the module docs.
///
/// Like [`Memoize`](crate::Memoize), the stage subscribes to its inputs at
/// construction and stays subscribed while any handle or listener exists.
pub struct Suspend<T> {
    inner: Arc<SuspendInner<T>>,
}

impl<T: Clone + Send + 'static> Suspend<T> {
    /// Build a stage over `data`, gated by `controller`.
    ///
    /// `initially` is the gate state before the controller's first value.
    pub fn new<D, C>(data: &D, controller: &C, max_buffer_size: usize, initially: bool) -> Result<Self>
    where
        D: Listenable<Out = T>,
        C: Listenable<Out = bool>,
    {
        let inner = Arc::new(SuspendInner {
            max_buffer_size: non_zero(max_buffer_size, "suspend")?,
            gate: Mutex::new(Gate {
                open: initially,
                queue: VecDeque::new(),
            }),
            output: Broadcaster::new(),
            upstream: DisposableBag::new(),
        });

        let stage: Weak<SuspendInner<T>> = Arc::downgrade(&inner);
        inner.upstream.add(data.listen(Callback::new(move |event| {
            if let Some(stage) = stage.upgrade() {
                stage.accept(event);
            }
        })));
        let stage = Arc::downgrade(&inner);
        inner.upstream.add(controller.listen(Callback::new(move |event| {
            if let Some(stage) = stage.upgrade() {
                stage.control(event);
            }
        })));

        Ok(Self { inner })
    }

    /// Values currently held back by a closed gate.
    pub fn pending(&self) -> Vec<T> {
        self.inner.gate.lock().queue.iter().cloned().collect()
    }

    pub fn is_open(&self) -> bool {
        self.inner.gate.lock().open
    }
}

impl<T: Clone + Send + 'static> Listenable for Suspend<T> {
    type Out = Vec<T>;

    fn listen(&self, callback: Callback<Vec<T>>) -> Disposable {
        let registration = self.inner.output.listen(callback);
        let stage = Arc::clone(&self.inner);
        Disposable::new(move || {
            registration.dispose();
            drop(stage);
        })
    }
}

impl<T> Clone for Suspend<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Suspend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gate = self.inner.gate.lock();
        f.debug_struct("Suspend")
            .field("open", &gate.open)
            .field("pending", &gate.queue.len())
            .field("max_buffer_size", &self.inner.max_buffer_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use rill_core::{Constant, StreamError};
    use tracing_test::traced_test;

    struct Rig {
        data: Broadcaster<i32>,
        controller: Broadcaster<bool>,
        stage: Suspend<i32>,
        seen: Arc<Mutex<Vec<Vec<i32>>>>,
        _d: Disposable,
    }

    fn rig(max: usize, initially: bool) -> Rig {
        let data = Broadcaster::new();
        let controller = Broadcaster::new();
        let stage = Suspend::new(&data, &controller, max, initially).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _d = stage.listen(Callback::on_value(move |v| sink.lock().push(v)));
        Rig {
            data,
            controller,
            stage,
            seen,
            _d,
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let r = rig(2, false);
        r.data.send(10);
        r.data.send(20);
        r.data.send(30);
        assert_eq!(r.stage.pending(), vec![20, 30]);
        assert!(r.seen.lock().is_empty());

        r.controller.send(true);
        assert_eq!(*r.seen.lock(), vec![vec![20, 30]]);
        assert!(r.stage.pending().is_empty());
    }

    #[test]
    fn pause_resume_cycle() {
        let r = rig(5, false);
        r.data.send(10);
        assert!(r.seen.lock().is_empty());
        r.controller.send(true);
        assert_eq!(*r.seen.lock(), vec![vec![10]]);

        r.controller.send(false);
        r.data.send(20);
        r.data.send(30);
        r.controller.send(true);
        assert_eq!(*r.seen.lock(), vec![vec![10], vec![20, 30]]);
    }

    #[test]
    fn open_gate_emits_singletons() {
        let r = rig(3, true);
        r.data.send(1);
        r.data.send(2);
        assert_eq!(*r.seen.lock(), vec![vec![1], vec![2]]);
        assert!(r.stage.is_open());
    }

    #[test]
    fn closing_discards_queue() {
        let r = rig(3, true);
        r.controller.send(false);
        r.data.send(1);
        r.controller.send(false);
        assert_eq!(r.stage.pending(), vec![1]);
        r.controller.send(true);
        r.controller.send(false);
        r.data.send(2);
        assert_eq!(r.stage.pending(), vec![2]);
        assert_eq!(*r.seen.lock(), vec![vec![1]]);
    }

    #[test]
    fn empty_resume_emits_nothing() {
        let r = rig(3, false);
        r.controller.send(true);
        r.controller.send(true);
        assert!(r.seen.lock().is_empty());
    }

    #[test]
    fn errors_from_both_inputs_are_forwarded() {
        let r = rig(3, false);
        let errors = Arc::new(Mutex::new(0));
        let e = Arc::clone(&errors);
        let _d = r.stage.listen(Callback::on_error(move |_| *e.lock() += 1));
        r.data.send_error(StreamError::msg("data"));
        r.controller.send_error(StreamError::msg("controller"));
        assert_eq!(*errors.lock(), 2);
        assert!(!r.stage.is_open());
    }

    #[test]
    fn controller_emitting_on_listen_opens_gate() {
        let data: Broadcaster<i32> = Broadcaster::new();
        let stage = Suspend::new(&data, &Constant(true), 1, false).unwrap();
        assert!(stage.is_open());
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let data: Broadcaster<i32> = Broadcaster::new();
        let controller: Broadcaster<bool> = Broadcaster::new();
        let err = Suspend::new(&data, &controller, 0, false).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBufferSize { stage: "suspend" });
    }

    #[test]
    fn dropping_stage_and_listeners_unsubscribes() {
        let data: Broadcaster<i32> = Broadcaster::new();
        let controller: Broadcaster<bool> = Broadcaster::new();
        let stage = Suspend::new(&data, &controller, 2, false).unwrap();
        let d = stage.listen(Callback::new(|_| {}));
        drop(stage);
        assert_eq!(data.listener_count(), 1);
        drop(d);
        assert_eq!(data.listener_count(), 0);
        assert_eq!(controller.listener_count(), 0);
    }

    #[test]
    fn unbounded_buffer_size_is_accepted() {
        let data: Broadcaster<i32> = Broadcaster::new();
        let controller: Broadcaster<bool> = Broadcaster::new();
        let stage = Suspend::new(&data, &controller, usize::MAX, false).unwrap();
        for n in 0..1000 {
            data.send(n);
        }
        assert_eq!(stage.pending().len(), 1000);
        assert_eq!(stage.pending()[0], 0);
    }

    #[traced_test]
    #[test]
    fn flush_is_logged() {
        let r = rig(2, false);
        r.data.send(1);
        r.controller.send(true);
        assert!(logs_contain("suspend.flush"));
    }
}
