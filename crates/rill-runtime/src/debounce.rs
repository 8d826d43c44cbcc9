#![forbid(unsafe_code)]

//! Rate limiting by quiet period.
//!
//! A value arriving while the window is closed is emitted at once and opens
//! a window of `interval`. Values arriving inside the window replace the
//! held value. When the window's re-check fires and a newer value is held,
//! that value goes through the same path again: it is emitted and opens the
//! next window. Errors are never held.

use std::sync::Arc;

use parking_lot::Mutex;
use rill_core::{Callback, Event};
use web_time::{Duration, Instant};

use crate::operator::Operator;
use crate::scheduler::Scheduler;

/// Debounce operator; see the module docs.
pub struct Debounce {
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl Debounce {
    pub fn new(interval: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            interval,
            scheduler,
        }
    }
}

impl<I: Clone + Send + 'static> Operator<I> for Debounce {
    type Out = I;

    fn wrap(&self, downstream: Callback<I>) -> Callback<I> {
        let debouncer = Arc::new(Debouncer {
            interval: self.interval,
            scheduler: Arc::clone(&self.scheduler),
            downstream,
            window: Mutex::new(Window {
                closes_at: None,
                held: None,
            }),
        });
        Callback::new(move |event| match event {
            Event::Value(v) => debouncer.push(v),
            Event::Error(e) => debouncer.downstream.call(Event::Error(e)),
        })
    }
}

struct Window<T> {
    closes_at: Option<Instant>,
    held: Option<T>,
}

struct Debouncer<T> {
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
    downstream: Callback<T>,
    window: Mutex<Window<T>>,
}

impl<T: Clone + Send + 'static> Debouncer<T> {
    fn push(self: &Arc<Self>, value: T) {
        let now = self.scheduler.now();
        {
            let mut window = self.window.lock();
            if window.closes_at.is_some_and(|at| now < at) {
                tracing::trace!(message = "debounce.hold");
                window.held = Some(value);
                return;
            }
            window.held = None;
            window.closes_at = Some(now + self.interval);
        }
        self.downstream.call(Event::Value(value));

        let this = Arc::clone(self);
        self.scheduler
            .schedule(self.interval, Box::new(move || this.recheck()));
    }

    fn recheck(self: &Arc<Self>) {
        let held = self.window.lock().held.take();
        if let Some(value) = held {
            tracing::trace!(message = "debounce.release");
            self.push(value);
        }
    }
}
