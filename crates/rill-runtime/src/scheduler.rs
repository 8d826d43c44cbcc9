#![forbid(unsafe_code)]

//! Delayed execution for time-based operators.
//!
//! Nothing in this crate creates a scheduler on its own; callers pass one to
//! the operators that need it.
//!
//! - [`TimerThread`] runs jobs on a named background thread at wall-clock
//!   deadlines.
//! - [`LabScheduler`] is a manually advanced clock for deterministic tests.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use parking_lot::Mutex;
use rill_core::dispatch::Job;
use web_time::{Duration, Instant};

/// Source of time and delayed execution.
pub trait Scheduler: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Run `job` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, job: Job);
}

struct Entry {
    due: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

type Timeline = BinaryHeap<Reverse<Entry>>;

// ─── Timer thread ────────────────────────────────────────────────────────────

struct TimerInner {
    name: String,
    sender: mpsc::Sender<(Instant, Job)>,
}

/// Wall-clock scheduler backed by one named thread.
///
/// The thread exits when the last handle is dropped; jobs still pending at
/// that point are discarded.
#[derive(Clone)]
pub struct TimerThread {
    inner: Arc<TimerInner>,
}

impl TimerThread {
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<(Instant, Job)>();
        let thread_name = name.clone();

        thread::Builder::new().name(name.clone()).spawn(move || {
            timer_loop(&rx);
            tracing::debug!(message = "timer.stop", name = %thread_name);
        })?;
        tracing::debug!(message = "timer.start", name = %name);

        Ok(Self {
            inner: Arc::new(TimerInner { name, sender: tx }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

fn timer_loop(rx: &mpsc::Receiver<(Instant, Job)>) {
    let mut timeline = Timeline::new();
    let mut seq = 0u64;
    loop {
        let now = Instant::now();
        while timeline.peek().is_some_and(|Reverse(e)| e.due <= now) {
            if let Some(Reverse(entry)) = timeline.pop() {
                (entry.job)();
            }
        }

        let received = match timeline.peek() {
            Some(Reverse(next)) => rx.recv_timeout(next.due.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((due, job)) => {
                timeline.push(Reverse(Entry { due, seq, job }));
                seq += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

impl Scheduler for TimerThread {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, job: Job) {
        let due = Instant::now() + delay;
        if self.inner.sender.send((due, job)).is_err() {
            tracing::warn!(message = "timer.closed", name = %self.inner.name);
        }
    }
}

impl fmt::Debug for TimerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerThread").field("name", &self.name()).finish()
    }
}

// ─── Lab scheduler ───────────────────────────────────────────────────────────

struct LabState {
    offset: Duration,
    seq: u64,
    timeline: Timeline,
}

/// A manually advanced clock for deterministic tests.
///
/// Jobs run on the thread calling [`LabScheduler::advance`], in deadline
/// order, with the clock set to each job's deadline while it runs.
#[derive(Clone)]
pub struct LabScheduler {
    epoch: Instant,
    state: Arc<Mutex<LabState>>,
}

impl LabScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Arc::new(Mutex::new(LabState {
                offset: Duration::ZERO,
                seq: 0,
                timeline: Timeline::new(),
            })),
        }
    }

    /// Time elapsed since the scheduler was created.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().offset
    }

    /// Number of jobs not yet run.
    pub fn pending(&self) -> usize {
        self.state.lock().timeline.len()
    }

    /// Move the clock forward, running every job that falls due.
    ///
    /// Jobs scheduled by those jobs run too if they fall inside the window.
    pub fn advance(&self, delta: Duration) {
        let target = self.state.lock().offset + delta;
        loop {
            let next = {
                let mut state = self.state.lock();
                let due_now = state
                    .timeline
                    .peek()
                    .is_some_and(|Reverse(e)| e.due <= self.epoch + target);
                if !due_now {
                    state.offset = target;
                    return;
                }
                let Some(Reverse(entry)) = state.timeline.pop() else {
                    state.offset = target;
                    return;
                };
                state.offset = state.offset.max(entry.due.saturating_duration_since(self.epoch));
                entry
            };
            (next.job)();
        }
    }
}

impl Default for LabScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LabScheduler {
    fn now(&self) -> Instant {
        self.epoch + self.state.lock().offset
    }

    fn schedule(&self, delay: Duration, job: Job) {
        let mut state = self.state.lock();
        let due = self.epoch + state.offset + delay;
        let seq = state.seq;
        state.seq += 1;
        state.timeline.push(Reverse(Entry { due, seq, job }));
    }
}

impl fmt::Debug for LabScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabScheduler")
            .field("elapsed", &self.elapsed())
            .field("pending", &self.pending())
            .finish()
    }
}
