#![forbid(unsafe_code)]

//! Buffered replay.
//!
//! [`Memoize`] subscribes to its source once, at construction, and runs each
//! value through a [`BufferStrategy`]. Whatever the strategy emits is
//! broadcast as a `Vec<T>`. When the buffer's replay flag is set, a listener
//! that joins later receives the current buffer synchronously as its first
//! event.
//!
//! # Ordering
//!
//! Emission and late-listener replay are serialized by one re-entrant lock,
//! so a replayed window always reaches a new listener before any window
//! produced after it registered.
//!
//! # Lifetime
//!
//! The stage lives while any [`Memoize`] handle or any listener registration
//! exists. The upstream subscription is released with it.
//!
//! # Strategies
//!
//! | Strategy                 | Emits                                        | Replays |
//! |--------------------------|----------------------------------------------|---------|
//! | `continuous`             | last `size` values (optionally once full)    | if `send_last`, after first emit |
//! | `portionally`            | every `size` values, as one batch            | no      |
//! | `old_value`              | `[current]`, then `[previous, current]`      | no      |
//! | `distinct_until_changed` | `[value]` when the comparator reports change | no      |
//! | `custom`                 | whatever the closure returns                 | closure decides |

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use rill_core::{Broadcaster, Callback, Disposable, Event, Listenable};

use crate::error::{Result, non_zero};
use crate::operator::guarded;

/// Retained values plus whether late listeners get them replayed.
#[derive(Debug, Clone)]
pub struct Buffer<T> {
    pub items: VecDeque<T>,
    pub replay: bool,
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            replay: false,
        }
    }
}

impl<T: Clone> Buffer<T> {
    fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

type Comparator<T> = Box<dyn FnMut(&T, &T) -> bool + Send>;
type CustomPush<T> = Box<dyn FnMut(&mut Buffer<T>, T) -> Option<Vec<T>> + Send>;

/// Windowing strategy for [`Memoize`].
pub enum BufferStrategy<T> {
    Continuous {
        size: usize,
        wait_fullness: bool,
        send_last: bool,
    },
    Portionally {
        size: usize,
    },
    OldValue,
    /// `is_changed(last_emitted, candidate)` decides whether to emit.
    DistinctUntilChanged(Comparator<T>),
    Custom(CustomPush<T>),
}

impl<T: Clone + Send + 'static> BufferStrategy<T> {
    /// FIFO window of at most `size` values.
    pub fn continuous(size: usize, wait_fullness: bool, send_last: bool) -> Result<Self> {
        Ok(Self::Continuous {
            size: non_zero(size, "continuous")?,
            wait_fullness,
            send_last,
        })
    }

    /// Batches of exactly `size` values.
    pub fn portionally(size: usize) -> Result<Self> {
        Ok(Self::Portionally {
            size: non_zero(size, "portionally")?,
        })
    }

    pub fn old_value() -> Self {
        Self::OldValue
    }

    pub fn distinct_until_changed(is_changed: impl FnMut(&T, &T) -> bool + Send + 'static) -> Self {
        Self::DistinctUntilChanged(Box::new(is_changed))
    }

    pub fn custom(
        push: impl FnMut(&mut Buffer<T>, T) -> Option<Vec<T>> + Send + 'static,
    ) -> Self {
        Self::Custom(Box::new(push))
    }

    /// Feed one value; returns what to emit, if anything.
    fn push(&mut self, buffer: &mut Buffer<T>, value: T) -> Option<Vec<T>> {
        match self {
            Self::Continuous {
                size,
                wait_fullness,
                send_last,
            } => {
                buffer.items.push_back(value);
                while buffer.items.len() > *size {
                    buffer.items.pop_front();
                }
                if *wait_fullness && buffer.items.len() < *size {
                    return None;
                }
                buffer.replay = *send_last;
                Some(buffer.snapshot())
            }
            Self::Portionally { size } => {
                buffer.items.push_back(value);
                if buffer.items.len() < *size {
                    return None;
                }
                Some(buffer.items.drain(..).collect())
            }
            Self::OldValue => {
                let previous = buffer.items.pop_back();
                buffer.items.clear();
                buffer.items.push_back(value.clone());
                Some(match previous {
                    Some(previous) => vec![previous, value],
                    None => vec![value],
                })
            }
            Self::DistinctUntilChanged(is_changed) => {
                let changed = buffer
                    .items
                    .back()
                    .is_none_or(|last| is_changed(last, &value));
                if !changed {
                    return None;
                }
                buffer.items.clear();
                buffer.items.push_back(value.clone());
                Some(vec![value])
            }
            Self::Custom(push) => push(buffer, value),
        }
    }
}

impl<T> fmt::Debug for BufferStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuous {
                size,
                wait_fullness,
                send_last,
            } => f
                .debug_struct("Continuous")
                .field("size", size)
                .field("wait_fullness", wait_fullness)
                .field("send_last", send_last)
                .finish(),
            Self::Portionally { size } => f.debug_struct("Portionally").field("size", size).finish(),
            Self::OldValue => f.write_str("OldValue"),
            Self::DistinctUntilChanged(_) => f.write_str("DistinctUntilChanged"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

struct MemoState<T> {
    buffer: Buffer<T>,
    strategy: BufferStrategy<T>,
}

struct MemoInner<T> {
    delivery: ReentrantMutex<()>,
    state: Mutex<MemoState<T>>,
    output: Broadcaster<Vec<T>>,
    upstream: Mutex<Option<Disposable>>,
}

/// Retained replay stage; see the module docs.
pub struct Memoize<T> {
    inner: Arc<MemoInner<T>>,
}

impl<T: Clone + Send + 'static> Memoize<T> {
    pub fn new<L>(source: &L, strategy: BufferStrategy<T>) -> Self
    where
        L: Listenable<Out = T>,
    {
        let inner = Arc::new(MemoInner {
            delivery: ReentrantMutex::new(()),
            state: Mutex::new(MemoState {
                buffer: Buffer::default(),
                strategy,
            }),
            output: Broadcaster::new(),
            upstream: Mutex::new(None),
        });

        let stage: Weak<MemoInner<T>> = Arc::downgrade(&inner);
        let upstream = source.listen(Callback::new(move |event| {
            if let Some(stage) = stage.upgrade() {
                stage.accept(event);
            }
        }));
        *inner.upstream.lock() = Some(upstream);

        Self { inner }
    }

    /// Current buffer contents.
    pub fn buffered(&self) -> Vec<T> {
        self.inner.state.lock().buffer.snapshot()
    }
}

impl<T: Clone + Send + 'static> MemoInner<T> {
    fn accept(&self, event: Event<T>) {
        match event {
            Event::Value(value) => {
                let _turn = self.delivery.lock();
                let emitted = {
                    let mut state = self.state.lock();
                    let MemoState { buffer, strategy } = &mut *state;
                    guarded(|| strategy.push(buffer, value))
                };
                match emitted {
                    Ok(Some(window)) => {
                        tracing::trace!(message = "memoize.emit", len = window.len());
                        self.output.send(window);
                    }
                    Ok(None) => {}
                    Err(e) => self.output.send_error(e),
                }
            }
            Event::Error(e) => {
                let _turn = self.delivery.lock();
                self.output.send_error(e);
            }
        }
    }
}

impl<T: Clone + Send + 'static> Listenable for Memoize<T> {
    type Out = Vec<T>;

    fn listen(&self, callback: Callback<Vec<T>>) -> Disposable {
        let turn = self.inner.delivery.lock();
        let registration = self.inner.output.listen(callback.clone());
        let replay = {
            let state = self.inner.state.lock();
            state.buffer.replay.then(|| state.buffer.snapshot())
        };
        if let Some(window) = replay {
            callback.call(Event::Value(window));
        }
        drop(turn);

        let stage = Arc::clone(&self.inner);
        Disposable::new(move || {
            registration.dispose();
            drop(stage);
        })
    }
}

impl<T> Clone for Memoize<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Memoize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoize")
            .field("strategy", &self.inner.state.lock().strategy)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
