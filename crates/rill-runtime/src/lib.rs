#![forbid(unsafe_code)]

//! Operators, joins, replay, sharing and gated buffering for Rill streams.
//!
//! Everything here is built on the `rill-core` contract: a stage wraps the
//! callback it is given and listens upstream. Most stages are lazy and keep
//! per-listener state. [`Memoize`], [`Suspend`] and a continuous [`Share`]
//! are eager: they subscribe upstream once, at construction.
//!
//! # Time
//!
//! Time-based operators take an explicit [`Scheduler`]. [`TimerThread`] runs
//! jobs on a dedicated named thread; [`LabScheduler`] advances only when
//! told to, for deterministic tests.
//!
//! # Role in Rill
//! `rill-runtime` is the operator layer. The `rill` facade re-exports it
//! alongside `rill-core` through a single prelude.

pub mod async_map;
pub mod debounce;
pub mod error;
pub mod ext;
pub mod join;
pub mod lifetime;
pub mod memoize;
pub mod operator;
pub mod scheduler;
pub mod share;
pub mod suspend;

pub use async_map::{Completion, MapAsync, Then};
pub use debounce::Debounce;
pub use error::{ConfigError, Result};
pub use ext::{Compared, Latest, ListenableExt, Paired, PairedOr, SeededPairs};
pub use join::{CombineAll, CombineLatest2, CombineLatest3, CombineLatest4, Merge};
pub use lifetime::{OnDispose, Once};
pub use memoize::{Buffer, BufferStrategy, Memoize};
pub use operator::{Filter, FilterMap, Inspect, Map, MapEvent, OnQueue, Operator, Preprocessor, TryMap};
pub use scheduler::{LabScheduler, Scheduler, TimerThread};
pub use share::{ConnectionPolicy, Share, Shared};
pub use suspend::Suspend;
