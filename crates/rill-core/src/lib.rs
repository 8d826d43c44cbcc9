#![forbid(unsafe_code)]

//! Core primitives for Rill push streams.
//!
//! A source emits [`Event`]s to any number of independently-lifetimed
//! listeners. Listening returns a [`Disposable`]; disposing it (or dropping
//! it) detaches the listener.
//!
//! # Building blocks
//!
//! - [`Disposable`], [`DisposableBag`], [`SingleDisposable`]: cancellation.
//! - [`Event`], [`StreamError`]: the tagged value/error payload.
//! - [`Listenable`]: the `listen(callback) -> Disposable` capability.
//! - [`Broadcaster`]: a multicast hot source with a token-keyed registry.
//! - [`ObservableCell`]: a mutable value that announces its changes.
//!
//! Operators, joins, replay, sharing and gated buffering live in
//! `rill-runtime`.

pub mod broadcaster;
pub mod cell;
pub mod dispatch;
pub mod disposable;
pub mod error;
pub mod event;
pub mod listenable;

pub use broadcaster::{Broadcaster, BroadcasterConfig, SyncMode, Token};
pub use cell::{ObservableCell, Storage, Strong, Unowned, WeakRef};
pub use dispatch::{Dispatcher, WorkQueue};
pub use disposable::{Dispose, Disposable, DisposableBag, SingleDisposable, WeakDisposable};
pub use error::{SlotError, StreamError};
pub use event::Event;
pub use listenable::{AnyListenable, Callback, Constant, FromIter, Listenable};
