#![forbid(unsafe_code)]

//! Rill public facade crate.
//!
//! Re-exports the core primitives and, with the `runtime` feature (on by
//! default), the operator layer. Most users only need the prelude:
//!
//! ```ignore
//! use rill::prelude::*;
//!
//! let source = Broadcaster::new();
//! let _sub = source.clone().map(|n: i32| n * 2).on_value(|n| println!("{n}"));
//! source.send(21);
//! ```

pub use rill_core as core;
#[cfg(feature = "runtime")]
pub use rill_runtime as runtime;

pub mod prelude {
    pub use rill_core::{
        AnyListenable, Broadcaster, BroadcasterConfig, Callback, Constant, Dispatcher, Dispose,
        Disposable, DisposableBag, Event, FromIter, Listenable, ObservableCell, SingleDisposable,
        SlotError, StreamError, SyncMode, WorkQueue,
    };

    #[cfg(feature = "runtime")]
    pub use rill_runtime::{
        BufferStrategy, CombineAll, CombineLatest2, CombineLatest3, CombineLatest4, Completion,
        ConfigError, ConnectionPolicy, LabScheduler, ListenableExt, Memoize, Merge, Scheduler,
        Share, Shared, Suspend, TimerThread,
    };
}
