#![forbid(unsafe_code)]

//! Operators that shape the lifetime of a registration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rill_core::{Callback, Disposable, Dispose, Listenable, SingleDisposable};

/// Delivers the first event, then disposes its own registration.
///
/// The returned [`Disposable`] reports `is_disposed()` once that happens.
/// Sources that emit inline during `listen` are handled: the registration
/// is disposed as soon as it exists. The registration is owned by the
/// operator, so a detached handle still unsubscribes after the first event.
#[derive(Debug, Clone)]
pub struct Once<L> {
    source: L,
}

impl<L> Once<L> {
    pub fn new(source: L) -> Self {
        Self { source }
    }
}

impl<L: Listenable> Listenable for Once<L> {
    type Out = L::Out;

    fn listen(&self, callback: Callback<L::Out>) -> Disposable {
        let slot = SingleDisposable::new();
        let handle = {
            let slot = slot.clone();
            Disposable::new(move || slot.dispose())
        };
        let caller = handle.downgrade();
        let fired = AtomicBool::new(false);
        let own = slot.clone();
        let upstream = self.source.listen(Callback::new(move |event| {
            if fired.swap(true, Ordering::AcqRel) {
                return;
            }
            caller.dispose();
            own.dispose();
            callback.call(event);
        }));
        slot.attach_owned(upstream);
        handle
    }
}

/// Runs a hook after the registration is disposed.
pub struct OnDispose<L, F> {
    source: L,
    hook: Arc<F>,
}

impl<L, F> OnDispose<L, F> {
    pub fn new(source: L, hook: F) -> Self {
        Self {
            source,
            hook: Arc::new(hook),
        }
    }
}

impl<L, F> Listenable for OnDispose<L, F>
where
    L: Listenable,
    F: Fn() + Send + Sync + 'static,
{
    type Out = L::Out;

    fn listen(&self, callback: Callback<L::Out>) -> Disposable {
        let upstream = self.source.listen(callback);
        let hook = Arc::clone(&self.hook);
        Disposable::new(move || {
            upstream.dispose();
            hook();
        })
    }
}

impl<L: Clone, F> Clone for OnDispose<L, F> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            hook: Arc::clone(&self.hook),
        }
    }
}
