#![forbid(unsafe_code)]

//! Cancellation handles.
//!
//! [`Disposable`] is the receipt returned by every `listen` call. It behaves
//! like an RAII guard: dropping it disposes the registration, and
//! [`Disposable::detach`] opts out of that.
//!
//! # Invariants
//!
//! 1. `dispose()` runs the teardown action at most once, regardless of how
//!    many times or from how many threads it is called.
//! 2. The teardown action runs with no internal lock held, so it may itself
//!    dispose other handles (or, re-entrantly, this one).
//! 3. Adding to a [`DisposableBag`] that has already been disposed disposes
//!    the added item immediately.
//! 4. A [`SingleDisposable`] disposed before its target is attached disposes
//!    the target at attach time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send>;

/// Anything that can be torn down.
pub trait Dispose: Send + Sync {
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

struct Teardown {
    disposed: AtomicBool,
    action: Mutex<Option<Action>>,
}

impl Teardown {
    fn new(action: Option<Action>) -> Arc<Self> {
        Arc::new(Self {
            disposed: AtomicBool::new(false),
            action: Mutex::new(action),
        })
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Handle to a listener registration or any other teardown action.
#[must_use = "dropping a Disposable disposes it; call `detach()` to keep the registration"]
pub struct Disposable {
    teardown: Arc<Teardown>,
    armed: bool,
}

impl Disposable {
    /// Run `action` once, on the first `dispose()` or on drop.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Teardown::new(Some(Box::new(action))),
            armed: true,
        }
    }

    /// A handle with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            teardown: Teardown::new(None),
            armed: true,
        }
    }

    pub fn dispose(&self) {
        self.teardown.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.is_disposed()
    }

    /// Drop the handle without disposing.
    ///
    /// The registration then lives as long as its source does, or until a
    /// [`WeakDisposable`] obtained earlier disposes it.
    pub fn detach(mut self) {
        self.armed = false;
    }

    /// A non-owning handle that can dispose this registration later.
    pub fn downgrade(&self) -> WeakDisposable {
        WeakDisposable {
            teardown: Arc::downgrade(&self.teardown),
        }
    }
}

impl Dispose for Disposable {
    fn dispose(&self) {
        Disposable::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        Disposable::is_disposed(self)
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        if self.armed {
            self.teardown.dispose();
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Non-owning reference to a [`Disposable`]'s teardown.
///
/// Disposing through a weak handle whose owner is gone is a no-op.
#[derive(Clone, Default)]
pub struct WeakDisposable {
    teardown: Weak<Teardown>,
}

impl Dispose for WeakDisposable {
    fn dispose(&self) {
        if let Some(teardown) = self.teardown.upgrade() {
            teardown.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.teardown
            .upgrade()
            .is_none_or(|teardown| teardown.is_disposed())
    }
}

impl std::fmt::Debug for WeakDisposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakDisposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DisposableBag
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BagState {
    disposed: bool,
    items: Vec<Disposable>,
}

/// Unordered collection of disposables torn down together.
#[derive(Default)]
pub struct DisposableBag {
    state: Mutex<BagState>,
}

impl DisposableBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `item`, or dispose it immediately if the bag is already disposed.
    pub fn add(&self, item: Disposable) {
        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            item.dispose();
            return;
        }
        state.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispose(&self) {
        let items = {
            let mut state = self.state.lock();
            state.disposed = true;
            std::mem::take(&mut state.items)
        };
        for item in &items {
            item.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }
}

impl Dispose for DisposableBag {
    fn dispose(&self) {
        DisposableBag::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        DisposableBag::is_disposed(self)
    }
}

impl Drop for DisposableBag {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl From<DisposableBag> for Disposable {
    fn from(bag: DisposableBag) -> Self {
        Disposable::new(move || bag.dispose())
    }
}

impl std::fmt::Debug for DisposableBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DisposableBag")
            .field("disposed", &state.disposed)
            .field("len", &state.items.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SingleDisposable
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    disposed: bool,
    target: Option<Box<dyn Dispose>>,
}

/// Placeholder whose target is attached after construction.
///
/// Operators that must dispose their own registration from inside its
/// callback create the slot first, capture it in the callback, then attach
/// the real registration once `listen` has returned.
#[derive(Clone, Default)]
pub struct SingleDisposable {
    state: Arc<Mutex<SlotState>>,
}

impl SingleDisposable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the slot at `target`, disposing it at once if the slot was
    /// already disposed.
    pub fn attach(&self, target: &Disposable) {
        self.install(Box::new(target.downgrade()));
    }

    /// Like [`attach`](Self::attach), but the slot owns `target`, so the
    /// registration survives the caller detaching or dropping its handle
    /// until the slot itself is disposed.
    pub fn attach_owned(&self, target: Disposable) {
        self.install(Box::new(target));
    }

    fn install(&self, target: Box<dyn Dispose>) {
        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            target.dispose();
            return;
        }
        state.target = Some(target);
    }
}

impl Dispose for SingleDisposable {
    fn dispose(&self) {
        let target = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.target.take()
        };
        if let Some(target) = target {
            target.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Arc<AtomicUsize>, Disposable) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let d = Disposable::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, d)
    }

    #[test]
    fn dispose_is_idempotent() {
        let (count, d) = counting();
        for _ in 0..5 {
            d.dispose();
        }
        assert!(d.is_disposed());
        drop(d);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_disposes() {
        let (count, d) = counting();
        drop(d);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_keeps_action_pending() {
        let (count, d) = counting();
        let weak = d.downgrade();
        d.detach();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // The owner is gone, so the weak handle cannot reach the action.
        assert!(weak.is_disposed());
    }

    #[test]
    fn weak_handle_disposes_owner() {
        let (count, d) = counting();
        let weak = d.downgrade();
        weak.dispose();
        assert!(d.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_dispose_from_action() {
        let slot = SingleDisposable::new();
        let inner = slot.clone();
        let d = Disposable::new(move || inner.dispose());
        slot.attach(&d);
        d.dispose();
        assert!(d.is_disposed());
        assert!(slot.is_disposed());
    }

    #[test]
    fn bag_disposes_all_members() {
        let bag = DisposableBag::new();
        let (a, da) = counting();
        let (b, db) = counting();
        bag.add(da);
        bag.add(db);
        assert_eq!(bag.len(), 2);

        bag.dispose();
        assert!(bag.is_empty());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_to_disposed_bag_disposes_immediately() {
        let bag = DisposableBag::new();
        bag.dispose();

        let (count, d) = counting();
        let weak = d.downgrade();
        bag.add(d);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bag.is_empty());
        assert!(weak.is_disposed());
    }

    #[test]
    fn bag_into_disposable() {
        let bag = DisposableBag::new();
        let (count, d) = counting();
        bag.add(d);
        let whole: Disposable = bag.into();
        whole.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slot_disposed_before_attach() {
        let slot = SingleDisposable::new();
        slot.dispose();

        let (count, d) = counting();
        slot.attach(&d);
        assert!(d.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn owned_target_outlives_its_handle() {
        let slot = SingleDisposable::new();
        let (count, d) = counting();
        let weak = d.downgrade();
        slot.attach_owned(d);
        assert!(!weak.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        slot.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let late = SingleDisposable::new();
        late.dispose();
        let (count, d) = counting();
        late.attach_owned(d);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_dispose_runs_once() {
        let (count, d) = counting();
        let d = Arc::new(d);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&d);
                std::thread::spawn(move || d.dispose())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    proptest::proptest! {
        #[test]
        fn bag_disposes_each_item_once(adds_before in 0usize..16, adds_after in 0usize..16, repeats in 1usize..4) {
            let bag = DisposableBag::new();
            let mut counters = Vec::new();
            for _ in 0..adds_before {
                let (count, d) = counting();
                bag.add(d);
                counters.push(count);
            }
            proptest::prop_assert_eq!(bag.len(), adds_before);
            for _ in 0..repeats {
                bag.dispose();
            }
            for _ in 0..adds_after {
                let (count, d) = counting();
                bag.add(d);
                counters.push(count);
            }
            drop(bag);
            for count in &counters {
                proptest::prop_assert_eq!(count.load(Ordering::SeqCst), 1);
            }
        }
    }
}
