#![forbid(unsafe_code)]

//! Method-chaining front end for every operator in this crate.
//!
//! ```ignore
//! let labels = counter
//!     .filter(|n: &i32| n % 2 == 0)
//!     .map(|n| format!("#{n}"))
//!     .debounce(Duration::from_millis(50), scheduler);
//! let _sub = labels.on_value(|label| println!("{label}"));
//! ```

use std::sync::Arc;

use rill_core::{AnyListenable, Broadcaster, Callback, Disposable, Event, Listenable, StreamError, WorkQueue};
use web_time::Duration;

use crate::async_map::{Completion, MapAsync, Then};
use crate::debounce::Debounce;
use crate::error::Result;
use crate::join::{CombineLatest2, CombineLatest3, Merge};
use crate::lifetime::{OnDispose, Once};
use crate::memoize::{BufferStrategy, Memoize};
use crate::operator::{Filter, FilterMap, Inspect, Map, MapEvent, OnQueue, Operator, Preprocessor, TryMap};
use crate::scheduler::Scheduler;
use crate::share::{ConnectionPolicy, Share};
use crate::suspend::Suspend;

/// Memoized stream reduced to its newest value.
pub type Latest<T> = Preprocessor<Memoize<T>, FilterMap<fn(Vec<T>) -> Option<T>>>;

/// Memoized stream of `(previous, current)` pairs.
pub type Paired<T> = Preprocessor<Memoize<T>, FilterMap<fn(Vec<T>) -> Option<(Option<T>, T)>>>;

/// Memoized stream of `(previous, current)` pairs with a seeded first previous.
pub type PairedOr<T> = Preprocessor<Memoize<T>, SeededPairs<T>>;

/// Boolean view of two joined streams.
pub type Compared<A, B> =
    Preprocessor<CombineLatest2<A, B>, Map<fn((<A as Listenable>::Out, <B as Listenable>::Out)) -> bool>>;

fn last_of<T>(window: Vec<T>) -> Option<T> {
    window.into_iter().last()
}

fn pair_of<T>(window: Vec<T>) -> Option<(Option<T>, T)> {
    let mut window = window.into_iter();
    match (window.next(), window.next()) {
        (Some(previous), Some(current)) => Some((Some(previous), current)),
        (Some(current), None) => Some((None, current)),
        _ => None,
    }
}

fn both(pair: (bool, bool)) -> bool {
    pair.0 && pair.1
}

fn either(pair: (bool, bool)) -> bool {
    pair.0 || pair.1
}

fn lt<T: PartialOrd>(pair: (T, T)) -> bool {
    pair.0 < pair.1
}

fn le<T: PartialOrd>(pair: (T, T)) -> bool {
    pair.0 <= pair.1
}

fn gt<T: PartialOrd>(pair: (T, T)) -> bool {
    pair.0 > pair.1
}

fn ge<T: PartialOrd>(pair: (T, T)) -> bool {
    pair.0 >= pair.1
}

/// Turns `old_value` windows into pairs, using a fixed value before the
/// first previous exists.
pub struct SeededPairs<T>(T);

impl<T> Operator<Vec<T>> for SeededPairs<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Out = (T, T);

    fn wrap(&self, downstream: Callback<(T, T)>) -> Callback<Vec<T>> {
        let seed = self.0.clone();
        Callback::new(move |event: Event<Vec<T>>| match event {
            Event::Value(window) => {
                let mut window = window.into_iter();
                match (window.next(), window.next()) {
                    (Some(previous), Some(current)) => downstream.call(Event::Value((previous, current))),
                    (Some(current), None) => downstream.call(Event::Value((seed.clone(), current))),
                    _ => {}
                }
            }
            Event::Error(e) => downstream.call(Event::Error(e)),
        })
    }
}

/// Combinators available on every [`Listenable`].
pub trait ListenableExt: Listenable + Sized {
    // ─── Listening ───────────────────────────────────────────────────────

    fn listen_fn(&self, f: impl Fn(Event<Self::Out>) + Send + Sync + 'static) -> Disposable {
        self.listen(Callback::new(f))
    }

    fn on_value(&self, f: impl Fn(Self::Out) + Send + Sync + 'static) -> Disposable {
        self.listen(Callback::on_value(f))
    }

    fn on_error(&self, f: impl Fn(StreamError) + Send + Sync + 'static) -> Disposable {
        self.listen(Callback::on_error(f))
    }

    // ─── Value operators ─────────────────────────────────────────────────

    fn map<U, F>(self, f: F) -> Preprocessor<Self, Map<F>>
    where
        U: Clone + Send + 'static,
        F: Fn(Self::Out) -> U + Send + Sync + 'static,
    {
        Preprocessor::new(self, Map::new(f))
    }

    fn try_map<U, F>(self, f: F) -> Preprocessor<Self, TryMap<F>>
    where
        U: Clone + Send + 'static,
        F: Fn(Self::Out) -> std::result::Result<U, StreamError> + Send + Sync + 'static,
    {
        Preprocessor::new(self, TryMap::new(f))
    }

    fn filter<P>(self, predicate: P) -> Preprocessor<Self, Filter<P>>
    where
        P: Fn(&Self::Out) -> bool + Send + Sync + 'static,
    {
        Preprocessor::new(self, Filter::new(predicate))
    }

    fn filter_map<U, F>(self, f: F) -> Preprocessor<Self, FilterMap<F>>
    where
        U: Clone + Send + 'static,
        F: Fn(Self::Out) -> Option<U> + Send + Sync + 'static,
    {
        Preprocessor::new(self, FilterMap::new(f))
    }

    fn inspect<F>(self, f: F) -> Preprocessor<Self, Inspect<F>>
    where
        F: Fn(&Event<Self::Out>) + Send + Sync + 'static,
    {
        Preprocessor::new(self, Inspect::new(f))
    }

    fn map_event<U, F>(self, f: F) -> Preprocessor<Self, MapEvent<F>>
    where
        U: Clone + Send + 'static,
        F: Fn(Event<Self::Out>) -> Event<U> + Send + Sync + 'static,
    {
        Preprocessor::new(self, MapEvent::new(f))
    }

    fn map_error<F>(self, f: F) -> impl Listenable<Out = Self::Out>
    where
        F: Fn(StreamError) -> StreamError + Send + Sync + 'static,
    {
        self.map_event(move |event| match event {
            Event::Error(e) => Event::Error(f(e)),
            other => other,
        })
    }

    /// Replace every error with `value`.
    fn resolved_with(self, value: Self::Out) -> impl Listenable<Out = Self::Out>
    where
        Self::Out: Sync,
    {
        self.map_event(move |event| match event {
            Event::Error(_) => Event::Value(value.clone()),
            other => other,
        })
    }

    /// Replace every error with `f(error)`.
    fn resolved_with_fn<F>(self, f: F) -> impl Listenable<Out = Self::Out>
    where
        F: Fn(StreamError) -> Self::Out + Send + Sync + 'static,
    {
        self.map_event(move |event| match event {
            Event::Error(e) => Event::Value(f(e)),
            other => other,
        })
    }

    // ─── Delivery and lifetime ───────────────────────────────────────────

    fn on_queue(self, queue: WorkQueue) -> Preprocessor<Self, OnQueue> {
        Preprocessor::new(self, OnQueue::new(queue))
    }

    fn debounce(self, interval: Duration, scheduler: Arc<dyn Scheduler>) -> Preprocessor<Self, Debounce> {
        Preprocessor::new(self, Debounce::new(interval, scheduler))
    }

    fn map_async<U, F>(self, f: F) -> Preprocessor<Self, MapAsync<F, U>>
    where
        U: Clone + Send + 'static,
        F: Fn(Self::Out, Completion<U>) -> std::result::Result<(), StreamError> + Send + Sync + 'static,
    {
        Preprocessor::new(self, MapAsync::new(f))
    }

    fn then<L, F>(self, f: F) -> Preprocessor<Self, Then<F>>
    where
        L: Listenable + 'static,
        F: Fn(Self::Out) -> L + Send + Sync + 'static,
    {
        Preprocessor::new(self, Then::new(f))
    }

    fn once(self) -> Once<Self> {
        Once::new(self)
    }

    fn on_dispose<F>(self, hook: F) -> OnDispose<Self, F>
    where
        F: Fn() + Send + Sync + 'static,
    {
        OnDispose::new(self, hook)
    }

    // ─── Joins ───────────────────────────────────────────────────────────

    fn merge_with<L>(self, other: L) -> Merge<AnyListenable<Self::Out>>
    where
        Self: Send + Sync + 'static,
        L: Listenable<Out = Self::Out> + Send + Sync + 'static,
    {
        Merge::new([AnyListenable::new(self), AnyListenable::new(other)])
    }

    fn combine_latest<L: Listenable>(self, other: L) -> CombineLatest2<Self, L> {
        CombineLatest2::new(self, other)
    }

    /// Like [`combine_latest`](Self::combine_latest), with a stand-in for
    /// each side until it first delivers.
    fn combine_latest_or<L: Listenable>(
        self,
        other: L,
        defaults: (Option<Self::Out>, Option<L::Out>),
    ) -> CombineLatest2<Self, L> {
        CombineLatest2::new(self, other).with_defaults(defaults)
    }

    fn combine_latest3<L: Listenable, M: Listenable>(self, second: L, third: M) -> CombineLatest3<Self, L, M> {
        CombineLatest3::new(self, second, third)
    }

    // ─── Predicates ──────────────────────────────────────────────────────

    /// `true` while both streams' latest values are `true`.
    fn and<L>(self, other: L) -> Compared<Self, L>
    where
        Self: Listenable<Out = bool>,
        L: Listenable<Out = bool>,
    {
        Preprocessor::new(self.combine_latest(other), Map::new(both as fn(_) -> _))
    }

    /// `true` while either stream's latest value is `true`.
    fn or<L>(self, other: L) -> Compared<Self, L>
    where
        Self: Listenable<Out = bool>,
        L: Listenable<Out = bool>,
    {
        Preprocessor::new(self.combine_latest(other), Map::new(either as fn(_) -> _))
    }

    fn less_than<L>(self, other: L) -> Compared<Self, L>
    where
        Self::Out: PartialOrd,
        L: Listenable<Out = Self::Out>,
    {
        Preprocessor::new(self.combine_latest(other), Map::new(lt::<Self::Out> as fn(_) -> _))
    }

    fn less_or_equal<L>(self, other: L) -> Compared<Self, L>
    where
        Self::Out: PartialOrd,
        L: Listenable<Out = Self::Out>,
    {
        Preprocessor::new(self.combine_latest(other), Map::new(le::<Self::Out> as fn(_) -> _))
    }

    fn more_than<L>(self, other: L) -> Compared<Self, L>
    where
        Self::Out: PartialOrd,
        L: Listenable<Out = Self::Out>,
    {
        Preprocessor::new(self.combine_latest(other), Map::new(gt::<Self::Out> as fn(_) -> _))
    }

    fn more_or_equal<L>(self, other: L) -> Compared<Self, L>
    where
        Self::Out: PartialOrd,
        L: Listenable<Out = Self::Out>,
    {
        Preprocessor::new(self.combine_latest(other), Map::new(ge::<Self::Out> as fn(_) -> _))
    }

    // ─── Replay ──────────────────────────────────────────────────────────

    fn memoize(&self, strategy: BufferStrategy<Self::Out>) -> Memoize<Self::Out> {
        Memoize::new(self, strategy)
    }

    /// Latest value only; with `send_last`, late listeners get it on listen.
    fn memoize_one(&self, send_last: bool) -> Latest<Self::Out> {
        let strategy = BufferStrategy::Continuous {
            size: 1,
            wait_fullness: false,
            send_last,
        };
        Preprocessor::new(self.memoize(strategy), FilterMap::new(last_of::<Self::Out> as fn(_) -> _))
    }

    /// Pairs each value with the one before it.
    fn old_value(&self) -> Paired<Self::Out> {
        Preprocessor::new(
            self.memoize(BufferStrategy::old_value()),
            FilterMap::new(pair_of::<Self::Out> as fn(_) -> _),
        )
    }

    /// Like [`old_value`](Self::old_value), with `default` as the previous
    /// value of the first pair.
    fn old_value_or(&self, default: Self::Out) -> PairedOr<Self::Out>
    where
        Self::Out: Sync,
    {
        Preprocessor::new(self.memoize(BufferStrategy::old_value()), SeededPairs(default))
    }

    fn distinct_until_changed(&self) -> Latest<Self::Out>
    where
        Self::Out: PartialEq,
    {
        let strategy = BufferStrategy::distinct_until_changed(|last, next| last != next);
        Preprocessor::new(self.memoize(strategy), FilterMap::new(last_of::<Self::Out> as fn(_) -> _))
    }

    // ─── Sharing and gating ──────────────────────────────────────────────

    fn share(self, policy: ConnectionPolicy) -> Share<Self>
    where
        Self: Send + Sync + 'static,
    {
        Share::new(self, policy)
    }

    fn suspend<C>(&self, controller: &C, max_buffer_size: usize, initially: bool) -> Result<Suspend<Self::Out>>
    where
        C: Listenable<Out = bool>,
    {
        Suspend::new(self, controller, max_buffer_size, initially)
    }

    // ─── Utilities ───────────────────────────────────────────────────────

    /// Forward every event into `target`.
    fn bind_to(&self, target: &Broadcaster<Self::Out>) -> Disposable {
        let target = target.clone();
        self.listen(Callback::new(move |event| target.emit(event)))
    }

    fn boxed(self) -> AnyListenable<Self::Out>
    where
        Self: Send + Sync + 'static,
    {
        AnyListenable::new(self)
    }
}

impl<L: Listenable> ListenableExt for L {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LabScheduler;
    use parking_lot::Mutex;
    use rill_core::Constant;

    fn collect<L: Listenable>(source: &L) -> (Arc<Mutex<Vec<L::Out>>>, Disposable) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let d = source.on_value(move |v| sink.lock().push(v));
        (seen, d)
    }

    #[test]
    fn chained_value_operators() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let stream = b
            .clone()
            .filter(|n: &i32| n % 2 == 0)
            .map(|n: i32| n * 10)
            .filter_map(|n: i32| (n != 40).then(|| format!("#{n}")));
        let (seen, _d) = collect(&stream);
        for n in 1..=6 {
            b.send(n);
        }
        assert_eq!(*seen.lock(), vec!["#20", "#60"]);
    }

    #[test]
    fn try_map_turns_failure_into_error() {
        let b: Broadcaster<&'static str> = Broadcaster::new();
        let parsed = b
            .clone()
            .try_map(|s: &'static str| s.parse::<i32>().map_err(StreamError::new));
        let errors = Arc::new(Mutex::new(0));
        let e = Arc::clone(&errors);
        let (seen, _d) = collect(&parsed);
        let _e = parsed.on_error(move |_| *e.lock() += 1);
        b.send("7");
        b.send("x");
        assert_eq!(*seen.lock(), vec![7]);
        assert_eq!(*errors.lock(), 1);
    }

    #[test]
    fn map_panic_becomes_error() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let mapped = b.clone().map(|n: i32| -> i32 {
            if n == 0 {
                panic!("zero");
            }
            100 / n
        });
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let _d = mapped.on_error(move |e| sink.lock().push(e.to_string()));
        b.send(0);
        assert_eq!(*errors.lock(), vec!["callback panicked: zero"]);
    }

    #[test]
    fn resolved_with_replaces_errors() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let fixed = b.clone().resolved_with(-1);
        let (seen, _d) = collect(&fixed);
        b.send(1);
        b.send_error(StreamError::msg("x"));
        assert_eq!(*seen.lock(), vec![1, -1]);

        let by_len = b.clone().resolved_with_fn(|e| e.to_string().len() as i32);
        let (seen, _d) = collect(&by_len);
        b.send_error(StreamError::msg("four"));
        assert_eq!(*seen.lock(), vec![4]);
    }

    #[test]
    fn map_error_rewrites_only_errors() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let tagged = b.clone().map_error(|e| StreamError::msg(format!("tagged: {e}")));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let _d = tagged.on_error(move |e| sink.lock().push(e.to_string()));
        let (values, _v) = collect(&tagged);
        b.send(3);
        b.send_error(StreamError::msg("boom"));
        assert_eq!(*values.lock(), vec![3]);
        assert_eq!(*errors.lock(), vec!["tagged: boom"]);
    }

    #[test]
    fn memoize_one_replays_latest() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let latest = b.memoize_one(true);
        b.send(1);
        b.send(2);
        let (seen, _d) = collect(&latest);
        assert_eq!(*seen.lock(), vec![2]);
        b.send(3);
        assert_eq!(*seen.lock(), vec![2, 3]);
    }

    #[test]
    fn old_value_pairs() {
        let b: Broadcaster<char> = Broadcaster::new();
        let pairs = b.old_value();
        let (seen, _d) = collect(&pairs);
        b.send('a');
        b.send('b');
        b.send('c');
        assert_eq!(*seen.lock(), vec![(None, 'a'), (Some('a'), 'b'), (Some('b'), 'c')]);
    }

    #[test]
    fn distinct_swallows_repeats() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let distinct = b.distinct_until_changed();
        let (seen, _d) = collect(&distinct);
        for n in [1, 1, 2, 2, 2, 1] {
            b.send(n);
        }
        assert_eq!(*seen.lock(), vec![1, 2, 1]);
    }

    #[test]
    fn old_value_or_seeds_first_pair() {
        let b: Broadcaster<u32> = Broadcaster::new();
        let pairs = b.old_value_or(0);
        let (seen, _d) = collect(&pairs);
        b.send(5);
        b.send(8);
        assert_eq!(*seen.lock(), vec![(0, 5), (5, 8)]);
    }

    #[test]
    fn boolean_predicates_drive_suspend() {
        let online: Broadcaster<bool> = Broadcaster::new();
        let visible: Broadcaster<bool> = Broadcaster::new();
        let data: Broadcaster<i32> = Broadcaster::new();
        let gate = online.clone().and(visible.clone());
        let held = data.suspend(&gate, 8, false).unwrap();
        let (seen, _d) = collect(&held);

        data.send(1);
        online.send(true);
        visible.send(false);
        data.send(2);
        assert!(seen.lock().is_empty());

        visible.send(true);
        assert_eq!(*seen.lock(), vec![vec![1, 2]]);

        let either = online.clone().or(visible.clone());
        let (flags, _f) = collect(&either);
        online.send(true);
        visible.send(false);
        online.send(false);
        assert_eq!(*flags.lock(), vec![true, false]);
    }

    #[test]
    fn ordering_predicates() {
        let level: Broadcaster<i32> = Broadcaster::new();
        let limit: Broadcaster<i32> = Broadcaster::new();
        let (below, _b) = collect(&level.clone().less_than(limit.clone()));
        let (at_most, _m) = collect(&level.clone().less_or_equal(limit.clone()));
        let (above, _a) = collect(&level.clone().more_than(limit.clone()));
        let (at_least, _l) = collect(&level.clone().more_or_equal(limit.clone()));
        limit.send(10);
        level.send(10);
        level.send(11);
        assert_eq!(*below.lock(), vec![false, false]);
        assert_eq!(*at_most.lock(), vec![true, false]);
        assert_eq!(*above.lock(), vec![false, true]);
        assert_eq!(*at_least.lock(), vec![true, true]);
    }

    #[test]
    fn combine_latest_or_uses_defaults() {
        let a: Broadcaster<i32> = Broadcaster::new();
        let b: Broadcaster<i32> = Broadcaster::new();
        let both = a.clone().combine_latest_or(b.clone(), (Some(0), Some(0)));
        let (seen, _d) = collect(&both);
        b.send(2);
        a.send(1);
        assert_eq!(*seen.lock(), vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn resolved_with_fn_panic_becomes_error() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let fixed = b.clone().resolved_with_fn(|_| -> i32 { panic!("fallback boom") });
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let _d = fixed.on_error(move |e| sink.lock().push(e.to_string()));
        b.send_error(StreamError::msg("x"));
        assert_eq!(*errors.lock(), vec!["callback panicked: fallback boom"]);
    }

    #[test]
    fn detached_once_releases_registration() {
        let b: Broadcaster<i32> = Broadcaster::new();
        b.clone().once().on_value(|_| {}).detach();
        b.send(1);
        b.send(2);
        assert_eq!(b.listener_count(), 0);
    }

    #[test]
    fn merge_with_mixed_sources() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let merged = b.clone().merge_with(Constant(0));
        let (seen, _d) = collect(&merged);
        b.send(1);
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn combine_latest_pairs_sources() {
        let a: Broadcaster<i32> = Broadcaster::new();
        let b: Broadcaster<&'static str> = Broadcaster::new();
        let both = a.clone().combine_latest(b.clone());
        let (seen, _d) = collect(&both);
        a.send(1);
        b.send("x");
        a.send(2);
        assert_eq!(*seen.lock(), vec![(1, "x"), (2, "x")]);
    }

    #[test]
    fn debounce_via_ext() {
        let lab = LabScheduler::new();
        let b: Broadcaster<i32> = Broadcaster::new();
        let quiet = b.clone().debounce(Duration::from_millis(100), Arc::new(lab.clone()));
        let (seen, _d) = collect(&quiet);
        b.send(1);
        b.send(2);
        lab.advance(Duration::from_millis(100));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn once_and_on_dispose_compose() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let hooked = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hooked);
        let first = b.clone().on_dispose(move || *h.lock() += 1).once();
        let (seen, d) = collect(&first);
        b.send(1);
        b.send(2);
        assert_eq!(*seen.lock(), vec![1]);
        assert!(d.is_disposed());
        assert_eq!(*hooked.lock(), 1);
    }

    #[test]
    fn shared_suspended_pipeline() {
        let data: Broadcaster<i32> = Broadcaster::new();
        let gate: Broadcaster<bool> = Broadcaster::new();
        let shared = data.clone().map(|n: i32| n + 1).share(ConnectionPolicy::Repeatable);
        let held = shared.suspend(&gate, 4, false).unwrap();
        let (seen, _d) = collect(&held);
        data.send(1);
        data.send(2);
        assert_eq!(shared.listener_count(), 1);
        gate.send(true);
        assert_eq!(*seen.lock(), vec![vec![2, 3]]);
    }

    #[test]
    fn bind_to_and_boxed() {
        let source: Broadcaster<i32> = Broadcaster::new();
        let target: Broadcaster<i32> = Broadcaster::new();
        let boxed = source.clone().map(|n: i32| n * 2).boxed();
        let _bind = ListenableExt::bind_to(&boxed, &target);
        let (seen, _d) = collect(&target);
        source.send(21);
        assert_eq!(*seen.lock(), vec![42]);
    }
}
