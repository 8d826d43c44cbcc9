#![forbid(unsafe_code)]

//! Multi-source joins.
//!
//! [`Merge`] forwards every event of every source as it arrives.
//!
//! The combine-latest family ([`CombineLatest2`], [`CombineLatest3`],
//! [`CombineLatest4`], [`CombineAll`]) keeps the latest event of each
//! source in a slot and emits once every slot is filled, then again on each
//! update:
//!
//! - every slot holds a value: the tuple (or `Vec`) of latest values;
//! - exactly one slot holds an error: that error;
//! - several slots hold errors: [`StreamError::Joint`] listing each of them
//!   with its source index.
//!
//! Slot state is per listener; each `listen` subscribes to every source.
//! The fixed-arity joins accept per-source defaults through `with_defaults`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rill_core::{Callback, Disposable, DisposableBag, Event, Listenable, SlotError, StreamError};

/// Forwards every event of every source.
#[derive(Debug, Clone)]
pub struct Merge<L> {
    sources: Vec<L>,
}

impl<L: Listenable> Merge<L> {
    pub fn new(sources: impl IntoIterator<Item = L>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }
}

impl<L: Listenable> Listenable for Merge<L> {
    type Out = L::Out;

    fn listen(&self, callback: Callback<L::Out>) -> Disposable {
        let bag = DisposableBag::new();
        for source in &self.sources {
            bag.add(source.listen(callback.clone()));
        }
        bag.into()
    }
}

fn settle_errors(errors: Vec<SlotError>) -> StreamError {
    if errors.len() > 1 {
        tracing::debug!(message = "join.joint_error", failed = errors.len());
    }
    StreamError::joint(errors)
}

macro_rules! combine_latest {
    ($(#[$meta:meta])* $name:ident { $($field:ident : $ty:ident => $idx:tt),+ }) => {
        $(#[$meta])*
        pub struct $name<$($ty: Listenable),+> {
            $($field: $ty,)+
            seeds: ($(Option<$ty::Out>,)+),
        }

        impl<$($ty: Listenable),+> $name<$($ty),+> {
            pub fn new($($field: $ty),+) -> Self {
                Self {
                    $($field,)+
                    seeds: Default::default(),
                }
            }

            /// Pre-fill slots so the join can emit before every source has.
            ///
            /// A seed only stands in until its source delivers; seeding alone
            /// never triggers an emission.
            pub fn with_defaults(mut self, defaults: ($(Option<$ty::Out>,)+)) -> Self {
                self.seeds = defaults;
                self
            }
        }

        impl<$($ty),+> Listenable for $name<$($ty),+>
        where
            $($ty: Listenable,)+
        {
            type Out = ($($ty::Out,)+);

            fn listen(&self, callback: Callback<Self::Out>) -> Disposable {
                let fulfill = |slots: &($(Option<Event<$ty::Out>>,)+)| -> Option<Event<Self::Out>> {
                    let mut errors = Vec::new();
                    $(
                        match &slots.$idx {
                            None => return None,
                            Some(Event::Error(e)) => errors.push(SlotError { index: $idx, error: e.clone() }),
                            Some(Event::Value(_)) => {}
                        }
                    )+
                    if !errors.is_empty() {
                        return Some(Event::Error(settle_errors(errors)));
                    }
                    Some(Event::Value(($(slots.$idx.as_ref()?.value()?.clone(),)+)))
                };

                let seeded = ($(self.seeds.$idx.clone().map(Event::Value),)+);
                let slots: Arc<Mutex<($(Option<Event<$ty::Out>>,)+)>> = Arc::new(Mutex::new(seeded));
                let bag = DisposableBag::new();
                $(
                    let state = Arc::clone(&slots);
                    let downstream = callback.clone();
                    bag.add(self.$field.listen(Callback::new(move |event| {
                        let ready = {
                            let mut slots = state.lock();
                            slots.$idx = Some(event);
                            fulfill(&*slots)
                        };
                        if let Some(event) = ready {
                            downstream.call(event);
                        }
                    })));
                )+
                bag.into()
            }
        }

        impl<$($ty: Listenable + Clone),+> Clone for $name<$($ty),+> {
            fn clone(&self) -> Self {
                Self {
                    $($field: self.$field.clone(),)+
                    seeds: self.seeds.clone(),
                }
            }
        }

        impl<$($ty: Listenable + fmt::Debug),+> fmt::Debug for $name<$($ty),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    $(.field(stringify!($field), &self.$field))+
                    .finish_non_exhaustive()
            }
        }
    };
}

combine_latest!(
    /// Latest values of two sources as a pair.
    CombineLatest2 { first: A => 0, second: B => 1 }
);

combine_latest!(
    /// Latest values of three sources as a triple.
    CombineLatest3 { first: A => 0, second: B => 1, third: C => 2 }
);

combine_latest!(
    /// Latest values of four sources.
    CombineLatest4 { first: A => 0, second: B => 1, third: C => 2, fourth: D => 3 }
);

/// Combine-latest over any number of sources of one type.
#[derive(Debug, Clone)]
pub struct CombineAll<L> {
    sources: Vec<L>,
}

impl<L: Listenable> CombineAll<L> {
    pub fn new(sources: impl IntoIterator<Item = L>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }
}

fn fulfill_all<T: Clone>(slots: &[Option<Event<T>>]) -> Option<Event<Vec<T>>> {
    let mut values = Vec::with_capacity(slots.len());
    let mut errors = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        match slot.as_ref()? {
            Event::Value(v) => values.push(v.clone()),
            Event::Error(e) => errors.push(SlotError {
                index,
                error: e.clone(),
            }),
        }
    }
    if errors.is_empty() {
        Some(Event::Value(values))
    } else {
        Some(Event::Error(settle_errors(errors)))
    }
}

impl<L: Listenable> Listenable for CombineAll<L> {
    type Out = Vec<L::Out>;

    fn listen(&self, callback: Callback<Vec<L::Out>>) -> Disposable {
        let slots: Arc<Mutex<Vec<Option<Event<L::Out>>>>> =
            Arc::new(Mutex::new(vec![None; self.sources.len()]));
        let bag = DisposableBag::new();
        for (index, source) in self.sources.iter().enumerate() {
            let state = Arc::clone(&slots);
            let downstream = callback.clone();
            bag.add(source.listen(Callback::new(move |event| {
                let ready = {
                    let mut slots = state.lock();
                    slots[index] = Some(event);
                    fulfill_all(&slots)
                };
                if let Some(event) = ready {
                    downstream.call(event);
                }
            })));
        }
        bag.into()
    }
}
