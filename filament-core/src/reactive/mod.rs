//! Reactive Primitives
//!
//! This module implements the reactive system: signals, computed values,
//! effects and the scopes that own them. Together they form the foundation
//! of Filament's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A signal is a container for state. When a signal is read inside a
//! tracking context (an effect run, a computed getter or a `collect` call),
//! the read is recorded as a dependency. When the signal is written with a
//! different value, every dependent effect is notified.
//!
//! Variants: [`Signal`] (a plain value), [`Reactive`] (a JSON object or
//! array with one signal per property), [`DeepRef`] (a slot whose object
//! values are handed out as [`Reactive`] proxies), [`Computed`] and
//! [`Callable`].
//!
//! ## Effects
//!
//! An effect is a computation that runs when its dependencies change. All
//! effects are built on [`Subscriber`], a callback with a trigger limit,
//! pause flag and error handler. [`Effect`] re-runs a closure, [`Watcher`]
//! compares old and new values, and [`Computed`] caches a derived value.
//!
//! ## Scopes
//!
//! An [`EffectScope`] owns effects created inside [`EffectScope::run`] and
//! disposes them together.
//!
//! # Implementation Notes
//!
//! Dependencies live in the thread-local graph (see [`crate::graph`]) as
//! links between signal and effect nodes. An effect clears its links before
//! each run and re-links whatever it reads, so its dependency set is always
//! the set of signals read on its most recent run.
//!
//! Property-level listeners on reactive objects go through the
//! [`PropertyStore`] instead, with immediate or batched delivery.

mod computed;
mod context;
mod effect;
mod proxy;
mod runtime;
mod scope;
mod signal;
mod store;
mod subscribe;
mod subscriber;
mod watcher;

pub use computed::{computed, Computed, ComputedOptions, ComputedState};
pub use context::{
    collect, is_tracking, untracked, with_suspended_tracking, Collected, ReactiveContext,
};
pub use effect::{effect, Effect};
pub use proxy::{DeepRef, Field, Reactive, LENGTH};
pub use runtime::{Reaction, Runtime};
pub use scope::{create_scope, current_scope, EffectScope};
pub use signal::{peek, read, signal, Callable, Equality, Readable, Signal, SignalCore};
pub use store::{Delivery, PropertyKey, PropertyStore, TargetId};
pub use subscribe::{subscribe, watch_property, Source, SubscribeOptions};
pub use subscriber::{Callback, Subscriber, SubscriberOptions, SubscriptionHandle, Trigger};
pub use watcher::{watch, OnCleanup, WatchOptions, Watcher};
