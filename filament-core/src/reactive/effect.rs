//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever the
//! signals it read on its last run change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect re-runs (synchronously, or on
//!    the next flush when created with `batch: true`).
//!
//! 3. Before re-running, the effect clears its old links and tracks new ones
//!    during execution, so branches not taken stop notifying it.
//!
//! An effect is a [`Subscriber`] whose callback is "run the function
//! tracked"; limits, pausing, scoping and error routing all come from there.

use std::fmt::Debug;

use super::runtime::Runtime;
use super::subscriber::{Subscriber, SubscriberOptions, Trigger};
use crate::graph::{EffectId, NodeKind};

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Effect, Signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(-1));
///
/// let (c, s) = (count.clone(), seen.clone());
/// let _effect = Effect::new(move || s.set(c.get()));
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
/// ```
#[derive(Clone)]
pub struct Effect {
    subscriber: Subscriber,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_options(run, SubscriberOptions::default())
    }

    /// Create an effect with subscriber options (scope, batching, limit,
    /// error handler). Runs immediately.
    pub fn with_options<F>(run: F, options: SubscriberOptions) -> Self
    where
        F: FnMut() + 'static,
    {
        let effect = Self::new_lazy_with(run, options);
        effect.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::new_lazy_with(run, SubscriberOptions::default())
    }

    fn new_lazy_with<F>(mut run: F, options: SubscriberOptions) -> Self
    where
        F: FnMut() + 'static,
    {
        let callback = move |trigger: &Trigger<'_>| {
            Runtime::run_tracked(trigger.effect, &mut run);
        };
        Self {
            subscriber: Subscriber::with_kind(NodeKind::Subscriber, Box::new(callback), options),
        }
    }

    /// Get the effect's graph node.
    pub fn id(&self) -> EffectId {
        self.subscriber.id()
    }

    /// Execute the effect function now, rebuilding its dependencies.
    pub fn execute(&self) -> bool {
        self.subscriber.trigger()
    }

    /// Dispose of the effect. After disposal, the effect will not run again.
    pub fn dispose(&self) -> bool {
        self.subscriber.dispose()
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.subscriber.is_disposed()
    }

    pub fn pause(&self) {
        self.subscriber.pause();
    }

    pub fn resume(&self) {
        self.subscriber.resume();
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.subscriber.count()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.subscriber.dependencies().len()
    }

    /// The underlying subscriber.
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }
}

impl Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Shorthand for [`Effect::new`].
pub fn effect<F: FnMut() + 'static>(run: F) -> Effect {
    Effect::new(run)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
