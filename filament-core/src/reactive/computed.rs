//! Computed Implementation
//!
//! A Computed is a cached derived value. It is both a signal (effects can
//! depend on it) and an effect (it depends on the signals its getter reads).
//!
//! # How Computeds Work
//!
//! 1. On first access the getter runs inside a tracking frame owned by an
//!    internal [`Subscriber`]; the result is cached and the subscriber ends
//!    up linked to exactly the signals the getter read.
//!
//! 2. When one of those signals changes, the internal subscriber re-runs the
//!    getter (passing the previous result as a hint) and rebuilds its links.
//!
//! 3. Only if the new result differs under the comparator is the cache
//!    replaced and the computed's own subscribers notified.
//!
//! 4. A getter that reads no signal never updates. That is logged as a
//!    warning, not an error.
//!
//! `stop()` disposes the internal subscriber, freezing the cached value.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::context::untracked;
use super::runtime::Runtime;
use super::signal::{register_signal_type, Equality, Readable, SignalCore};
use super::subscriber::{Subscriber, SubscriberOptions, Trigger};
use crate::config::config;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeKind, SignalId};

/// Evaluation state of a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The getter has not run yet.
    Uninitialized,

    /// The cached value is current and the observer is linked.
    Clean,

    /// `stop()` was called; the cached value is frozen.
    Stopped,
}

/// Options for [`Computed::with_options`].
pub struct ComputedOptions<T> {
    /// Evaluate at construction instead of on first access.
    pub immediate: bool,

    /// Comparator deciding whether a re-evaluation changed the value.
    /// Defaults to `PartialEq`.
    pub equals: Option<Equality<T>>,
}

impl<T> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self {
            immediate: false,
            equals: None,
        }
    }
}

type Getter<T> = Box<dyn FnMut(Option<&T>) -> T>;
type Setter<T> = Box<dyn Fn(T)>;

struct ComputedInner<T> {
    core: SignalCore,
    getter: RefCell<Getter<T>>,
    setter: Option<Setter<T>>,
    value: RefCell<Option<T>>,
    state: Cell<ComputedState>,
    runner: Subscriber,
    equals: Equality<T>,
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn evaluate_first(&self) {
        let Ok(mut getter) = self.getter.try_borrow_mut() else {
            warn!(signal = ?self.core.id(), "computed read itself while evaluating");
            return;
        };
        let runner = self.runner.id();
        let value = Runtime::run_tracked(runner, || getter(None));
        drop(getter);

        *self.value.borrow_mut() = Some(value);
        self.state.set(ComputedState::Clean);

        if self.runner.is_disposed() {
            debug!(signal = ?self.core.id(), "computed evaluated after its observer was disposed");
        } else if self.runner.dependencies().is_empty() {
            if config().warn_on_static_computed {
                warn!(signal = ?self.core.id(), "computed read no signals and will never update");
            }
            self.runner.dispose();
        }
    }

    fn recompute(&self, trigger: &Trigger<'_>) {
        if self.state.get() != ComputedState::Clean {
            return;
        }
        let Ok(mut getter) = self.getter.try_borrow_mut() else {
            warn!(signal = ?self.core.id(), "computed read itself while evaluating");
            return;
        };

        let previous = self.value.borrow().clone();
        let next = Runtime::run_tracked(trigger.effect, || getter(previous.as_ref()));
        drop(getter);

        let changed = match &previous {
            Some(previous) => !(self.equals)(previous, &next),
            None => true,
        };
        if changed {
            *self.value.borrow_mut() = Some(next);
            debug!(signal = ?self.core.id(), "computed changed");
            self.core.trigger();
        }
    }
}

/// A memoized derived value.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
/// let c = count.clone();
/// let doubled = Computed::new(move |_| c.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a read-only computed. The getter receives the previous value,
    /// if any.
    pub fn new<F>(getter: F) -> Self
    where
        F: FnMut(Option<&T>) -> T + 'static,
    {
        Self::build(Box::new(getter), None, ComputedOptions::default())
    }

    /// Create a read-only computed with options.
    pub fn with_options<F>(getter: F, options: ComputedOptions<T>) -> Self
    where
        F: FnMut(Option<&T>) -> T + 'static,
    {
        Self::build(Box::new(getter), None, options)
    }

    /// Create a computed whose `set` forwards to `setter`.
    pub fn writable<F, S>(getter: F, setter: S) -> Self
    where
        F: FnMut(Option<&T>) -> T + 'static,
        S: Fn(T) + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)), ComputedOptions::default())
    }

    fn build(getter: Getter<T>, setter: Option<Setter<T>>, options: ComputedOptions<T>) -> Self {
        register_signal_type::<Self>();

        let equals = options
            .equals
            .unwrap_or_else(|| Rc::new(|a: &T, b: &T| a == b));

        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak = weak.clone();
            let runner = Subscriber::with_kind(
                NodeKind::Computed,
                Box::new(move |trigger: &Trigger<'_>| {
                    if let Some(inner) = weak.upgrade() {
                        inner.recompute(trigger);
                    }
                }),
                SubscriberOptions::default(),
            );

            ComputedInner {
                core: SignalCore::new(),
                getter: RefCell::new(getter),
                setter,
                value: RefCell::new(None),
                state: Cell::new(ComputedState::Uninitialized),
                runner,
                equals,
            }
        });

        let computed = Self { inner };
        if options.immediate {
            computed.inner.evaluate_first();
        }
        computed
    }
}

impl<T> Computed<T>
where
    T: Clone + 'static,
{
    /// Get the current value, evaluating on first access. Tracks the read.
    pub fn get(&self) -> T {
        self.inner.core.track();
        self.get_untracked()
    }

    /// Get the current value without tracking. Still evaluates on first
    /// access.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads this computed during its first
    /// evaluation, since no value exists yet.
    pub fn get_untracked(&self) -> T {
        if self.inner.value.borrow().is_none() {
            match self.inner.state.get() {
                ComputedState::Uninitialized => self.inner.evaluate_first(),
                ComputedState::Stopped => {
                    if let Ok(mut getter) = self.inner.getter.try_borrow_mut() {
                        let value = untracked(|| getter(None));
                        *self.inner.value.borrow_mut() = Some(value);
                    }
                }
                ComputedState::Clean => {}
            }
        }

        match self.inner.value.borrow().as_ref() {
            Some(value) => value.clone(),
            None => panic!("computed value read itself during its first evaluation"),
        }
    }

    /// Forward a write to the setter.
    pub fn set(&self, value: T) -> Result<()> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(ReactiveError::ReadOnlyComputed),
        }
    }

    /// Dispose the internal observer and return the last computed value.
    pub fn stop(&self) -> Option<T> {
        self.inner.runner.dispose();
        self.inner.state.set(ComputedState::Stopped);
        self.inner.value.borrow().clone()
    }

    pub fn state(&self) -> ComputedState {
        self.inner.state.get()
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    /// The internal observer.
    pub fn runner(&self) -> &Subscriber {
        &self.inner.runner
    }

    /// Number of effects depending on this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    /// Number of times the value changed after the first evaluation.
    pub fn version(&self) -> u64 {
        self.inner.core.version()
    }
}

impl<T: Clone + 'static> Readable for Computed<T> {
    type Value = T;

    fn read(&self) -> T {
        self.get()
    }

    fn peek(&self) -> T {
        self.get_untracked()
    }

    fn signal_id(&self) -> SignalId {
        self.id()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Shorthand for [`Computed::new`].
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: FnMut(Option<&T>) -> T + 'static,
{
    Computed::new(getter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{EffectScope, Signal, Subscriber};

    fn counting<T: Clone + PartialEq + 'static>(
        f: impl Fn() -> T + 'static,
    ) -> (Computed<T>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let computed = Computed::new(move |_| {
            c.set(c.get() + 1);
            f()
        });
        (computed, calls)
    }

    #[test]
    fn computes_on_first_access() {
        let (memo, calls) = counting(|| 42);
        assert!(!memo.has_value());
        assert_eq!(calls.get(), 0);

        assert_eq!(memo.get(), 42);
        assert_eq!(calls.get(), 1);
        assert_eq!(memo.state(), ComputedState::Clean);
    }

    #[test]
    fn caches_value_between_reads() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let (memo, calls) = counting(move || s.get() + 1);

        assert_eq!(memo.get(), 2);
        assert_eq!(memo.get(), 2);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn recomputes_when_dependency_changes() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let (memo, calls) = counting(move || s.get() * 10);

        assert_eq!(memo.get(), 10);
        signal.set(2);
        assert_eq!(calls.get(), 2);
        assert_eq!(memo.get(), 20);
        assert_eq!(memo.version(), 1);
    }

    #[test]
    fn unchanged_result_does_not_notify() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let parity = Computed::new(move |_| s.get() % 2);
        assert_eq!(parity.get(), 1);

        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let sub = Subscriber::new(
            move |_| h.set(h.get() + 1),
            SubscriberOptions {
                detached: true,
                ..SubscriberOptions::default()
            },
        );
        sub.track(|| parity.get());

        signal.set(3);
        assert_eq!(hits.get(), 0);
        assert_eq!(parity.version(), 0);

        signal.set(4);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn getter_receives_previous_value() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let history = Computed::new(move |prev: Option<&Vec<i32>>| {
            let mut next = prev.cloned().unwrap_or_default();
            next.push(s.get());
            next
        });

        assert_eq!(history.get(), vec![1]);
        signal.set(2);
        assert_eq!(history.get(), vec![1, 2]);
    }

    #[test]
    fn dynamic_dependencies_follow_the_last_run() {
        let flag = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(2);

        let (f, a2, b2) = (flag.clone(), a.clone(), b.clone());
        let pick = Computed::new(move |_| if f.get() { a2.get() } else { b2.get() });
        assert_eq!(pick.get(), 1);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        assert_eq!(pick.get(), 2);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn static_computed_never_updates() {
        let (memo, calls) = counting(|| 7);
        assert_eq!(memo.get(), 7);
        assert!(memo.runner().is_disposed());
        assert_eq!(memo.get(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn stop_freezes_value() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let memo = Computed::new(move |_| s.get());
        assert_eq!(memo.get(), 1);

        assert_eq!(memo.stop(), Some(1));
        signal.set(2);
        assert_eq!(memo.get(), 1);
        assert_eq!(memo.state(), ComputedState::Stopped);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn immediate_option_evaluates_eagerly() {
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let memo = Computed::with_options(
            move |_| {
                c.set(c.get() + 1);
                1
            },
            ComputedOptions {
                immediate: true,
                ..ComputedOptions::default()
            },
        );
        assert_eq!(calls.get(), 1);
        assert!(memo.has_value());
    }

    #[test]
    fn writable_computed_forwards_to_setter() {
        let signal = Signal::new(1);
        let (read, write) = (signal.clone(), signal.clone());
        let double = Computed::writable(move |_| read.get() * 2, move |v: i32| write.set(v / 2));

        assert_eq!(double.set(10), Ok(()));
        assert_eq!(signal.get(), 5);
        assert_eq!(double.get(), 10);

        let read_only = Computed::new(|_| 0);
        assert_eq!(read_only.set(1), Err(ReactiveError::ReadOnlyComputed));
    }

    #[test]
    fn computed_chain_propagates() {
        let base = Signal::new(5);
        let b = base.clone();
        let doubled = Computed::new(move |_| b.get() * 2);
        let d = doubled.clone();
        let plus_ten = Computed::new(move |_| d.get() + 10);

        assert_eq!(plus_ten.get(), 20);
        base.set(10);
        assert_eq!(doubled.get(), 20);
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn paused_scope_recomputes_on_resume() {
        let base = Signal::new(1);
        let scope = EffectScope::detached();

        let b = base.clone();
        let doubled = scope.run(|| Computed::new(move |_| b.get() * 2)).unwrap();
        assert_eq!(doubled.get(), 2);

        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        let d = doubled.clone();
        let sub = Subscriber::new(
            move |_| s.set(d.get_untracked()),
            SubscriberOptions {
                detached: true,
                ..SubscriberOptions::default()
            },
        );
        sub.track(|| doubled.get());

        scope.pause();
        base.set(5);
        assert_eq!(doubled.get(), 2);
        assert_eq!(seen.get(), 0);

        scope.resume();
        assert_eq!(doubled.get(), 10);
        assert_eq!(seen.get(), 10);

        // Nothing skipped, nothing replayed.
        scope.pause();
        scope.resume();
        assert_eq!(doubled.version(), 1);
    }

    #[test]
    fn computed_in_disposed_scope_evaluates_once() {
        let base = Signal::new(3);
        let scope = EffectScope::detached();

        let b = base.clone();
        let tripled = scope.run(|| Computed::new(move |_| b.get() * 3)).unwrap();
        scope.dispose();

        assert_eq!(tripled.get(), 9);
        assert_eq!(tripled.state(), ComputedState::Clean);
        assert!(tripled.runner().is_disposed());
        assert_eq!(base.subscriber_count(), 0);

        base.set(4);
        assert_eq!(tripled.get(), 9);
    }
}
