//! Watcher
//!
//! A watcher re-evaluates a tracked `source` closure whenever its
//! dependencies change and calls `callback(new, old, cleanup)` when the
//! produced value differs from the cached one. Cleanup functions registered
//! through [`OnCleanup`] run before the next callback and when the watcher is
//! disposed.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::runtime::Runtime;
use super::scope::EffectScope;
use super::signal::Equality;
use super::subscriber::{Subscriber, SubscriberOptions, Trigger};
use crate::error::ErrorHandler;
use crate::graph::{EffectId, NodeKind};

/// Collects cleanup functions during a watcher callback.
#[derive(Default)]
pub struct OnCleanup {
    cleanups: Vec<Box<dyn FnOnce()>>,
}

impl OnCleanup {
    /// Register `f` to run before the next callback or on dispose.
    pub fn register(&mut self, f: impl FnOnce() + 'static) {
        self.cleanups.push(Box::new(f));
    }

    pub fn len(&self) -> usize {
        self.cleanups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cleanups.is_empty()
    }
}

impl Debug for OnCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnCleanup")
            .field("pending", &self.cleanups.len())
            .finish()
    }
}

/// Options for [`watch`].
pub struct WatchOptions<T> {
    /// Invoke the callback on the first evaluation, with no old value.
    pub immediate: bool,

    /// Comparator deciding whether a new value "differs". Defaults to `==`.
    pub equals: Option<Equality<T>>,

    pub scope: Option<EffectScope>,
    pub detached: bool,

    /// Defer re-evaluation to the next flush.
    pub batch: bool,

    pub on_error: Option<ErrorHandler>,
}

impl<T> Default for WatchOptions<T> {
    fn default() -> Self {
        Self {
            immediate: false,
            equals: None,
            scope: None,
            detached: false,
            batch: false,
            on_error: None,
        }
    }
}

impl<T> Clone for WatchOptions<T> {
    fn clone(&self) -> Self {
        Self {
            immediate: self.immediate,
            equals: self.equals.clone(),
            scope: self.scope.clone(),
            detached: self.detached,
            batch: self.batch,
            on_error: self.on_error.clone(),
        }
    }
}

struct WatchState<T> {
    initialized: bool,
    previous: Option<T>,
    cleanups: Vec<Box<dyn FnOnce()>>,
}

impl<T> WatchState<T> {
    fn take_cleanups(state: &RefCell<Self>) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut state.borrow_mut().cleanups)
    }
}

/// A value watcher. Dropping the last handle (and its owning scope) stops it.
pub struct Watcher<T> {
    subscriber: Subscriber,
    state: Rc<RefCell<WatchState<T>>>,
}

impl<T> Clone for Watcher<T> {
    fn clone(&self) -> Self {
        Self {
            subscriber: self.subscriber.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + 'static> Watcher<T> {
    pub fn new<S, C>(source: S, callback: C, options: WatchOptions<T>) -> Self
    where
        T: PartialEq,
        S: FnMut() -> T + 'static,
        C: FnMut(&T, Option<&T>, &mut OnCleanup) + 'static,
    {
        let equals = options
            .equals
            .clone()
            .unwrap_or_else(|| Rc::new(|a: &T, b: &T| a == b));
        Self::with_equality(source, callback, equals, options)
    }

    /// Build a watcher over a value type without `PartialEq`, comparing with
    /// `equals`.
    pub fn with_equality<S, C>(
        mut source: S,
        mut callback: C,
        equals: Equality<T>,
        options: WatchOptions<T>,
    ) -> Self
    where
        S: FnMut() -> T + 'static,
        C: FnMut(&T, Option<&T>, &mut OnCleanup) + 'static,
    {
        let state = Rc::new(RefCell::new(WatchState {
            initialized: false,
            previous: None,
            cleanups: Vec::new(),
        }));
        let immediate = options.immediate;

        let run_state = state.clone();
        let run = move |trigger: &Trigger<'_>| {
            let next = Runtime::run_tracked(trigger.effect, &mut source);

            let first = !run_state.borrow().initialized;
            let changed = match &run_state.borrow().previous {
                Some(previous) => !equals(previous, &next),
                None => true,
            };
            run_state.borrow_mut().initialized = true;

            if first && !immediate {
                run_state.borrow_mut().previous = Some(next);
                return;
            }
            if !first && !changed {
                return;
            }

            for cleanup in WatchState::take_cleanups(&run_state) {
                cleanup();
            }

            let old = run_state.borrow_mut().previous.replace(next.clone());
            let mut on_cleanup = OnCleanup::default();
            callback(&next, old.as_ref(), &mut on_cleanup);
            run_state.borrow_mut().cleanups.extend(on_cleanup.cleanups);
        };

        let subscriber = Subscriber::with_kind(
            NodeKind::Watcher,
            Box::new(run),
            SubscriberOptions {
                limit: 0,
                scope: options.scope,
                detached: options.detached,
                batch: options.batch,
                on_error: options.on_error,
            },
        );

        let dispose_state = state.clone();
        subscriber.on_cleanup(move || {
            for cleanup in WatchState::take_cleanups(&dispose_state) {
                cleanup();
            }
        });

        subscriber.trigger();
        Self { subscriber, state }
    }

    /// The last value produced by the source.
    pub fn value(&self) -> Option<T> {
        self.state.borrow().previous.clone()
    }
}

impl<T> Watcher<T> {
    pub fn id(&self) -> EffectId {
        self.subscriber.id()
    }

    /// Stop watching. Pending cleanups run once.
    pub fn dispose(&self) -> bool {
        self.subscriber.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.subscriber.is_disposed()
    }

    pub fn pause(&self) {
        self.subscriber.pause();
    }

    pub fn resume(&self) {
        self.subscriber.resume();
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }
}

impl<T: Debug> Debug for Watcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.subscriber.id())
            .field("previous", &self.state.borrow().previous)
            .field("disposed", &self.subscriber.is_disposed())
            .finish()
    }
}

/// Watch the value produced by `source`.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{watch, Signal, WatchOptions};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let count = Signal::new(1);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let (c, l) = (count.clone(), log.clone());
/// let _w = watch(
///     move || c.get(),
///     move |new, old, _| l.borrow_mut().push((*new, old.copied())),
///     WatchOptions::default(),
/// );
///
/// count.set(2);
/// assert_eq!(*log.borrow(), vec![(2, Some(1))]);
/// ```
pub fn watch<T, S, C>(source: S, callback: C, options: WatchOptions<T>) -> Watcher<T>
where
    T: Clone + PartialEq + 'static,
    S: FnMut() -> T + 'static,
    C: FnMut(&T, Option<&T>, &mut OnCleanup) + 'static,
{
    Watcher::new(source, callback, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::cell::Cell;

    type Log = Rc<RefCell<Vec<(i32, Option<i32>)>>>;

    fn logging(log: &Log) -> impl FnMut(&i32, Option<&i32>, &mut OnCleanup) + 'static {
        let log = log.clone();
        move |new, old, _| log.borrow_mut().push((*new, old.copied()))
    }

    #[test]
    fn lazy_watcher_skips_first_run() {
        let count = Signal::new(1);
        let log: Log = Rc::default();

        let c = count.clone();
        let watcher = watch(move || c.get(), logging(&log), WatchOptions::default());

        assert!(log.borrow().is_empty());
        assert_eq!(watcher.value(), Some(1));

        count.set(2);
        count.set(3);
        assert_eq!(*log.borrow(), vec![(2, Some(1)), (3, Some(2))]);
    }

    #[test]
    fn immediate_watcher_fires_without_old_value() {
        let count = Signal::new(1);
        let log: Log = Rc::default();

        let c = count.clone();
        let options = WatchOptions {
            immediate: true,
            ..Default::default()
        };
        let _watcher = watch(move || c.get(), logging(&log), options);

        assert_eq!(*log.borrow(), vec![(1, None)]);
    }

    #[test]
    fn unchanged_derived_value_is_not_reported() {
        let count = Signal::new(1);
        let log: Log = Rc::default();

        let c = count.clone();
        let _watcher = watch(move || c.get() % 2, logging(&log), WatchOptions::default());

        count.set(3);
        assert!(log.borrow().is_empty());

        count.set(4);
        assert_eq!(*log.borrow(), vec![(0, Some(1))]);
    }

    #[test]
    fn custom_comparator_decides_change() {
        let count = Signal::new(10);
        let log: Log = Rc::default();

        let c = count.clone();
        let options = WatchOptions {
            equals: Some(Rc::new(|a: &i32, b: &i32| a / 10 == b / 10)),
            ..Default::default()
        };
        let _watcher = watch(move || c.get(), logging(&log), options);

        count.set(15);
        assert!(log.borrow().is_empty());

        count.set(21);
        assert_eq!(*log.borrow(), vec![(21, Some(10))]);
    }

    #[test]
    fn cleanup_runs_before_next_callback_and_on_dispose() {
        let count = Signal::new(0);
        let cleaned = Rc::new(Cell::new(0));

        let (c, k) = (count.clone(), cleaned.clone());
        let watcher = watch(
            move || c.get(),
            move |_, _, on_cleanup| {
                let k = k.clone();
                on_cleanup.register(move || k.set(k.get() + 1));
            },
            WatchOptions::default(),
        );

        count.set(1);
        assert_eq!(cleaned.get(), 0);

        count.set(2);
        assert_eq!(cleaned.get(), 1);

        assert!(watcher.dispose());
        assert_eq!(cleaned.get(), 2);

        assert!(!watcher.dispose());
        assert_eq!(cleaned.get(), 2);
    }

    #[test]
    fn disposed_watcher_stops_tracking() {
        let count = Signal::new(0);
        let log: Log = Rc::default();

        let c = count.clone();
        let watcher = watch(move || c.get(), logging(&log), WatchOptions::default());
        assert_eq!(count.subscriber_count(), 1);

        watcher.dispose();
        assert_eq!(count.subscriber_count(), 0);

        count.set(1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn panicking_callback_is_routed_and_watcher_survives() {
        let count = Signal::new(0);
        let errors = Rc::new(Cell::new(0));
        let calls = Rc::new(Cell::new(0));

        let (c, e, n) = (count.clone(), errors.clone(), calls.clone());
        let options = WatchOptions {
            on_error: Some(Rc::new(move |_: &crate::error::CallbackError| e.set(e.get() + 1))),
            ..Default::default()
        };
        let watcher = watch(
            move || c.get(),
            move |new: &i32, _, _| {
                n.set(n.get() + 1);
                if *new == 1 {
                    panic!("bad value");
                }
            },
            options,
        );

        count.set(1);
        count.set(2);
        assert_eq!(calls.get(), 2);
        assert_eq!(errors.get(), 1);
        assert_eq!(watcher.value(), Some(2));
    }
}
