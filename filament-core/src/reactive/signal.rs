//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which effects depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracking frame, the running effect is
//!    linked to the signal's graph node.
//!
//! 2. When a write commits a value that differs under the signal's
//!    comparator, the node's version is bumped and every linked effect is
//!    notified. Equal writes are no-ops.
//!
//! # Memory Layout
//!
//! Every signal-shaped primitive owns a [`SignalCore`]: a graph node id whose
//! `Drop` removes the node and unlinks all of its subscribers. Values live
//! next to the core, behind a `RefCell`, and are never borrowed while
//! subscribers run.

use std::any::{type_name, TypeId};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::Debug;
use std::rc::Rc;

use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::SignalId;

// ----------------------------------------------------------------------------
// Core
// ----------------------------------------------------------------------------

/// The graph node behind a signal.
///
/// Dropping the core invalidates the signal: every link pointing at it is
/// removed.
pub struct SignalCore {
    id: SignalId,
}

impl SignalCore {
    pub fn new() -> Self {
        Self {
            id: Runtime::register_signal(),
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Link the running effect to this signal.
    pub fn track(&self) {
        Runtime::track(self.id);
    }

    /// Bump the version and notify subscribers.
    pub fn trigger(&self) {
        Runtime::notify_signal_change(self.id);
    }

    /// Unlink every subscriber, notifying each of them once.
    pub fn invalidate(&self) {
        Runtime::invalidate_signal(self.id);
    }

    pub fn version(&self) -> u64 {
        Runtime::version(self.id)
    }

    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.id)
    }
}

impl Default for SignalCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SignalCore {
    fn drop(&mut self) {
        Runtime::unregister_signal(self.id);
    }
}

impl Debug for SignalCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalCore").field("id", &self.id).finish()
    }
}

// ----------------------------------------------------------------------------
// Nesting guard
// ----------------------------------------------------------------------------

thread_local! {
    static SIGNAL_TYPES: RefCell<HashSet<TypeId>> = RefCell::new(HashSet::new());
}

/// Remember that `S` is a signal-shaped handle type.
///
/// Handles are `!Send`, so a value of a signal type can only exist on the
/// thread that constructed one; a thread-local registry is complete.
pub(crate) fn register_signal_type<S: 'static>() {
    SIGNAL_TYPES.with(|types| {
        types.borrow_mut().insert(TypeId::of::<S>());
    });
}

/// Refuse to store a signal handle as the value of another signal.
pub(crate) fn reject_nested<T: 'static>() -> Result<()> {
    let nested = SIGNAL_TYPES.with(|types| types.borrow().contains(&TypeId::of::<T>()));
    if nested {
        Err(ReactiveError::NestedSignal {
            type_name: type_name::<T>(),
        })
    } else {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Readable
// ----------------------------------------------------------------------------

/// Comparator deciding whether a write changes a value.
pub type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Anything that can be read like a signal.
pub trait Readable {
    type Value;

    /// Read the value, linking the running effect.
    fn read(&self) -> Self::Value;

    /// Read the value without tracking.
    fn peek(&self) -> Self::Value;

    /// The underlying graph node.
    fn signal_id(&self) -> SignalId;

    /// Number of committed writes so far.
    fn version(&self) -> u64 {
        Runtime::version(self.signal_id())
    }
}

/// Tracked read of any signal.
pub fn read<S: Readable + ?Sized>(signal: &S) -> S::Value {
    signal.read()
}

/// Untracked read of any signal.
pub fn peek<S: Readable + ?Sized>(signal: &S) -> S::Value {
    signal.peek()
}

// ----------------------------------------------------------------------------
// Signal (Ref)
// ----------------------------------------------------------------------------

struct SignalInner<T> {
    core: SignalCore,
    value: RefCell<T>,
    equals: Equality<T>,
}

/// A reactive signal holding a value of type `T`.
///
/// Cloning a signal shares its state.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// assert_eq!(count.version(), 1);
///
/// // Equal writes do not count.
/// count.set(5);
/// assert_eq!(count.version(), 1);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new signal with the given initial value.
    ///
    /// # Panics
    ///
    /// Panics if `T` is itself a signal type. Use [`Signal::try_new`] to get
    /// the error instead.
    pub fn new(value: T) -> Self {
        Self::try_new(value).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Create a new signal, rejecting signal-of-signal nesting.
    pub fn try_new(value: T) -> Result<Self> {
        Self::try_with_equality(value, Rc::new(|a: &T, b: &T| a == b))
    }
}

impl<T> Signal<T>
where
    T: Clone + 'static,
{
    /// Create a signal with a custom comparator.
    pub fn try_with_equality(value: T, equals: Equality<T>) -> Result<Self> {
        reject_nested::<T>()?;
        register_signal_type::<Self>();

        Ok(Self {
            inner: Rc::new(SignalInner {
                core: SignalCore::new(),
                value: RefCell::new(value),
                equals,
            }),
        })
    }

    /// Get the signal's graph node.
    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.inner.core.track();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the value for the duration of `f`, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.core.track();
        f(&self.inner.value.borrow())
    }

    /// Set a new value and notify subscribers if it changed.
    ///
    /// # Panics
    ///
    /// Panics if the value is itself a signal; see [`Signal::try_set`].
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Set a new value. Returns whether the value changed.
    pub fn try_set(&self, value: T) -> Result<bool> {
        reject_nested::<T>()?;

        let changed = {
            let current = self.inner.value.borrow();
            !(self.inner.equals)(&current, &value)
        };
        if !changed {
            return Ok(false);
        }

        *self.inner.value.borrow_mut() = value;
        self.inner.core.trigger();
        Ok(true)
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }

    /// Number of committed writes.
    pub fn version(&self) -> u64 {
        self.inner.core.version()
    }

    /// Get the number of linked effects.
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    pub(crate) fn core(&self) -> &SignalCore {
        &self.inner.core
    }
}

impl<T: Clone + 'static> Readable for Signal<T> {
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

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Shorthand for [`Signal::new`].
pub fn signal<T: Clone + PartialEq + 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

// ----------------------------------------------------------------------------
// Callable
// ----------------------------------------------------------------------------

/// A signal with call syntax: `call()` reads, `call_with(v)` writes.
///
/// `as_fn` turns it into a plain closure taking `Option<T>`: `None` reads and
/// `Some(v)` writes, returning the value after the call.
pub struct Callable<T: 'static> {
    signal: Signal<T>,
}

impl<T> Callable<T>
where
    T: Clone + PartialEq + 'static,
{
    pub fn new(value: T) -> Self {
        register_signal_type::<Self>();
        Self {
            signal: Signal::new(value),
        }
    }
}

impl<T> Callable<T>
where
    T: Clone + 'static,
{
    /// Tracked read.
    pub fn call(&self) -> T {
        self.signal.get()
    }

    /// Write, returning whether the value changed.
    pub fn call_with(&self, value: T) -> bool {
        self.signal.try_set(value).unwrap_or_else(|err| panic!("{err}"))
    }

    /// The function-shaped view of this signal.
    pub fn as_fn(&self) -> impl Fn(Option<T>) -> T {
        let signal = self.signal.clone();
        move |value| {
            if let Some(value) = value {
                signal.set(value);
            }
            signal.get()
        }
    }

    /// The underlying signal.
    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }
}

impl<T: Clone + 'static> Readable for Callable<T> {
    type Value = T;

    fn read(&self) -> T {
        self.call()
    }

    fn peek(&self) -> T {
        self.signal.get_untracked()
    }

    fn signal_id(&self) -> SignalId {
        self.signal.id()
    }
}

impl<T> Clone for Callable<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::collect;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let signal = Signal::new(String::from("a"));
        assert_eq!(signal.try_set("a".into()), Ok(false));
        assert_eq!(signal.version(), 0);
        assert_eq!(signal.try_set("b".into()), Ok(true));
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn custom_equality_controls_notification() {
        let signal =
            Signal::try_with_equality(1.0_f64, Rc::new(|a: &f64, b: &f64| (a - b).abs() < 0.5))
                .unwrap();
        signal.set(1.2);
        assert_eq!(signal.version(), 0);
        assert_eq!(signal.get_untracked(), 1.0);
        signal.set(2.0);
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn reads_are_tracked_and_peeks_are_not() {
        let signal = Signal::new(1);
        let tracked = collect(|| signal.get());
        assert_eq!(tracked.deps, vec![signal.id()]);

        let untracked = collect(|| peek(&signal));
        assert!(untracked.deps.is_empty());
        assert_eq!(untracked.result, 1);
    }

    #[test]
    fn nested_signal_is_rejected() {
        let inner = Signal::new(1);
        let nested = Signal::try_with_equality(inner.clone(), Rc::new(|_: &Signal<i32>, _: &Signal<i32>| false));
        assert!(matches!(nested, Err(ReactiveError::NestedSignal { .. })));

        let outer = Signal::try_with_equality(0_u8, Rc::new(|a: &u8, b: &u8| a == b)).unwrap();
        assert_eq!(outer.try_set(1), Ok(true));
    }

    #[test]
    fn callable_reads_and_writes() {
        let count = Callable::new(1);
        assert_eq!(count.call(), 1);
        assert!(count.call_with(2));
        assert!(!count.call_with(2));

        let f = count.as_fn();
        assert_eq!(f(None), 2);
        assert_eq!(f(Some(7)), 7);
        assert_eq!(read(&count), 7);
        assert_eq!(count.version(), 2);
    }
}
