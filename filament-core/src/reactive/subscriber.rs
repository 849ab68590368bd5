//! Subscriber
//!
//! A Subscriber is the basic effect: a callback with a bounded trigger
//! count, a pause flag, an error handler and a list of cleanup callbacks.
//! Every other effect (auto-running effects, watchers, the observer inside a
//! computed) is a subscriber with a specialised callback.
//!
//! # Lifecycle
//!
//! `Active -> Paused -> Active -> ... -> Disposed`
//!
//! - While paused, `trigger` returns `true` without running the callback.
//!   A computed's observer remembers the skipped notification and
//!   re-evaluates on resume.
//! - Disposal is terminal: the callback is released, cleanups run exactly
//!   once, and every dependency link is cleared.
//! - Dropping the last handle (and the owning scope, if any) disposes the
//!   subscriber.
//!
//! # Failure handling
//!
//! A panic inside the callback is caught and routed to `on_error` (or the
//! thread's fallback handler). It never propagates into the notification
//! loop, so sibling subscribers still run.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::debug;

use super::runtime::{bind, Reaction, Runtime};
use super::scope::{current_scope, EffectScope};
use crate::error::{report, CallbackError, ErrorHandler};
use crate::graph::{EffectId, NodeKind, SignalId};

/// What a subscriber callback receives on each invocation.
#[derive(Debug, Clone, Copy)]
pub struct Trigger<'a> {
    /// The graph node of the subscriber being triggered.
    pub effect: EffectId,

    /// Properties that changed (property-store deliveries only; empty for
    /// signal notifications).
    pub properties: &'a [String],
}

/// Subscriber callback.
pub type Callback = Box<dyn FnMut(&Trigger<'_>)>;

/// Construction options for [`Subscriber`].
#[derive(Clone, Default)]
pub struct SubscriberOptions {
    /// Auto-dispose after this many invocations (`0` = unbounded).
    pub limit: usize,

    /// Register with this scope instead of the active one.
    pub scope: Option<EffectScope>,

    /// Do not register with any scope.
    pub detached: bool,

    /// Defer signal notifications to the next flush instead of running
    /// synchronously. Several notifications before a flush collapse into one
    /// invocation.
    pub batch: bool,

    /// Handler for panics raised by the callback or cleanups.
    pub on_error: Option<ErrorHandler>,
}

impl Debug for SubscriberOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberOptions")
            .field("limit", &self.limit)
            .field("scoped", &self.scope.is_some())
            .field("detached", &self.detached)
            .field("batch", &self.batch)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

pub(crate) struct SubscriberInner {
    id: EffectId,
    kind: NodeKind,
    callback: RefCell<Option<Callback>>,
    count: Cell<usize>,
    limit: usize,
    batch: bool,
    paused: Cell<bool>,
    /// A computed's observer was triggered while paused.
    stale: Cell<bool>,
    disposed: Cell<bool>,
    on_error: RefCell<Option<ErrorHandler>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl SubscriberInner {
    fn label(&self) -> String {
        format!("{} {:?}", self.kind.label(), self.id)
    }

    fn report(&self, error: &CallbackError) {
        let handler = self.on_error.borrow().clone();
        report(error, handler.as_ref());
    }

    /// Run `f`, routing a panic to the error handler.
    fn guarded(&self, f: impl FnOnce()) -> bool {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => true,
            Err(payload) => {
                self.report(&CallbackError::from_panic(self.label(), payload));
                false
            }
        }
    }

    fn trigger(&self, properties: &[String]) -> bool {
        if self.disposed.get() {
            return false;
        }
        if self.paused.get() {
            if self.kind == NodeKind::Computed {
                self.stale.set(true);
            }
            return true;
        }
        if self.limit > 0 && self.count.get() >= self.limit {
            return false;
        }

        // Taking the callback out of its slot makes reentrant triggers (the
        // callback writing a signal it depends on) a no-op and lets the
        // callback dispose its own subscriber.
        let Some(mut callback) = self.callback.borrow_mut().take() else {
            return true;
        };

        let trigger = Trigger {
            effect: self.id,
            properties,
        };
        self.guarded(|| callback(&trigger));

        if self.disposed.get() {
            drop(callback);
        } else {
            let mut slot = self.callback.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }

        self.count.set(self.count.get() + 1);
        if self.limit > 0 && self.count.get() >= self.limit {
            self.dispose_inner();
            return false;
        }
        !self.disposed.get()
    }

    fn dispose_inner(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }

        let callback = self.callback.borrow_mut().take();
        drop(callback);
        Runtime::unregister_effect(self.id);

        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups {
            self.guarded(cleanup);
        }

        debug!(effect = ?self.id, kind = self.kind.label(), count = self.count.get(), "disposed");
        true
    }
}

impl Reaction for SubscriberInner {
    fn effect_id(&self) -> EffectId {
        self.id
    }

    fn notify(&self) {
        if self.batch {
            Runtime::schedule_effect(self.id);
        } else {
            self.trigger(&[]);
        }
    }

    fn run_scheduled(&self) {
        self.trigger(&[]);
    }

    fn dispose(&self) -> bool {
        self.dispose_inner()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn pause(&self) {
        self.paused.set(true);
    }

    fn resume(&self) {
        self.paused.set(false);
        // Replay the notification a paused computed skipped.
        if self.stale.replace(false) {
            self.trigger(&[]);
        }
    }
}

impl Drop for SubscriberInner {
    fn drop(&mut self) {
        self.dispose_inner();
    }
}

/// A bounded-count callback subscriber.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Signal, Subscriber, SubscriberOptions};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let s = seen.clone();
/// let sub = Subscriber::new(move |_| s.set(s.get() + 1), SubscriberOptions::default());
/// sub.track(|| count.get());
///
/// count.set(1);
/// assert_eq!(seen.get(), 1);
/// ```
#[derive(Clone)]
pub struct Subscriber {
    inner: Rc<SubscriberInner>,
}

/// The handle returned by [`subscribe`](super::subscribe).
pub type SubscriptionHandle = Subscriber;

impl Subscriber {
    /// Create a subscriber. It is inert until something links it to a signal
    /// (see [`Subscriber::track`]) or registers it with the property store.
    pub fn new<F>(callback: F, options: SubscriberOptions) -> Self
    where
        F: FnMut(&Trigger<'_>) + 'static,
    {
        Self::with_kind(NodeKind::Subscriber, Box::new(callback), options)
    }

    pub(crate) fn with_kind(kind: NodeKind, callback: Callback, options: SubscriberOptions) -> Self {
        let inner = Rc::new(SubscriberInner {
            id: Runtime::register_effect(kind),
            kind,
            callback: RefCell::new(Some(callback)),
            count: Cell::new(0),
            limit: options.limit,
            batch: options.batch,
            paused: Cell::new(false),
            stale: Cell::new(false),
            disposed: Cell::new(false),
            on_error: RefCell::new(options.on_error),
            cleanups: RefCell::new(Vec::new()),
        });
        bind(&inner);

        let scope = if options.detached {
            None
        } else {
            options.scope.or_else(current_scope)
        };
        if let Some(scope) = scope {
            scope.add_effect(inner.clone());
        }

        Self { inner }
    }

    /// The graph node of this subscriber.
    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Invoke the callback.
    ///
    /// Returns `false` once the subscriber is disposed or its limit is
    /// reached (including the invocation that reaches it), `true` otherwise.
    /// A paused subscriber returns `true` without invoking the callback.
    pub fn trigger(&self) -> bool {
        self.inner.trigger(&[])
    }

    /// Invoke the callback with a list of changed properties.
    pub fn trigger_with(&self, properties: &[String]) -> bool {
        self.inner.trigger(properties)
    }

    /// Run `f`, linking this subscriber to every signal it reads. Existing
    /// links are kept.
    pub fn track<T>(&self, f: impl FnOnce() -> T) -> T {
        if self.is_disposed() {
            return f();
        }
        Runtime::with_tracking(self.inner.id, f)
    }

    /// Clear all links, then run `f` tracked. Afterwards the subscriber
    /// depends on exactly the signals `f` read.
    pub fn run_tracked<T>(&self, f: impl FnOnce() -> T) -> T {
        if self.is_disposed() {
            return f();
        }
        Runtime::run_tracked(self.inner.id, f)
    }

    /// Signals this subscriber is linked to.
    pub fn dependencies(&self) -> Vec<SignalId> {
        Runtime::dependencies(self.inner.id)
    }

    /// Dispose the subscriber. Returns `false` if it was already disposed.
    pub fn dispose(&self) -> bool {
        self.inner.dispose_inner()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Stop invoking the callback until [`Subscriber::resume`].
    pub fn pause(&self) {
        self.inner.pause();
    }

    pub fn resume(&self) {
        self.inner.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Number of callback invocations so far.
    pub fn count(&self) -> usize {
        self.inner.count.get()
    }

    /// The configured invocation limit (`0` = unbounded).
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Reset the invocation count. Returns `false` once disposed.
    pub fn reset_count(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.inner.count.set(0);
        true
    }

    /// Register a callback to run when the subscriber is disposed. If it is
    /// already disposed, the callback runs immediately.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        if self.is_disposed() {
            self.inner.guarded(cleanup);
        } else {
            self.inner.cleanups.borrow_mut().push(Box::new(cleanup));
        }
    }

    /// Replace the error handler.
    pub fn on_error(&self, handler: impl Fn(&CallbackError) + 'static) {
        *self.inner.on_error.borrow_mut() = Some(Rc::new(handler));
    }

    /// This subscriber as a type-erased effect, e.g. for
    /// [`EffectScope::add_effect`].
    pub fn as_reaction(&self) -> Rc<dyn Reaction> {
        self.inner.clone()
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<SubscriberInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<SubscriberInner>) -> Self {
        Self { inner }
    }
}

impl Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("count", &self.count())
            .field("limit", &self.inner.limit)
            .field("paused", &self.is_paused())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
