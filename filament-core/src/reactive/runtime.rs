//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals and effects.
//! It owns the thread-local dependency graph and implements the per-signal
//! notification path.
//!
//! # How It Works
//!
//! 1. Signals and effects register a node with the runtime when created and
//!    remove it when dropped or disposed.
//!
//! 2. When an effect runs inside [`Runtime::run_tracked`], every signal read
//!    goes through [`Runtime::track`], which links the signal to the running
//!    effect (once per run).
//!
//! 3. When a signal's value changes, the runtime bumps its version, snapshots
//!    the subscriber list and notifies each effect. The effect itself decides
//!    whether to run right away or to enqueue itself for the next flush.
//!
//! # Reentrancy
//!
//! No graph borrow is ever held while user code runs. Notification walks a
//! snapshot of effect ids and resolves each id again at delivery time, so an
//! effect disposed by an earlier sibling is silently skipped.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::trace;

use super::context::ReactiveContext;
use crate::graph::{self, EffectId, Graph, NodeKind, SignalId};

/// A trait for effects that can be notified when dependencies change.
pub trait Reaction {
    /// The graph node of this effect.
    fn effect_id(&self) -> EffectId;

    /// A dependency changed. Either run now or enqueue via
    /// [`Runtime::schedule_effect`].
    fn notify(&self);

    /// Run a previously scheduled notification.
    fn run_scheduled(&self);

    /// Dispose the effect. Returns `false` if it was already disposed.
    fn dispose(&self) -> bool;

    /// Whether the effect has been disposed.
    fn is_disposed(&self) -> bool;

    /// Stop reacting until [`Reaction::resume`]; disposal is unaffected.
    fn pause(&self) {}

    /// Undo [`Reaction::pause`].
    fn resume(&self) {}
}

type Payload = Weak<dyn Reaction>;

thread_local! {
    static GRAPH: RefCell<Graph<Payload>> = RefCell::new(Graph::new());
    static PENDING_EFFECTS: RefCell<IndexSet<EffectId>> = RefCell::new(IndexSet::new());
    static EFFECT_FLUSH_QUEUED: Cell<bool> = const { Cell::new(false) };
}

/// Placeholder payload used while an effect is being constructed.
struct Unbound;

impl Reaction for Unbound {
    fn effect_id(&self) -> EffectId {
        EffectId::default()
    }
    fn notify(&self) {}
    fn run_scheduled(&self) {}
    fn dispose(&self) -> bool {
        false
    }
    fn is_disposed(&self) -> bool {
        true
    }
}

/// The thread-local reactive runtime.
pub struct Runtime;

impl Runtime {
    fn with_graph<R>(f: impl FnOnce(&mut Graph<Payload>) -> R) -> R {
        GRAPH.with(|g| f(&mut g.borrow_mut()))
    }

    /// Like `with_graph`, but a no-op once the thread-local has been torn
    /// down (handles dropped during thread exit).
    fn try_with_graph<R>(f: impl FnOnce(&mut Graph<Payload>) -> R) -> Option<R> {
        GRAPH.try_with(|g| f(&mut g.borrow_mut())).ok()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a new signal node.
    pub fn register_signal() -> SignalId {
        Self::with_graph(Graph::add_signal)
    }

    /// Remove a signal node and every link pointing at it.
    pub fn unregister_signal(signal: SignalId) {
        Self::try_with_graph(|g| g.remove_signal(signal));
    }

    /// Register an effect node whose payload is bound later with
    /// [`Runtime::bind_effect`].
    pub fn register_effect(kind: NodeKind) -> EffectId {
        let unbound: Payload = Weak::<Unbound>::new();
        Self::with_graph(|g| g.add_effect(kind, unbound))
    }

    /// Attach the effect object to its node.
    pub fn bind_effect(effect: EffectId, reaction: Weak<dyn Reaction>) {
        Self::with_graph(|g| {
            if let Some(slot) = g.effect_payload_mut(effect) {
                *slot = reaction;
            }
        });
    }

    /// Remove an effect node and all of its links.
    pub fn unregister_effect(effect: EffectId) {
        Self::try_with_graph(|g| g.remove_effect(effect));
        let _ = PENDING_EFFECTS.try_with(|p| p.borrow_mut().shift_remove(&effect));
    }

    /// Whether the effect node still exists.
    pub fn is_registered(effect: EffectId) -> bool {
        Self::with_graph(|g| g.contains_effect(effect))
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Record a read of `signal` in the current tracking frame.
    pub fn track(signal: SignalId) {
        if let Some(effect) = ReactiveContext::track_dependency(signal) {
            Self::with_graph(|g| g.create_link(effect, signal));
        }
    }

    /// Run `f` with `effect` as the active effect, adding links for newly
    /// read signals while keeping existing ones.
    pub fn with_tracking<T>(effect: EffectId, f: impl FnOnce() -> T) -> T {
        let existing = Self::with_graph(|g| g.dependencies(effect));
        let _ctx = ReactiveContext::enter(Some(effect), existing);
        f()
    }

    /// Clear all links of `effect`, then run `f` tracked. After the call the
    /// effect depends on exactly the signals `f` read.
    pub fn run_tracked<T>(effect: EffectId, f: impl FnOnce() -> T) -> T {
        Self::with_graph(|g| g.clear_effect_deps(effect));
        let _ctx = ReactiveContext::enter(Some(effect), std::iter::empty());
        f()
    }

    /// Drop all links of `effect` without removing the node.
    pub fn clear_dependencies(effect: EffectId) {
        Self::try_with_graph(|g| g.clear_effect_deps(effect));
    }

    // ------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------

    /// Commit a write: bump the version and notify subscribers.
    pub fn notify_signal_change(signal: SignalId) {
        let subscribers = Self::with_graph(|g| {
            g.bump_version(signal);
            g.subscribers(signal)
        });
        trace!(?signal, subscribers = subscribers.len(), "signal changed");
        Self::deliver(&subscribers);
    }

    /// Unlink every subscriber of `signal`, bump its version and notify the
    /// former subscribers once.
    pub fn invalidate_signal(signal: SignalId) {
        let former = Self::with_graph(|g| {
            g.bump_version(signal);
            g.invalidate_signal(signal)
        });
        Self::deliver(&former);
    }

    /// Notify each effect, resolving it at delivery time.
    fn deliver(effects: &[EffectId]) {
        for &effect in effects {
            let reaction = Self::with_graph(|g| g.effect(effect).map(|n| n.payload().clone()));
            let Some(reaction) = reaction.and_then(|weak| weak.upgrade()) else {
                continue;
            };
            if !reaction.is_disposed() {
                reaction.notify();
            }
        }
    }

    /// Enqueue an effect for the next flush. Repeated calls before the flush
    /// collapse into one run.
    pub fn schedule_effect(effect: EffectId) {
        PENDING_EFFECTS.with(|p| p.borrow_mut().insert(effect));
        if !EFFECT_FLUSH_QUEUED.with(|q| q.replace(true)) {
            graph::queue_microtask(Self::run_pending_effects);
        }
    }

    fn run_pending_effects() {
        EFFECT_FLUSH_QUEUED.with(|q| q.set(false));
        let pending = PENDING_EFFECTS.with(|p| std::mem::take(&mut *p.borrow_mut()));
        for effect in pending {
            let reaction = Self::with_graph(|g| g.effect(effect).map(|n| n.payload().clone()));
            if let Some(reaction) = reaction.and_then(|weak| weak.upgrade()) {
                if !reaction.is_disposed() {
                    reaction.run_scheduled();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// The write version of `signal` (0 if unknown).
    pub fn version(signal: SignalId) -> u64 {
        Self::with_graph(|g| g.signal(signal).map_or(0, |n| n.version()))
    }

    /// Number of effects linked to `signal`.
    pub fn subscriber_count(signal: SignalId) -> usize {
        Self::with_graph(|g| g.signal(signal).map_or(0, |n| n.subscriber_count()))
    }

    /// Signals `effect` currently depends on.
    pub fn dependencies(effect: EffectId) -> Vec<SignalId> {
        Self::with_graph(|g| g.dependencies(effect))
    }

    /// Effects subscribed to `signal`, oldest first.
    pub fn subscribers(signal: SignalId) -> Vec<EffectId> {
        Self::with_graph(|g| g.subscribers(signal))
    }

    /// Whether `effect` is linked to `signal`.
    pub fn has_link(effect: EffectId, signal: SignalId) -> bool {
        Self::with_graph(|g| g.has_link(effect, signal))
    }

    /// Total number of live links on this thread.
    pub fn link_count() -> usize {
        Self::with_graph(|g| g.link_count())
    }

    /// Get the effect currently collecting dependencies, if any.
    pub fn current_effect() -> Option<EffectId> {
        ReactiveContext::current_effect()
    }

    /// Check if reads are currently tracked.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent() {
        Self::with_graph(|g| g.assert_consistent());
    }
}

/// Bind a freshly constructed effect object to its node.
pub(crate) fn bind<R: Reaction + 'static>(reaction: &Rc<R>) {
    let weak: Weak<dyn Reaction> = Rc::downgrade(reaction) as Weak<dyn Reaction>;
    Runtime::bind_effect(reaction.effect_id(), weak);
}
