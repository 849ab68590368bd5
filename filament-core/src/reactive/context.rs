//! Reactive Context
//!
//! The reactive context tracks which effect is currently collecting
//! dependencies, and whether tracking is suspended.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a tracked computation
//! pushes a frame; the returned guard pops it when dropped, so the stack is
//! restored even if the computation panics.
//!
//! Suspension is a separate axis: a counter that disables tracking for
//! everything below it. Entering a tracked frame saves the counter and
//! resets it to zero (a computed evaluated from inside `untracked` must
//! still collect its own dependencies); leaving the frame restores it.
//!
//! Each frame remembers the signals read during the current run. That set
//! is what makes tracking idempotent: reading the same signal twice within
//! one run produces a single link.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::graph::{EffectId, SignalId};

thread_local! {
    static CONTEXT: RefCell<ContextState> = RefCell::new(ContextState::default());
}

#[derive(Default)]
struct ContextState {
    stack: Vec<ContextEntry>,
    suspended: usize,
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The effect that receives links, or `None` for a plain `collect`.
    effect: Option<EffectId>,
    /// Signals read during this run, in first-read order.
    dependencies: IndexSet<SignalId>,
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    effect: Option<EffectId>,
    saved_suspended: usize,
}

impl ReactiveContext {
    /// Enter a new tracking frame.
    ///
    /// `seed` lists signals already linked to `effect`; they count as seen so
    /// that accumulating runs (which do not clear links first) never create
    /// a duplicate link.
    pub fn enter(effect: Option<EffectId>, seed: impl IntoIterator<Item = SignalId>) -> Self {
        let saved_suspended = CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            ctx.stack.push(ContextEntry {
                effect,
                dependencies: seed.into_iter().collect(),
            });
            std::mem::take(&mut ctx.suspended)
        });

        Self {
            effect,
            saved_suspended,
        }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        CONTEXT.with(|ctx| {
            let ctx = ctx.borrow();
            ctx.suspended == 0 && !ctx.stack.is_empty()
        })
    }

    /// The effect whose frame is on top of the stack, if any.
    pub fn current_effect() -> Option<EffectId> {
        CONTEXT.with(|ctx| ctx.borrow().stack.last().and_then(|entry| entry.effect))
    }

    /// Record that `signal` was read.
    ///
    /// Returns the effect that must be linked to `signal`: `Some` only the
    /// first time the signal is seen in the current frame, and only when the
    /// frame belongs to an effect and tracking is not suspended.
    pub fn track_dependency(signal: SignalId) -> Option<EffectId> {
        CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            if ctx.suspended > 0 {
                return None;
            }
            let entry = ctx.stack.last_mut()?;
            if entry.dependencies.insert(signal) {
                entry.effect
            } else {
                None
            }
        })
    }

    /// Get the dependencies collected in the current frame.
    pub fn get_dependencies() -> Vec<SignalId> {
        CONTEXT.with(|ctx| {
            ctx.borrow()
                .stack
                .last()
                .map(|entry| entry.dependencies.iter().copied().collect())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            let popped = ctx.stack.pop();
            ctx.suspended = self.saved_suspended;

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.effect, self.effect,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.effect, entry.effect
                );
            }
        });
    }
}

/// Guard restoring the previous suspension depth.
struct SuspendGuard {
    previous: usize,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        CONTEXT.with(|ctx| ctx.borrow_mut().suspended = self.previous);
    }
}

/// Run `f` with dependency tracking disabled, however deeply nested.
pub fn with_suspended_tracking<T>(f: impl FnOnce() -> T) -> T {
    let previous = CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        let previous = ctx.suspended;
        ctx.suspended += 1;
        previous
    });
    let _guard = SuspendGuard { previous };
    f()
}

/// Alias of [`with_suspended_tracking`].
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    with_suspended_tracking(f)
}

/// Whether a signal read right now would be tracked.
pub fn is_tracking() -> bool {
    ReactiveContext::is_active()
}

/// Result of [`collect`]: the closure's return value and the signals it read.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
    pub result: T,
    pub deps: Vec<SignalId>,
}

/// Run `f` and report which signals it read, without linking them to any
/// effect.
pub fn collect<T>(f: impl FnOnce() -> T) -> Collected<T> {
    let ctx = ReactiveContext::enter(None, std::iter::empty());
    let result = f();
    let deps = ReactiveContext::get_dependencies();
    drop(ctx);
    Collected { result, deps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn ids() -> (SlotMap<EffectId, ()>, SlotMap<SignalId, ()>) {
        (SlotMap::with_key(), SlotMap::with_key())
    }

    #[test]
    fn context_tracks_effect() {
        let (mut effects, _) = ids();
        let id = effects.insert(());

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_effect().is_none());

        {
            let _ctx = ReactiveContext::enter(Some(id), []);
            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_effect(), Some(id));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_effect().is_none());
    }

    #[test]
    fn repeated_reads_link_once() {
        let (mut effects, mut signals) = ids();
        let e = effects.insert(());
        let a = signals.insert(());
        let b = signals.insert(());

        let _ctx = ReactiveContext::enter(Some(e), []);
        assert_eq!(ReactiveContext::track_dependency(a), Some(e));
        assert_eq!(ReactiveContext::track_dependency(a), None);
        assert_eq!(ReactiveContext::track_dependency(b), Some(e));

        assert_eq!(ReactiveContext::get_dependencies(), vec![a, b]);
    }

    #[test]
    fn seeded_signals_are_not_relinked() {
        let (mut effects, mut signals) = ids();
        let e = effects.insert(());
        let a = signals.insert(());

        let _ctx = ReactiveContext::enter(Some(e), [a]);
        assert_eq!(ReactiveContext::track_dependency(a), None);
    }

    #[test]
    fn suspension_disables_tracking_and_restores() {
        let (mut effects, mut signals) = ids();
        let e = effects.insert(());
        let a = signals.insert(());

        let _ctx = ReactiveContext::enter(Some(e), []);
        with_suspended_tracking(|| {
            assert!(!is_tracking());
            untracked(|| assert_eq!(ReactiveContext::track_dependency(a), None));
            assert!(!is_tracking());
        });
        assert!(is_tracking());
        assert_eq!(ReactiveContext::track_dependency(a), Some(e));
    }

    #[test]
    fn inner_frame_tracks_even_when_outer_is_suspended() {
        let (mut effects, mut signals) = ids();
        let outer = effects.insert(());
        let inner = effects.insert(());
        let a = signals.insert(());

        let _ctx = ReactiveContext::enter(Some(outer), []);
        with_suspended_tracking(|| {
            {
                let _inner = ReactiveContext::enter(Some(inner), []);
                assert_eq!(ReactiveContext::track_dependency(a), Some(inner));
            }
            assert!(!is_tracking());
        });
    }

    #[test]
    fn context_is_restored_after_panic() {
        let (mut effects, _) = ids();
        let id = effects.insert(());

        let result = std::panic::catch_unwind(|| {
            let _ctx = ReactiveContext::enter(Some(id), []);
            with_suspended_tracking(|| panic!("inside"));
        });

        assert!(result.is_err());
        assert!(ReactiveContext::current_effect().is_none());
        assert!(!is_tracking());
        CONTEXT.with(|ctx| assert_eq!(ctx.borrow().suspended, 0));
    }

    #[test]
    fn collect_reports_reads_without_an_effect() {
        let (_, mut signals) = ids();
        let a = signals.insert(());
        let b = signals.insert(());

        let collected = collect(|| {
            assert_eq!(ReactiveContext::track_dependency(b), None);
            assert_eq!(ReactiveContext::track_dependency(a), None);
            ReactiveContext::track_dependency(b);
            "done"
        });

        assert_eq!(collected.result, "done");
        assert_eq!(collected.deps, vec![b, a]);
    }
}
