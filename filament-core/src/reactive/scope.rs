//! Effect Scope
//!
//! An EffectScope owns a group of effects (and nested scopes) so they can be
//! disposed together, e.g. when a component unmounts.
//!
//! Effects constructed while a scope is active (inside [`EffectScope::run`])
//! register with it automatically unless created detached. Scopes created
//! while another scope is active become its children.
//!
//! Disposal is idempotent and reentrancy-safe: a `dispose` call made while
//! the scope is already disposing returns `false` immediately. Owned effects
//! and child scopes are disposed in registration order, then the scope's own
//! cleanups run. A panicking cleanup is reported and does not stop the rest
//! of the teardown.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::debug;

use super::runtime::Reaction;
use crate::error::{report, CallbackError};

/// Entry count at which a fresh scope first drops disposed effects.
const PRUNE_THRESHOLD: usize = 32;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

/// The innermost scope entered with [`EffectScope::run`].
pub fn current_scope() -> Option<EffectScope> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Create a scope nested under the active one (if any).
pub fn create_scope() -> EffectScope {
    EffectScope::new()
}

enum ScopeEntry {
    Effect(Rc<dyn Reaction>),
    Scope(EffectScope),
}

struct ScopeInner {
    active: Cell<bool>,
    disposing: Cell<bool>,
    paused: Cell<bool>,
    entries: RefCell<Vec<ScopeEntry>>,
    /// Entry count that triggers the next prune.
    prune_at: Cell<usize>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    parent: RefCell<Option<Weak<ScopeInner>>>,
}

/// An ownership group for effects.
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

/// Pops the scope stack even if the closure panics.
struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| stack.borrow_mut().pop());
    }
}

impl EffectScope {
    /// Create a scope, registering it as a child of the active scope.
    pub fn new() -> Self {
        let scope = Self::detached();
        if let Some(parent) = current_scope() {
            parent.adopt(&scope);
        }
        scope
    }

    /// Create a scope that is not collected by the active scope.
    pub fn detached() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                active: Cell::new(true),
                disposing: Cell::new(false),
                paused: Cell::new(false),
                entries: RefCell::new(Vec::new()),
                prune_at: Cell::new(PRUNE_THRESHOLD),
                cleanups: RefCell::new(Vec::new()),
                parent: RefCell::new(None),
            }),
        }
    }

    fn adopt(&self, child: &EffectScope) {
        if !self.is_active() {
            child.dispose();
            return;
        }
        *child.inner.parent.borrow_mut() = Some(Rc::downgrade(&self.inner));
        self.inner
            .entries
            .borrow_mut()
            .push(ScopeEntry::Scope(child.clone()));
    }

    /// Whether the scope has not been disposed.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Run `f` with this scope active. Returns `None` without running `f`
    /// if the scope has been disposed.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if !self.is_active() {
            return None;
        }
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = ScopeGuard;
        Some(f())
    }

    /// Take ownership of an effect. If the scope is already disposed the
    /// effect is disposed right away and `false` is returned.
    pub fn add_effect(&self, effect: Rc<dyn Reaction>) -> bool {
        if !self.is_active() {
            effect.dispose();
            return false;
        }
        if self.is_paused() {
            effect.pause();
        }

        let mut entries = self.inner.entries.borrow_mut();
        entries.push(ScopeEntry::Effect(effect));

        // Disposed effects are dropped once the list doubles, keeping
        // registration amortized O(1).
        if entries.len() >= self.inner.prune_at.get() {
            entries.retain(|entry| match entry {
                ScopeEntry::Effect(e) => !e.is_disposed(),
                ScopeEntry::Scope(_) => true,
            });
            self.inner
                .prune_at
                .set((entries.len() * 2).max(PRUNE_THRESHOLD));
        }
        true
    }

    /// Number of live effects owned directly by this scope.
    pub fn effect_count(&self) -> usize {
        self.inner
            .entries
            .borrow()
            .iter()
            .filter(|entry| matches!(entry, ScopeEntry::Effect(e) if !e.is_disposed()))
            .count()
    }

    /// Number of child scopes.
    pub fn scope_count(&self) -> usize {
        self.inner
            .entries
            .borrow()
            .iter()
            .filter(|entry| matches!(entry, ScopeEntry::Scope(_)))
            .count()
    }

    /// Register a callback to run when the scope is disposed. Runs
    /// immediately if the scope is already disposed.
    pub fn on_dispose(&self, cleanup: impl FnOnce() + 'static) {
        if self.is_active() {
            self.inner.cleanups.borrow_mut().push(Box::new(cleanup));
        } else {
            run_cleanup(Box::new(cleanup));
        }
    }

    /// Pause every owned effect, recursively.
    pub fn pause(&self) {
        if !self.is_active() || self.inner.paused.replace(true) {
            return;
        }
        for entry in self.snapshot() {
            match entry {
                ScopeEntry::Effect(e) => e.pause(),
                ScopeEntry::Scope(s) => s.pause(),
            }
        }
    }

    /// Resume every owned effect, recursively.
    pub fn resume(&self) {
        if !self.is_active() || !self.inner.paused.replace(false) {
            return;
        }
        for entry in self.snapshot() {
            match entry {
                ScopeEntry::Effect(e) => e.resume(),
                ScopeEntry::Scope(s) => s.resume(),
            }
        }
    }

    fn snapshot(&self) -> Vec<ScopeEntry> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|entry| match entry {
                ScopeEntry::Effect(e) => ScopeEntry::Effect(e.clone()),
                ScopeEntry::Scope(s) => ScopeEntry::Scope(s.clone()),
            })
            .collect()
    }

    /// Dispose owned effects and child scopes in registration order, then
    /// run this scope's cleanups.
    ///
    /// Returns `false` if the scope is already disposed or disposing.
    pub fn dispose(&self) -> bool {
        if !self.is_active() || self.inner.disposing.replace(true) {
            return false;
        }

        // Effects registered during teardown land in the list after it has
        // been taken, so keep draining until nothing new shows up.
        loop {
            let entries = std::mem::take(&mut *self.inner.entries.borrow_mut());
            if entries.is_empty() {
                break;
            }
            for entry in entries {
                match entry {
                    ScopeEntry::Effect(effect) => {
                        effect.dispose();
                    }
                    ScopeEntry::Scope(scope) => {
                        scope.dispose();
                    }
                }
            }
        }

        self.inner.active.set(false);

        let cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        for cleanup in cleanups {
            run_cleanup(cleanup);
        }

        let parent = self.inner.parent.borrow_mut().take();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.entries.borrow_mut().retain(|entry| match entry {
                ScopeEntry::Scope(s) => !Rc::ptr_eq(&s.inner, &self.inner),
                ScopeEntry::Effect(_) => true,
            });
        }

        self.inner.disposing.set(false);
        debug!("effect scope disposed");
        true
    }
}

fn run_cleanup(cleanup: Box<dyn FnOnce()>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(cleanup)) {
        report(&CallbackError::from_panic("effect scope cleanup", payload), None);
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("paused", &self.is_paused())
            .field("effects", &self.effect_count())
            .field("scopes", &self.scope_count())
            .finish()
    }
}
