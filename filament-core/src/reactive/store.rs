//! Property Subscription Store
//!
//! A coarse registry mapping `(target, property)` to subscribers, used when
//! an observer wants to hear about property writes on a reactive object
//! without linking to each per-property signal.
//!
//! Two parallel maps exist, one per [`Delivery`] mode, so a target can have
//! immediate and batched listeners at the same time without cross-talk.
//!
//! - Immediate listeners fire synchronously inside [`PropertyStore::notify`],
//!   in registration order, once per changed property.
//! - Batched listeners are not called from `notify`. The changed properties
//!   are accumulated per target (deduplicated, in mutation order) and one
//!   microtask drains the whole pending map on the next flush. Each listener
//!   gets a single call carrying the changed properties it is registered
//!   for.
//!
//! Listener lists are snapshotted before delivery, so callbacks may register,
//! dispose or notify freely. Listeners are held weakly; a dropped or disposed
//! subscriber is skipped at delivery time.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Weak;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::trace;

use super::subscriber::{Subscriber, SubscriberInner};
use crate::graph::{queue_microtask, EffectId};

/// Identity of a reactive object in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    pub(crate) fn next() -> Self {
        NEXT_TARGET.with(|next| {
            let id = next.get();
            next.set(id + 1);
            TargetId(id)
        })
    }
}

/// Which property a listener is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Every property of the target.
    All,
    Prop(String),
}

impl PropertyKey {
    pub fn matches(&self, property: &str) -> bool {
        match self {
            PropertyKey::All => true,
            PropertyKey::Prop(p) => p == property,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(property: &str) -> Self {
        PropertyKey::Prop(property.to_string())
    }
}

impl From<Option<&str>> for PropertyKey {
    fn from(property: Option<&str>) -> Self {
        property.map_or(PropertyKey::All, PropertyKey::from)
    }
}

/// Delivery mode of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    Immediate,
    Batched,
}

struct Listener {
    seq: u64,
    subscriber: Weak<SubscriberInner>,
}

type PropertyMap = IndexMap<PropertyKey, IndexMap<EffectId, Listener>>;

#[derive(Default)]
struct StoreState {
    immediate: HashMap<TargetId, PropertyMap>,
    batched: HashMap<TargetId, PropertyMap>,
    pending: IndexMap<TargetId, IndexSet<String>>,
    flush_queued: bool,
    seq: u64,
}

impl StoreState {
    fn map(&mut self, delivery: Delivery) -> &mut HashMap<TargetId, PropertyMap> {
        match delivery {
            Delivery::Immediate => &mut self.immediate,
            Delivery::Batched => &mut self.batched,
        }
    }
}

thread_local! {
    static STORE: RefCell<StoreState> = RefCell::new(StoreState::default());
    static NEXT_TARGET: Cell<u64> = const { Cell::new(1) };
}

/// A listener resolved for one delivery: its subscriber and the keys it was
/// registered under.
struct Resolved {
    seq: u64,
    effect: EffectId,
    keys: SmallVec<[PropertyKey; 2]>,
    subscriber: Weak<SubscriberInner>,
}

/// Merge the listeners of the given keys into registration order, one entry
/// per subscriber.
fn resolve<'a>(map: &PropertyMap, keys: impl IntoIterator<Item = &'a PropertyKey>) -> Vec<Resolved> {
    let mut merged: IndexMap<EffectId, Resolved> = IndexMap::new();
    for key in keys {
        let Some(listeners) = map.get(key) else {
            continue;
        };
        for (&effect, listener) in listeners {
            let entry = merged.entry(effect).or_insert_with(|| Resolved {
                seq: listener.seq,
                effect,
                keys: SmallVec::new(),
                subscriber: listener.subscriber.clone(),
            });
            entry.seq = entry.seq.min(listener.seq);
            entry.keys.push(key.clone());
        }
    }
    let mut resolved: Vec<Resolved> = merged.into_values().collect();
    resolved.sort_by_key(|r| r.seq);
    resolved
}

fn deliver(subscriber: &Weak<SubscriberInner>, properties: &[String]) {
    let Some(inner) = subscriber.upgrade() else {
        return;
    };
    let subscriber = Subscriber::from_inner(inner);
    if !subscriber.is_disposed() {
        subscriber.trigger_with(properties);
    }
}

/// Facade over the thread-local property store.
pub struct PropertyStore;

impl PropertyStore {
    /// Register `subscriber` for `key` on `target`.
    ///
    /// Returns `false` if the subscriber is disposed or already registered
    /// for that key and mode. The registration is removed when the
    /// subscriber is disposed.
    pub fn listen(
        target: TargetId,
        key: PropertyKey,
        subscriber: &Subscriber,
        delivery: Delivery,
    ) -> bool {
        if subscriber.is_disposed() {
            return false;
        }
        let effect = subscriber.id();
        let inserted = STORE.with(|s| {
            let mut s = s.borrow_mut();
            s.seq += 1;
            let seq = s.seq;
            let listeners = s
                .map(delivery)
                .entry(target)
                .or_default()
                .entry(key.clone())
                .or_default();
            if listeners.contains_key(&effect) {
                return false;
            }
            listeners.insert(
                effect,
                Listener {
                    seq,
                    subscriber: subscriber.downgrade(),
                },
            );
            true
        });

        if inserted {
            subscriber.on_cleanup(move || {
                PropertyStore::unlisten(target, &key, effect, delivery);
            });
        }
        inserted
    }

    /// Remove a registration. Returns whether one existed.
    pub fn unlisten(target: TargetId, key: &PropertyKey, effect: EffectId, delivery: Delivery) -> bool {
        STORE
            .try_with(|s| {
                let mut s = s.borrow_mut();
                let map = s.map(delivery);
                let Some(properties) = map.get_mut(&target) else {
                    return false;
                };
                let removed = properties
                    .get_mut(key)
                    .is_some_and(|listeners| listeners.shift_remove(&effect).is_some());
                if properties.get(key).is_some_and(IndexMap::is_empty) {
                    properties.shift_remove(key);
                }
                if properties.is_empty() {
                    map.remove(&target);
                }
                removed
            })
            .unwrap_or(false)
    }

    /// Announce that `properties` of `target` changed.
    pub fn notify(target: TargetId, properties: &[String]) {
        if properties.is_empty() {
            return;
        }

        let schedule = STORE.with(|s| {
            let mut s = s.borrow_mut();
            let has_batched = s.batched.get(&target).is_some_and(|m| !m.is_empty());
            if !has_batched {
                return false;
            }
            s.pending
                .entry(target)
                .or_default()
                .extend(properties.iter().cloned());
            !std::mem::replace(&mut s.flush_queued, true)
        });
        if schedule {
            queue_microtask(Self::flush_pending);
        }

        for property in properties {
            let listeners = STORE.with(|s| {
                let s = s.borrow();
                let Some(map) = s.immediate.get(&target) else {
                    return Vec::new();
                };
                let keys = [PropertyKey::All, PropertyKey::from(property.as_str())];
                resolve(map, &keys)
            });
            for listener in listeners {
                deliver(&listener.subscriber, std::slice::from_ref(property));
            }
        }
    }

    /// Drain the pending map, delivering one call per batched listener and
    /// target.
    fn flush_pending() {
        let pending = STORE.with(|s| {
            let mut s = s.borrow_mut();
            s.flush_queued = false;
            std::mem::take(&mut s.pending)
        });
        trace!(targets = pending.len(), "flushing property notifications");

        for (target, changed) in pending {
            let listeners = STORE.with(|s| {
                let s = s.borrow();
                s.batched
                    .get(&target)
                    .map(|map| resolve(map, map.keys()))
                    .unwrap_or_default()
            });
            for listener in listeners {
                let properties: Vec<String> = changed
                    .iter()
                    .filter(|p| listener.keys.iter().any(|k| k.matches(p)))
                    .cloned()
                    .collect();
                if !properties.is_empty() {
                    trace!(?target, effect = ?listener.effect, ?properties, "batched delivery");
                    deliver(&listener.subscriber, &properties);
                }
            }
        }
    }

    /// Forget every listener and pending change of `target`.
    pub fn remove_target(target: TargetId) {
        let _ = STORE.try_with(|s| {
            let mut s = s.borrow_mut();
            s.immediate.remove(&target);
            s.batched.remove(&target);
            s.pending.shift_remove(&target);
        });
    }

    /// Number of registrations on `target` for a delivery mode.
    pub fn listener_count(target: TargetId, delivery: Delivery) -> usize {
        STORE.with(|s| {
            s.borrow_mut()
                .map(delivery)
                .get(&target)
                .map_or(0, |m| m.values().map(IndexMap::len).sum())
        })
    }

    /// Properties of `target` waiting for the next flush.
    pub fn pending(target: TargetId) -> Vec<String> {
        STORE.with(|s| {
            s.borrow()
                .pending
                .get(&target)
                .map(|p| p.iter().cloned().collect())
                .unwrap_or_default()
        })
    }
}
