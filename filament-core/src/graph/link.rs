//! Dependency Links
//!
//! A [`DepLink`] is one edge between a signal and an effect. Every link is a
//! member of two intrusive doubly linked lists at once:
//!
//! - the signal's subscriber list (`sig_prev` / `sig_next`)
//! - the effect's dependency list (`eff_prev` / `eff_next`)
//!
//! Links live in a generational arena and refer to each other by key, so
//! there are no reference cycles and a stale key can never alias a reused
//! slot. Insertion appends to both tails in O(1); removal splices a link out
//! of both lists in O(1) using its stored neighbours.

use slotmap::{new_key_type, SlotMap};
use tracing::trace;

use super::node::{EffectId, EffectNode, NodeKind, SignalId, SignalNode};

new_key_type! {
    /// Arena key of a [`DepLink`].
    pub struct LinkId;
}

/// A single signal -> effect edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepLink {
    pub signal: SignalId,
    pub effect: EffectId,
    pub(crate) sig_prev: Option<LinkId>,
    pub(crate) sig_next: Option<LinkId>,
    pub(crate) eff_prev: Option<LinkId>,
    pub(crate) eff_next: Option<LinkId>,
}

/// The dependency graph: signal nodes, effect nodes and the links between
/// them.
pub struct Graph<P> {
    signals: SlotMap<SignalId, SignalNode>,
    effects: SlotMap<EffectId, EffectNode<P>>,
    links: SlotMap<LinkId, DepLink>,
}

impl<P> Graph<P> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            signals: SlotMap::with_key(),
            effects: SlotMap::with_key(),
            links: SlotMap::with_key(),
        }
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Register a new signal node.
    pub fn add_signal(&mut self) -> SignalId {
        self.signals.insert(SignalNode::default())
    }

    /// Remove a signal node, unlinking every subscriber first.
    ///
    /// Returns the effects that were subscribed, oldest first.
    pub fn remove_signal(&mut self, signal: SignalId) -> Vec<EffectId> {
        let orphaned = self.invalidate_signal(signal);
        self.signals.remove(signal);
        orphaned
    }

    /// Register a new effect node.
    pub fn add_effect(&mut self, kind: NodeKind, payload: P) -> EffectId {
        self.effects.insert(EffectNode::new(kind, payload))
    }

    /// Remove an effect node together with all of its dependency links.
    pub fn remove_effect(&mut self, effect: EffectId) -> Option<P> {
        self.clear_effect_deps(effect);
        self.effects.remove(effect).map(|node| node.payload)
    }

    pub fn signal(&self, signal: SignalId) -> Option<&SignalNode> {
        self.signals.get(signal)
    }

    pub fn effect(&self, effect: EffectId) -> Option<&EffectNode<P>> {
        self.effects.get(effect)
    }

    pub(crate) fn effect_payload_mut(&mut self, effect: EffectId) -> Option<&mut P> {
        self.effects.get_mut(effect).map(|node| &mut node.payload)
    }

    pub fn contains_effect(&self, effect: EffectId) -> bool {
        self.effects.contains_key(effect)
    }

    /// Increment a signal's version, returning the new value.
    pub fn bump_version(&mut self, signal: SignalId) -> Option<u64> {
        self.signals.get_mut(signal).map(|node| {
            node.version += 1;
            node.version
        })
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Append a link to the tail of both the effect's dependency list and
    /// the signal's subscriber list.
    ///
    /// Returns `None` when either endpoint no longer exists. Deduplication is
    /// the caller's job (see the tracking context).
    pub fn create_link(&mut self, effect: EffectId, signal: SignalId) -> Option<LinkId> {
        let sig_tail = self.signals.get(signal)?.tail;
        let eff_tail = self.effects.get(effect)?.tail;

        let id = self.links.insert(DepLink {
            signal,
            effect,
            sig_prev: sig_tail,
            sig_next: None,
            eff_prev: eff_tail,
            eff_next: None,
        });

        match sig_tail.and_then(|t| self.links.get_mut(t)) {
            Some(tail) => tail.sig_next = Some(id),
            None => self.signals[signal].head = Some(id),
        }
        let node = &mut self.signals[signal];
        node.tail = Some(id);
        node.subscriber_count += 1;

        match eff_tail.and_then(|t| self.links.get_mut(t)) {
            Some(tail) => tail.eff_next = Some(id),
            None => self.effects[effect].head = Some(id),
        }
        let node = &mut self.effects[effect];
        node.tail = Some(id);
        node.dependency_count += 1;

        trace!(?effect, ?signal, "link");
        Some(id)
    }

    /// Splice a link out of both of its lists and free it.
    fn unlink(&mut self, id: LinkId) -> Option<DepLink> {
        let link = self.links.remove(id)?;

        match link.sig_prev.and_then(|p| self.links.get_mut(p)) {
            Some(prev) => prev.sig_next = link.sig_next,
            None => {
                if let Some(node) = self.signals.get_mut(link.signal) {
                    node.head = link.sig_next;
                }
            }
        }
        match link.sig_next.and_then(|n| self.links.get_mut(n)) {
            Some(next) => next.sig_prev = link.sig_prev,
            None => {
                if let Some(node) = self.signals.get_mut(link.signal) {
                    node.tail = link.sig_prev;
                }
            }
        }
        if let Some(node) = self.signals.get_mut(link.signal) {
            node.subscriber_count -= 1;
        }

        match link.eff_prev.and_then(|p| self.links.get_mut(p)) {
            Some(prev) => prev.eff_next = link.eff_next,
            None => {
                if let Some(node) = self.effects.get_mut(link.effect) {
                    node.head = link.eff_next;
                }
            }
        }
        match link.eff_next.and_then(|n| self.links.get_mut(n)) {
            Some(next) => next.eff_prev = link.eff_prev,
            None => {
                if let Some(node) = self.effects.get_mut(link.effect) {
                    node.tail = link.eff_prev;
                }
            }
        }
        if let Some(node) = self.effects.get_mut(link.effect) {
            node.dependency_count -= 1;
        }

        Some(link)
    }

    /// Drop every dependency link of `effect`.
    ///
    /// Called before a dynamically tracked effect re-runs so that its
    /// dependency set reflects only the most recent run.
    pub fn clear_effect_deps(&mut self, effect: EffectId) -> usize {
        let mut removed = 0;
        while let Some(head) = self.effects.get(effect).and_then(|n| n.head) {
            if self.unlink(head).is_none() {
                break;
            }
            removed += 1;
        }
        if removed > 0 {
            trace!(?effect, removed, "cleared dependencies");
        }
        removed
    }

    /// Drop every subscriber link of `signal`.
    ///
    /// Returns the effects that were linked, in subscription order, so the
    /// caller can still notify them of the change that caused invalidation.
    pub fn invalidate_signal(&mut self, signal: SignalId) -> Vec<EffectId> {
        let mut effects = Vec::new();
        while let Some(head) = self.signals.get(signal).and_then(|n| n.head) {
            match self.unlink(head) {
                Some(link) => effects.push(link.effect),
                None => break,
            }
        }
        if !effects.is_empty() {
            trace!(?signal, unlinked = effects.len(), "invalidated signal");
        }
        effects
    }

    /// Effects subscribed to `signal`, oldest subscriber first.
    pub fn subscribers(&self, signal: SignalId) -> Vec<EffectId> {
        let mut out = Vec::new();
        let mut cursor = self.signals.get(signal).and_then(|n| n.head);
        while let Some(id) = cursor {
            let Some(link) = self.links.get(id) else { break };
            out.push(link.effect);
            cursor = link.sig_next;
        }
        out
    }

    /// Signals `effect` depends on, in the order they were first read.
    pub fn dependencies(&self, effect: EffectId) -> Vec<SignalId> {
        let mut out = Vec::new();
        let mut cursor = self.effects.get(effect).and_then(|n| n.head);
        while let Some(id) = cursor {
            let Some(link) = self.links.get(id) else { break };
            out.push(link.signal);
            cursor = link.eff_next;
        }
        out
    }

    /// Whether a link between `effect` and `signal` exists.
    pub fn has_link(&self, effect: EffectId, signal: SignalId) -> bool {
        self.dependencies(effect).contains(&signal)
    }

    /// Total number of live links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Verify that every link is reachable from exactly one signal list and
    /// one effect list, and that the cached counts match.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut seen_sig = 0;
        for (sid, node) in &self.signals {
            let mut count = 0;
            let mut prev = None;
            let mut cursor = node.head;
            while let Some(id) = cursor {
                let link = self.links[id];
                assert_eq!(link.signal, sid);
                assert_eq!(link.sig_prev, prev);
                prev = Some(id);
                cursor = link.sig_next;
                count += 1;
            }
            assert_eq!(node.tail, prev);
            assert_eq!(node.subscriber_count, count);
            seen_sig += count;
        }

        let mut seen_eff = 0;
        for (eid, node) in &self.effects {
            let mut count = 0;
            let mut prev = None;
            let mut cursor = node.head;
            while let Some(id) = cursor {
                let link = self.links[id];
                assert_eq!(link.effect, eid);
                assert_eq!(link.eff_prev, prev);
                prev = Some(id);
                cursor = link.eff_next;
                count += 1;
            }
            assert_eq!(node.tail, prev);
            assert_eq!(node.dependency_count, count);
            seen_eff += count;
        }

        assert_eq!(seen_sig, self.links.len());
        assert_eq!(seen_eff, self.links.len());
    }
}

impl<P> Default for Graph<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Graph<()> {
        Graph::new()
    }

    #[test]
    fn links_append_to_both_tails() {
        let mut g = graph();
        let a = g.add_signal();
        let b = g.add_signal();
        let e1 = g.add_effect(NodeKind::Subscriber, ());
        let e2 = g.add_effect(NodeKind::Subscriber, ());

        g.create_link(e1, a);
        g.create_link(e1, b);
        g.create_link(e2, a);

        assert_eq!(g.subscribers(a), vec![e1, e2]);
        assert_eq!(g.dependencies(e1), vec![a, b]);
        assert_eq!(g.link_count(), 3);
        g.assert_consistent();
    }

    #[test]
    fn clear_effect_deps_unlinks_from_every_signal() {
        let mut g = graph();
        let a = g.add_signal();
        let b = g.add_signal();
        let e1 = g.add_effect(NodeKind::Subscriber, ());
        let e2 = g.add_effect(NodeKind::Subscriber, ());

        g.create_link(e2, a);
        g.create_link(e1, a);
        g.create_link(e1, b);
        g.create_link(e2, b);

        assert_eq!(g.clear_effect_deps(e1), 2);
        assert!(g.dependencies(e1).is_empty());
        assert_eq!(g.subscribers(a), vec![e2]);
        assert_eq!(g.subscribers(b), vec![e2]);
        g.assert_consistent();
    }

    #[test]
    fn invalidate_signal_reports_subscribers_in_order() {
        let mut g = graph();
        let a = g.add_signal();
        let b = g.add_signal();
        let e1 = g.add_effect(NodeKind::Watcher, ());
        let e2 = g.add_effect(NodeKind::Subscriber, ());

        g.create_link(e1, b);
        g.create_link(e1, a);
        g.create_link(e2, a);

        assert_eq!(g.invalidate_signal(a), vec![e1, e2]);
        assert!(g.subscribers(a).is_empty());
        assert_eq!(g.dependencies(e1), vec![b]);
        assert!(g.dependencies(e2).is_empty());
        g.assert_consistent();
    }

    #[test]
    fn unlinking_from_the_middle_keeps_neighbours_connected() {
        let mut g = graph();
        let a = g.add_signal();
        let effects: Vec<_> = (0..4)
            .map(|_| g.add_effect(NodeKind::Subscriber, ()))
            .collect();
        for &e in &effects {
            g.create_link(e, a);
        }

        g.remove_effect(effects[1]);
        g.remove_effect(effects[3]);

        assert_eq!(g.subscribers(a), vec![effects[0], effects[2]]);
        g.assert_consistent();
    }

    #[test]
    fn removing_nodes_leaves_no_links_behind() {
        let mut g = graph();
        let a = g.add_signal();
        let b = g.add_signal();
        let e = g.add_effect(NodeKind::Computed, ());
        g.create_link(e, a);
        g.create_link(e, b);

        assert_eq!(g.remove_signal(a), vec![e]);
        assert_eq!(g.link_count(), 1);
        assert_eq!(g.remove_effect(e), Some(()));
        assert_eq!(g.link_count(), 0);
        assert_eq!(g.signal(b).map(|n| n.subscriber_count()), Some(0));
        g.assert_consistent();
    }

    #[test]
    fn link_to_missing_endpoint_is_refused() {
        let mut g = graph();
        let a = g.add_signal();
        let e = g.add_effect(NodeKind::Subscriber, ());
        g.remove_signal(a);
        assert!(g.create_link(e, a).is_none());
        assert_eq!(g.link_count(), 0);
    }

    #[test]
    fn versions_are_monotonic() {
        let mut g = graph();
        let a = g.add_signal();
        assert_eq!(g.bump_version(a), Some(1));
        assert_eq!(g.bump_version(a), Some(2));
        assert_eq!(g.signal(a).map(SignalNode::version), Some(2));
    }
}
