//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Nodes never point at each other directly: each one only stores the head
//! and tail of its half of the link lists, as arena keys.

use slotmap::new_key_type;

use super::link::LinkId;

new_key_type! {
    /// Unique identifier for a signal node in the dependency graph.
    pub struct SignalId;

    /// Unique identifier for an effect node in the dependency graph.
    pub struct EffectId;
}

/// The kind of effect registered in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A bounded-count callback subscriber.
    Subscriber,

    /// A watcher diffing old and new values of a source.
    Watcher,

    /// The internal observer of a computed value.
    Computed,
}

impl NodeKind {
    /// Short label used in log output and error reports.
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Subscriber => "subscriber",
            NodeKind::Watcher => "watcher",
            NodeKind::Computed => "computed",
        }
    }
}

/// A signal node: the owner of a subscriber list.
#[derive(Debug, Clone, Default)]
pub struct SignalNode {
    pub(crate) head: Option<LinkId>,
    pub(crate) tail: Option<LinkId>,
    pub(crate) subscriber_count: usize,

    /// Bumped on every committed write.
    pub(crate) version: u64,
}

impl SignalNode {
    /// Number of effects currently linked to this signal.
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    /// Current write version.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// An effect node: the owner of a dependency list.
///
/// `P` is the payload attached by the runtime (a weak handle back to the
/// effect object). The graph itself never inspects it.
#[derive(Debug, Clone)]
pub struct EffectNode<P> {
    pub(crate) head: Option<LinkId>,
    pub(crate) tail: Option<LinkId>,
    pub(crate) dependency_count: usize,
    pub(crate) kind: NodeKind,
    pub(crate) payload: P,
}

impl<P> EffectNode<P> {
    pub(crate) fn new(kind: NodeKind, payload: P) -> Self {
        Self {
            head: None,
            tail: None,
            dependency_count: 0,
            kind,
            payload,
        }
    }

    /// The kind of effect this node represents.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Number of signals this effect currently depends on.
    pub fn dependency_count(&self) -> usize {
        self.dependency_count
    }

    /// The runtime payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }
}
