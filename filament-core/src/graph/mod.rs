//! Dependency Graph
//!
//! This module implements the signal/effect dependency graph and the
//! scheduler that coalesces deferred notifications.
//!
//! # Overview
//!
//! The graph is bipartite:
//!
//! - Signal nodes own a list of subscriber links
//! - Effect nodes own a list of dependency links
//! - Each [`DepLink`] is a member of exactly one list of each kind
//!
//! When a signal changes, the runtime walks its subscriber list (oldest
//! subscriber first) and notifies every linked effect.
//!
//! # Design Decisions
//!
//! 1. Nodes and links live in generational arenas and reference each other
//!    by key. There are no `Rc` cycles between signals, effects and links.
//!
//! 2. Every operation on a single link is O(1): links store their
//!    neighbours in both lists, and both owners keep head and tail keys.
//!
//! 3. The graph knows nothing about values or callbacks. The runtime attaches
//!    a payload to each effect node (a weak handle to the effect object).

mod link;
mod node;
mod scheduler;

pub use link::{DepLink, Graph, LinkId};
pub use node::{EffectId, EffectNode, NodeKind, SignalId, SignalNode};
pub use scheduler::{batch, flush, has_pending, is_batching, is_flushing, queue_microtask, Job};
