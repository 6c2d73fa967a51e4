//! Activation tree.
//!
//! One [`Activation`] is a dynamic instance of a function body during analysis: the root
//! call, an inlined call, or one peeled iteration of a loop. The specialization engine
//! decides this shape before the analysis runs (which calls were inlined, which loops
//! were peeled and how far, which blocks and edges are dead in each instance); the tree
//! records those decisions as an arena of records addressed by index.
//!
//! A *disabled* activation is a region the engine left unspecialized. Its code is
//! committed verbatim, so nothing it does can be trusted to justify skipping a check on
//! a later read.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::{
    program::{BlockId, FunctionId, LoopId},
    Result,
};

/// Identifier for an [`Activation`] in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationId(u32);

impl ActivationId {
    /// Creates an activation identifier from a raw arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "act{}", self.0)
    }
}

/// What kind of dynamic instance an activation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// The root call the analysis starts from.
    Root,
    /// An inlined call at the given call site of the parent's function.
    InlinedCall {
        /// `(block, instruction index)` of the call in the parent activation.
        site: (BlockId, usize),
    },
    /// One statically-unrolled iteration of a peeled loop.
    PeelIteration {
        /// The peeled loop.
        loop_id: LoopId,
        /// Iteration number, starting at 0.
        index: u32,
    },
}

/// The peeled iterations of one loop.
#[derive(Debug, Clone)]
pub struct PeelGroup {
    /// One activation per unrolled iteration, in execution order.
    pub iterations: Vec<ActivationId>,
    /// Whether the peeled form is committed. A disabled group is a disabled region.
    pub enabled: bool,
    /// Whether the peel covers every iteration the loop can execute. A non-terminated
    /// peel is analyzed as a residual loop instead.
    pub terminated: bool,
}

/// One dynamic instance of a function body.
#[derive(Debug, Clone)]
pub struct Activation {
    /// The function whose body this activation instantiates.
    pub function: FunctionId,
    /// What kind of instance this is.
    pub kind: ActivationKind,
    /// Whether the instance is committed in specialized form. `false` marks a
    /// disabled region.
    pub enabled: bool,
    /// Call depth used to match externally supplied path conditions.
    pub stack_depth: u32,
    /// Inlined-call children, keyed by `(block, instruction index)` of the call site.
    pub inline_children: HashMap<(BlockId, usize), ActivationId>,
    /// Peeled-loop children.
    pub peel_children: HashMap<LoopId, PeelGroup>,
    /// Blocks proven unreachable in this instance.
    pub dead_blocks: HashSet<BlockId>,
    /// Edges proven untaken in this instance.
    pub dead_edges: HashSet<(BlockId, BlockId)>,
}

impl Activation {
    /// Creates an enabled activation with no children.
    #[must_use]
    pub fn new(function: FunctionId, kind: ActivationKind) -> Self {
        Self {
            function,
            kind,
            enabled: true,
            stack_depth: 0,
            inline_children: HashMap::new(),
            peel_children: HashMap::new(),
            dead_blocks: HashSet::new(),
            dead_edges: HashSet::new(),
        }
    }

    /// The loop this activation's walk is scoped to: the peeled loop for an iteration,
    /// nothing for calls.
    #[must_use]
    pub fn own_scope(&self) -> Option<LoopId> {
        match self.kind {
            ActivationKind::PeelIteration { loop_id, .. } => Some(loop_id),
            _ => None,
        }
    }

    /// Returns `true` for the analysis root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self.kind, ActivationKind::Root)
    }

    /// Returns `true` if the edge `from -> to` is alive in this instance.
    #[must_use]
    pub fn edge_alive(&self, from: BlockId, to: BlockId) -> bool {
        !self.dead_edges.contains(&(from, to))
            && !self.dead_blocks.contains(&from)
            && !self.dead_blocks.contains(&to)
    }
}

/// Arena of activation records forming the analysis-time call/loop tree.
#[derive(Debug, Clone, Default)]
pub struct ActivationTree {
    nodes: Vec<Activation>,
}

impl ActivationTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an activation record and returns its id.
    pub fn push(&mut self, activation: Activation) -> ActivationId {
        let id = ActivationId::new(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(activation);
        id
    }

    /// Returns an activation by id.
    pub fn get(&self, id: ActivationId) -> Result<&Activation> {
        self.nodes.get(id.index()).ok_or(crate::Error::InvalidIndex {
            kind: "activation",
            index: id.index(),
        })
    }

    /// Returns a mutable activation by id.
    pub fn get_mut(&mut self, id: ActivationId) -> Result<&mut Activation> {
        self.nodes.get_mut(id.index()).ok_or(crate::Error::InvalidIndex {
            kind: "activation",
            index: id.index(),
        })
    }

    /// The root activation. Index 0 by construction.
    #[must_use]
    pub fn root(&self) -> ActivationId {
        ActivationId::new(0)
    }

    /// Number of activations in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree has no activations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over `(id, activation)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ActivationId, &Activation)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, a)| (ActivationId::new(i as u32), a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_push_and_get() {
        let mut tree = ActivationTree::new();
        let root = tree.push(Activation::new(FunctionId::new(0), ActivationKind::Root));
        assert_eq!(root, tree.root());
        assert!(tree.get(root).unwrap().is_root());
        assert!(tree.get(ActivationId::new(9)).is_err());
    }

    #[test]
    fn test_own_scope() {
        let call = Activation::new(FunctionId::new(0), ActivationKind::Root);
        assert_eq!(call.own_scope(), None);

        let iter = Activation::new(
            FunctionId::new(0),
            ActivationKind::PeelIteration {
                loop_id: LoopId::new(2),
                index: 0,
            },
        );
        assert_eq!(iter.own_scope(), Some(LoopId::new(2)));
    }

    #[test]
    fn test_edge_liveness() {
        let mut act = Activation::new(FunctionId::new(0), ActivationKind::Root);
        let (a, b) = (BlockId::new(0), BlockId::new(1));
        assert!(act.edge_alive(a, b));
        act.dead_edges.insert((a, b));
        assert!(!act.edge_alive(a, b));
        act.dead_edges.clear();
        act.dead_blocks.insert(b);
        assert!(!act.edge_alive(a, b));
    }
}
