//! Externally supplied path conditions.
//!
//! A path condition asserts that some byte range of some object holds known-good content
//! when a particular block is reached at a particular call depth; the user (or a
//! derivation upstream) is responsible for checking its applicability, so the analysis
//! treats it as pre-validated and injects it through the ordinary freshness-marking
//! primitive. A path function is the stronger form: a fully modeled callee subtree that
//! is walked like committed code and merged back in at its anchor point.

use crate::program::{ActivationId, BlockId, PointerValue};

/// An asserted-known byte range of an object at a specific program point.
#[derive(Debug, Clone)]
pub struct PathCondition {
    /// Call depth the assertion applies at.
    pub stack_depth: u32,
    /// Block whose entry the assertion holds at.
    pub block: BlockId,
    /// The asserted object, as a resolved pointer.
    pub target: PointerValue,
    /// Byte offset of the asserted range from the pointer's target.
    pub offset: u64,
    /// Length of the asserted range in bytes.
    pub len: u64,
}

/// A fully modeled callee subtree anchored to a specific program point.
#[derive(Debug, Clone)]
pub struct PathFunction {
    /// Call depth the model applies at.
    pub stack_depth: u32,
    /// Block whose entry the modeled callee is walked at.
    pub block: BlockId,
    /// The activation subtree describing the modeled callee.
    pub activation: ActivationId,
}

/// All externally supplied freshness assertions for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct PathConditions {
    /// Byte-range assertions.
    pub conditions: Vec<PathCondition>,
    /// Modeled callee subtrees.
    pub functions: Vec<PathFunction>,
}

impl PathConditions {
    /// Creates an empty set of assertions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no assertions were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.functions.is_empty()
    }
}
