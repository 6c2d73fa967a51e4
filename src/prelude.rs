//! # specguard Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the specguard library. Import this module to get quick access to the essential
//! types for building the program model and running the analysis.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all specguard operations
pub use crate::Error;

/// The result type used throughout specguard
pub use crate::Result;

// ================================================================================================
// Program Model
// ================================================================================================

/// Builders for the analysis input
pub use crate::program::{FunctionBuilder, ProgramBuilder};

/// The sealed analysis input
pub use crate::program::Program;

/// Memory objects and their identities
pub use crate::program::{MemoryObject, ObjectId, ObjectKind};

/// Instructions and their classification surface
pub use crate::program::{
    AccessFlags, CallSite, Callee, CheckKind, InstKind, InstLoc, Instruction,
};

/// Control-flow and loop shape
pub use crate::program::{Block, BlockId, Function, FunctionId, LoopId, LoopInfo};

/// The activation tree recording inlining and peeling decisions
pub use crate::program::{Activation, ActivationId, ActivationKind, ActivationTree, PeelGroup};

/// Value-tracking oracle facts
pub use crate::program::{LenValue, ObservedValues, PointerTarget, PointerValue};

/// Special-function classification and lock refinements
pub use crate::program::{SpecialBehavior, SpecialFunctions};

/// Externally supplied freshness assertions
pub use crate::program::{PathCondition, PathConditions, PathFunction};

// ================================================================================================
// Analysis
// ================================================================================================

/// The analysis entry point and its configuration
pub use crate::analysis::{AnalysisConfig, TentativeLoadAnalysis};

/// Query interface for the committing stage
pub use crate::analysis::{
    ActivationStats, DisabledCallEffect, OpRef, TentativeLoadResults, Verdict,
};

/// Freshness state primitives
pub use crate::analysis::{FreshnessStore, RangeSet, StoreArena, StoreId, StoreMerger};
