//! Program model consumed from the specialization engine.
//!
//! This module defines the structural facts the analysis takes as input. None of it is
//! computed here: block and loop shape come from the engine's control-flow analysis,
//! pointer targets and observed values come from its value-tracking oracle, and the
//! activation tree records its inlining and peeling decisions. The analysis in
//! [`crate::analysis`] walks this model and annotates it with check verdicts.
//!
//! # Architecture
//!
//! The model splits into three layers:
//!
//! - **Static shape**: [`Function`], [`Block`], [`LoopInfo`], [`Instruction`] - one copy
//!   per function, shared by every activation of it.
//! - **Dynamic shape**: [`ActivationTree`] - one [`Activation`] per dynamic instance
//!   (root call, inlined call, peeled iteration), each with its own block/edge liveness.
//! - **Oracle facts**: [`PointerValue`], [`ObservedValues`], [`SpecialFunctions`],
//!   [`PathConditions`] - the external collaborators' verdicts, never recomputed here.
//!
//! # Example
//!
//! ```rust
//! use specguard::program::{
//!     FunctionBuilder, InstKind, Instruction, MemoryObject, PointerValue, ProgramBuilder,
//! };
//!
//! let mut program = ProgramBuilder::new();
//! let obj = program.object(MemoryObject::heap(16));
//!
//! let mut func = FunctionBuilder::new("entry");
//! let bb0 = func.block();
//! func.push(
//!     bb0,
//!     Instruction::new(InstKind::Store { ptr: PointerValue::object(obj, 0), size: 4 }),
//! );
//! func.returns(bb0);
//!
//! let main = program.function(func.finish());
//! program.root(main)?;
//! let _program = program.finish()?;
//! # Ok::<(), specguard::Error>(())
//! ```

mod activation;
mod block;
mod builder;
mod conditions;
mod function;
mod inst;
mod object;
mod special;
mod value;

pub use activation::{Activation, ActivationId, ActivationKind, ActivationTree, PeelGroup};
pub use block::{Block, BlockId};
pub use builder::{FunctionBuilder, ProgramBuilder};
pub use conditions::{PathCondition, PathConditions, PathFunction};
pub use function::{Function, FunctionId, LoopId, LoopInfo};
pub use inst::{AccessFlags, CallSite, Callee, CheckKind, InstKind, InstLoc, Instruction};
pub use object::{MemoryObject, ObjectId, ObjectKind};
pub use special::{SpecialBehavior, SpecialFunctions};
pub use value::{LenValue, ObservedValues, PointerTarget, PointerValue};

use crate::Result;

/// The complete analysis input: static shape, dynamic shape, and oracle facts.
///
/// Built once through [`ProgramBuilder`] and then treated as immutable by the analysis.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) objects: Vec<MemoryObject>,
    pub(crate) functions: Vec<Function>,
    pub(crate) special: SpecialFunctions,
    pub(crate) conditions: PathConditions,
    pub(crate) activations: ActivationTree,
}

impl Program {
    /// Returns a memory object by id.
    pub fn object(&self, id: ObjectId) -> Result<&MemoryObject> {
        self.objects.get(id.index()).ok_or(crate::Error::InvalidIndex {
            kind: "object",
            index: id.index(),
        })
    }

    /// Returns a function by id.
    pub fn function(&self, id: FunctionId) -> Result<&Function> {
        self.functions.get(id.index()).ok_or(crate::Error::InvalidIndex {
            kind: "function",
            index: id.index(),
        })
    }

    /// The special-function classification table.
    #[must_use]
    pub fn special(&self) -> &SpecialFunctions {
        &self.special
    }

    /// The externally supplied path conditions.
    #[must_use]
    pub fn conditions(&self) -> &PathConditions {
        &self.conditions
    }

    /// The activation tree.
    #[must_use]
    pub fn activations(&self) -> &ActivationTree {
        &self.activations
    }

    /// Returns the instruction at `(activation, block, index)`, if present.
    #[must_use]
    pub fn instruction_at(
        &self,
        activation: ActivationId,
        block: BlockId,
        inst: usize,
    ) -> Option<&Instruction> {
        let act = self.activations.get(activation).ok()?;
        let func = self.functions.get(act.function.index())?;
        func.instruction(block, inst)
    }
}
