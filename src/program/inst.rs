//! Instruction model.
//!
//! Instructions carry exactly the facts the analysis consumes: the memory-touching shape
//! of the operation ([`InstKind`]), the value-tracking oracle's verdict on the result
//! ([`ObservedValues`](crate::program::ObservedValues)), and per-instruction policy
//! annotations supplied by the surrounding specialization engine.

use bitflags::bitflags;

use crate::program::{BlockId, FunctionId, LenValue, ObjectId, ObservedValues, PointerValue};

bitflags! {
    /// Policy flags for a memory access, supplied by the specialization engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccessFlags: u8 {
        /// The access is volatile.
        const VOLATILE = 0x01;
        /// A volatile access proven "simple" by the engine; it is not a yield point.
        const PROVEN_SIMPLE = 0x02;
    }
}

/// Independent check reasons attached to an instruction by the committing stage's
/// collaborators (e.g. a check that validates a path condition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckKind {
    /// No independent check reason.
    #[default]
    None,
    /// The instruction's result is checked against its expected value at runtime.
    AsExpected,
    /// A special check precedes the instruction (path-condition validation and the like).
    Special,
}

/// Who a call instruction calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    /// Unresolved indirect call. In a multithreaded program this is a yield point.
    Unknown,
    /// A known function, possibly classified by the special-function table.
    Function(FunctionId),
}

/// Operand facts for a call site.
///
/// Only the operands the classifier can act on are modeled: a pointer argument (the old
/// memory of a reallocation, or the destination buffer of a buffered read), a length
/// argument, and the abstract object an allocation-style call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// The call target.
    pub callee: Callee,
    /// Pointer operand, where the callee's behavior gives it meaning.
    pub ptr_arg: Option<PointerValue>,
    /// Length operand, where the callee's behavior gives it meaning.
    pub len_arg: LenValue,
    /// The abstract heap object an allocation or reallocation returns.
    pub new_object: Option<ObjectId>,
}

impl CallSite {
    /// Creates a call site with no modeled operands.
    #[must_use]
    pub fn to_function(callee: FunctionId) -> Self {
        Self {
            callee: Callee::Function(callee),
            ptr_arg: None,
            len_arg: LenValue::Unknown,
            new_object: None,
        }
    }

    /// Creates an unresolved indirect call site.
    #[must_use]
    pub fn indirect() -> Self {
        Self {
            callee: Callee::Unknown,
            ptr_arg: None,
            len_arg: LenValue::Unknown,
            new_object: None,
        }
    }
}

/// The memory-touching shape of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Allocation of a stack slot in the current frame. Its full extent becomes fresh.
    StackAlloc {
        /// The stack object being allocated.
        object: ObjectId,
    },
    /// A load of `size` bytes through `ptr`.
    Load {
        /// Resolved pointer operand.
        ptr: PointerValue,
        /// Bytes read.
        size: u64,
        /// Volatility policy flags.
        flags: AccessFlags,
    },
    /// A store of `size` bytes through `ptr`. A definite write supersedes prior
    /// uncertainty about the written bytes.
    Store {
        /// Resolved pointer operand.
        ptr: PointerValue,
        /// Bytes written.
        size: u64,
    },
    /// A `memcpy`/`memmove`-like block copy.
    MemCopy {
        /// Destination pointer.
        dst: PointerValue,
        /// Source pointer.
        src: PointerValue,
        /// Copy length.
        len: LenValue,
    },
    /// A `memset`-like block fill.
    MemFill {
        /// Destination pointer.
        dst: PointerValue,
        /// Fill length.
        len: LenValue,
    },
    /// A call instruction.
    Call(CallSite),
    /// A phi node. Only relevant to check derivation for disabled peeled loops.
    Phi,
    /// Any instruction that does not touch memory.
    Other,
}

/// One instruction of the program model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Memory-touching shape.
    pub kind: InstKind,
    /// Value-tracking verdict on the instruction's result, `None` if the instruction
    /// was never analyzed (e.g. a member of a disabled loop).
    pub observed: Option<ObservedValues>,
    /// Independent check reason, if any.
    pub check: CheckKind,
    /// Pre-seeded verdict from the main specialization phase: the access is provably
    /// thread-local and never needs re-classification.
    pub never_check: bool,
    /// Whether the instruction produces a value. Operations whose result type carries
    /// no value never require a runtime check.
    pub has_result: bool,
}

impl Instruction {
    /// Creates an instruction with kind-appropriate defaults.
    ///
    /// Loads and copies default to a fully-observed result; every other kind defaults
    /// to no observed value. Result presence follows the kind (loads, allocations,
    /// calls, copies and phis produce values; stores and fills do not).
    #[must_use]
    pub fn new(kind: InstKind) -> Self {
        let observed = match kind {
            InstKind::Load { .. } | InstKind::MemCopy { .. } => Some(ObservedValues::Whole),
            _ => None,
        };
        let has_result = !matches!(kind, InstKind::Store { .. } | InstKind::MemFill { .. });
        Self {
            kind,
            observed,
            check: CheckKind::None,
            never_check: false,
            has_result,
        }
    }

    /// Overrides the observed-result fact.
    #[must_use]
    pub fn observed(mut self, observed: ObservedValues) -> Self {
        self.observed = Some(observed);
        self
    }

    /// Marks the instruction as never analyzed by value tracking.
    #[must_use]
    pub fn unanalyzed(mut self) -> Self {
        self.observed = None;
        self
    }

    /// Attaches an independent check reason.
    #[must_use]
    pub fn check(mut self, check: CheckKind) -> Self {
        self.check = check;
        self
    }

    /// Pre-seeds the thread-local verdict from the main phase.
    #[must_use]
    pub fn never_check(mut self) -> Self {
        self.never_check = true;
        self
    }

    /// Overrides whether the instruction produces a value.
    #[must_use]
    pub fn has_result(mut self, has_result: bool) -> Self {
        self.has_result = has_result;
        self
    }
}

/// A static instruction location: function, block, and index within the block.
///
/// Used to key per-call-site facts (lock domains, pessimistic locks) that are shared by
/// every activation of the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstLoc {
    /// The containing function.
    pub function: FunctionId,
    /// The containing block.
    pub block: BlockId,
    /// Index of the instruction within the block.
    pub inst: usize,
}

impl InstLoc {
    /// Creates an instruction location.
    #[must_use]
    pub const fn new(function: FunctionId, block: BlockId, inst: usize) -> Self {
        Self {
            function,
            block,
            inst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_defaults() {
        let load = Instruction::new(InstKind::Load {
            ptr: PointerValue::Unresolved,
            size: 4,
            flags: AccessFlags::empty(),
        });
        assert_eq!(load.observed, Some(ObservedValues::Whole));
        assert!(load.has_result);

        let store = Instruction::new(InstKind::Store {
            ptr: PointerValue::Unresolved,
            size: 4,
        });
        assert_eq!(store.observed, None);
        assert!(!store.has_result);
    }

    #[test]
    fn test_volatile_flags() {
        let flags = AccessFlags::VOLATILE | AccessFlags::PROVEN_SIMPLE;
        assert!(flags.contains(AccessFlags::VOLATILE));
        assert!(flags.contains(AccessFlags::PROVEN_SIMPLE));
        assert!(!AccessFlags::VOLATILE.contains(AccessFlags::PROVEN_SIMPLE));
    }

    #[test]
    fn test_builder_style_overrides() {
        let inst = Instruction::new(InstKind::Phi)
            .observed(ObservedValues::WhollyUnknown)
            .check(CheckKind::Special);
        assert!(inst.observed.as_ref().is_some_and(ObservedValues::is_wholly_unknown));
        assert_eq!(inst.check, CheckKind::Special);
        assert!(!inst.never_check);
    }
}
