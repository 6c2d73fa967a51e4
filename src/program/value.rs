//! Value-tracking oracle facts.
//!
//! The analysis never computes alias or constancy information itself; it consumes the
//! verdicts of an external value-tracking collaborator. This module models those facts:
//! where a pointer operand may point ([`PointerValue`]), whether a copy/fill length is
//! statically known ([`LenValue`]), and which byte sub-ranges of a read's result were
//! actually consumed by specialization ([`ObservedValues`]).

use crate::program::ObjectId;

/// A single resolved pointer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerTarget {
    /// The null pointer. Reads through it trap rather than race, so they are exempt
    /// from checking.
    Null,
    /// A byte offset into a memory object.
    Object {
        /// The object pointed into.
        object: ObjectId,
        /// Byte offset of the pointee from the object's start.
        offset: u64,
    },
}

/// Resolution of a pointer-typed operand, as reported by the value-tracking oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerValue {
    /// The oracle could not resolve the pointer at all.
    ///
    /// An unresolved pointer means specialization never used the pointed-to value, so
    /// the read is classified [`Verdict::NeverCheck`](crate::analysis::Verdict) rather
    /// than conservatively checked.
    Unresolved,
    /// The pointer resolves to one of the listed targets.
    ///
    /// With more than one target, read classification takes the worst verdict over all
    /// of them.
    Resolved(Vec<PointerTarget>),
}

impl PointerValue {
    /// Shorthand for a uniquely resolved object pointer.
    #[must_use]
    pub fn object(object: ObjectId, offset: u64) -> Self {
        Self::Resolved(vec![PointerTarget::Object { object, offset }])
    }

    /// Shorthand for a uniquely resolved null pointer.
    #[must_use]
    pub fn null() -> Self {
        Self::Resolved(vec![PointerTarget::Null])
    }

    /// Returns the unique target, if the pointer resolves to exactly one.
    #[must_use]
    pub fn unique(&self) -> Option<&PointerTarget> {
        match self {
            Self::Resolved(targets) if targets.len() == 1 => targets.first(),
            _ => None,
        }
    }

    /// Returns all resolved targets, or `None` when unresolved.
    #[must_use]
    pub fn targets(&self) -> Option<&[PointerTarget]> {
        match self {
            Self::Unresolved => None,
            Self::Resolved(targets) => Some(targets),
        }
    }
}

/// A length operand for copy/fill style operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenValue {
    /// Length not statically known; the operation contributes no freshness facts.
    Unknown,
    /// Length known at specialization time.
    Const(u64),
}

/// Which byte sub-ranges of a read's result the specializer actually consumed.
///
/// Ranges are relative to the start of the read. Only consumed ("interesting") ranges
/// need a runtime re-validation check; a read whose result was never used cannot
/// invalidate specialization and is never checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedValues {
    /// The result was never resolved to anything specialization used.
    WhollyUnknown,
    /// The whole extent of the read was consumed.
    Whole,
    /// Only the listed `[start, stop)` sub-ranges were consumed.
    Ranges(Vec<(u64, u64)>),
}

impl ObservedValues {
    /// Returns `true` if the result was never consumed by specialization.
    #[must_use]
    pub fn is_wholly_unknown(&self) -> bool {
        matches!(self, Self::WhollyUnknown)
    }

    /// Returns the consumed sub-ranges for a read of `size` bytes.
    #[must_use]
    pub fn interesting_ranges(&self, size: u64) -> Vec<(u64, u64)> {
        match self {
            Self::WhollyUnknown => Vec::new(),
            Self::Whole => vec![(0, size)],
            Self::Ranges(ranges) => ranges.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_resolution() {
        let obj = ObjectId::new(0);
        assert!(PointerValue::object(obj, 4).unique().is_some());
        assert!(PointerValue::null().unique().is_some());
        assert!(PointerValue::Unresolved.unique().is_none());

        let multi = PointerValue::Resolved(vec![
            PointerTarget::Object { object: obj, offset: 0 },
            PointerTarget::Null,
        ]);
        assert!(multi.unique().is_none());
        assert_eq!(multi.targets().map(|t| t.len()), Some(2));
    }

    #[test]
    fn test_interesting_ranges() {
        assert!(ObservedValues::WhollyUnknown.interesting_ranges(8).is_empty());
        assert_eq!(ObservedValues::Whole.interesting_ranges(8), vec![(0, 8)]);
        let partial = ObservedValues::Ranges(vec![(0, 2), (6, 8)]);
        assert_eq!(partial.interesting_ranges(8), vec![(0, 2), (6, 8)]);
    }
}
