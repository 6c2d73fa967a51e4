//! Abstract memory objects.
//!
//! A [`MemoryObject`] is a stable identity for anything the analyzed program can read or
//! write: a stack slot, a heap allocation, or a static object. Identity is stable for the
//! object's lifetime; stack-slot identities are scoped to a call activation through the
//! freshness store's frame list.

use std::fmt;

/// Identifier for a [`MemoryObject`] in the program's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Creates an object identifier from a raw table index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

/// Storage class of a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A stack slot, scoped to one call activation.
    Stack,
    /// A heap allocation returned by an allocation-style call.
    Heap,
    /// A static object.
    ///
    /// Reads from a provably-constant global are exempt from checking: no thread can
    /// legitimately mutate it.
    Global {
        /// Whether the object is provably constant for the program's lifetime.
        constant: bool,
    },
}

/// An abstract identity for a readable/writable region of memory.
///
/// Objects are collaborator inputs: the value-tracking oracle resolves pointers to
/// `(ObjectId, offset)` pairs, and the analysis tracks freshness per object in byte
/// ranges `[0, size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    /// Storage class of the object.
    pub kind: ObjectKind,
    /// Extent of the object in bytes.
    pub size: u64,
    /// Optional diagnostic name (e.g. the source-level symbol).
    pub name: Option<String>,
}

impl MemoryObject {
    /// Creates a stack-slot object of the given byte size.
    #[must_use]
    pub fn stack(size: u64) -> Self {
        Self {
            kind: ObjectKind::Stack,
            size,
            name: None,
        }
    }

    /// Creates a heap object of the given byte size.
    #[must_use]
    pub fn heap(size: u64) -> Self {
        Self {
            kind: ObjectKind::Heap,
            size,
            name: None,
        }
    }

    /// Creates a static object of the given byte size.
    #[must_use]
    pub fn global(size: u64, constant: bool) -> Self {
        Self {
            kind: ObjectKind::Global { constant },
            size,
            name: None,
        }
    }

    /// Attaches a diagnostic name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns `true` if this is a provably-constant static object.
    #[must_use]
    pub fn is_constant_global(&self) -> bool {
        matches!(self.kind, ObjectKind::Global { constant: true })
    }

    /// Returns `true` if this is a stack slot.
    #[must_use]
    pub fn is_stack(&self) -> bool {
        matches!(self.kind, ObjectKind::Stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let id = ObjectId::new(7);
        assert_eq!(id.index(), 7);
        assert_eq!(id.to_string(), "obj7");
    }

    #[test]
    fn test_constant_global_detection() {
        assert!(MemoryObject::global(8, true).is_constant_global());
        assert!(!MemoryObject::global(8, false).is_constant_global());
        assert!(!MemoryObject::heap(8).is_constant_global());
        assert!(MemoryObject::stack(4).is_stack());
    }

    #[test]
    fn test_named_object() {
        let obj = MemoryObject::global(16, false).named("errno");
        assert_eq!(obj.name.as_deref(), Some("errno"));
        assert_eq!(obj.size, 16);
    }
}
