//! Functions and loop shapes.
//!
//! A [`Function`] is the static skeleton of one function body: blocks in topological
//! order, the loop forest over them, and the stack objects the function's frame owns.
//! Loop identities follow the canonical vocabulary of natural-loop analysis: every loop
//! has a header (its single entry), a preheader (the single non-loop predecessor of the
//! header), and a latch (the source of the back edge).

use std::fmt;

use crate::{program::{Block, BlockId, Instruction, ObjectId}, Result};

/// Identifier for a function in the program's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u32);

impl FunctionId {
    /// Creates a function identifier from a raw table index.
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

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Identifier for a loop within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);

impl LoopId {
    /// Creates a loop identifier from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shape of one natural loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopInfo {
    /// Single entry block of the loop.
    pub header: BlockId,
    /// Single non-loop predecessor of the header.
    pub preheader: BlockId,
    /// Source block of the back edge to the header.
    pub latch: BlockId,
    /// The immediately enclosing loop, if this loop is nested.
    pub parent: Option<LoopId>,
}

/// The static skeleton of one function body.
#[derive(Debug, Clone, Default)]
pub struct Function {
    /// Diagnostic name.
    pub name: String,
    /// Blocks in a topological order consistent with dominance. Block 0 is the entry.
    pub blocks: Vec<Block>,
    /// Loop forest over the blocks.
    pub loops: Vec<LoopInfo>,
    /// Whether the function allocates a stack frame.
    pub allocates_frame: bool,
    /// Stack objects owned by the function's frame, discarded when the frame pops.
    pub frame_objects: Vec<ObjectId>,
}

impl Function {
    /// The entry block of every function.
    #[must_use]
    pub const fn entry() -> BlockId {
        BlockId::new(0)
    }

    /// Returns a block by id.
    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks.get(id.index()).ok_or(crate::Error::InvalidIndex {
            kind: "block",
            index: id.index(),
        })
    }

    /// Returns a loop shape by id.
    pub fn loop_info(&self, id: LoopId) -> Result<&LoopInfo> {
        self.loops.get(id.index()).ok_or(crate::Error::InvalidIndex {
            kind: "loop",
            index: id.index(),
        })
    }

    /// Returns an instruction by block and index, if present.
    #[must_use]
    pub fn instruction(&self, block: BlockId, inst: usize) -> Option<&Instruction> {
        self.blocks.get(block.index())?.insts.get(inst)
    }

    /// Returns `true` if `scope` lies within loop `target` (inclusively).
    ///
    /// `scope` is an innermost-loop annotation as found on a block; the test walks the
    /// parent chain outward.
    #[must_use]
    pub fn loop_contains(&self, target: LoopId, scope: Option<LoopId>) -> bool {
        let mut cursor = scope;
        while let Some(id) = cursor {
            if id == target {
                return true;
            }
            cursor = self
                .loops
                .get(id.index())
                .and_then(|info| info.parent);
        }
        false
    }

    /// Returns the immediate child loop of `outer` that contains `inner`, if `inner`
    /// lies strictly within a sub-loop of `outer`.
    ///
    /// Used when a merge input crosses a loop-exit seam: the predecessor's innermost
    /// scope is walked outward to the loop directly nested in the merging block's scope.
    #[must_use]
    pub fn immediate_subloop(&self, outer: Option<LoopId>, inner: Option<LoopId>) -> Option<LoopId> {
        let mut cursor = inner?;
        if Some(cursor) == outer {
            return None;
        }
        loop {
            let parent = self.loops.get(cursor.index())?.parent;
            if parent == outer {
                return Some(cursor);
            }
            cursor = parent?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_loops() -> Function {
        // loop 0 is outermost, loop 1 nested in 0, loop 2 nested in 1
        Function {
            loops: vec![
                LoopInfo {
                    header: BlockId::new(1),
                    preheader: BlockId::new(0),
                    latch: BlockId::new(5),
                    parent: None,
                },
                LoopInfo {
                    header: BlockId::new(2),
                    preheader: BlockId::new(1),
                    latch: BlockId::new(4),
                    parent: Some(LoopId::new(0)),
                },
                LoopInfo {
                    header: BlockId::new(3),
                    preheader: BlockId::new(2),
                    latch: BlockId::new(3),
                    parent: Some(LoopId::new(1)),
                },
            ],
            ..Function::default()
        }
    }

    #[test]
    fn test_loop_contains_chain() {
        let func = nested_loops();
        let outer = LoopId::new(0);
        let inner = LoopId::new(2);
        assert!(func.loop_contains(outer, Some(inner)));
        assert!(func.loop_contains(inner, Some(inner)));
        assert!(!func.loop_contains(inner, Some(outer)));
        assert!(!func.loop_contains(outer, None));
    }

    #[test]
    fn test_immediate_subloop() {
        let func = nested_loops();
        // From top level, the immediate subloop containing loop 2 is loop 0.
        assert_eq!(func.immediate_subloop(None, Some(LoopId::new(2))), Some(LoopId::new(0)));
        // From loop 0, it is loop 1.
        assert_eq!(
            func.immediate_subloop(Some(LoopId::new(0)), Some(LoopId::new(2))),
            Some(LoopId::new(1))
        );
        // Same scope means no crossing.
        assert_eq!(func.immediate_subloop(Some(LoopId::new(1)), Some(LoopId::new(1))), None);
        assert_eq!(func.immediate_subloop(None, None), None);
    }
}
