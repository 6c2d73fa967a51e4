//! Builders for the program model.
//!
//! Collaborators assemble the analysis input through [`ProgramBuilder`] and
//! [`FunctionBuilder`] rather than populating the structs by hand; the builders keep
//! edge lists symmetric, assign arena indices, and validate cross-references when
//! [`ProgramBuilder::finish`] seals the model.

use crate::{
    program::{
        Activation, ActivationId, ActivationKind, ActivationTree, Block, BlockId, Function,
        FunctionId, InstKind, Instruction, LoopId, LoopInfo, MemoryObject, ObjectId,
        PathConditions, PeelGroup, Program, SpecialFunctions,
    },
    Result,
};

/// Incremental construction of one [`Function`].
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    name: String,
    blocks: Vec<Block>,
    loops: Vec<LoopInfo>,
    frame_objects: Vec<ObjectId>,
}

impl FunctionBuilder {
    /// Starts a new function with the given diagnostic name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends an empty block and returns its id. The first block is the entry.
    pub fn block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Adds a control-flow edge, updating both endpoint lists.
    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        if let Some(block) = self.blocks.get_mut(from.index()) {
            block.succs.push(to);
        }
        if let Some(block) = self.blocks.get_mut(to.index()) {
            block.preds.push(from);
        }
    }

    /// Appends an instruction to a block and returns its index within the block.
    pub fn push(&mut self, block: BlockId, inst: Instruction) -> usize {
        match self.blocks.get_mut(block.index()) {
            Some(b) => {
                b.insts.push(inst);
                b.insts.len() - 1
            }
            None => 0,
        }
    }

    /// Declares a natural loop over already-created blocks and returns its id.
    ///
    /// The loop's blocks must form a contiguous run starting at `header`, and each must
    /// have its innermost scope set via [`FunctionBuilder::scope`].
    pub fn add_loop(
        &mut self,
        header: BlockId,
        preheader: BlockId,
        latch: BlockId,
        parent: Option<LoopId>,
    ) -> LoopId {
        let id = LoopId::new(self.loops.len() as u32);
        self.loops.push(LoopInfo {
            header,
            preheader,
            latch,
            parent,
        });
        id
    }

    /// Sets the innermost loop of a block.
    pub fn scope(&mut self, block: BlockId, scope: LoopId) {
        if let Some(b) = self.blocks.get_mut(block.index()) {
            b.scope = Some(scope);
        }
    }

    /// Marks a block as returning from the function.
    pub fn returns(&mut self, block: BlockId) {
        if let Some(b) = self.blocks.get_mut(block.index()) {
            b.is_return = true;
        }
    }

    /// Registers a stack object owned by this function's frame.
    pub fn frame_object(&mut self, object: ObjectId) {
        self.frame_objects.push(object);
    }

    /// Seals the function.
    #[must_use]
    pub fn finish(self) -> Function {
        Function {
            name: self.name,
            allocates_frame: !self.frame_objects.is_empty(),
            blocks: self.blocks,
            loops: self.loops,
            frame_objects: self.frame_objects,
        }
    }
}

/// Incremental construction of a [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    objects: Vec<MemoryObject>,
    functions: Vec<Function>,
    special: SpecialFunctions,
    conditions: PathConditions,
    activations: ActivationTree,
}

impl ProgramBuilder {
    /// Starts an empty program model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a memory object and returns its id.
    pub fn object(&mut self, object: MemoryObject) -> ObjectId {
        let id = ObjectId::new(self.objects.len() as u32);
        self.objects.push(object);
        id
    }

    /// Adds a function and returns its id.
    pub fn function(&mut self, function: Function) -> FunctionId {
        let id = FunctionId::new(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    /// The special-function classification table.
    pub fn special_mut(&mut self) -> &mut SpecialFunctions {
        &mut self.special
    }

    /// The externally supplied path conditions.
    pub fn conditions_mut(&mut self) -> &mut PathConditions {
        &mut self.conditions
    }

    /// Creates the root activation. Must be the first activation created.
    pub fn root(&mut self, function: FunctionId) -> Result<ActivationId> {
        if !self.activations.is_empty() {
            return Err(structural_error!("root activation created twice"));
        }
        Ok(self
            .activations
            .push(Activation::new(function, ActivationKind::Root)))
    }

    /// Records that the call at `(block, inst)` in `parent` was inlined, creating the
    /// callee's activation.
    pub fn inline_call(
        &mut self,
        parent: ActivationId,
        site: (BlockId, usize),
        function: FunctionId,
        enabled: bool,
    ) -> Result<ActivationId> {
        let depth = self.activations.get(parent)?.stack_depth + 1;
        let mut act = Activation::new(function, ActivationKind::InlinedCall { site });
        act.enabled = enabled;
        act.stack_depth = depth;
        let id = self.activations.push(act);
        self.activations
            .get_mut(parent)?
            .inline_children
            .insert(site, id);
        Ok(id)
    }

    /// Records that `loop_id` in `parent` was peeled into `iterations` unrolled copies,
    /// creating one activation per iteration.
    pub fn peel_loop(
        &mut self,
        parent: ActivationId,
        loop_id: LoopId,
        iterations: usize,
        enabled: bool,
    ) -> Result<Vec<ActivationId>> {
        let (function, depth) = {
            let p = self.activations.get(parent)?;
            (p.function, p.stack_depth)
        };
        let mut ids = Vec::with_capacity(iterations);
        for index in 0..iterations {
            let mut act = Activation::new(
                function,
                ActivationKind::PeelIteration {
                    loop_id,
                    index: index as u32,
                },
            );
            act.enabled = enabled;
            act.stack_depth = depth;
            ids.push(self.activations.push(act));
        }
        self.activations.get_mut(parent)?.peel_children.insert(
            loop_id,
            PeelGroup {
                iterations: ids.clone(),
                enabled,
                terminated: true,
            },
        );
        Ok(ids)
    }

    /// Creates a standalone activation subtree for a modeled path function.
    pub fn path_activation(&mut self, function: FunctionId, stack_depth: u32) -> ActivationId {
        let mut act = Activation::new(function, ActivationKind::Root);
        act.stack_depth = stack_depth;
        self.activations.push(act)
    }

    /// Gives mutable access to an activation, e.g. to record dead blocks or edges.
    pub fn activation_mut(&mut self, id: ActivationId) -> Result<&mut Activation> {
        self.activations.get_mut(id)
    }

    /// Validates cross-references and seals the program model.
    pub fn finish(self) -> Result<Program> {
        for (fidx, func) in self.functions.iter().enumerate() {
            for (bidx, block) in func.blocks.iter().enumerate() {
                for edge in block.succs.iter().chain(block.preds.iter()) {
                    if edge.index() >= func.blocks.len() {
                        return Err(structural_error!(
                            "fn{fidx} bb{bidx}: edge references missing block {edge}"
                        ));
                    }
                }
                if let Some(scope) = block.scope {
                    if scope.index() >= func.loops.len() {
                        return Err(structural_error!(
                            "fn{fidx} bb{bidx}: scope references missing loop"
                        ));
                    }
                }
            }
            for info in &func.loops {
                for block in [info.header, info.preheader, info.latch] {
                    if block.index() >= func.blocks.len() {
                        return Err(structural_error!("fn{fidx}: loop references missing block"));
                    }
                }
            }
        }
        for (id, act) in self.activations.iter() {
            let func = self
                .functions
                .get(act.function.index())
                .ok_or(crate::Error::InvalidIndex {
                    kind: "function",
                    index: act.function.index(),
                })?;
            for (&(block, inst), _) in &act.inline_children {
                match func.instruction(block, inst) {
                    Some(Instruction {
                        kind: InstKind::Call(_),
                        ..
                    }) => {}
                    _ => {
                        return Err(structural_error!(
                            "{id}: inline child site {block}/{inst} is not a call"
                        ))
                    }
                }
            }
            for &loop_id in act.peel_children.keys() {
                if loop_id.index() >= func.loops.len() {
                    return Err(structural_error!("{id}: peeled a loop that does not exist"));
                }
            }
        }
        Ok(Program {
            objects: self.objects,
            functions: self.functions,
            special: self.special,
            conditions: self.conditions,
            activations: self.activations,
        })
    }
}
