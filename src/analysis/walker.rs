//! Traversal driver.
//!
//! The walker processes one activation at a time: it seeds the entry block's store
//! (a fresh root, or the caller's state for inlined calls), visits blocks in
//! topological order, merges predecessor stores at joins, injects path conditions,
//! classifies every instruction, and descends into inlined calls and loop children.
//!
//! # Loop regimes
//!
//! - **Peeled loops** are statically bounded chains of iterations: iteration 0's header
//!   is seeded from the preheader, and each latch exit seeds the next iteration.
//! - **Residual loops** are analyzed with exactly two passes when the back edge is
//!   reachable: a first pass that carries the latch's exit state back into the header
//!   (one extra iteration instead of a true fixpoint), and a second pass that forces
//!   every read the back edge can reach to `MustCheck` - a repeat execution of the body
//!   must assume whatever state the previous execution left behind, which a single pass
//!   cannot characterize. This two-pass shape is deliberate; do not replace it with
//!   fixpoint iteration.
//!
//! # Reference discipline
//!
//! Each block hands one store reference to every live successor edge; joins consume
//! exactly those references. A block whose store becomes null mid-processing (a call
//! proven never to return) simply ends its walk - provided it has no live successors,
//! that is a valid dead end, not an error.

use std::collections::HashMap;

use crate::{
    analysis::{
        classify::Classifier, ActivationStats, AnalysisConfig, FreshnessStore, OpRef, StoreArena,
        StoreId, StoreMerger, TentativeLoadResults, Verdict,
    },
    program::{
        ActivationId, Block, BlockId, Function, FunctionId, InstKind, InstLoc, Instruction,
        LoopId, LoopInfo, PathFunction, Program,
    },
    Result,
};

/// The tentative-load / thread-interference analysis.
///
/// # Example
///
/// ```rust,ignore
/// use specguard::analysis::{AnalysisConfig, TentativeLoadAnalysis};
///
/// let analysis = TentativeLoadAnalysis::new(AnalysisConfig::default());
/// let results = analysis.run(&program)?;
/// if results.requires_runtime_check(&program, op, false) {
///     // emit a re-validation guard for this read
/// }
/// ```
pub struct TentativeLoadAnalysis {
    config: AnalysisConfig,
}

impl TentativeLoadAnalysis {
    /// Creates an analysis with the given policy configuration.
    #[must_use]
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Walks `program` and returns the per-operation verdicts and aggregate
    /// statistics.
    pub fn run(&self, program: &Program) -> Result<TentativeLoadResults> {
        Walker::new(program, &self.config).run()
    }
}

struct Walker<'a> {
    program: &'a Program,
    config: &'a AnalysisConfig,
    arena: StoreArena,
    /// Current store per `(activation, block)`. A present key with `None` marks a
    /// block whose store became null (never-returning call).
    stores: HashMap<(ActivationId, BlockId), Option<StoreId>>,
    verdicts: HashMap<OpRef, Verdict>,
    stats: Vec<ActivationStats>,
    backups: HashMap<ActivationId, StoreId>,
    scopes_walked: u64,
}

impl<'a> Walker<'a> {
    fn new(program: &'a Program, config: &'a AnalysisConfig) -> Self {
        Self {
            program,
            config,
            arena: StoreArena::new(),
            stores: HashMap::new(),
            verdicts: HashMap::new(),
            stats: vec![ActivationStats::default(); program.activations().len()],
            backups: HashMap::new(),
            scopes_walked: 0,
        }
    }

    fn run(mut self) -> Result<TentativeLoadResults> {
        if self.program.activations().is_empty() {
            return Err(structural_error!("analysis requires a root activation"));
        }
        let root = self.program.activations().root();
        let root_act = self.program.activations().get(root)?;
        let commit_disabled = !root_act.enabled;

        let entry = self.arena.alloc(FreshnessStore::new());
        self.stores.insert((root, Function::entry()), Some(entry));
        self.find_tentative_loads(root, commit_disabled, false)?;

        // The root has no caller to consume its return states.
        let func = self.program.function(root_act.function)?;
        for (bidx, block) in func.blocks.iter().enumerate() {
            if !block.is_return {
                continue;
            }
            let key = (root, BlockId::new(bidx as u32));
            if let Some(Some(id)) = self.stores.get(&key).copied() {
                self.arena.release(id)?;
                self.stores.insert(key, None);
            }
        }

        let mut results = TentativeLoadResults {
            verdicts: self.verdicts,
            stats: self.stats,
            subtree_reads: Vec::new(),
            backups: self.backups,
            arena: self.arena,
            omit_checks: self.config.omit_checks,
            scopes_walked: self.scopes_walked,
        };
        results.finalize(self.program)?;
        Ok(results)
    }

    /// Processes one function activation. The entry block's store must already be
    /// seeded (the walker seeds the root itself).
    fn find_tentative_loads(
        &mut self,
        act: ActivationId,
        commit_disabled: bool,
        second_pass: bool,
    ) -> Result<()> {
        let a = self.program.activations().get(act)?;
        let func = self.program.function(a.function)?;

        let entry_key = (act, Function::entry());
        let Some(Some(entry_store)) = self.stores.get(&entry_key).copied() else {
            return Err(structural_error!("activation {act} entered without a store"));
        };
        // The analysis root always gets a frame so stack indices cannot underflow;
        // everything else only if its function allocates one.
        if func.allocates_frame || act == self.program.activations().root() {
            let id = self.arena.make_mut(entry_store)?;
            self.arena.get_mut(id)?.push_frame(func.frame_objects.clone());
            self.stores.insert(entry_key, Some(id));
        }

        self.walk_scope(act, None, commit_disabled, second_pass, false)
    }

    /// Walks the blocks of one scope (a whole function body, or one loop) in
    /// topological order.
    ///
    /// With `latch_to_header` set (first pass over a residual loop), successor
    /// references are only handed to edges inside the loop, so the latch state flows
    /// back to the header and not to any exit block.
    fn walk_scope(
        &mut self,
        act: ActivationId,
        scope: Option<LoopId>,
        commit_disabled: bool,
        second_pass: bool,
        latch_to_header: bool,
    ) -> Result<()> {
        self.scopes_walked += 1;
        let a = self.program.activations().get(act)?;
        let func = self.program.function(a.function)?;
        let own_scope = a.own_scope();

        let start = match scope {
            Some(l) => func.loop_info(l)?.header,
            None => Function::entry(),
        };
        let nblocks = func.blocks.len();
        let mut i = start.index();
        while i < nblocks {
            let bid = BlockId::new(i as u32);
            let block = &func.blocks[i];
            if let Some(l) = scope {
                if !func.loop_contains(l, block.scope) {
                    break;
                }
            }
            if a.dead_blocks.contains(&bid) {
                i += 1;
                continue;
            }

            if block.scope != scope {
                // First block of a child loop; its innermost scope is that loop.
                let Some(child) = func.immediate_subloop(scope, block.scope) else {
                    return Err(structural_error!(
                        "block {bid} does not nest in the walked scope"
                    ));
                };
                self.walk_child_loop(act, child, commit_disabled, second_pass)?;
                while i < nblocks && func.loop_contains(child, func.blocks[i].scope) {
                    i += 1;
                }
                continue;
            }

            if bid != start {
                match self.merge_predecessors(act, bid)? {
                    Some(id) => {
                        self.stores.insert((act, bid), Some(id));
                    }
                    None => {
                        return Err(structural_error!(
                            "reachable block {bid} has no live predecessor state"
                        ));
                    }
                }
            }

            self.walk_path_conditions(act, bid, commit_disabled, second_pass)?;

            if !self.walk_instructions(act, bid, block, commit_disabled, second_pass)? {
                // Block lost its store to a never-returning call; it must be a dead
                // end.
                if block.succs.iter().any(|&succ| a.edge_alive(bid, succ)) {
                    return Err(structural_error!(
                        "never-returning call in block {bid} with live successors"
                    ));
                }
                i += 1;
                continue;
            }

            let mut store = self.block_store(act, bid)?;

            // Hand one store reference to each live successor edge. If latch_to_header
            // is set, ignore branches leaving the loop; otherwise ignore the
            // latch->header edge.
            for &succ in &block.succs {
                if !a.edge_alive(bid, succ) {
                    continue;
                }
                if let Some(l) = scope {
                    if own_scope != Some(l) {
                        let info = func.loop_info(l)?;
                        let succ_scope = func.blocks[succ.index()].scope;
                        if latch_to_header && !func.loop_contains(l, succ_scope) {
                            continue;
                        }
                        if !latch_to_header && succ == info.header {
                            if bid != info.latch {
                                return Err(structural_error!(
                                    "back edge into {} from non-latch block {bid}",
                                    info.header
                                ));
                            }
                            continue;
                        }
                    }
                }
                self.arena.retain(store)?;
            }

            // Stack allocations die at dead ends.
            if block.succs.is_empty() && func.allocates_frame {
                store = self.arena.make_mut(store)?;
                self.arena.get_mut(store)?.pop_frame()?;
                self.stores.insert((act, bid), Some(store));
            }

            // Return blocks keep their reference for the caller's call merge.
            if !block.is_return {
                self.arena.release(store)?;
            }

            i += 1;
        }
        Ok(())
    }

    /// Dispatches a child loop to the peeled-chain or residual regime.
    fn walk_child_loop(
        &mut self,
        act: ActivationId,
        child: LoopId,
        commit_disabled: bool,
        second_pass: bool,
    ) -> Result<()> {
        let a = self.program.activations().get(act)?;
        let func = self.program.function(a.function)?;
        let info = *func.loop_info(child)?;

        let group = a.peel_children.get(&child);
        if let Some(group) = group.filter(|g| g.terminated) {
            if group.iterations.is_empty() {
                return Err(structural_error!("peel group with zero iterations"));
            }
            let pre = self.block_store(act, info.preheader).map_err(|_| {
                structural_error!("peeled loop preheader {} has no store", info.preheader)
            })?;
            let child_disabled = commit_disabled || !group.enabled;
            let iterations = group.iterations.clone();

            self.stores.insert((iterations[0], info.header), Some(pre));
            for (j, &iter) in iterations.iter().enumerate() {
                self.walk_scope(iter, Some(child), child_disabled, second_pass, false)?;
                if j + 1 < iterations.len() {
                    let latch = self.block_store(iter, info.latch).map_err(|_| {
                        structural_error!("peeled iteration {j} lost its latch store")
                    })?;
                    self.stores
                        .insert((iterations[j + 1], info.header), Some(latch));
                }
            }
            Ok(())
        } else {
            let child_disabled = commit_disabled || group.is_some_and(|g| !g.enabled);
            self.walk_residual_loop(act, child, info, child_disabled, second_pass)
        }
    }

    /// The two-pass residual-loop regime.
    fn walk_residual_loop(
        &mut self,
        act: ActivationId,
        l: LoopId,
        info: LoopInfo,
        commit_disabled: bool,
        second_pass: bool,
    ) -> Result<()> {
        let a = self.program.activations().get(act)?;
        let pre = self
            .block_store(act, info.preheader)
            .map_err(|_| structural_error!("loop preheader {} has no store", info.preheader))?;
        self.stores.insert((act, info.header), Some(pre));

        if a.edge_alive(info.latch, info.header) {
            if !second_pass {
                // First pass: give the latch's exit state back to the header instead
                // of any exit block.
                self.walk_scope(act, Some(l), commit_disabled, false, true)?;
                let latch = self.block_store(act, info.latch).map_err(|_| {
                    structural_error!("residual loop latch {} lost its store", info.latch)
                })?;
                self.stores.insert((act, info.header), Some(latch));
            }
            self.walk_scope(act, Some(l), commit_disabled, true, false)
        } else {
            self.walk_scope(act, Some(l), commit_disabled, second_pass, false)
        }
    }

    /// Intersects the stores of a block's live predecessors.
    ///
    /// Predecessors inside a terminated peeled sub-loop contribute from every
    /// iteration whose exit edge is alive; everything else contributes from this
    /// activation directly.
    fn merge_predecessors(&mut self, act: ActivationId, bid: BlockId) -> Result<Option<StoreId>> {
        let a = self.program.activations().get(act)?;
        let func = self.program.function(a.function)?;
        let block = func.block(bid)?;
        let scope_here = block.scope;

        let mut merger = StoreMerger::new();
        for &pred in &block.preds {
            let pred_scope = func.blocks[pred.index()].scope;
            let peeled = func
                .immediate_subloop(scope_here, pred_scope)
                .and_then(|cl| a.peel_children.get(&cl).filter(|g| g.terminated));
            if let Some(group) = peeled {
                for &iter in &group.iterations {
                    let iter_act = self.program.activations().get(iter)?;
                    if !iter_act.edge_alive(pred, bid) {
                        continue;
                    }
                    if let Some(Some(id)) = self.stores.get(&(iter, pred)).copied() {
                        merger.add_input(id);
                    }
                }
            } else {
                if !a.edge_alive(pred, bid) {
                    continue;
                }
                if let Some(Some(id)) = self.stores.get(&(act, pred)).copied() {
                    merger.add_input(id);
                }
            }
        }
        merger.merge(&mut self.arena)
    }

    /// Injects matching path conditions at a block's entry, and walks any path
    /// function anchored here.
    fn walk_path_conditions(
        &mut self,
        act: ActivationId,
        bid: BlockId,
        commit_disabled: bool,
        second_pass: bool,
    ) -> Result<()> {
        let depth = self.program.activations().get(act)?.stack_depth;
        let enabled = !commit_disabled;

        let conditions: Vec<_> = self
            .program
            .conditions()
            .conditions
            .iter()
            .filter(|c| c.stack_depth == depth && c.block == bid)
            .cloned()
            .collect();
        if !conditions.is_empty() {
            let classifier = Classifier::new(self.program, self.config);
            let mut store = self.block_store(act, bid)?;
            for condition in &conditions {
                classifier.mark_good_bytes(
                    &mut self.arena,
                    &mut store,
                    &condition.target,
                    condition.len,
                    condition.offset,
                    enabled,
                )?;
            }
            self.stores.insert((act, bid), Some(store));
        }

        let functions: Vec<PathFunction> = self
            .program
            .conditions()
            .functions
            .iter()
            .filter(|f| f.stack_depth == depth && f.block == bid)
            .cloned()
            .collect();
        for path_fn in functions {
            // The user is responsible for checking the model's applicability, so the
            // modeled callee is walked like committed code.
            let store = self.block_store(act, bid)?;
            self.stores
                .insert((path_fn.activation, Function::entry()), Some(store));
            self.find_tentative_loads(path_fn.activation, false, second_pass)?;
            match self.merge_live_returns(path_fn.activation)? {
                Some(id) => {
                    self.stores.insert((act, bid), Some(id));
                }
                None => {
                    return Err(structural_error!("path function has no live return path"));
                }
            }
        }
        Ok(())
    }

    /// Classifies and applies every instruction of a block, descending into inlined
    /// calls. Returns `false` if the block's store became null.
    fn walk_instructions(
        &mut self,
        act: ActivationId,
        bid: BlockId,
        block: &Block,
        commit_disabled: bool,
        second_pass: bool,
    ) -> Result<bool> {
        let a = self.program.activations().get(act)?;
        let function = a.function;
        let mut store = self.block_store(act, bid)?;

        for (j, inst) in block.insts.iter().enumerate() {
            self.analyse_instruction(
                act,
                function,
                bid,
                j,
                inst,
                &mut store,
                commit_disabled,
                second_pass,
            )?;
            self.stores.insert((act, bid), Some(store));

            if !matches!(inst.kind, InstKind::Call(_)) {
                continue;
            }
            let Some(&child) = a.inline_children.get(&(bid, j)) else {
                continue;
            };
            let child_act = self.program.activations().get(child)?;
            let child_disabled = commit_disabled || !child_act.enabled;

            if !child_act.enabled {
                // Back up the pre-call state so the commit stage can restore it if
                // the subtree turns out to have no net effect.
                self.arena.retain(store)?;
                if let Some(old) = self.backups.insert(child, store) {
                    self.arena.release(old)?;
                }
            }

            self.stores
                .insert((child, Function::entry()), Some(store));
            self.find_tentative_loads(child, child_disabled, second_pass)?;

            match self.merge_live_returns(child)? {
                Some(id) => {
                    store = id;
                    self.stores.insert((act, bid), Some(id));
                }
                None => {
                    // Call exit unreachable.
                    self.stores.insert((act, bid), None);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Intersects the stores held by an activation's live return blocks, consuming
    /// their references.
    fn merge_live_returns(&mut self, callee: ActivationId) -> Result<Option<StoreId>> {
        let callee_act = self.program.activations().get(callee)?;
        let func = self.program.function(callee_act.function)?;

        let mut merger = StoreMerger::new();
        for (bidx, block) in func.blocks.iter().enumerate() {
            let bid = BlockId::new(bidx as u32);
            if !block.is_return || callee_act.dead_blocks.contains(&bid) {
                continue;
            }
            if let Some(Some(id)) = self.stores.get(&(callee, bid)).copied() {
                merger.add_input(id);
                self.stores.insert((callee, bid), None);
            }
        }
        merger.merge(&mut self.arena)
    }

    /// One instruction: verdict memoization, read classification, store update.
    #[allow(clippy::too_many_arguments)]
    fn analyse_instruction(
        &mut self,
        act: ActivationId,
        function: FunctionId,
        bid: BlockId,
        inst_idx: usize,
        inst: &Instruction,
        store: &mut StoreId,
        commit_disabled: bool,
        second_pass: bool,
    ) -> Result<()> {
        let op = OpRef::new(act, bid, inst_idx);

        // Known always good from the main phase, or from a previous pass.
        if inst.never_check {
            self.verdicts.entry(op).or_insert(Verdict::NeverCheck);
            return Ok(());
        }
        if self.verdicts.get(&op) == Some(&Verdict::NeverCheck) {
            return Ok(());
        }

        let classifier = Classifier::new(self.program, self.config);
        if classifier.is_read_query(inst) {
            // Already known checkable from the preheader path? Then whether it is
            // tentative from the latch is irrelevant.
            if second_pass && self.verdicts.get(&op) == Some(&Verdict::MustCheck) {
                return Ok(());
            }
            let mut verdict = classifier
                .classify_read(&self.arena, *store, inst)?
                .unwrap_or(Verdict::NeverCheck);
            // A second physical execution of the loop body cannot assume the previous
            // execution's state; back-edge-reachable reads are forced checkable.
            if second_pass && verdict == Verdict::NoCheck {
                verdict = Verdict::MustCheck;
            }
            self.verdicts.insert(op, verdict);
            if verdict == Verdict::MustCheck {
                if let Some(stats) = self.stats.get_mut(act.index()) {
                    stats.reads_tentative = true;
                }
            }
        }

        let loc = InstLoc::new(function, bid, inst_idx);
        let outcome =
            classifier.update_store(&mut self.arena, store, inst, loc, !commit_disabled)?;
        if outcome.yielded {
            if let Some(stats) = self.stats.get_mut(act.index()) {
                stats.saw_yield = true;
            }
        }
        Ok(())
    }

    fn block_store(&self, act: ActivationId, bid: BlockId) -> Result<StoreId> {
        match self.stores.get(&(act, bid)) {
            Some(Some(id)) => Ok(*id),
            _ => Err(structural_error!("block {bid} has no live store")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{FunctionBuilder, ProgramBuilder};

    #[test]
    fn test_program_without_root_is_structural() {
        let program = ProgramBuilder::new().finish().unwrap();
        let analysis = TentativeLoadAnalysis::new(AnalysisConfig::default());
        assert!(matches!(
            analysis.run(&program),
            Err(crate::Error::Structural { .. })
        ));
    }

    #[test]
    fn test_trivial_walk() {
        let mut builder = ProgramBuilder::new();
        let mut func = FunctionBuilder::new("main");
        let bb = func.block();
        func.returns(bb);
        let f = builder.function(func.finish());
        builder.root(f).unwrap();
        let program = builder.finish().unwrap();

        let results = TentativeLoadAnalysis::new(AnalysisConfig::default())
            .run(&program)
            .unwrap();
        let root = program.activations().root();
        assert_eq!(results.scopes_walked(), 1);
        assert!(!results.reads_tentative(root));
        assert!(!results.saw_yield(root));
        assert_eq!(results.checked_in_subtree(root), 0);
    }

    #[test]
    fn test_dead_blocks_are_skipped() {
        let mut builder = ProgramBuilder::new();
        let mut func = FunctionBuilder::new("main");
        let entry = func.block();
        let dead = func.block();
        let exit = func.block();
        func.edge(entry, dead);
        func.edge(entry, exit);
        func.edge(dead, exit);
        func.returns(exit);
        let f = builder.function(func.finish());
        let root = builder.root(f).unwrap();
        builder.activation_mut(root).unwrap().dead_blocks.insert(dead);
        builder
            .activation_mut(root)
            .unwrap()
            .dead_edges
            .insert((entry, dead));
        let program = builder.finish().unwrap();

        // The dead block contributes nothing; the exit merges only the live edge.
        let results = TentativeLoadAnalysis::new(AnalysisConfig::default())
            .run(&program)
            .unwrap();
        assert_eq!(results.scopes_walked(), 1);
    }
}
