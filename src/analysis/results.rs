//! Analysis results and the query interface.
//!
//! The committing stage reads the finished analysis through this module: per-operation
//! verdicts, the derived [`requires_runtime_check`](TentativeLoadResults::requires_runtime_check)
//! predicate, per-subtree checked-operation counts used to prioritize specialization
//! decisions upstream, and the backup-store query for disabled inlined calls.

use std::collections::HashMap;

use strum::Display;

use crate::{
    analysis::{FreshnessStore, StoreArena, StoreId},
    program::{ActivationId, BlockId, CheckKind, InstKind, Program},
    Result,
};

/// Checkedness classification of one memory-touching operation.
///
/// The ordering `NeverCheck < NoCheck < MustCheck` is used when combining the sub-reads
/// of one logical operation: the worst case wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Verdict {
    /// Provably thread-local, independent of any analysis run.
    NeverCheck,
    /// This run found no tentative byte in the read.
    NoCheck,
    /// The read touches at least one tentative byte and requires a runtime guard.
    MustCheck,
}

/// One operation in one analysis context.
///
/// Verdicts are per-context: each peeled iteration and each inlined instance of a
/// function classifies its copy of an instruction independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpRef {
    /// The activation the operation executes in.
    pub activation: ActivationId,
    /// The containing block.
    pub block: BlockId,
    /// Index of the instruction within the block.
    pub inst: usize,
}

impl OpRef {
    /// Creates an operation reference.
    #[must_use]
    pub const fn new(activation: ActivationId, block: BlockId, inst: usize) -> Self {
        Self {
            activation,
            block,
            inst,
        }
    }
}

/// What the commit stage should do about a disabled inlined call's effect on the
/// caller's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledCallEffect {
    /// The subtree read no tentative data: it has no net effect, and the caller's
    /// state can simply be replaced by the backed-up pre-call store.
    RestoreBackup(StoreId),
    /// The subtree read tentative data whose destination cannot be tracked; the
    /// caller's state must be assumed fully clobbered.
    ClobberAll,
}

/// Per-activation aggregate statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationStats {
    /// This activation itself classified at least one read `MustCheck`.
    pub reads_tentative: bool,
    /// A yield point was recorded while walking this activation.
    pub saw_yield: bool,
    /// Checked operations in this activation's own blocks.
    pub checked_here: u32,
    /// Checked operations in this activation and everything below it.
    pub checked_in_subtree: u32,
}

/// The finished output of one tentative-load analysis run.
pub struct TentativeLoadResults {
    pub(crate) verdicts: HashMap<OpRef, Verdict>,
    pub(crate) stats: Vec<ActivationStats>,
    pub(crate) subtree_reads: Vec<bool>,
    pub(crate) backups: HashMap<ActivationId, StoreId>,
    pub(crate) arena: StoreArena,
    pub(crate) omit_checks: bool,
    pub(crate) scopes_walked: u64,
}

impl TentativeLoadResults {
    /// The memoized verdict of an operation, if one was computed.
    #[must_use]
    pub fn verdict(&self, op: OpRef) -> Option<Verdict> {
        self.verdicts.get(&op).copied()
    }

    /// Whether this activation itself read tentative data.
    #[must_use]
    pub fn reads_tentative(&self, activation: ActivationId) -> bool {
        self.stats
            .get(activation.index())
            .is_some_and(|s| s.reads_tentative)
    }

    /// Whether this activation or anything below it read tentative data.
    ///
    /// Propagated to ancestors so the engine can decide whether disabling or restoring
    /// a subtree is safe.
    #[must_use]
    pub fn subtree_reads_tentative(&self, activation: ActivationId) -> bool {
        self.subtree_reads
            .get(activation.index())
            .copied()
            .unwrap_or(false)
    }

    /// Whether a yield point was recorded in this activation.
    #[must_use]
    pub fn saw_yield(&self, activation: ActivationId) -> bool {
        self.stats
            .get(activation.index())
            .is_some_and(|s| s.saw_yield)
    }

    /// Checked operations in this activation's own blocks.
    #[must_use]
    pub fn checked_here(&self, activation: ActivationId) -> u32 {
        self.stats
            .get(activation.index())
            .map_or(0, |s| s.checked_here)
    }

    /// Checked operations in this activation's whole subtree.
    #[must_use]
    pub fn checked_in_subtree(&self, activation: ActivationId) -> u32 {
        self.stats
            .get(activation.index())
            .map_or(0, |s| s.checked_in_subtree)
    }

    /// Number of scope walks the traversal performed (activations, loop passes).
    #[must_use]
    pub fn scopes_walked(&self) -> u64 {
        self.scopes_walked
    }

    /// The externally visible predicate: does this operation need a runtime check in
    /// the committed output?
    ///
    /// False automatically when checks are globally omitted, when the operation's
    /// result carries no value, or when value tracking never analyzed it. With
    /// `include_special`, checks that validate path conditions themselves are included
    /// alongside interference checks.
    #[must_use]
    pub fn requires_runtime_check(
        &self,
        program: &Program,
        op: OpRef,
        include_special: bool,
    ) -> bool {
        if self.omit_checks {
            return false;
        }
        let Ok(act) = program.activations().get(op.activation) else {
            return false;
        };
        let Some(inst) = program.instruction_at(op.activation, op.block, op.inst) else {
            return false;
        };
        if !inst.has_result {
            return false;
        }
        // A member of a disabled loop that was never analyzed.
        let Some(observed) = inst.observed.as_ref() else {
            return false;
        };
        match inst.check {
            CheckKind::AsExpected => return true,
            CheckKind::Special if include_special => return true,
            _ => {}
        }

        match &inst.kind {
            InstKind::Load { .. } | InstKind::MemCopy { .. } => {
                self.verdict(op) == Some(Verdict::MustCheck)
            }
            InstKind::Call(_) => {
                // A disabled inlined subtree that read tentative data taints the
                // caller's view of the call's result.
                let Some(&child) = act.inline_children.get(&(op.block, op.inst)) else {
                    return false;
                };
                let Ok(child_act) = program.activations().get(child) else {
                    return false;
                };
                if !child_act.enabled && self.subtree_reads_tentative(child) {
                    return !observed.is_wholly_unknown();
                }
                false
            }
            InstKind::Phi => {
                // Exit phi of a disabled peeled loop whose iterations read tentative
                // data.
                let Ok(func) = program.function(act.function) else {
                    return false;
                };
                let Ok(block) = func.block(op.block) else {
                    return false;
                };
                let own_scope = act.own_scope();
                for &pred in &block.preds {
                    let Ok(pred_block) = func.block(pred) else {
                        continue;
                    };
                    let Some(child_loop) = func.immediate_subloop(own_scope, pred_block.scope)
                    else {
                        continue;
                    };
                    let Some(group) = act.peel_children.get(&child_loop) else {
                        continue;
                    };
                    if group.terminated
                        && !group.enabled
                        && group
                            .iterations
                            .iter()
                            .any(|&iter| self.subtree_reads_tentative(iter))
                    {
                        return !observed.is_wholly_unknown();
                    }
                }
                false
            }
            _ => false,
        }
    }

    /// What the commit stage should do about the disabled inlined call whose callee is
    /// `child`. `None` when the call was not a disabled inlined call.
    #[must_use]
    pub fn disabled_call_effect(&self, child: ActivationId) -> Option<DisabledCallEffect> {
        let backup = *self.backups.get(&child)?;
        if self.subtree_reads_tentative(child) {
            Some(DisabledCallEffect::ClobberAll)
        } else {
            Some(DisabledCallEffect::RestoreBackup(backup))
        }
    }

    /// Reads a backed-up pre-call store by handle.
    pub fn backup_store(&self, id: StoreId) -> Result<&FreshnessStore> {
        self.arena.get(id)
    }

    /// Computes subtree flags and checked-operation counts. Called once after the walk.
    pub(crate) fn finalize(&mut self, program: &Program) -> Result<()> {
        let tree = program.activations();
        self.subtree_reads = vec![false; tree.len()];
        for (id, _) in tree.iter() {
            let value = self.compute_subtree_reads(program, id)?;
            self.subtree_reads[id.index()] = value;
        }

        for (id, _) in tree.iter() {
            let here = self.count_checked_here(program, id)?;
            if let Some(stats) = self.stats.get_mut(id.index()) {
                stats.checked_here = here;
            }
        }
        for (id, _) in tree.iter() {
            let subtree = self.count_checked_subtree(program, id)?;
            if let Some(stats) = self.stats.get_mut(id.index()) {
                stats.checked_in_subtree = subtree;
            }
        }
        Ok(())
    }

    fn compute_subtree_reads(&self, program: &Program, id: ActivationId) -> Result<bool> {
        if self.reads_tentative(id) {
            return Ok(true);
        }
        let act = program.activations().get(id)?;
        for &child in act.inline_children.values() {
            if self.compute_subtree_reads(program, child)? {
                return Ok(true);
            }
        }
        for group in act.peel_children.values() {
            for &iter in &group.iterations {
                if self.compute_subtree_reads(program, iter)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Counts operations checked because another thread might invalidate their result.
    ///
    /// Operations with an independent check reason are excluded: they are checked to
    /// implement a path condition or similar, not because of interference.
    fn count_checked_here(&self, program: &Program, id: ActivationId) -> Result<u32> {
        let act = program.activations().get(id)?;
        let func = program.function(act.function)?;
        let own_scope = act.own_scope();

        let mut count = 0;
        for (bidx, block) in func.blocks.iter().enumerate() {
            let bid = BlockId::new(bidx as u32);
            if let Some(scope) = own_scope {
                if !func.loop_contains(scope, block.scope) {
                    continue;
                }
            }
            if act.dead_blocks.contains(&bid) {
                continue;
            }
            // Blocks owned by a terminated peeled sub-loop are counted by its
            // iterations instead.
            let mut peeled_away = false;
            let mut cursor = block.scope;
            while let Some(l) = cursor {
                if own_scope == Some(l) {
                    break;
                }
                if act.peel_children.get(&l).is_some_and(|g| g.terminated) {
                    peeled_away = true;
                    break;
                }
                cursor = func.loop_info(l)?.parent;
            }
            if peeled_away {
                continue;
            }
            for (iidx, inst) in block.insts.iter().enumerate() {
                let op = OpRef::new(id, bid, iidx);
                if inst.check == CheckKind::None && self.requires_runtime_check(program, op, false)
                {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn count_checked_subtree(&self, program: &Program, id: ActivationId) -> Result<u32> {
        let act = program.activations().get(id)?;
        let mut total = self.count_checked_here(program, id)?;
        for &child in act.inline_children.values() {
            total += self.count_checked_subtree(program, child)?;
        }
        for group in act.peel_children.values() {
            if !group.terminated {
                continue;
            }
            for &iter in &group.iterations {
                total += self.count_checked_subtree(program, iter)?;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_ordering_is_worst_case() {
        assert!(Verdict::NeverCheck < Verdict::NoCheck);
        assert!(Verdict::NoCheck < Verdict::MustCheck);
        assert_eq!(
            Verdict::NoCheck.max(Verdict::MustCheck),
            Verdict::MustCheck
        );
        assert_eq!(
            Verdict::NeverCheck.max(Verdict::NoCheck),
            Verdict::NoCheck
        );
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::MustCheck.to_string(), "MustCheck");
        assert_eq!(Verdict::NeverCheck.to_string(), "NeverCheck");
    }
}
