//! Per-instruction classification and store updates.
//!
//! Every memory-touching instruction is visited once, in block order, and either
//! *updates* the freshness store (writes, fills, copies, allocations, yield points) or
//! *queries* it (loads and copy sources), producing a [`Verdict`]. The rules here are
//! deliberately conservative in both directions:
//!
//! - Freshness is only asserted for uniquely resolved, non-constant, non-null targets,
//!   and never from inside a disabled region - code committed unmodified is committed
//!   without checks, so nothing it does can justify skipping a later check.
//! - Uncertainty (an unresolved call target, a volatile access not proven simple) is
//!   resolved by yielding: the whole store goes tentative rather than failing.

use crate::{
    analysis::{AnalysisConfig, StoreArena, StoreId, Verdict},
    program::{
        AccessFlags, Callee, InstKind, InstLoc, Instruction, LenValue, ObservedValues,
        PointerTarget, PointerValue, Program, SpecialBehavior,
    },
    Result,
};

/// What a store update did, beyond mutating the store.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UpdateOutcome {
    /// A yield point was detected here: a barrier the checkpoint-placement stage
    /// cares about.
    pub yielded: bool,
}

/// A read query extracted from an instruction.
enum ReadQuery<'i> {
    /// An ordinary load of `size` bytes.
    Load { ptr: &'i PointerValue, size: u64 },
    /// The read side of a copy (block copy, or the surviving prefix of a realloc).
    Copy {
        ptr: Option<&'i PointerValue>,
        len: LenValue,
    },
}

/// Stateless per-instruction rule engine.
///
/// The classifier borrows the program model and configuration; all mutable state lives
/// in the store arena handles passed into each call.
pub(crate) struct Classifier<'a> {
    program: &'a Program,
    config: &'a AnalysisConfig,
}

impl<'a> Classifier<'a> {
    pub(crate) fn new(program: &'a Program, config: &'a AnalysisConfig) -> Self {
        Self { program, config }
    }

    /// Marks `len` bytes at `ptr + extra` fresh, subject to the trust gates.
    ///
    /// Does nothing when the context is disabled, when no yield point has been seen yet
    /// (nothing is tentative, so there is nothing to revalidate), when the pointer does
    /// not resolve uniquely to an object, or when the object is a constant global.
    pub(crate) fn mark_good_bytes(
        &self,
        arena: &mut StoreArena,
        store: &mut StoreId,
        ptr: &PointerValue,
        len: u64,
        extra: u64,
        enabled: bool,
    ) -> Result<()> {
        if !enabled || len == 0 {
            return Ok(());
        }
        // If nothing has been clobbered, no object is tentative.
        if !arena.get(*store)?.all_others_clobbered() {
            return Ok(());
        }
        let Some(&PointerTarget::Object { object, offset }) = ptr.unique() else {
            return Ok(());
        };
        if self.program.object(object)?.is_constant_global() {
            return Ok(());
        }

        let start = offset + extra;
        let stop = start + len;
        let gaps = match arena.get(*store)?.ranges(object) {
            Some(ranges) => ranges.gaps_within(start, stop),
            None => vec![(start, stop)],
        };
        if gaps.is_empty() {
            return Ok(());
        }

        *store = arena.make_mut(*store)?;
        let state = arena.get_mut(*store)?;
        for (s, e) in gaps {
            state.mark_fresh(object, s, e);
        }
        Ok(())
    }

    /// The coarsest fallback: everything becomes tentative.
    fn mark_all_tentative(&self, arena: &mut StoreArena, store: &mut StoreId) -> Result<()> {
        *store = arena.make_mut(*store)?;
        arena.get_mut(*store)?.mark_all_tentative();
        Ok(())
    }

    /// Applies an instruction's effect on the store.
    pub(crate) fn update_store(
        &self,
        arena: &mut StoreArena,
        store: &mut StoreId,
        inst: &Instruction,
        loc: InstLoc,
        enabled: bool,
    ) -> Result<UpdateOutcome> {
        match &inst.kind {
            InstKind::StackAlloc { object } => {
                let size = self.program.object(*object)?.size;
                let ptr = PointerValue::object(*object, 0);
                self.mark_good_bytes(arena, store, &ptr, size, 0, enabled)?;
            }
            InstKind::Load { ptr, size, flags } => {
                if flags.contains(AccessFlags::VOLATILE)
                    && !self.config.single_threaded
                    && !flags.contains(AccessFlags::PROVEN_SIMPLE)
                {
                    self.mark_all_tentative(arena, store)?;
                    return Ok(UpdateOutcome { yielded: true });
                }
                self.mark_good_bytes(arena, store, ptr, *size, 0, enabled)?;
            }
            InstKind::Store { ptr, size } => {
                // A volatile store is outgoing communication at worst; it does not
                // yield.
                self.mark_good_bytes(arena, store, ptr, *size, 0, enabled)?;
            }
            InstKind::MemFill { dst, len } => {
                if let LenValue::Const(n) = len {
                    self.mark_good_bytes(arena, store, dst, *n, 0, enabled)?;
                }
            }
            InstKind::MemCopy { dst, src, len } => {
                if let LenValue::Const(n) = len {
                    self.mark_good_bytes(arena, store, dst, *n, 0, enabled)?;
                    self.mark_good_bytes(arena, store, src, *n, 0, enabled)?;
                }
            }
            InstKind::Call(_) => return self.update_call(arena, store, inst, loc, enabled),
            InstKind::Phi | InstKind::Other => {}
        }
        Ok(UpdateOutcome::default())
    }

    fn update_call(
        &self,
        arena: &mut StoreArena,
        store: &mut StoreId,
        inst: &Instruction,
        loc: InstLoc,
        enabled: bool,
    ) -> Result<UpdateOutcome> {
        let InstKind::Call(site) = &inst.kind else {
            return Ok(UpdateOutcome::default());
        };
        match site.callee {
            Callee::Function(callee) => match self.program.special().behavior(callee) {
                Some(SpecialBehavior::BufferedRead) => {
                    if let (Some(dst), LenValue::Const(n)) = (&site.ptr_arg, site.len_arg) {
                        self.mark_good_bytes(arena, store, dst, n, 0, enabled)?;
                    }
                }
                Some(SpecialBehavior::Reallocation) => {
                    if let Some(object) = site.new_object {
                        let new_ptr = PointerValue::object(object, 0);
                        // The surviving prefix behaves like a block copy.
                        if let (Some(old), LenValue::Const(n)) = (&site.ptr_arg, site.len_arg) {
                            self.mark_good_bytes(arena, store, &new_ptr, n, 0, enabled)?;
                            self.mark_good_bytes(arena, store, old, n, 0, enabled)?;
                        }
                        let size = self.program.object(object)?.size;
                        self.mark_good_bytes(arena, store, &new_ptr, size, 0, enabled)?;
                    }
                }
                Some(SpecialBehavior::Allocation) => {
                    if let Some(object) = site.new_object {
                        let size = self.program.object(object)?.size;
                        let ptr = PointerValue::object(object, 0);
                        self.mark_good_bytes(arena, store, &ptr, size, 0, enabled)?;
                    }
                }
                Some(SpecialBehavior::Yield) => return self.yield_call(arena, store, loc),
                None => {}
            },
            Callee::Unknown => {
                if !self.config.single_threaded {
                    return self.yield_call(arena, store, loc);
                }
            }
        }
        Ok(UpdateOutcome::default())
    }

    /// A call that may hand control to another thread.
    fn yield_call(
        &self,
        arena: &mut StoreArena,
        store: &mut StoreId,
        loc: InstLoc,
    ) -> Result<UpdateOutcome> {
        // Pessimistic locks clobber at specialization time; no runtime checking
        // required.
        if self.program.special().is_pessimistic_lock(loc) {
            return Ok(UpdateOutcome::default());
        }
        if let Some(domain) = self.program.special().lock_domain(loc) {
            let objects = domain.to_vec();
            *store = arena.make_mut(*store)?;
            let state = arena.get_mut(*store)?;
            for object in objects {
                state.clear_object(object);
            }
            return Ok(UpdateOutcome::default());
        }
        // No explicit domain given; clobbers everything.
        self.mark_all_tentative(arena, store)?;
        Ok(UpdateOutcome { yielded: true })
    }

    /// Returns `true` if the instruction is a read query (a load, a block copy, or a
    /// reallocation's surviving-prefix read).
    pub(crate) fn is_read_query(&self, inst: &Instruction) -> bool {
        self.read_query(inst).is_some()
    }

    /// Classifies a read query, or returns `None` for instructions that are not reads.
    pub(crate) fn classify_read(
        &self,
        arena: &StoreArena,
        store: StoreId,
        inst: &Instruction,
    ) -> Result<Option<Verdict>> {
        let Some(query) = self.read_query(inst) else {
            return Ok(None);
        };
        if self.config.single_threaded {
            return Ok(Some(Verdict::NeverCheck));
        }
        let verdict = match query {
            ReadQuery::Load { ptr, size } => {
                self.should_check_load(arena, store, ptr, size, inst.observed.as_ref())?
            }
            ReadQuery::Copy { ptr, len } => {
                self.should_check_copy(arena, store, ptr, len, inst.observed.as_ref())?
            }
        };
        Ok(Some(verdict))
    }

    fn read_query<'i>(&self, inst: &'i Instruction) -> Option<ReadQuery<'i>> {
        match &inst.kind {
            InstKind::Load { ptr, size, .. } => Some(ReadQuery::Load { ptr, size: *size }),
            InstKind::MemCopy { src, len, .. } => Some(ReadQuery::Copy {
                ptr: Some(src),
                len: *len,
            }),
            InstKind::Call(site) => match site.callee {
                Callee::Function(callee)
                    if self.program.special().behavior(callee)
                        == Some(SpecialBehavior::Reallocation) =>
                {
                    Some(ReadQuery::Copy {
                        ptr: site.ptr_arg.as_ref(),
                        len: site.len_arg,
                    })
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether `[rel, rel + size)` of the pointed-to memory needs a check.
    fn should_check_read(
        &self,
        arena: &StoreArena,
        store: StoreId,
        target: &PointerTarget,
        rel: u64,
        size: u64,
    ) -> Result<bool> {
        match *target {
            // Reads from null trap rather than race.
            PointerTarget::Null => Ok(false),
            PointerTarget::Object { object, offset } => {
                if self.program.object(object)?.is_constant_global() {
                    return Ok(false);
                }
                let start = offset + rel;
                Ok(!arena.get(store)?.is_fresh(object, start, start + size))
            }
        }
    }

    fn should_check_load(
        &self,
        arena: &StoreArena,
        store: StoreId,
        ptr: &PointerValue,
        size: u64,
        observed: Option<&ObservedValues>,
    ) -> Result<Verdict> {
        // A load that extracts no useful information never needs a guard.
        let Some(observed) = observed else {
            return Ok(Verdict::NeverCheck);
        };
        if observed.is_wholly_unknown() {
            return Ok(Verdict::NeverCheck);
        }
        let Some(targets) = ptr.targets() else {
            return Ok(Verdict::NeverCheck);
        };
        let ranges = observed.interesting_ranges(size);

        // Worst verdict over every possible target.
        let mut worst = Verdict::NeverCheck;
        for target in targets {
            let verdict = match target {
                PointerTarget::Null => Verdict::NeverCheck,
                PointerTarget::Object { object, .. } => {
                    if self.program.object(*object)?.is_constant_global() {
                        Verdict::NeverCheck
                    } else {
                        let mut verdict = Verdict::NoCheck;
                        for &(start, stop) in &ranges {
                            if stop > start
                                && self.should_check_read(
                                    arena,
                                    store,
                                    target,
                                    start,
                                    stop - start,
                                )?
                            {
                                verdict = Verdict::MustCheck;
                                break;
                            }
                        }
                        verdict
                    }
                }
            };
            worst = worst.max(verdict);
            if worst == Verdict::MustCheck {
                break;
            }
        }
        Ok(worst)
    }

    fn should_check_copy(
        &self,
        arena: &StoreArena,
        store: StoreId,
        ptr: Option<&PointerValue>,
        len: LenValue,
        observed: Option<&ObservedValues>,
    ) -> Result<Verdict> {
        let Some(ptr) = ptr else {
            return Ok(Verdict::NeverCheck);
        };
        let LenValue::Const(len) = len else {
            return Ok(Verdict::NeverCheck);
        };
        let Some(target) = ptr.unique() else {
            return Ok(Verdict::NeverCheck);
        };
        if len == 0 {
            return Ok(Verdict::NeverCheck);
        }
        // An unpopulated observation means the copy didn't "work" during
        // specialization, so there is nothing to check.
        let Some(observed) = observed else {
            return Ok(Verdict::NeverCheck);
        };
        let ranges = observed.interesting_ranges(len);
        if ranges.is_empty() {
            return Ok(Verdict::NeverCheck);
        }

        for (start, stop) in ranges {
            if stop > start && self.should_check_read(arena, store, target, start, stop - start)? {
                return Ok(Verdict::MustCheck);
            }
        }
        Ok(Verdict::NoCheck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::FreshnessStore,
        program::{CallSite, FunctionBuilder, FunctionId, MemoryObject, ProgramBuilder},
    };

    /// A program with one heap object and one function, enough for rule-level tests.
    fn fixture() -> (Program, crate::program::ObjectId) {
        let mut builder = ProgramBuilder::new();
        let obj = builder.object(MemoryObject::heap(64));
        let mut func = FunctionBuilder::new("f");
        let bb = func.block();
        func.returns(bb);
        let f = builder.function(func.finish());
        builder.root(f).unwrap();
        (builder.finish().unwrap(), obj)
    }

    fn loc() -> InstLoc {
        InstLoc::new(
            FunctionId::new(0),
            crate::program::BlockId::new(0),
            0,
        )
    }

    fn clobbered_store(arena: &mut StoreArena) -> StoreId {
        let mut store = FreshnessStore::new();
        store.mark_all_tentative();
        arena.alloc(store)
    }

    #[test]
    fn test_mark_good_bytes_noop_before_any_yield() {
        let (program, obj) = fixture();
        let config = AnalysisConfig::default();
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let mut store = arena.alloc(FreshnessStore::new());

        let ptr = PointerValue::object(obj, 0);
        classifier
            .mark_good_bytes(&mut arena, &mut store, &ptr, 8, 0, true)
            .unwrap();
        // Nothing is tentative, so nothing is tracked.
        assert!(arena.get(store).unwrap().ranges(obj).is_none());
    }

    #[test]
    fn test_mark_good_bytes_gated_by_disabled_region() {
        let (program, obj) = fixture();
        let config = AnalysisConfig::default();
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let mut store = clobbered_store(&mut arena);

        let ptr = PointerValue::object(obj, 0);
        classifier
            .mark_good_bytes(&mut arena, &mut store, &ptr, 8, 0, false)
            .unwrap();
        assert!(!arena.get(store).unwrap().is_fresh(obj, 0, 8));

        classifier
            .mark_good_bytes(&mut arena, &mut store, &ptr, 8, 0, true)
            .unwrap();
        assert!(arena.get(store).unwrap().is_fresh(obj, 0, 8));
    }

    #[test]
    fn test_store_then_load_is_nocheck() {
        let (program, obj) = fixture();
        let config = AnalysisConfig::default();
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let mut store = clobbered_store(&mut arena);

        let store_inst = Instruction::new(InstKind::Store {
            ptr: PointerValue::object(obj, 0),
            size: 4,
        });
        classifier
            .update_store(&mut arena, &mut store, &store_inst, loc(), true)
            .unwrap();

        let load = Instruction::new(InstKind::Load {
            ptr: PointerValue::object(obj, 0),
            size: 4,
            flags: AccessFlags::empty(),
        });
        assert_eq!(
            classifier.classify_read(&arena, store, &load).unwrap(),
            Some(Verdict::NoCheck)
        );

        // A disjoint range of the same object is still tentative.
        let disjoint = Instruction::new(InstKind::Load {
            ptr: PointerValue::object(obj, 4),
            size: 4,
            flags: AccessFlags::empty(),
        });
        assert_eq!(
            classifier.classify_read(&arena, store, &disjoint).unwrap(),
            Some(Verdict::MustCheck)
        );
    }

    #[test]
    fn test_single_threaded_is_nevercheck() {
        let (program, obj) = fixture();
        let config = AnalysisConfig {
            single_threaded: true,
            ..AnalysisConfig::default()
        };
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let store = clobbered_store(&mut arena);

        let load = Instruction::new(InstKind::Load {
            ptr: PointerValue::object(obj, 0),
            size: 4,
            flags: AccessFlags::empty(),
        });
        assert_eq!(
            classifier.classify_read(&arena, store, &load).unwrap(),
            Some(Verdict::NeverCheck)
        );
    }

    #[test]
    fn test_unresolved_pointer_is_nevercheck() {
        let (program, _) = fixture();
        let config = AnalysisConfig::default();
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let store = clobbered_store(&mut arena);

        let load = Instruction::new(InstKind::Load {
            ptr: PointerValue::Unresolved,
            size: 4,
            flags: AccessFlags::empty(),
        });
        assert_eq!(
            classifier.classify_read(&arena, store, &load).unwrap(),
            Some(Verdict::NeverCheck)
        );
    }

    #[test]
    fn test_multi_target_takes_worst_verdict() {
        let (program, obj) = fixture();
        let config = AnalysisConfig::default();
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let store = clobbered_store(&mut arena);
        arena.get_mut(store).unwrap().mark_fresh(obj, 0, 4);

        // One fresh target, one tentative target: worst case wins.
        let load = Instruction::new(InstKind::Load {
            ptr: PointerValue::Resolved(vec![
                PointerTarget::Object { object: obj, offset: 0 },
                PointerTarget::Object { object: obj, offset: 32 },
            ]),
            size: 4,
            flags: AccessFlags::empty(),
        });
        assert_eq!(
            classifier.classify_read(&arena, store, &load).unwrap(),
            Some(Verdict::MustCheck)
        );

        // Null and constant targets never escalate.
        let exempt = Instruction::new(InstKind::Load {
            ptr: PointerValue::null(),
            size: 4,
            flags: AccessFlags::empty(),
        });
        assert_eq!(
            classifier.classify_read(&arena, store, &exempt).unwrap(),
            Some(Verdict::NeverCheck)
        );
    }

    #[test]
    fn test_volatile_load_yields() {
        let (program, obj) = fixture();
        let config = AnalysisConfig::default();
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let mut store = arena.alloc(FreshnessStore::new());

        let volatile = Instruction::new(InstKind::Load {
            ptr: PointerValue::object(obj, 0),
            size: 4,
            flags: AccessFlags::VOLATILE,
        });
        let outcome = classifier
            .update_store(&mut arena, &mut store, &volatile, loc(), true)
            .unwrap();
        assert!(outcome.yielded);
        assert!(arena.get(store).unwrap().all_others_clobbered());

        // Proven-simple volatile loads are not yield points.
        let mut fresh = arena.alloc(FreshnessStore::new());
        let simple = Instruction::new(InstKind::Load {
            ptr: PointerValue::object(obj, 0),
            size: 4,
            flags: AccessFlags::VOLATILE | AccessFlags::PROVEN_SIMPLE,
        });
        let outcome = classifier
            .update_store(&mut arena, &mut fresh, &simple, loc(), true)
            .unwrap();
        assert!(!outcome.yielded);
        assert!(!arena.get(fresh).unwrap().all_others_clobbered());
    }

    #[test]
    fn test_indirect_call_clobbers_everything() {
        let (program, _) = fixture();
        let config = AnalysisConfig::default();
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let mut store = arena.alloc(FreshnessStore::new());

        let call = Instruction::new(InstKind::Call(CallSite::indirect()));
        let outcome = classifier
            .update_store(&mut arena, &mut store, &call, loc(), true)
            .unwrap();
        assert!(outcome.yielded);
        assert!(arena.get(store).unwrap().all_others_clobbered());
    }

    #[test]
    fn test_indirect_call_in_single_threaded_program() {
        let (program, _) = fixture();
        let config = AnalysisConfig {
            single_threaded: true,
            ..AnalysisConfig::default()
        };
        let classifier = Classifier::new(&program, &config);
        let mut arena = StoreArena::new();
        let mut store = arena.alloc(FreshnessStore::new());

        let call = Instruction::new(InstKind::Call(CallSite::indirect()));
        let outcome = classifier
            .update_store(&mut arena, &mut store, &call, loc(), true)
            .unwrap();
        assert!(!outcome.yielded);
        assert!(!arena.get(store).unwrap().all_others_clobbered());
    }
}
