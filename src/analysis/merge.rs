//! Conservative store merging.
//!
//! Wherever control flow joins - a block with several live predecessors, the live
//! return paths of an inlined call, or the seam between loop iterations - the incoming
//! freshness facts must be combined so that the result claims a byte fresh only when
//! **every** live input agrees. That is a per-object interval intersection, with the
//! absent-object convention following each input's `all_others_clobbered` flag: absent
//! under a clear flag means the whole object is fresh, absent under a set flag means the
//! whole object is tentative. The merged flag is the OR of the input flags, so any
//! contributing path that went all-tentative forces tentativeness for untracked objects.
//!
//! Explicitly tracked objects stay tracked in the result, even when the intersection
//! leaves them an empty range set; this is what keeps a lock-domain clobber tentative
//! across joins while the flag is still clear.

use std::collections::HashMap;

use crate::{
    analysis::{FreshnessStore, RangeSet, StoreArena, StoreId},
    program::ObjectId,
    Result,
};

/// Collects live input stores and intersects them into one.
///
/// The merger *consumes* one reference per input: the references handed to successor
/// edges or held by return blocks are exactly the ones given up here. A single-input
/// merge passes the reference through untouched.
#[derive(Debug, Default)]
pub struct StoreMerger {
    inputs: Vec<StoreId>,
}

impl StoreMerger {
    /// Creates a merger with no inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one live input store.
    pub fn add_input(&mut self, id: StoreId) {
        self.inputs.push(id);
    }

    /// Number of inputs collected so far.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Intersects the collected inputs.
    ///
    /// Returns `None` for zero inputs; the caller decides whether that means an
    /// unreachable continuation (a call with no live return path) or a structural
    /// violation (a reachable block with no live predecessor).
    pub fn merge(self, arena: &mut StoreArena) -> Result<Option<StoreId>> {
        match self.inputs.len() {
            0 => Ok(None),
            1 => Ok(Some(self.inputs[0])),
            _ => Ok(Some(Self::merge_many(&self.inputs, arena)?)),
        }
    }

    fn merge_many(inputs: &[StoreId], arena: &mut StoreArena) -> Result<StoreId> {
        let mut clobbered = false;
        let mut depth: Option<usize> = None;
        for &id in inputs {
            let store = arena.get(id)?;
            clobbered |= store.all_others_clobbered();
            match depth {
                None => depth = Some(store.frame_depth()),
                Some(d) if d != store.frame_depth() => {
                    return Err(structural_error!(
                        "merge inputs disagree on stack depth ({} vs {})",
                        d,
                        store.frame_depth()
                    ));
                }
                Some(_) => {}
            }
        }

        // Frame lists: same depth everywhere, union the per-level object sets so a pop
        // discards facts no matter which path allocated them.
        let depth = depth.unwrap_or(0);
        let mut frames: Vec<Vec<ObjectId>> = vec![Vec::new(); depth];
        for &id in inputs {
            for (level, objects) in arena.get(id)?.frames().iter().enumerate() {
                for &object in objects {
                    if !frames[level].contains(&object) {
                        frames[level].push(object);
                    }
                }
            }
        }

        // Every object tracked by any input needs an explicit intersected entry.
        let mut keys: Vec<ObjectId> = Vec::new();
        for &id in inputs {
            for (object, _) in arena.get(id)?.tracked() {
                if !keys.contains(&object) {
                    keys.push(object);
                }
            }
        }
        keys.sort_unstable();

        let mut objects = HashMap::with_capacity(keys.len());
        for object in keys {
            // None accumulates "fresh everywhere so far"; the first constrained input
            // replaces it, later ones intersect.
            let mut acc: Option<RangeSet> = None;
            for &id in inputs {
                let store = arena.get(id)?;
                match store.ranges(object) {
                    Some(ranges) => {
                        acc = Some(match acc {
                            None => ranges.clone(),
                            Some(prev) => prev.intersect(ranges),
                        });
                    }
                    None if store.all_others_clobbered() => {
                        acc = Some(RangeSet::new());
                    }
                    None => {}
                }
            }
            objects.insert(object, acc.unwrap_or_default());
        }

        let merged = FreshnessStore::from_parts(objects, clobbered, frames);
        for &id in inputs {
            arena.release(id)?;
        }
        Ok(arena.alloc(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(index: u32) -> ObjectId {
        ObjectId::new(index)
    }

    fn alloc_clobbered(arena: &mut StoreArena) -> StoreId {
        let mut store = FreshnessStore::new();
        store.mark_all_tentative();
        arena.alloc(store)
    }

    #[test]
    fn test_zero_inputs_is_none() {
        let mut arena = StoreArena::new();
        assert!(StoreMerger::new().merge(&mut arena).unwrap().is_none());
    }

    #[test]
    fn test_single_input_passes_through() {
        let mut arena = StoreArena::new();
        let id = arena.alloc(FreshnessStore::new());
        let mut merger = StoreMerger::new();
        merger.add_input(id);
        assert_eq!(merger.merge(&mut arena).unwrap(), Some(id));
        assert_eq!(arena.refs(id).unwrap(), 1);
    }

    #[test]
    fn test_merge_is_intersection() {
        let mut arena = StoreArena::new();

        let a = alloc_clobbered(&mut arena);
        arena.get_mut(a).unwrap().mark_fresh(obj(0), 0, 10);
        arena.get_mut(a).unwrap().mark_fresh(obj(0), 20, 30);

        let b = alloc_clobbered(&mut arena);
        arena.get_mut(b).unwrap().mark_fresh(obj(0), 5, 25);

        let (ca, cb) = (
            arena.get(a).unwrap().clone(),
            arena.get(b).unwrap().clone(),
        );

        let mut merger = StoreMerger::new();
        merger.add_input(a);
        merger.add_input(b);
        let merged = merger.merge(&mut arena).unwrap().unwrap();

        let result = arena.get(merged).unwrap();
        assert!(result.all_others_clobbered());
        for byte in 0..35 {
            assert_eq!(
                result.is_fresh(obj(0), byte, byte + 1),
                ca.is_fresh(obj(0), byte, byte + 1) && cb.is_fresh(obj(0), byte, byte + 1),
                "byte {byte}"
            );
        }
        // Inputs were consumed.
        assert_eq!(arena.live_count(), 1);
    }

    #[test]
    fn test_absent_object_under_clear_flag_is_fully_fresh() {
        let mut arena = StoreArena::new();

        // Path A never saw a yield: obj 0 implicitly fresh everywhere.
        let a = arena.alloc(FreshnessStore::new());
        // Path B yielded, then revalidated [0, 8) of obj 0.
        let b = alloc_clobbered(&mut arena);
        arena.get_mut(b).unwrap().mark_fresh(obj(0), 0, 8);

        let mut merger = StoreMerger::new();
        merger.add_input(a);
        merger.add_input(b);
        let merged = merger.merge(&mut arena).unwrap().unwrap();

        let result = arena.get(merged).unwrap();
        // The flag is the OR of the inputs.
        assert!(result.all_others_clobbered());
        // Full-fresh on A intersected with [0, 8) on B keeps [0, 8).
        assert!(result.is_fresh(obj(0), 0, 8));
        assert!(!result.is_fresh(obj(0), 8, 9));
        // Untracked objects follow the merged flag.
        assert!(!result.is_fresh(obj(1), 0, 1));
    }

    #[test]
    fn test_clear_flags_or_to_clear() {
        let mut arena = StoreArena::new();
        let a = arena.alloc(FreshnessStore::new());
        let b = arena.alloc(FreshnessStore::new());

        let mut merger = StoreMerger::new();
        merger.add_input(a);
        merger.add_input(b);
        let merged = merger.merge(&mut arena).unwrap().unwrap();

        let result = arena.get(merged).unwrap();
        assert!(!result.all_others_clobbered());
        assert!(result.is_fresh(obj(7), 0, 64));
    }

    #[test]
    fn test_lock_domain_entry_survives_merge() {
        let mut arena = StoreArena::new();

        // Path A cleared obj 2 through a lock domain; flag still clear.
        let a = arena.alloc(FreshnessStore::new());
        arena.get_mut(a).unwrap().clear_object(obj(2));
        // Path B is untouched.
        let b = arena.alloc(FreshnessStore::new());

        let mut merger = StoreMerger::new();
        merger.add_input(a);
        merger.add_input(b);
        let merged = merger.merge(&mut arena).unwrap().unwrap();

        let result = arena.get(merged).unwrap();
        assert!(!result.all_others_clobbered());
        // obj 2 stays explicitly tentative; everything else stays fresh.
        assert!(!result.is_fresh(obj(2), 0, 1));
        assert!(result.is_fresh(obj(3), 0, 1));
    }

    #[test]
    fn test_three_way_merge() {
        let mut arena = StoreArena::new();
        let mut ids = Vec::new();
        for ranges in [(0u64, 12u64), (4, 16), (8, 20)] {
            let id = alloc_clobbered(&mut arena);
            arena.get_mut(id).unwrap().mark_fresh(obj(0), ranges.0, ranges.1);
            ids.push(id);
        }

        let mut merger = StoreMerger::new();
        for id in ids {
            merger.add_input(id);
        }
        let merged = merger.merge(&mut arena).unwrap().unwrap();
        let result = arena.get(merged).unwrap();
        assert!(result.is_fresh(obj(0), 8, 12));
        assert!(!result.is_fresh(obj(0), 7, 12));
        assert!(!result.is_fresh(obj(0), 8, 13));
    }

    #[test]
    fn test_mismatched_frame_depth_is_structural() {
        let mut arena = StoreArena::new();
        let a = arena.alloc(FreshnessStore::new());
        let b = arena.alloc(FreshnessStore::new());
        arena.get_mut(b).unwrap().push_frame(vec![obj(0)]);

        let mut merger = StoreMerger::new();
        merger.add_input(a);
        merger.add_input(b);
        assert!(matches!(
            merger.merge(&mut arena),
            Err(crate::Error::Structural { .. })
        ));
    }
}
