//! Per-context freshness state.
//!
//! A [`FreshnessStore`] is the full analysis state for one control-flow context: a map
//! from memory objects to their fresh byte ranges, the `all_others_clobbered` flag, and
//! the stack-frame list used to discard facts for dead activations.
//!
//! Stores are shared by reference among every path that holds them, under copy-on-write:
//! the [`StoreArena`] owns the values, hands out copyable [`StoreId`] handles with
//! explicit reference counts, and [`StoreArena::make_mut`] clones a shared store before
//! the first mutation so that unrelated analysis branches never corrupt each other's
//! results.
//!
//! # Flag semantics
//!
//! When `all_others_clobbered` is `false` (the state before any yield point), an object
//! *absent* from the map is implicitly fully fresh. When `true`, an absent object is
//! implicitly fully tentative. An object *present* in the map always uses its explicit
//! range set - including an explicitly empty one, which a lock-domain clobber produces
//! to mark a single object tentative without touching the flag.

use std::collections::HashMap;

use crate::{analysis::RangeSet, program::ObjectId, Result};

/// Handle to a [`FreshnessStore`] owned by a [`StoreArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u32);

impl StoreId {
    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The freshness state of one analysis context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshnessStore {
    objects: HashMap<ObjectId, RangeSet>,
    all_others_clobbered: bool,
    frames: Vec<Vec<ObjectId>>,
}

impl FreshnessStore {
    /// Creates the entry state of a root activation: empty map, nothing clobbered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        objects: HashMap<ObjectId, RangeSet>,
        all_others_clobbered: bool,
        frames: Vec<Vec<ObjectId>>,
    ) -> Self {
        Self {
            objects,
            all_others_clobbered,
            frames,
        }
    }

    /// Returns `true` if every untracked object is implicitly tentative.
    #[must_use]
    pub fn all_others_clobbered(&self) -> bool {
        self.all_others_clobbered
    }

    /// Returns the explicit range set of `object`, if tracked.
    #[must_use]
    pub fn ranges(&self, object: ObjectId) -> Option<&RangeSet> {
        self.objects.get(&object)
    }

    /// Returns `true` if `[start, stop)` of `object` is known fresh in this context.
    #[must_use]
    pub fn is_fresh(&self, object: ObjectId, start: u64, stop: u64) -> bool {
        match self.objects.get(&object) {
            Some(ranges) => ranges.covers(start, stop),
            None => !self.all_others_clobbered,
        }
    }

    /// Marks `[start, stop)` of `object` fresh, coalescing with existing ranges.
    pub fn mark_fresh(&mut self, object: ObjectId, start: u64, stop: u64) {
        self.objects.entry(object).or_default().insert(start, stop);
    }

    /// Makes `object` explicitly fully tentative, as a lock-domain clobber does.
    pub fn clear_object(&mut self, object: ObjectId) {
        self.objects.entry(object).or_default().clear();
    }

    /// The coarsest fallback at a yield point: every object becomes tentative.
    ///
    /// The frame list survives; only freshness facts are discarded.
    pub fn mark_all_tentative(&mut self) {
        self.objects.clear();
        self.all_others_clobbered = true;
    }

    /// Pushes a stack frame owning the given objects.
    pub fn push_frame(&mut self, objects: Vec<ObjectId>) {
        self.frames.push(objects);
    }

    /// Pops the top stack frame, discarding freshness facts for its objects.
    ///
    /// A pop with no matching push is a fatal structural violation.
    pub fn pop_frame(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| structural_error!("stack frame pop with no matching push"))?;
        for object in frame {
            self.objects.remove(&object);
        }
        Ok(())
    }

    /// Current stack-frame depth.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn frames(&self) -> &[Vec<ObjectId>] {
        &self.frames
    }

    /// Iterates over the explicitly tracked objects and their range sets.
    pub fn tracked(&self) -> impl Iterator<Item = (ObjectId, &RangeSet)> {
        self.objects.iter().map(|(id, ranges)| (*id, ranges))
    }
}

struct Slot {
    store: FreshnessStore,
    refs: u32,
}

/// Arena of reference-counted [`FreshnessStore`] values.
///
/// Every successor edge, loop seam, or backup that holds a store holds one reference.
/// References are consumed explicitly: [`StoreArena::release`] frees the value when the
/// count reaches zero, and a release past zero surfaces as a structural violation
/// instead of silently corrupting shared state.
#[derive(Default)]
pub struct StoreArena {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
}

impl StoreArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `store` and returns a handle with one reference.
    pub fn alloc(&mut self, store: FreshnessStore) -> StoreId {
        let slot = Slot { store, refs: 1 };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            StoreId(index)
        } else {
            self.slots.push(Some(slot));
            StoreId((self.slots.len() - 1) as u32)
        }
    }

    fn slot(&self, id: StoreId) -> Result<&Slot> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| structural_error!("use of released store reference {}", id.index()))
    }

    fn slot_mut(&mut self, id: StoreId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| structural_error!("use of released store reference {}", id.index()))
    }

    /// Reads the store behind `id`.
    pub fn get(&self, id: StoreId) -> Result<&FreshnessStore> {
        Ok(&self.slot(id)?.store)
    }

    /// Mutates the store behind `id` directly. The handle must be uniquely owned;
    /// shared handles go through [`StoreArena::make_mut`] first.
    pub fn get_mut(&mut self, id: StoreId) -> Result<&mut FreshnessStore> {
        Ok(&mut self.slot_mut(id)?.store)
    }

    /// Adds a reference to `id`.
    pub fn retain(&mut self, id: StoreId) -> Result<()> {
        self.slot_mut(id)?.refs += 1;
        Ok(())
    }

    /// Drops a reference to `id`, freeing the store on the last one.
    ///
    /// Returns `true` if the store was freed.
    pub fn release(&mut self, id: StoreId) -> Result<bool> {
        let slot = self.slot_mut(id)?;
        slot.refs -= 1;
        if slot.refs == 0 {
            self.slots[id.index()] = None;
            self.free.push(id.index() as u32);
            return Ok(true);
        }
        Ok(false)
    }

    /// Prepares `id` for mutation under copy-on-write.
    ///
    /// A uniquely owned handle is returned unchanged; a shared one loses one reference
    /// and a private clone is allocated for the caller. Mutate the returned handle via
    /// [`StoreArena::get_mut`].
    pub fn make_mut(&mut self, id: StoreId) -> Result<StoreId> {
        let slot = self.slot(id)?;
        if slot.refs == 1 {
            return Ok(id);
        }
        let copy = slot.store.clone();
        self.slot_mut(id)?.refs -= 1;
        Ok(self.alloc(copy))
    }

    /// Allocates a value-identical copy of `id` with its own single reference.
    ///
    /// Mutations of the copy are never observed through the original handle.
    pub fn readable_copy(&mut self, id: StoreId) -> Result<StoreId> {
        let copy = self.slot(id)?.store.clone();
        Ok(self.alloc(copy))
    }

    /// Current reference count of `id`.
    pub fn refs(&self, id: StoreId) -> Result<u32> {
        Ok(self.slot(id)?.refs)
    }

    /// Number of live stores in the arena.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(index: u32) -> ObjectId {
        ObjectId::new(index)
    }

    #[test]
    fn test_default_state_is_all_fresh() {
        let store = FreshnessStore::new();
        assert!(!store.all_others_clobbered());
        assert!(store.is_fresh(obj(0), 0, 1024));
    }

    #[test]
    fn test_yield_monotonicity() {
        let mut store = FreshnessStore::new();
        store.mark_fresh(obj(0), 0, 8);
        store.mark_all_tentative();

        // Everything previously fresh is now tentative and stays tentative...
        assert!(!store.is_fresh(obj(0), 0, 8));
        assert!(!store.is_fresh(obj(1), 0, 4));

        // ...until explicitly re-marked.
        store.mark_fresh(obj(0), 0, 4);
        assert!(store.is_fresh(obj(0), 0, 4));
        assert!(!store.is_fresh(obj(0), 4, 8));
    }

    #[test]
    fn test_mark_all_tentative_is_idempotent() {
        let mut store = FreshnessStore::new();
        store.mark_fresh(obj(3), 0, 16);
        store.mark_all_tentative();
        let snapshot = store.clone();
        store.mark_all_tentative();
        assert_eq!(store, snapshot);
    }

    #[test]
    fn test_explicit_empty_entry_is_tentative() {
        // A lock-domain clobber makes one object tentative under a clear flag.
        let mut store = FreshnessStore::new();
        store.clear_object(obj(2));
        assert!(!store.all_others_clobbered());
        assert!(!store.is_fresh(obj(2), 0, 1));
        assert!(store.is_fresh(obj(1), 0, 1));
    }

    #[test]
    fn test_frame_pop_discards_facts() {
        let mut store = FreshnessStore::new();
        store.mark_all_tentative();
        store.push_frame(vec![obj(0), obj(1)]);
        store.mark_fresh(obj(0), 0, 8);
        store.mark_fresh(obj(2), 0, 8);

        store.pop_frame().unwrap();
        assert!(!store.is_fresh(obj(0), 0, 8));
        // Non-frame objects keep their facts.
        assert!(store.is_fresh(obj(2), 0, 8));
        assert_eq!(store.frame_depth(), 0);
    }

    #[test]
    fn test_frame_pop_without_push_is_structural() {
        let mut store = FreshnessStore::new();
        assert!(matches!(
            store.pop_frame(),
            Err(crate::Error::Structural { .. })
        ));
    }

    #[test]
    fn test_arena_release_frees_on_last_reference() {
        let mut arena = StoreArena::new();
        let id = arena.alloc(FreshnessStore::new());

        // Share three ways, then release three times.
        arena.retain(id).unwrap();
        arena.retain(id).unwrap();
        assert_eq!(arena.refs(id).unwrap(), 3);

        assert!(!arena.release(id).unwrap());
        assert!(!arena.release(id).unwrap());
        assert_eq!(arena.live_count(), 1);
        assert!(arena.release(id).unwrap());
        assert_eq!(arena.live_count(), 0);

        // A fourth release is an underflow, not a silent no-op.
        assert!(matches!(
            arena.release(id),
            Err(crate::Error::Structural { .. })
        ));
    }

    #[test]
    fn test_make_mut_preserves_sharers() {
        let mut arena = StoreArena::new();
        let shared = arena.alloc(FreshnessStore::new());
        arena.retain(shared).unwrap();

        let private = arena.make_mut(shared).unwrap();
        assert_ne!(shared, private);
        assert_eq!(arena.refs(shared).unwrap(), 1);
        assert_eq!(arena.refs(private).unwrap(), 1);

        arena.get_mut(private).unwrap().mark_all_tentative();
        assert!(!arena.get(shared).unwrap().all_others_clobbered());
        assert!(arena.get(private).unwrap().all_others_clobbered());
    }

    #[test]
    fn test_make_mut_unique_is_in_place() {
        let mut arena = StoreArena::new();
        let id = arena.alloc(FreshnessStore::new());
        assert_eq!(arena.make_mut(id).unwrap(), id);
    }

    #[test]
    fn test_readable_copy_isolation() {
        let mut arena = StoreArena::new();
        let original = arena.alloc(FreshnessStore::new());
        arena.get_mut(original).unwrap().mark_fresh(obj(0), 0, 8);

        let copy = arena.readable_copy(original).unwrap();
        arena.get_mut(copy).unwrap().mark_fresh(obj(0), 8, 16);

        assert!(!arena.get(original).unwrap().is_fresh(obj(0), 8, 16));
        assert!(arena.get(copy).unwrap().is_fresh(obj(0), 0, 16));
    }

    #[test]
    fn test_slot_reuse_after_free() {
        let mut arena = StoreArena::new();
        let a = arena.alloc(FreshnessStore::new());
        arena.release(a).unwrap();
        let b = arena.alloc(FreshnessStore::new());
        assert_eq!(a.index(), b.index());
        assert_eq!(arena.live_count(), 1);
    }
}
