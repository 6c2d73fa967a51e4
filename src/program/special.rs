//! Special-function classification.
//!
//! The surrounding engine recognizes a fixed set of library/runtime behaviors and hands
//! them to the analysis as a table: allocation and reallocation calls make their new
//! extent fresh, buffered reads make their destination fresh, and yield primitives hand
//! control to the scheduler. Two per-call-site refinements narrow the yield fallback:
//! a *lock domain* names the only objects a synchronization call can clobber, and a
//! *pessimistic lock* was already accounted for at specialization time and needs no
//! runtime guard at all.

use std::collections::{HashMap, HashSet};

use strum::Display;

use crate::program::{FunctionId, InstLoc, ObjectId};

/// Behavior class of a recognized library/runtime function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SpecialBehavior {
    /// `malloc`-style allocation: returns a fresh object.
    Allocation,
    /// `realloc`-style reallocation: copies a surviving prefix, then returns a fresh
    /// object.
    Reallocation,
    /// Read of a known size from an external source into a caller buffer.
    BufferedRead,
    /// A primitive that may yield control to another thread.
    Yield,
}

/// Table of special-function classifications and per-call-site lock refinements.
#[derive(Debug, Clone, Default)]
pub struct SpecialFunctions {
    behaviors: HashMap<FunctionId, SpecialBehavior>,
    lock_domains: HashMap<InstLoc, Vec<ObjectId>>,
    pessimistic_locks: HashSet<InstLoc>,
}

impl SpecialFunctions {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `function` with the given behavior.
    pub fn register(&mut self, function: FunctionId, behavior: SpecialBehavior) {
        self.behaviors.insert(function, behavior);
    }

    /// Returns the behavior of `function`, if classified.
    #[must_use]
    pub fn behavior(&self, function: FunctionId) -> Option<SpecialBehavior> {
        self.behaviors.get(&function).copied()
    }

    /// Restricts the yield fallback of the call at `site` to the named objects.
    pub fn set_lock_domain(&mut self, site: InstLoc, objects: Vec<ObjectId>) {
        self.lock_domains.insert(site, objects);
    }

    /// Returns the lock domain of the call at `site`, if one was declared.
    #[must_use]
    pub fn lock_domain(&self, site: InstLoc) -> Option<&[ObjectId]> {
        self.lock_domains.get(&site).map(Vec::as_slice)
    }

    /// Marks the call at `site` as a pessimistic lock, already accounted for at
    /// specialization time.
    pub fn set_pessimistic_lock(&mut self, site: InstLoc) {
        self.pessimistic_locks.insert(site);
    }

    /// Returns `true` if the call at `site` is a pessimistic lock.
    #[must_use]
    pub fn is_pessimistic_lock(&self, site: InstLoc) -> bool {
        self.pessimistic_locks.contains(&site)
    }
}
