//! Tentative-load and thread-interference analysis.
//!
//! This module decides, per memory-touching operation of a speculatively specialized
//! program, whether the operation's result must be re-validated at runtime because
//! another thread may have mutated the memory it read. It is a forward dataflow pass
//! over the program's block/loop/call hierarchy, tracking per memory object which byte
//! ranges are currently *fresh* (written or validated since the last point another
//! thread could have run) versus *tentative*.
//!
//! # Architecture
//!
//! The pass is built from small, strictly layered components:
//!
//! - [`RangeSet`]: per-object byte-range bookkeeping (the leaf data structure)
//! - [`FreshnessStore`] / [`StoreArena`]: per-context state under copy-on-write
//!   sharing with explicit reference counts
//! - [`StoreMerger`]: conservative intersection at control-flow joins, call returns,
//!   and loop seams
//! - `Classifier`: the per-instruction-kind update and query rules
//! - [`TentativeLoadAnalysis`]: the traversal driver over blocks, loops (peeled and
//!   residual), and inlined calls
//! - [`TentativeLoadResults`]: the memoized verdicts and aggregate statistics the
//!   committing stage consumes
//!
//! # Soundness
//!
//! The analysis cannot produce a false negative by construction: every rule defaults
//! to the conservative side on uncertainty, so the only failure mode is that more
//! operations than necessary get flagged [`Verdict::MustCheck`].
//!
//! # Concurrency
//!
//! The analyzer itself is single-threaded; concurrency is the phenomenon being
//! *modeled*. At a detected yield point the analysis assumes an adversarial scheduler
//! ran arbitrary other code, hence the "mark everything tentative" fallback.
//!
//! # Example
//!
//! ```rust
//! use specguard::analysis::{AnalysisConfig, TentativeLoadAnalysis};
//! use specguard::program::ProgramBuilder;
//!
//! # fn build_program() -> specguard::Result<specguard::program::Program> {
//! #     let mut b = ProgramBuilder::new();
//! #     let mut f = specguard::program::FunctionBuilder::new("main");
//! #     let bb = f.block();
//! #     f.returns(bb);
//! #     let f = b.function(f.finish());
//! #     b.root(f)?;
//! #     b.finish()
//! # }
//! let program = build_program()?;
//! let analysis = TentativeLoadAnalysis::new(AnalysisConfig::default());
//! let results = analysis.run(&program)?;
//! assert_eq!(results.scopes_walked(), 1);
//! # Ok::<(), specguard::Error>(())
//! ```

mod classify;
mod merge;
mod ranges;
mod results;
mod store;
mod walker;

pub(crate) use classify::Classifier;

pub use merge::StoreMerger;
pub use ranges::RangeSet;
pub use results::{ActivationStats, DisabledCallEffect, OpRef, TentativeLoadResults, Verdict};
pub use store::{FreshnessStore, StoreArena, StoreId};
pub use walker::TentativeLoadAnalysis;

/// Global policy flags, threaded explicitly through every analysis entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisConfig {
    /// The whole program is known single-threaded; every load classifies
    /// [`Verdict::NeverCheck`] and nothing yields.
    pub single_threaded: bool,
    /// Runtime checks are globally omitted; `requires_runtime_check` is false for
    /// every operation. The walk still runs, so statistics stay meaningful.
    pub omit_checks: bool,
}
