// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # specguard
//!
//! [![Crates.io](https://img.shields.io/crates/v/specguard.svg)](https://crates.io/crates/specguard)
//! [![Documentation](https://docs.rs/specguard/badge.svg)](https://docs.rs/specguard)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/specguard/blob/main/LICENSE-APACHE)
//!
//! A thread-interference and tentative-load analysis for ahead-of-time speculative
//! specialization. `specguard` decides which memory reads of a specialized program
//! cannot be proven safe against concurrent mutation by other threads, and therefore
//! must be protected by an inserted runtime re-validation check in the emitted output.
//!
//! ## Features
//!
//! - **🔍 Byte-precise freshness tracking** - Per-object interval sets record exactly
//!   which bytes were written or validated since the last yield point
//! - **🔀 Sound join merging** - Conservative interval intersection across arbitrary
//!   CFG joins, call returns, and loop seams
//! - **📐 Loop-aware** - Statically-unrolled (peeled) iterations chain exactly;
//!   unbounded residual loops get the deliberate two-pass conservative treatment
//! - **📞 Interprocedural** - Inlined calls are walked in place, with disabled
//!   (unspecialized) subtrees handled soundly via pre-call store backups
//! - **🛡️ No false negatives** - Every rule resolves modeling uncertainty by
//!   over-approximation; the only failure mode is extra checks
//! - **🧩 Oracle-driven** - Consumes alias, constancy, and structure facts from the
//!   surrounding engine; computes none of them itself
//!
//! ## Quick Start
//!
//! Add `specguard` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! specguard = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust
//! use specguard::prelude::*;
//!
//! // Model: store to a heap object, a yield, then a load of the same bytes.
//! let mut program = ProgramBuilder::new();
//! let obj = program.object(MemoryObject::heap(8));
//! let yield_fn = {
//!     let mut f = FunctionBuilder::new("thread_yield");
//!     let bb = f.block();
//!     f.returns(bb);
//!     program.function(f.finish())
//! };
//! program
//!     .special_mut()
//!     .register(yield_fn, SpecialBehavior::Yield);
//!
//! let mut func = FunctionBuilder::new("main");
//! let bb = func.block();
//! func.push(bb, Instruction::new(InstKind::Store {
//!     ptr: PointerValue::object(obj, 0),
//!     size: 4,
//! }));
//! func.push(bb, Instruction::new(InstKind::Call(CallSite::to_function(yield_fn))));
//! let load = func.push(bb, Instruction::new(InstKind::Load {
//!     ptr: PointerValue::object(obj, 0),
//!     size: 4,
//!     flags: AccessFlags::empty(),
//! }));
//! func.returns(bb);
//! let main = program.function(func.finish());
//! let root = program.root(main)?;
//! let program = program.finish()?;
//!
//! // Analyze: the yield makes the load tentative.
//! let results = TentativeLoadAnalysis::new(AnalysisConfig::default()).run(&program)?;
//! let op = OpRef::new(root, bb, load);
//! assert_eq!(results.verdict(op), Some(Verdict::MustCheck));
//! assert!(results.requires_runtime_check(&program, op, false));
//! # Ok::<(), specguard::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `specguard` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`program`] - The input model: functions, blocks, loops, activations, memory
//!   objects, and the external oracles' facts
//! - [`analysis`] - The freshness analysis itself: interval stores, copy-on-write
//!   state sharing, the merge engine, the traversal driver, and the query interface
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! ### Input Model
//!
//! The surrounding specialization engine supplies every structural fact through
//! [`program::ProgramBuilder`]: control-flow and loop shape, the activation tree
//! (which calls were inlined, which loops were peeled), resolved pointer targets,
//! observed result values, special-function classifications, and path conditions.
//!
//! ### Analysis Engine
//!
//! [`analysis::TentativeLoadAnalysis`] walks the activation tree once (plus a bounded
//! second pass inside residual loops) and produces [`analysis::TentativeLoadResults`]:
//! a three-valued [`analysis::Verdict`] per memory-touching operation, the derived
//! `requires_runtime_check` predicate, and per-subtree aggregate statistics the engine
//! uses to place checkpoints and prioritize specialization.
//!
//! ## Thread Safety
//!
//! The analyzer is single-threaded by design; concurrency is the phenomenon it
//! models, not a property of its execution. The only shared mutable structure, the
//! store arena, is protected purely by its copy-on-write discipline.

#[macro_use]
mod error;

pub mod analysis;
pub mod prelude;
pub mod program;

/// The main error type for all specguard operations.
pub use error::Error;

/// The result type used throughout specguard.
///
/// # Example
///
/// ```rust
/// use specguard::Result;
///
/// fn build_something() -> Result<u32> {
///     Ok(42)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
