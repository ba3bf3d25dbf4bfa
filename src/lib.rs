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
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' uses mmap to map a module file into memory

//! # aspectweave
//!
//! A static aspect weaver for compiled stack-machine modules. Aspects are declared as custom
//! attributes deriving from `AspectWeave.BaseAspect` on a module, a type, a property or a
//! method. After compilation, `aspectweave` rewrites the body of every targeted member so
//! that the aspect hooks `OnEntry`, `OnSuccess`, `OnException` and `OnExit` run around the
//! original code, and emits an initializer type that constructs one aspect instance per
//! use site exactly once.
//!
//! ## Features
//!
//! - **Scoped declarations** - Module, type, property and method level aspects merged with
//!   `Exclude`, `Replace` and `Order` semantics
//! - **Target filtering** - `ElementTargets` plus literal, wildcard and `/regex/` patterns
//!   for type and member names
//! - **Single-exit rewrite** - All returns funnel through one epilogue; constructor chaining
//!   stays outside the protected region
//! - **Flow control** - Hooks can return early, replace the return value or substitute the
//!   thrown exception through `MethodExecInfo`
//! - **Build-step friendly** - Idempotent, atomic output, optional strong-name signing and
//!   debug-symbol remapping
//! - **Execution runtime** - An interpreter for woven bodies, for checking behaviour without
//!   the target platform
//!
//! ## Quick Start
//!
//! ### Using the Prelude
//!
//! ```rust,no_run
//! use aspectweave::prelude::*;
//!
//! let outcome = WeaveTask::new(WeaveConfig::new("bin/Sample.module.json")).run()?;
//! println!("{outcome}");
//! # Ok::<(), aspectweave::Error>(())
//! ```
//!
//! ### Weaving a Module in Memory
//!
//! ```rust,no_run
//! use aspectweave::{file, resolver::Resolver, weaver::Weaver};
//! use std::path::Path;
//!
//! let mut module = file::load_module(Path::new("bin/Sample.module.json"))?;
//! let resolver = Resolver::with_references(&["lib/Aspects.module.json"])?;
//!
//! for plan in Weaver::new(&resolver).plan(&module)? {
//!     println!("{} <- {} aspects", plan.member, plan.aspects.len());
//! }
//! let outcome = Weaver::new(&resolver).weave(&mut module)?;
//! println!("{outcome}");
//! # Ok::<(), aspectweave::Error>(())
//! ```
//!
//! ### Running Woven Code
//!
//! ```rust,no_run
//! use aspectweave::{emulation::{EmValue, Runtime}, file, resolver::Resolver};
//! use std::path::Path;
//!
//! let module = file::load_module(Path::new("bin/Sample.module.json"))?;
//! let mut runtime = Runtime::new(module, Resolver::new()?);
//! let outcome = runtime.call_static("Sample.Calc", "Add", vec![EmValue::I32(1), EmValue::I32(3)])?;
//! assert_eq!(outcome.value(), Some(&EmValue::I32(4)));
//! # Ok::<(), aspectweave::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`], an alias over [`Error`]. Declaration and
//! structural problems are fatal for the whole module and leave the file on disk unchanged.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use aspectweave::prelude::*;
///
/// let config = WeaveConfig::new("bin/Sample.module.json").with_key_file("Sample.snk");
/// let outcome = WeaveTask::new(config).run()?;
/// assert!(!matches!(outcome, WeaveOutcome::AlreadyProcessed));
/// # Ok::<(), aspectweave::Error>(())
/// ```
pub mod prelude;

/// The module model: tokens, type and member definitions, signatures and custom attributes.
///
/// Modules are plain data. They serialize to JSON and are built either by deserializing a
/// module file or through the fluent builders in [`metadata::builders`].
pub mod metadata;

/// Method body IR: instructions, terminators, basic blocks and exception handlers.
///
/// # Key Types
///
/// - [`assembly::Instruction`] - A straight-line stack-machine operation
/// - [`assembly::Terminator`] - The control transfer that ends a block
/// - [`assembly::MethodBody`] - Blocks, locals and the ordered handler table
/// - [`assembly::MethodBodyBuilder`] - Label based construction of bodies
pub mod assembly;

/// Control-flow analysis over method bodies.
///
/// [`analysis::ControlFlowGraph`] derives successors and predecessors from terminators and
/// validates the structural rules a body must satisfy before and after weaving.
pub mod analysis;

/// Aspect discovery, scope resolution and the method body rewrite.
///
/// # Key Components
///
/// - [`weaver::Weaver`] - Drives one module through discovery, planning and rewriting
/// - [`weaver::pattern::TargetPattern`] - Type and member name filters
/// - [`weaver::scope`] - Merge rules for nested declarations
/// - [`weaver::transform`] - The per-method instrumentation
/// - [`weaver::initializer`] - The synthesized aspect instance collection
pub mod weaver;

/// An interpreter for module code, used to execute woven bodies.
pub mod emulation;

/// Loading and saving of module files and their debug-symbol side-files.
pub mod file;

/// Resolution of type identities across the module and its references.
pub mod resolver;

/// Strong-name keys and module signing.
pub mod signing;

/// Configuration of a weave run.
pub mod config;

/// The build-step entry point.
pub mod task;

/// `aspectweave` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `aspectweave` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the full list of
/// failure classes.
pub use error::Error;

/// Configuration of a [`WeaveTask`]
pub use config::WeaveConfig;

/// Runs one weave over a module file
pub use task::WeaveTask;
