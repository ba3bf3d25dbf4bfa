//! Method body intermediate representation.
//!
//! Bodies are control-flow graphs of [`BasicBlock`]s. Each block holds straight-line
//! [`Instruction`]s and ends in exactly one [`Terminator`]; protected regions are
//! [`ExceptionHandler`]s over block sets. Rewrites are structural: add a block, redirect
//! a terminator, append a handler.
//!
//! # Key Components
//!
//! - [`Instruction`] / [`Terminator`] / [`FlowType`] - The instruction set
//! - [`BasicBlock`] / [`MethodBody`] - Blocks, locals and the handler table
//! - [`ExceptionHandler`] - Try/catch/finally regions
//! - [`MethodBodyBuilder`] / [`BodyAssembler`] - Fluent body construction

mod body;
mod builder;
mod exceptions;
mod instruction;

pub use body::{BasicBlock, MethodBody};
pub use builder::{BodyAssembler, MethodBodyBuilder};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use instruction::{BlockId, BranchKind, FlowType, Instruction, Terminator};
