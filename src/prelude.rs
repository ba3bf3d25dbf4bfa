//! # aspectweave Prelude
//!
//! Re-exports of the most commonly used types for weaving and inspecting modules. Import
//! this module to get quick access to the essentials.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all aspectweave operations
pub use crate::Error;

/// The result type used throughout aspectweave
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Build-step entry point and its configuration
pub use crate::{WeaveConfig, WeaveTask};

/// The module weaver and its results
pub use crate::weaver::{
    AppliedAspect, MemberPlan, WeaveOutcome, WeaveReport, Weaver, WovenMember,
};

/// Cross-module type resolution
pub use crate::resolver::Resolver;

// ================================================================================================
// Module Model
// ================================================================================================

/// Tokens, definitions and attributes
pub use crate::metadata::{
    customattributes::{CustomAttribute, CustomAttributeArgument},
    module::Module,
    signatures::{TypeRef, TypeSig},
    token::Token,
};

/// Fluent construction of types and methods
pub use crate::metadata::builders::{ClassBuilder, MethodBuilder};

// ================================================================================================
// Method Bodies
// ================================================================================================

/// Body IR and its builder
pub use crate::assembly::{
    BasicBlock, BlockId, ExceptionHandler, Instruction, MethodBody, MethodBodyBuilder, Terminator,
};

/// Control-flow validation
pub use crate::analysis::ControlFlowGraph;

// ================================================================================================
// Aspect Semantics
// ================================================================================================

/// Element kinds an aspect may target
pub use crate::weaver::{ElementTargets, MemberKind};

/// Name filters
pub use crate::weaver::pattern::TargetPattern;

// ================================================================================================
// Execution
// ================================================================================================

/// The interpreter and its native hooks
pub use crate::emulation::{EmValue, NativeRegistry, Outcome, Runtime};

// ================================================================================================
// Files and Signing
// ================================================================================================

/// Module file access
pub use crate::file::{load_module, save_module, symbols::SymbolFile};

/// Strong-name keys
pub use crate::signing::SigningKey;
