//! Exception handler regions over basic blocks.
//!
//! Protected regions are expressed as block sets rather than instruction ranges, so
//! inserting or splitting blocks never invalidates a region boundary.

use std::collections::BTreeSet;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{assembly::instruction::BlockId, metadata::signatures::TypeRef};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    ///
    /// These flags determine how the exception handler processes exceptions and
    /// control flow within try/catch/finally blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// [`ExceptionHandler::catch_type`] names the exception type that this handler
        /// catches.
        const EXCEPTION = 0x0000;

        /// A finally clause.
        ///
        /// Code that executes regardless of whether an exception occurs. Finally
        /// blocks run when a protected region is left and during unwinding.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a try region and its handler within a method.
///
/// Handlers are listed innermost first. An exception raised in block `b` is dispatched to
/// the first handler in table order whose `try_blocks` contains `b` and which accepts it.
///
/// # Layout
///
/// ```text
/// try {
///     // try_blocks
/// }
/// catch (catch_type) {
///     // handler_entry, handler_blocks
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Blocks protected by this handler
    pub try_blocks: BTreeSet<BlockId>,
    /// Blocks forming the handler body
    pub handler_blocks: BTreeSet<BlockId>,
    /// First block executed when the handler runs
    pub handler_entry: BlockId,
    /// Caught exception type for typed clauses
    #[serde(default)]
    pub catch_type: Option<TypeRef>,
}

impl ExceptionHandler {
    /// A typed catch clause
    pub fn catch(
        catch_type: TypeRef,
        try_blocks: impl IntoIterator<Item = BlockId>,
        handler_blocks: impl IntoIterator<Item = BlockId>,
        handler_entry: BlockId,
    ) -> Self {
        let mut handler_blocks: BTreeSet<BlockId> = handler_blocks.into_iter().collect();
        handler_blocks.insert(handler_entry);
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_blocks: try_blocks.into_iter().collect(),
            handler_blocks,
            handler_entry,
            catch_type: Some(catch_type),
        }
    }

    /// A finally clause
    pub fn finally(
        try_blocks: impl IntoIterator<Item = BlockId>,
        handler_blocks: impl IntoIterator<Item = BlockId>,
        handler_entry: BlockId,
    ) -> Self {
        let mut handler_blocks: BTreeSet<BlockId> = handler_blocks.into_iter().collect();
        handler_blocks.insert(handler_entry);
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_blocks: try_blocks.into_iter().collect(),
            handler_blocks,
            handler_entry,
            catch_type: None,
        }
    }

    /// True for typed catch clauses
    #[must_use]
    pub fn is_catch(&self) -> bool {
        !self.flags.intersects(ExceptionHandlerFlags::FINALLY | ExceptionHandlerFlags::FAULT)
    }

    /// True for finally clauses
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }

    /// True for fault clauses
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FAULT)
    }

    /// True if `block` lies in the protected region
    #[must_use]
    pub fn protects(&self, block: BlockId) -> bool {
        self.try_blocks.contains(&block)
    }

    /// True if `block` belongs to the handler body
    #[must_use]
    pub fn handles_in(&self, block: BlockId) -> bool {
        self.handler_blocks.contains(&block)
    }
}
