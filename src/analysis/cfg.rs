//! Control Flow Graph over a method body.
//!
//! [`ControlFlowGraph`] derives successor and predecessor relations from block terminators
//! and the exception handler table, and validates the structural rules the weaver and
//! the interpreter rely on.

use std::collections::{BTreeSet, VecDeque};

use crate::{
    assembly::{BlockId, MethodBody, Terminator},
    Result,
};

/// Kind of a CFG edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgEdgeKind {
    /// Edge from a terminator
    Normal,
    /// Edge from a protected block to a handler entry
    Exception,
}

/// Directed edge between two blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgEdge {
    /// Source block
    pub from: BlockId,
    /// Target block
    pub to: BlockId,
    /// Edge kind
    pub kind: CfgEdgeKind,
}

/// A control flow graph borrowed from a [`MethodBody`].
///
/// # Examples
///
/// ```rust
/// use aspectweave::analysis::ControlFlowGraph;
/// use aspectweave::assembly::{BlockId, MethodBodyBuilder};
///
/// # fn example() -> aspectweave::Result<()> {
/// let body = MethodBodyBuilder::new()
///     .implementation(|asm| {
///         asm.ldarg(0).brtrue(BlockId(2));
///         asm.ldc_i4(0).ret();
///         asm.ldc_i4(1).ret();
///         Ok(())
///     })
///     .build()?;
/// let cfg = ControlFlowGraph::new(&body);
/// assert_eq!(cfg.return_blocks(), vec![BlockId(1), BlockId(2)]);
/// # Ok(())
/// # }
/// ```
pub struct ControlFlowGraph<'a> {
    body: &'a MethodBody,
    edges: Vec<CfgEdge>,
}

impl<'a> ControlFlowGraph<'a> {
    /// Builds the graph for `body`
    #[must_use]
    pub fn new(body: &'a MethodBody) -> Self {
        let mut edges = Vec::new();
        for id in body.block_ids() {
            let block = &body.blocks[id.0];
            for to in block.terminator.successors() {
                edges.push(CfgEdge {
                    from: id,
                    to,
                    kind: CfgEdgeKind::Normal,
                });
            }
            for handler in body.handlers.iter().filter(|h| h.protects(id)) {
                edges.push(CfgEdge {
                    from: id,
                    to: handler.handler_entry,
                    kind: CfgEdgeKind::Exception,
                });
            }
        }
        ControlFlowGraph { body, edges }
    }

    /// The underlying body
    #[must_use]
    pub fn body(&self) -> &'a MethodBody {
        self.body
    }

    /// Entry block
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.body.entry
    }

    /// All edges
    #[must_use]
    pub fn edges(&self) -> &[CfgEdge] {
        &self.edges
    }

    /// Direct successors of `block`, normal edges first
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.edges
            .iter()
            .filter(|e| e.from == block)
            .map(|e| e.to)
            .collect()
    }

    /// Direct predecessors of `block`
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.edges
            .iter()
            .filter(|e| e.to == block)
            .map(|e| e.from)
            .collect()
    }

    /// Blocks reachable from `start`, following normal and exception edges
    #[must_use]
    pub fn reachable_from(&self, start: BlockId) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(block) = queue.pop_front() {
            if !seen.insert(block) {
                continue;
            }
            queue.extend(self.successors(block));
        }
        seen
    }

    /// Blocks reachable from the entry
    #[must_use]
    pub fn reachable(&self) -> BTreeSet<BlockId> {
        self.reachable_from(self.entry())
    }

    /// Blocks ending in `Return`, in id order
    #[must_use]
    pub fn return_blocks(&self) -> Vec<BlockId> {
        self.body
            .block_ids()
            .filter(|id| self.body.blocks[id.0].terminator == Terminator::Return)
            .collect()
    }

    /// Checks the structural rules of the body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if:
    /// - The entry block or a terminator target does not exist
    /// - A handler references a missing block or overlaps its own protected region
    /// - A `Return` sits inside a finally or fault handler
    /// - An `EndFinally` sits outside a finally or fault handler
    /// - A `Rethrow` sits outside a catch handler
    /// - A jump enters a handler body from outside
    pub fn validate(&self) -> Result<()> {
        let body = self.body;
        let exists = |id: BlockId| id.0 < body.blocks.len();

        if !exists(body.entry) {
            return Err(malformed_error!("Entry block {} does not exist", body.entry));
        }

        for (index, handler) in body.handlers.iter().enumerate() {
            if let Some(missing) = handler
                .try_blocks
                .iter()
                .chain(handler.handler_blocks.iter())
                .find(|id| !exists(**id))
            {
                return Err(malformed_error!(
                    "Handler {} references missing block {}",
                    index,
                    missing
                ));
            }
            if !handler.handles_in(handler.handler_entry) {
                return Err(malformed_error!(
                    "Handler {} entry {} is not part of its handler blocks",
                    index,
                    handler.handler_entry
                ));
            }
            if handler
                .try_blocks
                .intersection(&handler.handler_blocks)
                .next()
                .is_some()
            {
                return Err(malformed_error!(
                    "Handler {} protects its own handler blocks",
                    index
                ));
            }
            if handler.is_catch() && handler.catch_type.is_none() {
                return Err(malformed_error!("Catch handler {} has no catch type", index));
            }
        }

        for id in body.block_ids() {
            let terminator = &body.blocks[id.0].terminator;
            for target in terminator.successors() {
                if !exists(target) {
                    return Err(malformed_error!("{} targets missing block {}", id, target));
                }
                for handler in &body.handlers {
                    if handler.handles_in(target) && !handler.handles_in(id) {
                        return Err(malformed_error!(
                            "{} jumps into handler body at {}",
                            id,
                            target
                        ));
                    }
                }
            }

            let containing = || body.handlers.iter().filter(move |h| h.handles_in(id));
            match terminator {
                Terminator::Return => {
                    if containing().any(|h| h.is_finally() || h.is_fault()) {
                        return Err(malformed_error!("{} returns from inside a finally handler", id));
                    }
                }
                Terminator::EndFinally => {
                    if !containing().any(|h| h.is_finally() || h.is_fault()) {
                        return Err(malformed_error!("{} ends a finally outside a finally handler", id));
                    }
                }
                Terminator::Rethrow => {
                    if !containing().any(|h| h.is_catch()) {
                        return Err(malformed_error!("{} rethrows outside a catch handler", id));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
