use serde::{Deserialize, Serialize};

use crate::{
    assembly::{
        exceptions::ExceptionHandler,
        instruction::{BlockId, Instruction, Terminator},
    },
    metadata::signatures::TypeSig,
    Result,
};

/// A maximal straight-line instruction sequence ending in a single control transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Instructions executed in order
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    /// How control leaves the block
    pub terminator: Terminator,
}

impl BasicBlock {
    /// A block with the given instructions and terminator
    #[must_use]
    pub fn new(instructions: Vec<Instruction>, terminator: Terminator) -> Self {
        BasicBlock {
            instructions,
            terminator,
        }
    }
}

/// The IR body of a method: locals, blocks and the ordered handler table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodBody {
    /// Local variable types
    #[serde(default)]
    pub locals: Vec<TypeSig>,
    /// Basic blocks, addressed by [`BlockId`] index
    pub blocks: Vec<BasicBlock>,
    /// Exception handlers, innermost first
    #[serde(default)]
    pub handlers: Vec<ExceptionHandler>,
    /// First block executed
    #[serde(default = "entry_block")]
    pub entry: BlockId,
    /// Zero-initialize locals on entry
    #[serde(default = "init_locals_default")]
    pub init_locals: bool,
}

fn entry_block() -> BlockId {
    BlockId(0)
}

fn init_locals_default() -> bool {
    true
}

impl MethodBody {
    /// A body consisting of `blocks` with entry block 0
    #[must_use]
    pub fn new(blocks: Vec<BasicBlock>) -> Self {
        MethodBody {
            locals: Vec::new(),
            blocks,
            handlers: Vec::new(),
            entry: BlockId(0),
            init_locals: true,
        }
    }

    /// Block `id`
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    /// Mutable block `id`
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.0)
    }

    /// Appends a block and returns its id
    pub fn add_block(&mut self, block: BasicBlock) -> BlockId {
        self.blocks.push(block);
        BlockId(self.blocks.len() - 1)
    }

    /// Declares a new local and returns its slot
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when the local table is full.
    pub fn add_local(&mut self, sig: TypeSig) -> Result<u16> {
        let slot = u16::try_from(self.locals.len())
            .map_err(|_| malformed_error!("Too many locals in method body"))?;
        self.locals.push(sig);
        Ok(slot)
    }

    /// Ids of all blocks
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    /// True if `block` lies inside any handler body
    #[must_use]
    pub fn is_in_handler(&self, block: BlockId) -> bool {
        self.handlers.iter().any(|h| h.handles_in(block))
    }

    /// Splits `id` before instruction `at`. The tail and the terminator move into a new
    /// block that inherits every region membership of `id`; `id` jumps to it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `id` does not exist or `at` is out of range.
    pub fn split_block(&mut self, id: BlockId, at: usize) -> Result<BlockId> {
        let new_id = BlockId(self.blocks.len());
        let block = self
            .block_mut(id)
            .ok_or_else(|| malformed_error!("Block {} does not exist", id))?;
        if at > block.instructions.len() {
            return Err(malformed_error!(
                "Cannot split {} at {} - only {} instructions",
                id,
                at,
                block.instructions.len()
            ));
        }
        let tail = block.instructions.split_off(at);
        let terminator = std::mem::replace(&mut block.terminator, Terminator::Jump(new_id));
        self.blocks.push(BasicBlock::new(tail, terminator));

        for handler in &mut self.handlers {
            if handler.try_blocks.contains(&id) {
                handler.try_blocks.insert(new_id);
            }
            if handler.handler_blocks.contains(&id) {
                handler.handler_blocks.insert(new_id);
            }
        }
        Ok(new_id)
    }
}
