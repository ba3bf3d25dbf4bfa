//! Debug symbols kept next to a module in `<module>.pdb`.
//!
//! The side-file maps instruction positions, addressed as (block, index) inside a method
//! body, to source locations. Weaving moves the original code of a method into new blocks
//! only when it splits a constructor; [`SymbolFile::remap`] follows such a split so that
//! the points keep describing the same instructions. Synthesized blocks carry no points
//! and show up as hidden code in a debugger.
//!
//! # Key Components
//!
//! - [`SequencePoint`] - A single mapping from instruction position to source line
//! - [`MethodSymbols`] - All sequence points of one method
//! - [`SymbolFile`] - The whole side-file, loaded and saved as JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    assembly::BlockId,
    file::{self, Backend, Physical},
    metadata::token::Token,
    weaver::transform::BlockSplit,
    Result,
};

/// Line number marking compiler generated code
pub const HIDDEN_LINE: u32 = 0x00FE_EFEE;

/// Maps one instruction to a source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePoint {
    /// Block holding the instruction
    pub block: BlockId,
    /// Index of the instruction inside the block
    pub index: usize,
    /// Source document path
    pub document: String,
    /// 1-based source line
    pub line: u32,
}

impl SequencePoint {
    /// True if the point marks code without a source line
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.line == HIDDEN_LINE
    }
}

/// Sequence points of one method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSymbols {
    /// The method definition
    pub method: Token,
    /// Points in instruction order
    pub points: Vec<SequencePoint>,
}

/// The debug-symbol side-file of a module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFile {
    /// Name of the module the symbols belong to
    pub module: String,
    /// Per-method sequence points
    #[serde(default)]
    pub methods: Vec<MethodSymbols>,
}

impl SymbolFile {
    /// An empty side-file for `module`
    pub fn new(module: impl Into<String>) -> Self {
        SymbolFile {
            module: module.into(),
            methods: Vec::new(),
        }
    }

    /// Reads the side-file at `path`
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read and
    /// [`crate::Error::Json`] if its content does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let backend = Physical::new(path)?;
        if backend.is_empty() {
            return Err(malformed_error!("Symbol file {} is empty", path.display()));
        }
        Ok(serde_json::from_slice(backend.data())?)
    }

    /// Atomically writes the side-file to `path`
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        file::write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }

    /// Sequence points of `method`, if any were recorded
    #[must_use]
    pub fn method(&self, method: Token) -> Option<&MethodSymbols> {
        self.methods.iter().find(|m| m.method == method)
    }

    /// Records a point for `method`
    pub fn add_point(&mut self, method: Token, point: SequencePoint) {
        match self.methods.iter_mut().find(|m| m.method == method) {
            Some(symbols) => symbols.points.push(point),
            None => self.methods.push(MethodSymbols {
                method,
                points: vec![point],
            }),
        }
    }

    /// Moves the points of `method` that fell behind a block split into the tail block.
    ///
    /// Returns the number of points moved.
    pub fn remap(&mut self, method: Token, split: &BlockSplit) -> usize {
        let Some(symbols) = self.methods.iter_mut().find(|m| m.method == method) else {
            return 0;
        };

        let mut moved = 0;
        for point in &mut symbols.points {
            if point.block == split.block && point.index >= split.at {
                point.block = split.tail;
                point.index -= split.at;
                moved += 1;
            }
        }
        moved
    }
}
