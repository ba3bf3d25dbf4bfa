//! Row handles into the module's definition tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a row of one of the module's definition tables.
///
/// The table id sits in the top byte, the 1-based row in the lower 24 bits.
/// Row 0 is the null handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub u32);

impl Token {
    /// Table id of type definitions
    pub const TYPE_DEF: u8 = 0x02;
    /// Table id of field definitions
    pub const FIELD: u8 = 0x04;
    /// Table id of method definitions
    pub const METHOD_DEF: u8 = 0x06;
    /// Table id of property definitions
    pub const PROPERTY: u8 = 0x17;

    /// Wraps a raw token value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a 1-based row
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Raw value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Table id
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// 1-based row
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// True for the null handle
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Zero-based index into the table this token points at, `None` for null rows
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        (self.row() as usize).checked_sub(1)
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token({:#010x} @ {:#04x}:{})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
