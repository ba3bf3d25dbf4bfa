//! Stack-machine instructions and block terminators.
//!
//! Straight-line code is a sequence of [`Instruction`]s; control transfer only happens at the
//! end of a basic block through its [`Terminator`]. Calls are regular instructions since
//! control returns to the next instruction of the same block.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::metadata::{
    memberref::{FieldRef, MethodRef},
    signatures::TypeSig,
    token::Token,
};

/// Index of a basic block within its method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A straight-line stack-machine instruction
#[derive(Debug, Clone, PartialEq, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Instruction {
    /// No operation
    Nop,
    /// Push argument `n`
    Ldarg(u16),
    /// Push the address of argument `n`
    Ldarga(u16),
    /// Pop into argument `n`
    Starg(u16),
    /// Push local `n`
    Ldloc(u16),
    /// Push the address of local `n`
    Ldloca(u16),
    /// Pop into local `n`
    Stloc(u16),
    /// Push a 32-bit integer
    #[strum(serialize = "ldc.i4")]
    LdcI4(i32),
    /// Push a 64-bit integer
    #[strum(serialize = "ldc.i8")]
    LdcI8(i64),
    /// Push a 32-bit float
    #[strum(serialize = "ldc.r4")]
    LdcR4(f32),
    /// Push a 64-bit float
    #[strum(serialize = "ldc.r8")]
    LdcR8(f64),
    /// Push a string literal
    Ldstr(String),
    /// Push a null reference
    Ldnull,
    /// Duplicate the top of stack
    Dup,
    /// Discard the top of stack
    Pop,
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Remainder
    Rem,
    /// Negation
    Neg,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Push 1 if the two top values are equal, else 0
    Ceq,
    /// Push 1 if value1 > value2, else 0
    Cgt,
    /// Push 1 if value1 < value2, else 0
    Clt,
    /// Convert the top of stack to a primitive type
    Conv(TypeSig),
    /// Call a method non-virtually
    Call(MethodRef),
    /// Call a method through virtual dispatch on the receiver
    Callvirt(MethodRef),
    /// Allocate an object and run its constructor
    Newobj(MethodRef),
    /// Load an instance field
    Ldfld(FieldRef),
    /// Store an instance field
    Stfld(FieldRef),
    /// Load a static field
    Ldsfld(FieldRef),
    /// Store a static field
    Stsfld(FieldRef),
    /// Box a value of the given type
    Box(TypeSig),
    /// Unbox (value types) or cast (reference types) to the given type
    #[strum(serialize = "unbox.any")]
    UnboxAny(TypeSig),
    /// Cast to the given type, throwing on failure
    Castclass(TypeSig),
    /// Cast to the given type, pushing null on failure
    Isinst(TypeSig),
    /// Allocate a single-dimension array of the given element type
    Newarr(TypeSig),
    /// Push an array length
    Ldlen,
    /// Load an array element
    Ldelem(TypeSig),
    /// Store an array element
    Stelem(TypeSig),
    /// Load through a managed pointer
    Ldind(TypeSig),
    /// Store through a managed pointer
    Stind(TypeSig),
    /// Push a runtime handle for a member
    Ldtoken(Token),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.as_ref();
        match self {
            Instruction::Ldarg(n)
            | Instruction::Ldarga(n)
            | Instruction::Starg(n)
            | Instruction::Ldloc(n)
            | Instruction::Ldloca(n)
            | Instruction::Stloc(n) => write!(f, "{mnemonic} {n}"),
            Instruction::LdcI4(v) => write!(f, "{mnemonic} {v}"),
            Instruction::LdcI8(v) => write!(f, "{mnemonic} {v}"),
            Instruction::LdcR4(v) => write!(f, "{mnemonic} {v}"),
            Instruction::LdcR8(v) => write!(f, "{mnemonic} {v}"),
            Instruction::Ldstr(s) => write!(f, "{mnemonic} \"{}\"", s.escape_default()),
            Instruction::Conv(sig)
            | Instruction::Box(sig)
            | Instruction::UnboxAny(sig)
            | Instruction::Castclass(sig)
            | Instruction::Isinst(sig)
            | Instruction::Newarr(sig)
            | Instruction::Ldelem(sig)
            | Instruction::Stelem(sig)
            | Instruction::Ldind(sig)
            | Instruction::Stind(sig) => write!(f, "{mnemonic} {sig}"),
            Instruction::Call(m) | Instruction::Callvirt(m) | Instruction::Newobj(m) => {
                write!(f, "{mnemonic} {m}")
            }
            Instruction::Ldfld(fld)
            | Instruction::Stfld(fld)
            | Instruction::Ldsfld(fld)
            | Instruction::Stsfld(fld) => write!(f, "{mnemonic} {fld}"),
            Instruction::Ldtoken(token) => write!(f, "{mnemonic} {token}"),
            _ => f.write_str(mnemonic),
        }
    }
}

/// Condition evaluated by a conditional [`Terminator::Branch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum BranchKind {
    /// Pop one value, branch if non-zero / non-null
    #[strum(serialize = "brtrue")]
    True,
    /// Pop one value, branch if zero / null
    #[strum(serialize = "brfalse")]
    False,
    /// Pop two values, branch if equal
    Beq,
    /// Pop two values, branch if not equal
    #[strum(serialize = "bne.un")]
    NeUn,
    /// Pop two values, branch if value1 < value2
    Blt,
    /// Pop two values, branch if value1 <= value2
    Ble,
    /// Pop two values, branch if value1 > value2
    Bgt,
    /// Pop two values, branch if value1 >= value2
    Bge,
}

impl BranchKind {
    /// Number of stack operands consumed by the condition
    #[must_use]
    pub fn operands(self) -> usize {
        match self {
            BranchKind::True | BranchKind::False => 1,
            _ => 2,
        }
    }
}

/// How control leaves a block, mirroring the flow classes of the instruction set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Returns from current method
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
}

/// Control transfer at the end of a basic block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional jump
    Jump(BlockId),
    /// Conditional branch; `fallthrough` is taken when the condition is false
    Branch {
        /// Condition
        kind: BranchKind,
        /// Target when the condition holds
        target: BlockId,
        /// Target otherwise
        fallthrough: BlockId,
    },
    /// Jump table on the popped 32-bit index
    Switch {
        /// Targets by index
        targets: Vec<BlockId>,
        /// Target for out-of-range indices
        default: BlockId,
    },
    /// Exit the enclosing protected regions, running their finally handlers
    Leave(BlockId),
    /// Return from the method, popping the return value for non-void methods
    Return,
    /// Throw the exception object on top of the stack
    Throw,
    /// Rethrow the exception being handled by the enclosing catch handler
    Rethrow,
    /// End of a finally or fault handler
    EndFinally,
}

impl Terminator {
    /// Flow class of this terminator
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        match self {
            Terminator::Jump(_) => FlowType::UnconditionalBranch,
            Terminator::Branch { .. } => FlowType::ConditionalBranch,
            Terminator::Switch { .. } => FlowType::Switch,
            Terminator::Leave(_) => FlowType::Leave,
            Terminator::Return => FlowType::Return,
            Terminator::Throw | Terminator::Rethrow => FlowType::Throw,
            Terminator::EndFinally => FlowType::EndFinally,
        }
    }

    /// Blocks control can reach directly from this terminator
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) | Terminator::Leave(target) => vec![*target],
            Terminator::Branch {
                target,
                fallthrough,
                ..
            } => vec![*target, *fallthrough],
            Terminator::Switch { targets, default } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            Terminator::Return
            | Terminator::Throw
            | Terminator::Rethrow
            | Terminator::EndFinally => Vec::new(),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "br {target}"),
            Terminator::Branch {
                kind,
                target,
                fallthrough,
            } => write!(f, "{} {target} else {fallthrough}", kind.as_ref()),
            Terminator::Switch { targets, default } => {
                f.write_str("switch (")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{target}")?;
                }
                write!(f, ") else {default}")
            }
            Terminator::Leave(target) => write!(f, "leave {target}"),
            Terminator::Return => f.write_str("ret"),
            Terminator::Throw => f.write_str("throw"),
            Terminator::Rethrow => f.write_str("rethrow"),
            Terminator::EndFinally => f.write_str("endfinally"),
        }
    }
}
