//! Method body builder for creating IR method implementations.
//!
//! This module provides [`MethodBodyBuilder`] for creating method bodies with local
//! variables and exception handlers, and [`BodyAssembler`], the fluent instruction emitter
//! handed to the implementation closure. Blocks are numbered in emission order: every
//! terminator closes the current block and the next instruction opens block `n + 1`.
//! Conditional branches fall through to the block emitted next.

use crate::{
    analysis::ControlFlowGraph,
    assembly::{
        body::{BasicBlock, MethodBody},
        exceptions::ExceptionHandler,
        instruction::{BlockId, BranchKind, Instruction, Terminator},
    },
    metadata::{
        memberref::{FieldRef, MethodRef},
        signatures::{TypeRef, TypeSig},
        token::Token,
    },
    Result,
};

/// Type alias for method body implementation closures
type ImplementationFn = Box<dyn FnOnce(&mut BodyAssembler) -> Result<()>>;

/// Fluent emitter for basic blocks
#[derive(Debug, Default)]
pub struct BodyAssembler {
    base: usize,
    blocks: Vec<BasicBlock>,
    current: Vec<Instruction>,
}

macro_rules! simple_ops {
    ($($(#[$doc:meta])* $name:ident => $ins:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(&mut self) -> &mut Self {
                self.emit(Instruction::$ins)
            }
        )*
    };
}

macro_rules! conditional_branches {
    ($($(#[$doc:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(&mut self, target: BlockId) -> &mut Self {
                let fallthrough = self.next_block();
                self.terminate(Terminator::Branch {
                    kind: BranchKind::$kind,
                    target,
                    fallthrough,
                })
            }
        )*
    };
}

impl BodyAssembler {
    /// A new assembler positioned at block 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An assembler whose first block gets id `first`, for appending to an existing body
    #[must_use]
    pub fn starting_at(first: BlockId) -> Self {
        BodyAssembler {
            base: first.0,
            ..Self::default()
        }
    }

    /// Id of the block currently being emitted
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        BlockId(self.base + self.blocks.len())
    }

    fn next_block(&self) -> BlockId {
        BlockId(self.base + self.blocks.len() + 1)
    }

    /// Appends an instruction to the current block
    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.current.push(instruction);
        self
    }

    /// Closes the current block with `terminator`
    pub fn terminate(&mut self, terminator: Terminator) -> &mut Self {
        let instructions = std::mem::take(&mut self.current);
        self.blocks.push(BasicBlock::new(instructions, terminator));
        self
    }

    simple_ops! {
        /// `nop`
        nop => Nop;
        /// `ldnull`
        ldnull => Ldnull;
        /// `dup`
        dup => Dup;
        /// `pop`
        pop => Pop;
        /// `add`
        add => Add;
        /// `sub`
        sub => Sub;
        /// `mul`
        mul => Mul;
        /// `div`
        div => Div;
        /// `rem`
        rem => Rem;
        /// `neg`
        neg => Neg;
        /// `ceq`
        ceq => Ceq;
        /// `cgt`
        cgt => Cgt;
        /// `clt`
        clt => Clt;
        /// `ldlen`
        ldlen => Ldlen;
    }

    /// `ldarg n`
    pub fn ldarg(&mut self, n: u16) -> &mut Self {
        self.emit(Instruction::Ldarg(n))
    }

    /// `ldarga n`
    pub fn ldarga(&mut self, n: u16) -> &mut Self {
        self.emit(Instruction::Ldarga(n))
    }

    /// `starg n`
    pub fn starg(&mut self, n: u16) -> &mut Self {
        self.emit(Instruction::Starg(n))
    }

    /// `ldloc n`
    pub fn ldloc(&mut self, n: u16) -> &mut Self {
        self.emit(Instruction::Ldloc(n))
    }

    /// `ldloca n`
    pub fn ldloca(&mut self, n: u16) -> &mut Self {
        self.emit(Instruction::Ldloca(n))
    }

    /// `stloc n`
    pub fn stloc(&mut self, n: u16) -> &mut Self {
        self.emit(Instruction::Stloc(n))
    }

    /// `ldc.i4 value`
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        self.emit(Instruction::LdcI4(value))
    }

    /// `ldc.i8 value`
    pub fn ldc_i8(&mut self, value: i64) -> &mut Self {
        self.emit(Instruction::LdcI8(value))
    }

    /// `ldc.r8 value`
    pub fn ldc_r8(&mut self, value: f64) -> &mut Self {
        self.emit(Instruction::LdcR8(value))
    }

    /// `ldstr value`
    pub fn ldstr(&mut self, value: &str) -> &mut Self {
        self.emit(Instruction::Ldstr(value.to_string()))
    }

    /// `call method`
    pub fn call(&mut self, method: MethodRef) -> &mut Self {
        self.emit(Instruction::Call(method))
    }

    /// `callvirt method`
    pub fn callvirt(&mut self, method: MethodRef) -> &mut Self {
        self.emit(Instruction::Callvirt(method))
    }

    /// `newobj ctor`
    pub fn newobj(&mut self, ctor: MethodRef) -> &mut Self {
        self.emit(Instruction::Newobj(ctor))
    }

    /// `ldfld field`
    pub fn ldfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit(Instruction::Ldfld(field))
    }

    /// `stfld field`
    pub fn stfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit(Instruction::Stfld(field))
    }

    /// `ldsfld field`
    pub fn ldsfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit(Instruction::Ldsfld(field))
    }

    /// `stsfld field`
    pub fn stsfld(&mut self, field: FieldRef) -> &mut Self {
        self.emit(Instruction::Stsfld(field))
    }

    /// `box sig`
    pub fn box_value(&mut self, sig: TypeSig) -> &mut Self {
        self.emit(Instruction::Box(sig))
    }

    /// `newarr element`
    pub fn newarr(&mut self, element: TypeSig) -> &mut Self {
        self.emit(Instruction::Newarr(element))
    }

    /// `stelem element`
    pub fn stelem(&mut self, element: TypeSig) -> &mut Self {
        self.emit(Instruction::Stelem(element))
    }

    /// `ldelem element`
    pub fn ldelem(&mut self, element: TypeSig) -> &mut Self {
        self.emit(Instruction::Ldelem(element))
    }

    /// `ldind sig`
    pub fn ldind(&mut self, sig: TypeSig) -> &mut Self {
        self.emit(Instruction::Ldind(sig))
    }

    /// `stind sig`
    pub fn stind(&mut self, sig: TypeSig) -> &mut Self {
        self.emit(Instruction::Stind(sig))
    }

    /// `ldtoken token`
    pub fn ldtoken(&mut self, token: Token) -> &mut Self {
        self.emit(Instruction::Ldtoken(token))
    }

    /// `ret`
    pub fn ret(&mut self) -> &mut Self {
        self.terminate(Terminator::Return)
    }

    /// `br target`
    pub fn br(&mut self, target: BlockId) -> &mut Self {
        self.terminate(Terminator::Jump(target))
    }

    /// `leave target`
    pub fn leave(&mut self, target: BlockId) -> &mut Self {
        self.terminate(Terminator::Leave(target))
    }

    /// `throw`
    pub fn throw(&mut self) -> &mut Self {
        self.terminate(Terminator::Throw)
    }

    /// `rethrow`
    pub fn rethrow(&mut self) -> &mut Self {
        self.terminate(Terminator::Rethrow)
    }

    /// `endfinally`
    pub fn endfinally(&mut self) -> &mut Self {
        self.terminate(Terminator::EndFinally)
    }

    /// `switch targets`, falling through to the next block
    pub fn switch(&mut self, targets: Vec<BlockId>) -> &mut Self {
        let default = self.next_block();
        self.terminate(Terminator::Switch { targets, default })
    }

    conditional_branches! {
        /// `brtrue target`
        brtrue => True;
        /// `brfalse target`
        brfalse => False;
        /// `beq target`
        beq => Beq;
        /// `bne.un target`
        bne_un => NeUn;
        /// `blt target`
        blt => Blt;
        /// `ble target`
        ble => Ble;
        /// `bgt target`
        bgt => Bgt;
        /// `bge target`
        bge => Bge;
    }

    /// Consumes the assembler and returns the emitted blocks
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if instructions follow the last terminator or
    /// nothing was emitted.
    pub fn finish(self) -> Result<Vec<BasicBlock>> {
        if !self.current.is_empty() {
            return Err(malformed_error!(
                "Block {} is not terminated",
                self.current_block()
            ));
        }
        if self.blocks.is_empty() {
            return Err(malformed_error!("Method body has no blocks"));
        }
        Ok(self.blocks)
    }
}

/// Builder for creating method bodies.
///
/// # Examples
///
/// ```rust
/// use aspectweave::assembly::MethodBodyBuilder;
/// use aspectweave::metadata::signatures::TypeSig;
///
/// # fn example() -> aspectweave::Result<()> {
/// let body = MethodBodyBuilder::new()
///     .local(TypeSig::I4)
///     .implementation(|asm| {
///         asm.ldarg(0).ldarg(1).add().stloc(0).ldloc(0).ret();
///         Ok(())
///     })
///     .build()?;
/// assert_eq!(body.blocks.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MethodBodyBuilder {
    /// Initialize locals to zero
    init_locals: bool,

    /// Local variable types
    locals: Vec<TypeSig>,

    /// The implementation closure
    implementation: Option<ImplementationFn>,

    /// Exception handlers for try/catch/finally blocks
    exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBodyBuilder {
    /// Create a new method body builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            init_locals: true,
            locals: Vec::new(),
            implementation: None,
            exception_handlers: Vec::new(),
        }
    }

    /// Declare a local variable. Locals are numbered in declaration order.
    #[must_use]
    pub fn local(mut self, local_type: TypeSig) -> Self {
        self.locals.push(local_type);
        self
    }

    /// Set whether locals are zero-initialized on entry.
    #[must_use]
    pub fn init_locals(mut self, init: bool) -> Self {
        self.init_locals = init;
        self
    }

    /// Add an exception handler built elsewhere.
    #[must_use]
    pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_handlers.push(handler);
        self
    }

    /// Add a typed catch handler.
    ///
    /// # Arguments
    ///
    /// * `exception_type` - Full name of the caught exception type
    /// * `try_blocks` - Indices of the protected blocks
    /// * `handler_blocks` - Indices of the handler blocks, the lowest is the handler entry
    #[must_use]
    pub fn catch_handler(
        mut self,
        exception_type: &str,
        try_blocks: impl IntoIterator<Item = usize>,
        handler_blocks: impl IntoIterator<Item = usize>,
    ) -> Self {
        let handler_blocks: Vec<BlockId> = handler_blocks.into_iter().map(BlockId).collect();
        let entry = handler_blocks.iter().min().copied().unwrap_or(BlockId(0));
        self.exception_handlers.push(ExceptionHandler::catch(
            TypeRef::local(exception_type),
            try_blocks.into_iter().map(BlockId),
            handler_blocks,
            entry,
        ));
        self
    }

    /// Add a finally handler.
    ///
    /// # Arguments
    ///
    /// * `try_blocks` - Indices of the protected blocks
    /// * `handler_blocks` - Indices of the handler blocks, the lowest is the handler entry
    #[must_use]
    pub fn finally_handler(
        mut self,
        try_blocks: impl IntoIterator<Item = usize>,
        handler_blocks: impl IntoIterator<Item = usize>,
    ) -> Self {
        let handler_blocks: Vec<BlockId> = handler_blocks.into_iter().map(BlockId).collect();
        let entry = handler_blocks.iter().min().copied().unwrap_or(BlockId(0));
        self.exception_handlers.push(ExceptionHandler::finally(
            try_blocks.into_iter().map(BlockId),
            handler_blocks,
            entry,
        ));
        self
    }

    /// Set the method implementation using the block assembler.
    #[must_use]
    pub fn implementation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut BodyAssembler) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(f));
        self
    }

    /// Build and validate the method body.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No implementation was provided
    /// - The implementation closure returns an error
    /// - A block is left unterminated
    /// - The control flow graph fails validation
    pub fn build(self) -> Result<MethodBody> {
        let MethodBodyBuilder {
            init_locals,
            locals,
            implementation,
            exception_handlers,
        } = self;

        let implementation = implementation
            .ok_or_else(|| malformed_error!("Method body implementation is required"))?;

        let mut assembler = BodyAssembler::new();
        implementation(&mut assembler)?;
        let blocks = assembler.finish()?;

        let body = MethodBody {
            locals,
            blocks,
            handlers: exception_handlers,
            entry: BlockId(0),
            init_locals,
        };
        ControlFlowGraph::new(&body).validate()?;
        Ok(body)
    }
}

impl Default for MethodBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
