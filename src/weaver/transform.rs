//! Method body transformer.
//!
//! Rewrites one method body so that every activation runs the lifecycle hooks of its
//! effective aspect set:
//!
//! ```text
//! P   args = new object[] {..}; ctx = new MethodExecInfo(args)        (outside all regions)
//! try {                                                               (finally region)
//!     E   OnEntry x N, flow check after each
//!     try {                                                           (catch region)
//!         original body, every `ret` becomes `stloc result; leave S`
//!     } catch (Exception exc) {
//!     C   ctx.Exception = exc; OnException x N reversed, flow check after each
//!         rethrow exc, or throw ctx.Exception if a hook replaced it
//!     }
//!     S   ctx.ReturnValue = result; OnSuccess x N reversed, flow check after each
//!     leave R
//! } finally {
//! F   OnExit x N reversed
//! }
//! R   return (T) ctx.ReturnValue
//! ```
//!
//! A flow check leaves to `R` when a hook asked for `ExecFlow.Return` and throws
//! `ctx.Exception` when it asked for `ExecFlow.ThrowException` with a non-null exception. By-ref
//! arguments are copied back into the argument array before each exit-side hook sequence so
//! hooks observe their current value.
//!
//! For instance constructors the prologue and the protected regions start after the chained
//! `this`/`base` constructor call; the blocks before it are left outside every region.

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::{
    analysis::ControlFlowGraph,
    assembly::{BasicBlock, BlockId, BodyAssembler, ExceptionHandler, Instruction, MethodBody, Terminator},
    metadata::{
        memberref::FieldRef,
        method::MethodDef,
        signatures::{TypeRef, TypeSig},
    },
    weaver::contract::{self, ExecFlow, Hook},
    Result,
};

/// Blocks emitted for one hook call followed by its flow check
const HOOK_BLOCKS: usize = 5;
/// Blocks closing the catch handler after the last hook
const CATCH_TAIL_BLOCKS: usize = 4;

/// Where a block was split to separate a constructor's chained call from its body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSplit {
    /// The block that was split
    pub block: BlockId,
    /// Instruction index where the tail starts
    pub at: usize,
    /// New block holding the tail
    pub tail: BlockId,
}

/// Structural summary of one rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Number of blocks before weaving, not counting a split tail
    pub original_blocks: usize,
    /// Constructor split, if one was needed
    pub split: Option<BlockSplit>,
    /// Entry block of the original body after weaving
    pub body_start: BlockId,
}

/// Locals added to the method
#[derive(Debug, Clone)]
struct Slots {
    ctx: u16,
    args: u16,
    result: Option<u16>,
    exc: u16,
    /// Zero-initialized stand-ins for `out` parameters, by parameter index
    out_zero: Vec<Option<u16>>,
}

/// Block ids of the synthesized sections
#[derive(Debug, Clone, Copy)]
struct Layout {
    prologue: BlockId,
    entry_hooks: BlockId,
    catch: BlockId,
    success: BlockId,
    finally: BlockId,
    ret: BlockId,
    end: BlockId,
}

impl Layout {
    fn new(first: usize, aspects: usize) -> Self {
        let hooks = HOOK_BLOCKS * aspects;
        let prologue = first;
        let entry_hooks = prologue + 1;
        let catch = entry_hooks + hooks;
        let success = catch + hooks + CATCH_TAIL_BLOCKS;
        let finally = success + hooks + 1;
        let ret = finally + 1;
        Layout {
            prologue: BlockId(prologue),
            entry_hooks: BlockId(entry_hooks),
            catch: BlockId(catch),
            success: BlockId(success),
            finally: BlockId(finally),
            ret: BlockId(ret),
            end: BlockId(ret + 1),
        }
    }

    fn range(from: BlockId, to: BlockId) -> impl Iterator<Item = BlockId> {
        (from.0..to.0).map(BlockId)
    }
}

/// The method being rewritten, as seen by the emitters
struct Frame<'a> {
    method: &'a MethodDef,
    slots: Slots,
    aspects: &'a [FieldRef],
}

/// Instruments `method` with the aspects whose instance slots are `aspects`, in call order.
///
/// `own_type` and `base_type` identify the constructors whose chained call marks the real
/// start of an instance constructor body.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the method has no body, returns by reference, or has
/// a body that does not validate before or after the rewrite.
pub fn weave_method(
    method: &mut MethodDef,
    own_type: &TypeRef,
    base_type: Option<&TypeRef>,
    aspects: &[FieldRef],
) -> Result<TransformOutcome> {
    if aspects.is_empty() {
        return Err(malformed_error!("{} has no aspects to weave", method.name));
    }
    if method.return_type.is_by_ref() {
        return Err(malformed_error!("{} returns by reference", method.name));
    }
    let mut body = method
        .body
        .take()
        .ok_or_else(|| malformed_error!("{} has no body to weave", method.name))?;
    let outcome = rewrite(method, &mut body, own_type, base_type, aspects);
    method.body = Some(body);
    outcome
}

fn rewrite(
    method: &MethodDef,
    body: &mut MethodBody,
    own_type: &TypeRef,
    base_type: Option<&TypeRef>,
    aspects: &[FieldRef],
) -> Result<TransformOutcome> {
    ControlFlowGraph::new(body).validate()?;
    let original_blocks = body.blocks.len();

    let split = if method.is_constructor() {
        split_constructor(body, own_type, base_type)?
    } else {
        None
    };
    let (body_start, outside) = match split {
        Some(split) => {
            let cfg = ControlFlowGraph::new(body);
            let inside = cfg.reachable_from(split.tail);
            let outside = reachable_avoiding(&cfg, body.entry, split.tail);
            if let Some(shared) = outside.intersection(&inside).next() {
                return Err(malformed_error!(
                    "{} branches back before the chained constructor call at {}",
                    method.name,
                    shared
                ));
            }
            (split.tail, outside)
        }
        None => (body.entry, BTreeSet::new()),
    };
    let region: BTreeSet<BlockId> = body.block_ids().filter(|id| !outside.contains(id)).collect();

    let slots = add_locals(method, body)?;
    let layout = Layout::new(body.blocks.len(), aspects.len());

    for id in &region {
        let block = &mut body.blocks[id.0];
        if block.terminator == Terminator::Return {
            if let Some(result) = slots.result {
                block.instructions.push(Instruction::Stloc(result));
            }
            block.terminator = Terminator::Leave(layout.success);
        }
    }

    match split {
        Some(split) => {
            body.blocks[split.block.0].terminator = Terminator::Jump(layout.prologue);
        }
        None => body.entry = layout.prologue,
    }

    let frame = Frame {
        method,
        slots,
        aspects,
    };
    let blocks = emit_sections(&frame, &layout, body_start)?;
    body.blocks.extend(blocks);
    body.init_locals = true;

    let catch_try = region.clone();
    let catch_blocks: Vec<BlockId> = Layout::range(layout.catch, layout.success).collect();
    let finally_try: BTreeSet<BlockId> = Layout::range(layout.entry_hooks, layout.catch)
        .chain(region)
        .chain(catch_blocks.iter().copied())
        .chain(Layout::range(layout.success, layout.finally))
        .collect();
    body.handlers.push(ExceptionHandler::catch(
        contract::exception_type(),
        catch_try,
        catch_blocks,
        layout.catch,
    ));
    body.handlers.push(ExceptionHandler::finally(
        finally_try,
        [layout.finally],
        layout.finally,
    ));

    ControlFlowGraph::new(body).validate()?;
    Ok(TransformOutcome {
        original_blocks,
        split,
        body_start,
    })
}

/// Splits the block holding the chained constructor call so the body starts right after it
fn split_constructor(
    body: &mut MethodBody,
    own_type: &TypeRef,
    base_type: Option<&TypeRef>,
) -> Result<Option<BlockSplit>> {
    let chains_to = |ty: &TypeRef| {
        ty.full_name == own_type.full_name
            || base_type.is_some_and(|base| ty.full_name == base.full_name)
    };
    let order: Vec<BlockId> = {
        let cfg = ControlFlowGraph::new(body);
        breadth_first(&cfg, body.entry)
    };
    let found = order.into_iter().find_map(|id| {
        body.blocks[id.0]
            .instructions
            .iter()
            .position(|ins| matches!(ins, Instruction::Call(m) if m.is_constructor() && chains_to(&m.declaring_type)))
            .map(|at| (id, at + 1))
    });
    let Some((block, at)) = found else {
        return Ok(None);
    };
    if body.handlers.iter().any(|h| h.protects(block) || h.handles_in(block)) {
        return Err(malformed_error!(
            "Chained constructor call in {} sits inside a protected region",
            block
        ));
    }
    let tail = body.split_block(block, at)?;
    Ok(Some(BlockSplit { block, at, tail }))
}

fn breadth_first(cfg: &ControlFlowGraph<'_>, start: BlockId) -> Vec<BlockId> {
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(block) = queue.pop_front() {
        if seen.insert(block) {
            order.push(block);
            queue.extend(cfg.successors(block));
        }
    }
    order
}

fn reachable_avoiding(cfg: &ControlFlowGraph<'_>, start: BlockId, avoid: BlockId) -> BTreeSet<BlockId> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(block) = queue.pop_front() {
        if block == avoid || !seen.insert(block) {
            continue;
        }
        queue.extend(cfg.successors(block));
    }
    seen
}

fn add_locals(method: &MethodDef, body: &mut MethodBody) -> Result<Slots> {
    let ctx = body.add_local(TypeSig::Class(contract::exec_info_type()))?;
    let args = body.add_local(TypeSig::array_of(TypeSig::Object))?;
    let result = match method.return_type {
        TypeSig::Void => None,
        ref sig => Some(body.add_local(sig.clone())?),
    };
    let exc = body.add_local(TypeSig::Class(contract::exception_type()))?;
    let mut out_zero = Vec::with_capacity(method.params.len());
    for param in &method.params {
        out_zero.push(if param.is_out() {
            Some(body.add_local(param.sig.strip_by_ref().clone())?)
        } else {
            None
        });
    }
    Ok(Slots {
        ctx,
        args,
        result,
        exc,
        out_zero,
    })
}

fn emit_sections(frame: &Frame<'_>, layout: &Layout, body_start: BlockId) -> Result<Vec<BasicBlock>> {
    let mut asm = BodyAssembler::starting_at(layout.prologue);
    let at = |asm: &BodyAssembler, expected: BlockId, section: &str| {
        if asm.current_block() == expected {
            Ok(())
        } else {
            Err(malformed_error!(
                "{} section starts at {} instead of {}",
                section,
                asm.current_block(),
                expected
            ))
        }
    };

    frame.emit_prologue(&mut asm);
    asm.br(layout.entry_hooks);

    at(&asm, layout.entry_hooks, "entry")?;
    frame.emit_hooks(&mut asm, Hook::OnEntry, false, layout.ret, body_start, |_| {});

    at(&asm, layout.catch, "catch")?;
    let rethrow = RethrowBlocks::after(layout);
    frame.emit_hooks(&mut asm, Hook::OnException, true, layout.ret, rethrow.check, |asm| {
        frame.capture_exception(asm);
        frame.refresh_by_ref_args(asm);
    });
    frame.emit_catch_tail(&mut asm, rethrow);

    at(&asm, layout.success, "success")?;
    let leave = BlockId(layout.finally.0 - 1);
    frame.emit_hooks(&mut asm, Hook::OnSuccess, true, layout.ret, leave, |asm| {
        frame.capture_return_value(asm);
        frame.refresh_by_ref_args(asm);
    });
    asm.leave(layout.ret);

    at(&asm, layout.finally, "finally")?;
    frame.refresh_by_ref_args(&mut asm);
    for field in frame.aspects.iter().rev() {
        frame.emit_hook_call(&mut asm, field, Hook::OnExit);
    }
    asm.endfinally();

    at(&asm, layout.ret, "return")?;
    frame.emit_return(&mut asm);

    at(&asm, layout.end, "end")?;
    asm.finish()
}

/// Block ids of the catch handler's closing sequence
#[derive(Debug, Clone, Copy)]
struct RethrowBlocks {
    /// First block of the sequence
    check: BlockId,
    /// Last block, rethrowing the caught exception
    rethrow: BlockId,
}

impl RethrowBlocks {
    fn after(layout: &Layout) -> Self {
        let check = layout.success.0 - CATCH_TAIL_BLOCKS;
        RethrowBlocks {
            check: BlockId(check),
            rethrow: BlockId(check + CATCH_TAIL_BLOCKS - 1),
        }
    }
}

impl Frame<'_> {
    fn emit_prologue(&self, asm: &mut BodyAssembler) {
        let count = i32::try_from(self.method.params.len()).unwrap_or(i32::MAX);
        asm.ldc_i4(count).newarr(TypeSig::Object).stloc(self.slots.args);
        for (index, param) in self.method.params.iter().enumerate() {
            asm.ldloc(self.slots.args).ldc_i4(i32::try_from(index).unwrap_or(i32::MAX));
            let value_sig = param.sig.strip_by_ref().clone();
            match self.slots.out_zero.get(index).copied().flatten() {
                Some(zero) => {
                    asm.ldloc(zero);
                }
                None => {
                    asm.ldarg(self.method.arg_slot(index));
                    if param.sig.is_by_ref() {
                        asm.ldind(value_sig.clone());
                    }
                }
            }
            if value_sig.needs_boxing() {
                asm.box_value(value_sig);
            }
            asm.stelem(TypeSig::Object);
        }
        asm.ldloc(self.slots.args)
            .newobj(contract::exec_info_ctor())
            .stloc(self.slots.ctx);
    }

    fn refresh_by_ref_args(&self, asm: &mut BodyAssembler) {
        for (index, param) in self.method.params.iter().enumerate() {
            if !param.sig.is_by_ref() {
                continue;
            }
            let value_sig = param.sig.strip_by_ref().clone();
            asm.ldloc(self.slots.args)
                .ldc_i4(i32::try_from(index).unwrap_or(i32::MAX))
                .ldarg(self.method.arg_slot(index))
                .ldind(value_sig.clone());
            if value_sig.needs_boxing() {
                asm.box_value(value_sig);
            }
            asm.stelem(TypeSig::Object);
        }
    }

    fn capture_exception(&self, asm: &mut BodyAssembler) {
        asm.stloc(self.slots.exc)
            .ldloc(self.slots.ctx)
            .ldloc(self.slots.exc)
            .callvirt(contract::exec_info_setter("Exception"));
    }

    fn capture_return_value(&self, asm: &mut BodyAssembler) {
        let Some(result) = self.slots.result else {
            return;
        };
        asm.ldloc(self.slots.ctx).ldloc(result);
        if self.method.return_type.needs_boxing() {
            asm.box_value(self.method.return_type.clone());
        }
        asm.callvirt(contract::exec_info_setter("ReturnValue"));
    }

    fn emit_hook_call(&self, asm: &mut BodyAssembler, field: &FieldRef, hook: Hook) {
        asm.ldsfld(field.clone())
            .ldloc(self.slots.ctx)
            .callvirt(contract::hook_ref(hook));
    }

    /// One hook call per aspect, each followed by a flow check. The first block starts with
    /// `prefix`; the last check continues at `cont`.
    fn emit_hooks<F>(
        &self,
        asm: &mut BodyAssembler,
        hook: Hook,
        reversed: bool,
        ret: BlockId,
        cont: BlockId,
        prefix: F,
    ) where
        F: FnOnce(&mut BodyAssembler),
    {
        let mut prefix = Some(prefix);
        let ordered: Vec<&FieldRef> = if reversed {
            self.aspects.iter().rev().collect()
        } else {
            self.aspects.iter().collect()
        };
        let count = ordered.len();
        for (i, field) in ordered.into_iter().enumerate() {
            if let Some(prefix) = prefix.take() {
                prefix(asm);
            }
            let first = asm.current_block();
            let next = if i + 1 == count {
                cont
            } else {
                BlockId(first.0 + HOOK_BLOCKS)
            };
            self.emit_hook_call(asm, field, hook);
            self.emit_flow_check(asm, ret, next);
        }
    }

    fn emit_flow_check(&self, asm: &mut BodyAssembler, ret: BlockId, cont: BlockId) {
        let first = asm.current_block();
        let leave = BlockId(first.0 + HOOK_BLOCKS - 1);
        let ctx = self.slots.ctx;
        asm.ldloc(ctx)
            .callvirt(contract::exec_info_getter("ExecFlow"))
            .ldc_i4(ExecFlow::Return as i32)
            .beq(leave);
        asm.ldloc(ctx)
            .callvirt(contract::exec_info_getter("ExecFlow"))
            .ldc_i4(ExecFlow::ThrowException as i32)
            .bne_un(cont);
        asm.ldloc(ctx)
            .callvirt(contract::exec_info_getter("Exception"))
            .brfalse(cont);
        asm.ldloc(ctx)
            .callvirt(contract::exec_info_getter("Exception"))
            .throw();
        asm.leave(ret);
    }

    fn emit_catch_tail(&self, asm: &mut BodyAssembler, blocks: RethrowBlocks) {
        let ctx = self.slots.ctx;
        asm.ldloc(ctx)
            .callvirt(contract::exec_info_getter("Exception"))
            .brfalse(blocks.rethrow);
        asm.ldloc(ctx)
            .callvirt(contract::exec_info_getter("Exception"))
            .ldloc(self.slots.exc)
            .beq(blocks.rethrow);
        // replaced by a hook
        asm.ldloc(ctx)
            .callvirt(contract::exec_info_getter("Exception"))
            .throw();
        asm.rethrow();
    }

    fn emit_return(&self, asm: &mut BodyAssembler) {
        let ret_sig = &self.method.return_type;
        if *ret_sig != TypeSig::Void {
            asm.ldloc(self.slots.ctx)
                .callvirt(contract::exec_info_getter("ReturnValue"));
            if ret_sig.needs_boxing() {
                asm.emit(Instruction::UnboxAny(ret_sig.clone()));
            } else if *ret_sig != TypeSig::Object {
                asm.emit(Instruction::Castclass(ret_sig.clone()));
            }
        }
        asm.ret();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::MethodBodyBuilder,
        metadata::{
            memberref::MethodRef,
            method::{MethodModifiers, ParamDef},
        },
    };

    fn aspect_field(n: usize) -> FieldRef {
        FieldRef::new(
            TypeRef::local("AspectWeave.Generated_00000000.AspectsCollection"),
            format!("Aspect_{n}"),
            TypeSig::Class(TypeRef::local("Sample.LogAspect")),
        )
    }

    fn three_returns() -> MethodDef {
        let mut method = MethodDef::new("Pick", MethodModifiers::PUBLIC | MethodModifiers::STATIC, TypeSig::String);
        method.params.push(ParamDef::new("i", TypeSig::I4));
        method.body = Some(
            MethodBodyBuilder::new()
                .implementation(|asm| {
                    asm.ldarg(0).ldc_i4(1).bne_un(BlockId(2));
                    asm.ldstr("a_1").ret();
                    asm.ldarg(0).ldc_i4(2).bne_un(BlockId(4));
                    asm.ldstr("b_2").ret();
                    asm.ldstr("c_3").ret();
                    Ok(())
                })
                .build()
                .expect("valid body"),
        );
        method
    }

    fn hook_calls(body: &MethodBody, hook: Hook) -> Vec<String> {
        body.blocks
            .iter()
            .flat_map(|b| b.instructions.windows(3))
            .filter_map(|w| match (&w[0], &w[2]) {
                (Instruction::Ldsfld(f), Instruction::Callvirt(m)) if m.name == hook.as_ref() => {
                    Some(f.name.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_exit() -> Result<()> {
        let mut method = three_returns();
        let own = TypeRef::local("Sample.Picker");
        let outcome = weave_method(&mut method, &own, None, &[aspect_field(0)])?;
        let body = method.body.as_ref().expect("body kept");

        let returns: Vec<BlockId> = ControlFlowGraph::new(body).return_blocks();
        assert_eq!(returns.len(), 1);
        assert_eq!(outcome.body_start, BlockId(0));
        assert_ne!(body.entry, BlockId(0));
        for id in [BlockId(1), BlockId(3), BlockId(4)] {
            assert!(matches!(body.blocks[id.0].terminator, Terminator::Leave(_)));
            assert!(matches!(
                body.blocks[id.0].instructions.last(),
                Some(Instruction::Stloc(_))
            ));
        }
        assert_eq!(body.handlers.len(), 2);
        assert!(body.handlers[0].is_catch());
        assert!(body.handlers[1].is_finally());
        assert!(body.handlers[1].protects(BlockId(0)));
        Ok(())
    }

    #[test]
    fn test_exit_hooks_reverse_order() -> Result<()> {
        let mut method = three_returns();
        let aspects = [aspect_field(0), aspect_field(1), aspect_field(2)];
        weave_method(&mut method, &TypeRef::local("Sample.Picker"), None, &aspects)?;
        let body = method.body.as_ref().expect("body kept");
        assert_eq!(hook_calls(body, Hook::OnEntry), vec!["Aspect_0", "Aspect_1", "Aspect_2"]);
        assert_eq!(hook_calls(body, Hook::OnSuccess), vec!["Aspect_2", "Aspect_1", "Aspect_0"]);
        assert_eq!(hook_calls(body, Hook::OnException), vec!["Aspect_2", "Aspect_1", "Aspect_0"]);
        assert_eq!(hook_calls(body, Hook::OnExit), vec!["Aspect_2", "Aspect_1", "Aspect_0"]);
        Ok(())
    }

    #[test]
    fn test_constructor_split_after_base_call() -> Result<()> {
        let mut method = MethodDef::new(
            ".ctor",
            MethodModifiers::PUBLIC | MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
            TypeSig::Void,
        );
        method.body = Some(
            MethodBodyBuilder::new()
                .implementation(|asm| {
                    asm.ldarg(0)
                        .call(MethodRef::constructor(contract::object_type(), Vec::new()))
                        .nop()
                        .ret();
                    Ok(())
                })
                .build()
                .expect("valid body"),
        );
        let base = contract::object_type();
        let outcome = weave_method(&mut method, &TypeRef::local("Sample.Widget"), Some(&base), &[aspect_field(0)])?;
        let split = outcome.split.expect("ctor was split");
        assert_eq!(split.at, 2);
        let body = method.body.as_ref().expect("body kept");
        assert_eq!(body.entry, BlockId(0));
        assert_eq!(body.blocks[0].instructions.len(), 2);
        assert!(body.handlers.iter().all(|h| !h.protects(BlockId(0))));
        assert!(body.handlers[0].protects(split.tail));
        Ok(())
    }

    #[test]
    fn test_by_ref_args_refreshed() -> Result<()> {
        let mut method = MethodDef::new("TryGet", MethodModifiers::PUBLIC | MethodModifiers::STATIC, TypeSig::Boolean);
        method.params.push(ParamDef::out("value", TypeSig::I4));
        method.body = Some(
            MethodBodyBuilder::new()
                .implementation(|asm| {
                    asm.ldarg(0).ldc_i4(5).stind(TypeSig::I4);
                    asm.ldc_i4(1).ret();
                    Ok(())
                })
                .build()
                .expect("valid body"),
        );
        weave_method(&mut method, &TypeRef::local("Sample.Store"), None, &[aspect_field(0)])?;
        let body = method.body.as_ref().expect("body kept");
        // the prologue reads the zero local, never the caller's location
        let prologue = &body.blocks[body.entry.0].instructions;
        assert!(!prologue.contains(&Instruction::Ldind(TypeSig::I4)));
        let refreshes = body
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| **i == Instruction::Ldind(TypeSig::I4))
            .count();
        // catch, success and finally each copy the out value back
        assert_eq!(refreshes, 3);
        Ok(())
    }

    #[test]
    fn test_generic_values_are_boxed() -> Result<()> {
        let t = TypeSig::GenericParam(0);
        let mut method = MethodDef::new("Echo", MethodModifiers::PUBLIC, t.clone());
        method.params.push(ParamDef::new("value", t.clone()));
        method.body = Some(
            MethodBodyBuilder::new()
                .implementation(|asm| {
                    asm.ldarg(1).ret();
                    Ok(())
                })
                .build()
                .expect("valid body"),
        );
        weave_method(&mut method, &TypeRef::local("Sample.Box`1"), None, &[aspect_field(0)])?;
        let body = method.body.as_ref().expect("body kept");
        let instructions: Vec<&Instruction> = body.blocks.iter().flat_map(|b| &b.instructions).collect();

        // argument capture and the stored result
        let boxed = instructions.iter().filter(|i| ***i == Instruction::Box(t.clone())).count();
        assert_eq!(boxed, 2);
        let ret = ControlFlowGraph::new(body).return_blocks()[0];
        assert_eq!(
            body.blocks[ret.0].instructions.last(),
            Some(&Instruction::UnboxAny(t.clone()))
        );
        assert!(!instructions.contains(&&Instruction::Castclass(t)));
        Ok(())
    }

    #[test]
    fn test_missing_body_rejected() {
        let mut method = MethodDef::new("Abstract", MethodModifiers::PUBLIC | MethodModifiers::ABSTRACT, TypeSig::Void);
        assert!(weave_method(&mut method, &TypeRef::local("S.C"), None, &[aspect_field(0)]).is_err());
    }
}
