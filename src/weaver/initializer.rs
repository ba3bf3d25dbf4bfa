//! Aspect instance initializer.
//!
//! Every (declaration, instrumented member) pair gets its own static slot `Aspect_<n>` on the
//! synthesized `AspectWeave.Generated_<hash>.AspectsCollection` type. The type's static
//! constructor builds the instances in handle order: it evaluates the constructor arguments,
//! calls the matching constructor, assigns the named field and property initializers in
//! declaration order, calls `Initialize` with the member descriptor and stores the instance.

use std::fmt::Write as _;

use sha1::{Digest, Sha1};

use crate::{
    assembly::{BodyAssembler, Instruction, MethodBodyBuilder},
    metadata::{
        customattributes::{CustomAttributeArgument, CustomAttributeNamedArgument},
        memberref::{FieldRef, MethodRef},
        method::{FieldAttributes, FieldDef, MethodDef, MethodModifiers},
        module::Module,
        signatures::{TypeRef, TypeSig},
        token::Token,
        typedef::{TypeAttributes, TypeDef},
    },
    resolver::{ResolvedType, Resolver},
    weaver::{
        contract,
        declaration::{AspectDeclaration, DeclarationArena, DeclarationId},
    },
    Error, Result,
};

/// Stable handle of one aspect instance slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(pub usize);

impl InstanceHandle {
    /// Name of the static field holding the instance
    #[must_use]
    pub fn field_name(self) -> String {
        format!("Aspect_{}", self.0)
    }
}

/// One instance slot: which declaration instruments which member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectInstanceSlot {
    /// Slot handle
    pub handle: InstanceHandle,
    /// Declaration the instance is built from
    pub declaration: DeclarationId,
    /// Member passed to `Initialize`
    pub member: Token,
}

/// Namespace of the initializer type for the module called `module_name`
#[must_use]
pub fn initializer_namespace(module_name: &str) -> String {
    let digest = Sha1::digest(module_name.as_bytes());
    let mut namespace = String::from(contract::INIT_NAMESPACE_PREFIX);
    for byte in &digest[..4] {
        let _ = write!(namespace, "{byte:02x}");
    }
    namespace
}

/// Collects instance slots while members are woven, then emits the initializer type
#[derive(Debug)]
pub struct InitializerBuilder {
    namespace: String,
    slots: Vec<AspectInstanceSlot>,
}

impl InitializerBuilder {
    /// A builder for the module called `module_name`
    #[must_use]
    pub fn new(module_name: &str) -> Self {
        InitializerBuilder {
            namespace: initializer_namespace(module_name),
            slots: Vec::new(),
        }
    }

    /// Full name of the initializer type
    #[must_use]
    pub fn type_full_name(&self) -> String {
        format!("{}.{}", self.namespace, contract::INIT_TYPE_NAME)
    }

    /// Slots allocated so far, in handle order
    #[must_use]
    pub fn slots(&self) -> &[AspectInstanceSlot] {
        &self.slots
    }

    /// Number of allocated slots
    #[must_use]
    pub fn emitted_aspects(&self) -> usize {
        self.slots.len()
    }

    /// Allocates the slot for `declaration` instrumenting `member`
    pub fn allocate(&mut self, declaration: DeclarationId, member: Token) -> InstanceHandle {
        let handle = InstanceHandle(self.slots.len());
        self.slots.push(AspectInstanceSlot {
            handle,
            declaration,
            member,
        });
        handle
    }

    /// Reference to the static field of `handle`, typed as the aspect type
    #[must_use]
    pub fn field_ref(&self, handle: InstanceHandle, aspect_type: TypeRef) -> FieldRef {
        FieldRef::new(
            TypeRef::local(self.type_full_name()),
            handle.field_name(),
            TypeSig::Class(aspect_type),
        )
    }

    /// Adds the initializer type with its fields and static constructor to `module`.
    ///
    /// Returns `None` without touching the module when no slot was allocated.
    ///
    /// # Errors
    /// - [`Error::MemberNotFound`] if a constructor, field or property is missing
    /// - [`Error::UnsupportedAttributeValue`] for nested array arguments
    pub fn finish(
        self,
        module: &mut Module,
        arena: &DeclarationArena,
        resolver: &Resolver,
    ) -> Result<Option<Token>> {
        if self.slots.is_empty() {
            return Ok(None);
        }

        let mut plans = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let decl = arena
                .get(slot.declaration)
                .ok_or_else(|| malformed_error!("Unknown declaration {}", slot.declaration.0))?;
            plans.push(InstancePlan::new(module, resolver, decl, slot)?);
        }

        let mut ty = TypeDef::new(
            self.namespace.clone(),
            contract::INIT_TYPE_NAME,
            TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
        );
        ty.base = Some(contract::object_type());
        let owner = module.add_type(ty)?;

        for plan in &plans {
            module.add_field(
                owner,
                FieldDef::new(
                    plan.slot.handle.field_name(),
                    TypeSig::Class(plan.aspect_type.clone()),
                    FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::INIT_ONLY,
                ),
            )?;
        }

        let fields: Vec<FieldRef> = plans
            .iter()
            .map(|plan| self.field_ref(plan.slot.handle, plan.aspect_type.clone()))
            .collect();
        let body = MethodBodyBuilder::new()
            .local(TypeSig::Class(contract::base_aspect_type()))
            .implementation(move |asm| {
                for (plan, field) in plans.iter().zip(fields) {
                    plan.emit(asm)?;
                    asm.ldloc(0).stsfld(field);
                }
                asm.ret();
                Ok(())
            })
            .build()?;

        let mut cctor = MethodDef::new(
            ".cctor",
            MethodModifiers::PRIVATE
                | MethodModifiers::STATIC
                | MethodModifiers::SPECIAL_NAME
                | MethodModifiers::RTSPECIAL_NAME,
            TypeSig::Void,
        );
        cctor.body = Some(body);
        module.add_method(owner, cctor)?;
        log::debug!(
            "Emitted {} with {} aspect instances",
            self.type_full_name(),
            self.slots.len()
        );
        Ok(Some(owner))
    }
}

/// A resolved named initializer
#[derive(Debug)]
enum Assignment {
    Field(FieldRef, CustomAttributeArgument),
    Property(MethodRef, TypeSig, CustomAttributeArgument),
}

/// Everything needed to emit the construction of one instance
#[derive(Debug)]
struct InstancePlan {
    slot: AspectInstanceSlot,
    aspect_type: TypeRef,
    ctor: MethodRef,
    args: Vec<CustomAttributeArgument>,
    assignments: Vec<Assignment>,
}

impl InstancePlan {
    fn new(
        module: &Module,
        resolver: &Resolver,
        decl: &AspectDeclaration,
        slot: &AspectInstanceSlot,
    ) -> Result<Self> {
        let aspect_type = Resolver::localize(module, &decl.aspect_type);
        let chain = resolver.base_chain(module, &aspect_type);
        let aspect = chain
            .first()
            .ok_or_else(|| Error::TypeNotFound(decl.aspect_type.to_string()))?;

        let fixed = &decl.attribute.fixed_args;
        let ctor_def = aspect
            .def
            .methods
            .iter()
            .filter_map(|tok| aspect.module.method(*tok))
            .find(|m| {
                m.is_constructor()
                    && m.params.len() == fixed.len()
                    && m.params
                        .iter()
                        .zip(fixed)
                        .all(|(p, a)| p.sig == TypeSig::Object || p.sig == a.sig())
            })
            .ok_or_else(|| {
                let sigs: Vec<String> = fixed.iter().map(|a| a.sig().to_string()).collect();
                Error::MemberNotFound(format!("{}::.ctor({})", decl.aspect_type, sigs.join(", ")))
            })?;
        let ctor = MethodRef::constructor(aspect_type.clone(), ctor_def.signature());

        let mut assignments = Vec::with_capacity(decl.attribute.named_args.len());
        for named in &decl.attribute.named_args {
            assignments.push(Self::assignment(module, &chain, named, &decl.aspect_type)?);
        }

        Ok(InstancePlan {
            slot: slot.clone(),
            aspect_type,
            ctor,
            args: fixed.clone(),
            assignments,
        })
    }

    fn assignment(
        module: &Module,
        chain: &[ResolvedType<'_>],
        named: &CustomAttributeNamedArgument,
        aspect_type: &TypeRef,
    ) -> Result<Assignment> {
        let missing = || {
            let kind = if named.is_field { "field" } else { "property" };
            Error::MemberNotFound(format!("{kind} {}::{}", aspect_type, named.name))
        };
        if named.is_field {
            chain
                .iter()
                .find_map(|owner| {
                    owner.field(&named.name).map(|field| {
                        let declaring = Resolver::localize(module, &owner.canonical());
                        Assignment::Field(
                            FieldRef::new(declaring, field.name.clone(), field.sig.clone()),
                            named.value.clone(),
                        )
                    })
                })
                .ok_or_else(missing)
        } else {
            chain
                .iter()
                .find_map(|owner| {
                    let property = owner.property(&named.name)?;
                    property.setter?;
                    let declaring = Resolver::localize(module, &owner.canonical());
                    Some(Assignment::Property(
                        MethodRef::instance(
                            declaring,
                            format!("set_{}", property.name),
                            vec![property.sig.clone()],
                            TypeSig::Void,
                        ),
                        property.sig.clone(),
                        named.value.clone(),
                    ))
                })
                .ok_or_else(missing)
        }
    }

    fn emit(&self, asm: &mut BodyAssembler) -> Result<()> {
        for (arg, param) in self.args.iter().zip(&self.ctor.params) {
            emit_argument(asm, arg, param)?;
        }
        asm.newobj(self.ctor.clone()).stloc(0);

        for assignment in &self.assignments {
            asm.ldloc(0);
            match assignment {
                Assignment::Field(field, value) => {
                    emit_argument(asm, value, &field.sig)?;
                    asm.stfld(field.clone());
                }
                Assignment::Property(setter, sig, value) => {
                    emit_argument(asm, value, sig)?;
                    asm.callvirt(setter.clone());
                }
            }
        }

        asm.ldloc(0)
            .ldtoken(self.slot.member)
            .callvirt(contract::initialize_ref());
        Ok(())
    }
}

/// Pushes `value`, boxing it when the receiving slot is `object`
fn emit_argument(asm: &mut BodyAssembler, value: &CustomAttributeArgument, target: &TypeSig) -> Result<()> {
    emit_value(asm, value, false)?;
    let sig = value.sig();
    if *target == TypeSig::Object && sig.needs_boxing() {
        asm.box_value(sig);
    }
    Ok(())
}

fn emit_value(asm: &mut BodyAssembler, value: &CustomAttributeArgument, in_array: bool) -> Result<()> {
    use CustomAttributeArgument as Arg;
    match value {
        Arg::Null(_) => {
            asm.ldnull();
        }
        Arg::Bool(v) => {
            asm.ldc_i4(i32::from(*v));
        }
        Arg::Char(c) => {
            let unit = u32::from(*c);
            asm.ldc_i4(i32::try_from(unit).map_err(|_| {
                Error::UnsupportedAttributeValue(format!("char {c:?} is out of range"))
            })?);
        }
        Arg::I1(v) => {
            asm.ldc_i4(i32::from(*v));
        }
        Arg::U1(v) => {
            asm.ldc_i4(i32::from(*v));
        }
        Arg::I2(v) => {
            asm.ldc_i4(i32::from(*v));
        }
        Arg::U2(v) => {
            asm.ldc_i4(i32::from(*v));
        }
        Arg::I4(v) => {
            asm.ldc_i4(*v);
        }
        Arg::U4(v) => {
            asm.ldc_i4(i32::from_ne_bytes(v.to_ne_bytes()));
        }
        Arg::I8(v) => {
            asm.ldc_i8(*v);
        }
        Arg::U8(v) => {
            asm.ldc_i8(i64::from_ne_bytes(v.to_ne_bytes()));
        }
        Arg::R4(v) => {
            asm.emit(Instruction::LdcR4(*v));
        }
        Arg::R8(v) => {
            asm.ldc_r8(*v);
        }
        Arg::String(s) => {
            asm.ldstr(s);
        }
        Arg::Enum(_, inner) => emit_value(asm, inner, in_array)?,
        Arg::Array(element, items) => {
            if in_array {
                return Err(Error::UnsupportedAttributeValue(
                    "nested array arguments are not supported".to_string(),
                ));
            }
            let len = i32::try_from(items.len()).map_err(|_| {
                Error::UnsupportedAttributeValue("array argument is too long".to_string())
            })?;
            asm.ldc_i4(len).newarr(element.clone());
            for (i, item) in items.iter().enumerate() {
                asm.dup().ldc_i4(i32::try_from(i).unwrap_or(i32::MAX));
                emit_value(asm, item, true)?;
                if *element == TypeSig::Object && item.sig().needs_boxing() {
                    asm.box_value(item.sig());
                }
                asm.stelem(element.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Terminator,
        metadata::{
            customattributes::{CustomAttribute, CustomAttributeArgument as Arg},
            method::ParamDef,
        },
        weaver::declaration::DeclaringScope,
    };

    fn aspect_module() -> Result<(Module, Token)> {
        let mut module = Module::new("Sample");
        let mut log = TypeDef::new("Sample", "LogAspect", TypeAttributes::PUBLIC);
        log.base = Some(contract::base_aspect_type());
        let log = module.add_type(log)?;
        let mut ctor = MethodDef::new(
            ".ctor",
            MethodModifiers::PUBLIC | MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
            TypeSig::Void,
        );
        ctor.params.push(ParamDef::new("names", TypeSig::array_of(TypeSig::String)));
        module.add_method(log, ctor)?;
        module.add_field(log, FieldDef::new("Tag", TypeSig::I4, FieldAttributes::PUBLIC))?;
        let target_ty = module.add_type(TypeDef::new("Sample", "Worker", TypeAttributes::PUBLIC))?;
        let run = module.add_method(
            target_ty,
            MethodDef::new("Run", MethodModifiers::PUBLIC, TypeSig::Void),
        )?;
        Ok((module, run))
    }

    fn declare(arena: &mut DeclarationArena, attr: CustomAttribute) -> Result<DeclarationId> {
        let decl = AspectDeclaration::from_attribute(
            arena.next_id(),
            TypeRef::external("Sample", "Sample.LogAspect"),
            attr,
            DeclaringScope::Module,
            0,
        )?;
        arena.push(decl)
    }

    #[test]
    fn test_namespace_is_stable() {
        let ns = initializer_namespace("Sample");
        assert!(ns.starts_with(contract::INIT_NAMESPACE_PREFIX));
        assert_eq!(ns.len(), contract::INIT_NAMESPACE_PREFIX.len() + 8);
        assert_eq!(ns, initializer_namespace("Sample"));
        assert_ne!(ns, initializer_namespace("Other"));
    }

    #[test]
    fn test_no_slots_leaves_module_untouched() -> Result<()> {
        let (mut module, _) = aspect_module()?;
        let before = module.clone();
        let builder = InitializerBuilder::new(&module.name);
        let token = builder.finish(&mut module, &DeclarationArena::new(), &Resolver::new()?)?;
        assert!(token.is_none());
        assert_eq!(module, before);
        Ok(())
    }

    #[test]
    fn test_emits_one_field_per_slot() -> Result<()> {
        let (mut module, run) = aspect_module()?;
        let mut arena = DeclarationArena::new();
        let attr = CustomAttribute::new(TypeRef::local("Sample.LogAspect"))
            .arg(Arg::Array(
                TypeSig::String,
                vec![Arg::String("a".into()), Arg::String("b".into())],
            ))
            .field("Tag", Arg::I4(7))
            .property("Order", Arg::I4(2));
        let decl = declare(&mut arena, attr)?;

        let mut builder = InitializerBuilder::new(&module.name);
        let first = builder.allocate(decl, run);
        let second = builder.allocate(decl, run);
        assert_ne!(first, second);
        let full_name = builder.type_full_name();
        let owner = builder
            .finish(&mut module, &arena, &Resolver::new()?)?
            .expect("initializer emitted");

        let ty = module.type_def(owner).expect("type exists");
        assert_eq!(module.full_name(owner), Some(full_name));
        assert!(ty.is_abstract());
        assert_eq!(ty.fields.len(), 2);
        assert_eq!(module.field(ty.fields[1]).map(|f| f.name.as_str()), Some("Aspect_1"));

        let cctor = module.find_method(owner, ".cctor", 0).expect("cctor exists");
        let body = cctor.body.as_ref().expect("cctor has a body");
        let code = &body.blocks[0].instructions;
        assert!(code.contains(&Instruction::Newarr(TypeSig::String)));
        assert!(code.iter().any(|i| matches!(i, Instruction::Stfld(f) if f.name == "Tag")));
        assert!(code
            .iter()
            .any(|i| matches!(i, Instruction::Callvirt(m) if m.name == "set_Order"
                && m.declaring_type == contract::base_aspect_type())));
        assert!(code.contains(&Instruction::Ldtoken(run)));
        assert_eq!(body.blocks[0].terminator, Terminator::Return);
        Ok(())
    }

    #[test]
    fn test_missing_named_member() -> Result<()> {
        let (mut module, run) = aspect_module()?;
        let mut arena = DeclarationArena::new();
        let attr = CustomAttribute::new(TypeRef::local("Sample.LogAspect"))
            .arg(Arg::Null(TypeSig::array_of(TypeSig::String)))
            .field("Missing", Arg::I4(1));
        let decl = declare(&mut arena, attr)?;
        let mut builder = InitializerBuilder::new(&module.name);
        builder.allocate(decl, run);
        let result = builder.finish(&mut module, &arena, &Resolver::new()?);
        assert!(matches!(result, Err(Error::MemberNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_missing_constructor() -> Result<()> {
        let (mut module, run) = aspect_module()?;
        let mut arena = DeclarationArena::new();
        let decl = declare(&mut arena, CustomAttribute::new(TypeRef::local("Sample.LogAspect")))?;
        let mut builder = InitializerBuilder::new(&module.name);
        builder.allocate(decl, run);
        let result = builder.finish(&mut module, &arena, &Resolver::new()?);
        assert!(matches!(result, Err(Error::MemberNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_nested_array_rejected() -> Result<()> {
        let mut asm = BodyAssembler::new();
        let nested = Arg::Array(
            TypeSig::Object,
            vec![Arg::Array(TypeSig::I4, vec![Arg::I4(1)])],
        );
        assert!(matches!(
            emit_argument(&mut asm, &nested, &TypeSig::Object),
            Err(Error::UnsupportedAttributeValue(_))
        ));
        Ok(())
    }
}
