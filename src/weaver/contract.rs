//! The aspect runtime contract referenced by woven code.
//!
//! Generated code talks to aspects only through the names declared here: the
//! `AspectWeave.BaseAspect` hooks, the `AspectWeave.MethodExecInfo` context and the
//! `AspectWeave.ExecFlow` directive. Both the contract module and the minimal `System`
//! module it depends on are built in, so they always resolve.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};

use crate::{
    metadata::{
        memberref::MethodRef,
        method::{MethodDef, MethodModifiers, ParamDef, PropertyDef},
        module::Module,
        signatures::{TypeRef, TypeSig},
        token::Token,
        typedef::{TypeAttributes, TypeDef},
    },
    Result,
};

/// Name of the built-in contract module
pub const CONTRACT_MODULE: &str = "AspectWeave";
/// Name of the built-in system module
pub const SYSTEM_MODULE: &str = "System.Runtime";

/// Base type every aspect derives from
pub const BASE_ASPECT: &str = "AspectWeave.BaseAspect";
/// Per-activation execution context
pub const METHOD_EXEC_INFO: &str = "AspectWeave.MethodExecInfo";
/// Flow directive enum
pub const EXEC_FLOW: &str = "AspectWeave.ExecFlow";
/// Element target enum
pub const ELEMENT_TARGETS: &str = "AspectWeave.ElementTargets";

/// Root of the type hierarchy
pub const SYSTEM_OBJECT: &str = "System.Object";
/// Root of the exception hierarchy
pub const SYSTEM_EXCEPTION: &str = "System.Exception";
/// Member descriptor passed to `Initialize`
pub const MEMBER_INFO: &str = "System.Reflection.MemberInfo";

/// Namespace prefix of the synthesized initializer type
pub const INIT_NAMESPACE_PREFIX: &str = "AspectWeave.Generated_";
/// Name of the synthesized initializer type
pub const INIT_TYPE_NAME: &str = "AspectsCollection";

/// Exception types provided by the system module, with their base type
pub const SYSTEM_EXCEPTIONS: &[(&str, &str)] = &[
    ("System.SystemException", SYSTEM_EXCEPTION),
    ("System.ApplicationException", SYSTEM_EXCEPTION),
    ("System.ArgumentException", "System.SystemException"),
    ("System.ArgumentNullException", "System.ArgumentException"),
    ("System.InvalidOperationException", "System.SystemException"),
    ("System.NotSupportedException", "System.SystemException"),
    ("System.ArithmeticException", "System.SystemException"),
    ("System.DivideByZeroException", "System.ArithmeticException"),
    ("System.NullReferenceException", "System.SystemException"),
    ("System.InvalidCastException", "System.SystemException"),
    ("System.IndexOutOfRangeException", "System.SystemException"),
];

/// The four lifecycle hooks of an aspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
pub enum Hook {
    /// Before the original body
    OnEntry,
    /// After the body completed without exception
    OnSuccess,
    /// After the body raised an exception
    OnException,
    /// On every exit path
    OnExit,
}

/// Flow directive a hook may set on the execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExecFlow {
    /// Continue normally
    Default = 0,
    /// Return immediately with the context's return value
    Return = 1,
    /// Throw the context's exception
    ThrowException = 2,
}

impl ExecFlow {
    /// Decodes a raw directive; unknown values read as `Default`
    #[must_use]
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => ExecFlow::Return,
            2 => ExecFlow::ThrowException,
            _ => ExecFlow::Default,
        }
    }
}

/// `System.Object`
#[must_use]
pub fn object_type() -> TypeRef {
    TypeRef::external(SYSTEM_MODULE, SYSTEM_OBJECT)
}

/// `System.Exception`
#[must_use]
pub fn exception_type() -> TypeRef {
    TypeRef::external(SYSTEM_MODULE, SYSTEM_EXCEPTION)
}

/// `AspectWeave.BaseAspect`
#[must_use]
pub fn base_aspect_type() -> TypeRef {
    TypeRef::external(CONTRACT_MODULE, BASE_ASPECT)
}

/// `AspectWeave.MethodExecInfo`
#[must_use]
pub fn exec_info_type() -> TypeRef {
    TypeRef::external(CONTRACT_MODULE, METHOD_EXEC_INFO)
}

fn exec_info_sig() -> TypeSig {
    TypeSig::Class(exec_info_type())
}

fn exception_sig() -> TypeSig {
    TypeSig::Class(exception_type())
}

/// `BaseAspect::<hook>(MethodExecInfo)`
#[must_use]
pub fn hook_ref(hook: Hook) -> MethodRef {
    MethodRef::instance(
        base_aspect_type(),
        hook.as_ref(),
        vec![exec_info_sig()],
        TypeSig::Void,
    )
}

/// `BaseAspect::Initialize(MemberInfo)`
#[must_use]
pub fn initialize_ref() -> MethodRef {
    MethodRef::instance(
        base_aspect_type(),
        "Initialize",
        vec![TypeSig::Class(TypeRef::external(SYSTEM_MODULE, MEMBER_INFO))],
        TypeSig::Void,
    )
}

/// `MethodExecInfo::.ctor(object[])`
#[must_use]
pub fn exec_info_ctor() -> MethodRef {
    MethodRef::constructor(exec_info_type(), vec![TypeSig::array_of(TypeSig::Object)])
}

/// Getter of the context property `name`
#[must_use]
pub fn exec_info_getter(name: &str) -> MethodRef {
    MethodRef::instance(
        exec_info_type(),
        format!("get_{name}"),
        Vec::new(),
        exec_info_property_sig(name),
    )
}

/// Setter of the context property `name`
#[must_use]
pub fn exec_info_setter(name: &str) -> MethodRef {
    MethodRef::instance(
        exec_info_type(),
        format!("set_{name}"),
        vec![exec_info_property_sig(name)],
        TypeSig::Void,
    )
}

fn exec_info_property_sig(name: &str) -> TypeSig {
    match name {
        "Arguments" => TypeSig::array_of(TypeSig::Object),
        "Exception" => exception_sig(),
        "ExecFlow" => TypeSig::ValueType(TypeRef::external(CONTRACT_MODULE, EXEC_FLOW)),
        _ => TypeSig::Object,
    }
}

/// True if `type_name` names the synthesized initializer type
#[must_use]
pub fn is_initializer_type(namespace: &str, name: &str) -> bool {
    namespace.starts_with(INIT_NAMESPACE_PREFIX) && name == INIT_TYPE_NAME
}

fn add_runtime_method(
    module: &mut Module,
    owner: Token,
    name: &str,
    flags: MethodModifiers,
    params: Vec<ParamDef>,
    return_type: TypeSig,
) -> Result<Token> {
    let mut method = MethodDef::new(name, flags, return_type);
    method.params = params;
    module.add_method(owner, method)
}

fn add_auto_property(
    module: &mut Module,
    owner: Token,
    name: &str,
    sig: TypeSig,
    read_only: bool,
) -> Result<()> {
    let accessor = MethodModifiers::PUBLIC | MethodModifiers::SPECIAL_NAME;
    let getter = add_runtime_method(
        module,
        owner,
        &format!("get_{name}"),
        accessor,
        Vec::new(),
        sig.clone(),
    )?;
    let setter = if read_only {
        None
    } else {
        Some(add_runtime_method(
            module,
            owner,
            &format!("set_{name}"),
            accessor,
            vec![ParamDef::new("value", sig.clone())],
            TypeSig::Void,
        )?)
    };
    module.add_property(
        owner,
        PropertyDef {
            token: Token::new(0),
            name: name.to_string(),
            declaring_type: Token::new(0),
            sig,
            getter: Some(getter),
            setter,
            attributes: Vec::new(),
        },
    )?;
    Ok(())
}

fn ctor_flags() -> MethodModifiers {
    MethodModifiers::PUBLIC | MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME
}

/// Builds the system module: `System.Object`, `System.String`, the exception hierarchy and
/// `System.Reflection.MemberInfo`.
///
/// # Errors
/// Only fails if the built-in tables overflow, which cannot happen for this fixed set.
pub fn system_module() -> Result<Module> {
    let mut module = Module::new(SYSTEM_MODULE);
    let object = module.add_type(TypeDef::new("System", "Object", TypeAttributes::PUBLIC))?;
    add_runtime_method(&mut module, object, ".ctor", ctor_flags(), Vec::new(), TypeSig::Void)?;
    add_runtime_method(
        &mut module,
        object,
        "ToString",
        MethodModifiers::PUBLIC | MethodModifiers::VIRTUAL,
        Vec::new(),
        TypeSig::String,
    )?;

    let mut string = TypeDef::new("System", "String", TypeAttributes::PUBLIC | TypeAttributes::SEALED);
    string.base = Some(object_type());
    let string = module.add_type(string)?;
    add_runtime_method(
        &mut module,
        string,
        "Concat",
        MethodModifiers::PUBLIC | MethodModifiers::STATIC,
        vec![ParamDef::new("a", TypeSig::Object), ParamDef::new("b", TypeSig::Object)],
        TypeSig::String,
    )?;

    let mut value_type = TypeDef::new("System", "ValueType", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT);
    value_type.base = Some(object_type());
    module.add_type(value_type)?;
    let mut enum_type = TypeDef::new("System", "Enum", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT);
    enum_type.base = Some(TypeRef::external(SYSTEM_MODULE, "System.ValueType"));
    module.add_type(enum_type)?;

    let mut member_info =
        TypeDef::new("System.Reflection", "MemberInfo", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT);
    member_info.base = Some(object_type());
    let member_info = module.add_type(member_info)?;
    add_auto_property(&mut module, member_info, "Name", TypeSig::String, true)?;

    let mut exception = TypeDef::new("System", "Exception", TypeAttributes::PUBLIC);
    exception.base = Some(object_type());
    let exception = module.add_type(exception)?;
    add_runtime_method(
        &mut module,
        exception,
        ".ctor",
        ctor_flags(),
        vec![ParamDef::new("message", TypeSig::String)],
        TypeSig::Void,
    )?;
    add_auto_property(&mut module, exception, "Message", TypeSig::String, true)?;

    for (full_name, base) in SYSTEM_EXCEPTIONS {
        let name = full_name.trim_start_matches("System.");
        let mut ty = TypeDef::new("System", name, TypeAttributes::PUBLIC);
        ty.base = Some(TypeRef::external(SYSTEM_MODULE, *base));
        let token = module.add_type(ty)?;
        add_runtime_method(
            &mut module,
            token,
            ".ctor",
            ctor_flags(),
            vec![ParamDef::new("message", TypeSig::String)],
            TypeSig::Void,
        )?;
    }
    Ok(module)
}

/// Builds the contract module: `BaseAspect`, `MethodExecInfo`, `ExecFlow` and
/// `ElementTargets`. Method bodies are provided by the runtime.
///
/// # Errors
/// Only fails if the built-in tables overflow, which cannot happen for this fixed set.
pub fn contract_module() -> Result<Module> {
    let mut module = Module::new(CONTRACT_MODULE);
    module.references.push(SYSTEM_MODULE.to_string());

    let mut base_aspect = TypeDef::new(
        CONTRACT_MODULE,
        "BaseAspect",
        TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT,
    );
    base_aspect.base = Some(object_type());
    let base_aspect = module.add_type(base_aspect)?;
    add_runtime_method(&mut module, base_aspect, ".ctor", ctor_flags(), Vec::new(), TypeSig::Void)?;
    let virtual_hook = MethodModifiers::PUBLIC | MethodModifiers::VIRTUAL | MethodModifiers::NEW_SLOT;
    for hook in Hook::iter() {
        add_runtime_method(
            &mut module,
            base_aspect,
            hook.as_ref(),
            virtual_hook,
            vec![ParamDef::new("info", exec_info_sig())],
            TypeSig::Void,
        )?;
    }
    add_runtime_method(
        &mut module,
        base_aspect,
        "Initialize",
        virtual_hook,
        vec![ParamDef::new(
            "member",
            TypeSig::Class(TypeRef::external(SYSTEM_MODULE, MEMBER_INFO)),
        )],
        TypeSig::Void,
    )?;
    let element_targets = TypeSig::ValueType(TypeRef::external(CONTRACT_MODULE, ELEMENT_TARGETS));
    for (name, sig) in [
        ("Exclude", TypeSig::Boolean),
        ("Replace", TypeSig::Boolean),
        ("Order", TypeSig::I4),
        ("ElementTargets", element_targets),
        ("TypeTargets", TypeSig::String),
        ("MemberTargets", TypeSig::String),
    ] {
        add_auto_property(&mut module, base_aspect, name, sig, false)?;
    }

    let mut exec_info = TypeDef::new(CONTRACT_MODULE, "MethodExecInfo", TypeAttributes::PUBLIC);
    exec_info.base = Some(object_type());
    let exec_info = module.add_type(exec_info)?;
    add_runtime_method(
        &mut module,
        exec_info,
        ".ctor",
        ctor_flags(),
        vec![ParamDef::new("arguments", TypeSig::array_of(TypeSig::Object))],
        TypeSig::Void,
    )?;
    add_auto_property(&mut module, exec_info, "Arguments", exec_info_property_sig("Arguments"), true)?;
    for name in ["ReturnValue", "Exception", "ExecFlow", "Data"] {
        add_auto_property(&mut module, exec_info, name, exec_info_property_sig(name), false)?;
    }

    let value_type = TypeRef::external(SYSTEM_MODULE, "System.Enum");
    for name in ["ExecFlow", "ElementTargets"] {
        let mut ty = TypeDef::new(
            CONTRACT_MODULE,
            name,
            TypeAttributes::PUBLIC | TypeAttributes::SEALED,
        );
        ty.base = Some(value_type.clone());
        module.add_type(ty)?;
    }
    Ok(module)
}
