//! Method, parameter, field and property definitions.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    assembly::MethodBody,
    metadata::{customattributes::CustomAttribute, signatures::TypeSig, token::Token},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    /// Method attribute flags
    pub struct MethodModifiers: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEM = 0x0003;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method may not be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime should check name encoding
        const RTSPECIAL_NAME = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    /// Parameter attribute flags
    pub struct ParamAttributes: u32 {
        /// Param is [In]
        const IN = 0x0001;
        /// Param is [out]
        const OUT = 0x0002;
        /// Param is optional
        const OPTIONAL = 0x0010;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    /// Field attribute flags
    pub struct FieldAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEM = 0x0003;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized, not written to after init
        const INIT_ONLY = 0x0020;
    }
}

/// A formal method parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    /// Parameter name
    pub name: String,
    /// Declared type, `TypeSig::ByRef` for `ref`/`out`
    pub sig: TypeSig,
    /// Attribute flags
    #[serde(default)]
    pub flags: ParamAttributes,
}

impl ParamDef {
    /// A by-value parameter
    pub fn new(name: impl Into<String>, sig: TypeSig) -> Self {
        ParamDef {
            name: name.into(),
            sig,
            flags: ParamAttributes::empty(),
        }
    }

    /// An `out` parameter of element type `sig`
    pub fn out(name: impl Into<String>, sig: TypeSig) -> Self {
        ParamDef {
            name: name.into(),
            sig: TypeSig::by_ref(sig),
            flags: ParamAttributes::OUT,
        }
    }

    /// A `ref` parameter of element type `sig`
    pub fn by_ref(name: impl Into<String>, sig: TypeSig) -> Self {
        ParamDef {
            name: name.into(),
            sig: TypeSig::by_ref(sig),
            flags: ParamAttributes::empty(),
        }
    }

    /// True for `out` parameters
    #[must_use]
    pub fn is_out(&self) -> bool {
        self.sig.is_by_ref() && self.flags.contains(ParamAttributes::OUT)
    }
}

/// A method defined in a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    /// Token of this method
    pub token: Token,
    /// Method name
    pub name: String,
    /// Declaring type
    pub declaring_type: Token,
    /// Attribute flags
    pub flags: MethodModifiers,
    /// Formal parameters, excluding the implicit `this`
    #[serde(default)]
    pub params: Vec<ParamDef>,
    /// Return type
    pub return_type: TypeSig,
    /// Custom attributes attached to the method
    #[serde(default)]
    pub attributes: Vec<CustomAttribute>,
    /// IR body, `None` for abstract and runtime-provided methods
    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// A new public method; the token and declaring type are assigned when added to a module
    pub fn new(name: impl Into<String>, flags: MethodModifiers, return_type: TypeSig) -> Self {
        MethodDef {
            token: Token::new(0),
            name: name.into(),
            declaring_type: Token::new(0),
            flags,
            params: Vec::new(),
            return_type,
            attributes: Vec::new(),
            body: None,
        }
    }

    /// True for static methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodModifiers::STATIC)
    }

    /// True if the method receives an implicit `this` as argument 0
    #[must_use]
    pub fn has_this(&self) -> bool {
        !self.is_static()
    }

    /// True for compiler or runtime special names (accessors, constructors)
    #[must_use]
    pub fn is_special_name(&self) -> bool {
        self.flags.contains(MethodModifiers::SPECIAL_NAME)
    }

    /// True for instance constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" && self.flags.contains(MethodModifiers::RTSPECIAL_NAME)
    }

    /// True for type initializers
    #[must_use]
    pub fn is_static_constructor(&self) -> bool {
        self.name == ".cctor"
            && self.is_static()
            && self.flags.contains(MethodModifiers::RTSPECIAL_NAME)
    }

    /// Argument slot of formal parameter `index`, accounting for `this`
    #[must_use]
    pub fn arg_slot(&self, index: usize) -> u16 {
        let slot = if self.has_this() { index + 1 } else { index };
        u16::try_from(slot).unwrap_or(u16::MAX)
    }

    /// Parameter signatures in order
    #[must_use]
    pub fn signature(&self) -> Vec<TypeSig> {
        self.params.iter().map(|p| p.sig.clone()).collect()
    }
}

/// A field defined in a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Token of this field
    pub token: Token,
    /// Field name
    pub name: String,
    /// Declaring type
    pub declaring_type: Token,
    /// Field type
    pub sig: TypeSig,
    /// Attribute flags
    pub flags: FieldAttributes,
}

impl FieldDef {
    /// A new field; token and declaring type are assigned when added to a module
    pub fn new(name: impl Into<String>, sig: TypeSig, flags: FieldAttributes) -> Self {
        FieldDef {
            token: Token::new(0),
            name: name.into(),
            declaring_type: Token::new(0),
            sig,
            flags,
        }
    }

    /// True for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }
}

/// A property defined in a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Token of this property
    pub token: Token,
    /// Property name
    pub name: String,
    /// Declaring type
    pub declaring_type: Token,
    /// Property type
    pub sig: TypeSig,
    /// Getter method
    #[serde(default)]
    pub getter: Option<Token>,
    /// Setter method
    #[serde(default)]
    pub setter: Option<Token>,
    /// Custom attributes attached to the property
    #[serde(default)]
    pub attributes: Vec<CustomAttribute>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_kinds() {
        let ctor = MethodDef::new(
            ".ctor",
            MethodModifiers::PUBLIC | MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME,
            TypeSig::Void,
        );
        assert!(ctor.is_constructor());
        assert!(!ctor.is_static_constructor());
        assert!(ctor.has_this());

        let cctor = MethodDef::new(
            ".cctor",
            MethodModifiers::PRIVATE
                | MethodModifiers::STATIC
                | MethodModifiers::SPECIAL_NAME
                | MethodModifiers::RTSPECIAL_NAME,
            TypeSig::Void,
        );
        assert!(cctor.is_static_constructor());
        assert!(!cctor.is_constructor());
    }

    #[test]
    fn test_arg_slots() {
        let mut method = MethodDef::new("M", MethodModifiers::PUBLIC, TypeSig::Void);
        method.params.push(ParamDef::new("a", TypeSig::I4));
        assert_eq!(method.arg_slot(0), 1);
        method.flags |= MethodModifiers::STATIC;
        assert_eq!(method.arg_slot(0), 0);
    }

    #[test]
    fn test_out_param() {
        let param = ParamDef::out("result", TypeSig::I4);
        assert!(param.is_out());
        assert!(!ParamDef::by_ref("value", TypeSig::I4).is_out());
        assert!(!ParamDef::new("value", TypeSig::I4).is_out());
    }
}
