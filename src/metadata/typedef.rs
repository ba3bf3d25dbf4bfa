//! Type identities, type definitions and their attribute flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::metadata::{customattributes::CustomAttribute, signatures::TypeRef, token::Token};

/// Mask for extracting type visibility information.
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    /// Type definition attributes
    pub struct TypeAttributes: u32 {
        /// Type has public scope
        const PUBLIC = 0x0000_0001;
        /// Nested type with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested type with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Nested type with family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Nested type with assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Nested type with family and assembly visibility
        const NESTED_FAM_AND_ASSEM = 0x0000_0006;
        /// Nested type with family or assembly visibility
        const NESTED_FAM_OR_ASSEM = 0x0000_0007;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class cannot be extended
        const SEALED = 0x0000_0100;
        /// Class name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Initialize the class any time before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

/// Accessibility of a type, decoded from the visibility bits of [`TypeAttributes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TypeVisibility {
    /// Top-level, internal to the module
    NotPublic,
    /// Top-level, public
    Public,
    /// Nested public
    NestedPublic,
    /// Nested private
    NestedPrivate,
    /// Nested protected
    NestedFamily,
    /// Nested internal
    NestedAssembly,
    /// Nested protected and internal
    NestedFamAndAssem,
    /// Nested protected or internal
    NestedFamOrAssem,
}

impl TypeAttributes {
    /// Decodes the visibility bits
    #[must_use]
    pub fn visibility(self) -> TypeVisibility {
        match self.bits() & TYPE_VISIBILITY_MASK {
            0 => TypeVisibility::NotPublic,
            1 => TypeVisibility::Public,
            2 => TypeVisibility::NestedPublic,
            3 => TypeVisibility::NestedPrivate,
            4 => TypeVisibility::NestedFamily,
            5 => TypeVisibility::NestedAssembly,
            6 => TypeVisibility::NestedFamAndAssem,
            _ => TypeVisibility::NestedFamOrAssem,
        }
    }
}

/// A type defined in a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Token of this type
    pub token: Token,
    /// Namespace, empty for nested types and the global namespace
    #[serde(default)]
    pub namespace: String,
    /// Bare name
    pub name: String,
    /// Attribute flags
    pub flags: TypeAttributes,
    /// Base type, `None` for `System.Object` and interfaces
    #[serde(default)]
    pub base: Option<TypeRef>,
    /// Enclosing type for nested types
    #[serde(default)]
    pub enclosing: Option<Token>,
    /// Custom attributes attached to the type
    #[serde(default)]
    pub attributes: Vec<CustomAttribute>,
    /// Methods declared by the type
    #[serde(default)]
    pub methods: Vec<Token>,
    /// Fields declared by the type
    #[serde(default)]
    pub fields: Vec<Token>,
    /// Properties declared by the type
    #[serde(default)]
    pub properties: Vec<Token>,
}

impl TypeDef {
    /// A new type without members; the token is assigned when added to a module
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, flags: TypeAttributes) -> Self {
        TypeDef {
            token: Token::new(0),
            namespace: namespace.into(),
            name: name.into(),
            flags,
            base: None,
            enclosing: None,
            attributes: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// True for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// True for abstract classes and interfaces
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeAttributes::ABSTRACT)
    }

    /// Decoded accessibility
    #[must_use]
    pub fn visibility(&self) -> TypeVisibility {
        self.flags.visibility()
    }
}
