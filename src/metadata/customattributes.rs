//! Custom attribute values attached to modules, types, properties and methods.
//!
//! Attribute blobs are kept fully decoded: each [`CustomAttribute`] names its attribute
//! type, the fixed constructor arguments in declaration order and the named field and
//! property arguments in declaration order. The argument shapes mirror what the
//! attribute serialization format can express: primitives, strings, enums and
//! one-dimensional arrays.

use serde::{Deserialize, Serialize};

use crate::metadata::signatures::{TypeRef, TypeSig};

/// A decoded custom attribute instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttribute {
    /// Type of the attribute
    pub attribute_type: TypeRef,
    /// Fixed arguments from the constructor signature
    #[serde(default)]
    pub fixed_args: Vec<CustomAttributeArgument>,
    /// Named arguments (fields and properties)
    #[serde(default)]
    pub named_args: Vec<CustomAttributeNamedArgument>,
}

impl CustomAttribute {
    /// Attribute of `attribute_type` with no arguments
    #[must_use]
    pub fn new(attribute_type: TypeRef) -> Self {
        CustomAttribute {
            attribute_type,
            fixed_args: Vec::new(),
            named_args: Vec::new(),
        }
    }

    /// Appends a fixed constructor argument
    #[must_use]
    pub fn arg(mut self, value: CustomAttributeArgument) -> Self {
        self.fixed_args.push(value);
        self
    }

    /// Appends a named property argument
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: CustomAttributeArgument) -> Self {
        self.named_args.push(CustomAttributeNamedArgument {
            is_field: false,
            name: name.into(),
            value,
        });
        self
    }

    /// Appends a named field argument
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: CustomAttributeArgument) -> Self {
        self.named_args.push(CustomAttributeNamedArgument {
            is_field: true,
            name: name.into(),
            value,
        });
        self
    }

    /// The last named property argument called `name`
    #[must_use]
    pub fn named_property(&self, name: &str) -> Option<&CustomAttributeArgument> {
        self.named_args
            .iter()
            .rev()
            .find(|arg| !arg.is_field && arg.name == name)
            .map(|arg| &arg.value)
    }

    /// Constructor parameter signatures implied by the fixed arguments
    #[must_use]
    pub fn constructor_signature(&self) -> Vec<TypeSig> {
        self.fixed_args.iter().map(CustomAttributeArgument::sig).collect()
    }
}

/// Represents a single custom attribute argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CustomAttributeArgument {
    /// Null reference of the given declared type
    Null(TypeSig),
    /// Boolean value
    Bool(bool),
    /// Character value (16-bit Unicode)
    Char(char),
    /// Signed 8-bit integer
    I1(i8),
    /// Unsigned 8-bit integer
    U1(u8),
    /// Signed 16-bit integer
    I2(i16),
    /// Unsigned 16-bit integer
    U2(u16),
    /// Signed 32-bit integer
    I4(i32),
    /// Unsigned 32-bit integer
    U4(u32),
    /// Signed 64-bit integer
    I8(i64),
    /// Unsigned 64-bit integer
    U8(u64),
    /// 32-bit floating point
    R4(f32),
    /// 64-bit floating point
    R8(f64),
    /// String value
    String(String),
    /// Enum value (enum type + underlying value)
    Enum(TypeRef, Box<CustomAttributeArgument>),
    /// Single-dimension array (element type + elements)
    Array(TypeSig, Vec<CustomAttributeArgument>),
}

impl CustomAttributeArgument {
    /// Declared type of this argument
    #[must_use]
    pub fn sig(&self) -> TypeSig {
        match self {
            CustomAttributeArgument::Null(sig) => sig.clone(),
            CustomAttributeArgument::Bool(_) => TypeSig::Boolean,
            CustomAttributeArgument::Char(_) => TypeSig::Char,
            CustomAttributeArgument::I1(_) => TypeSig::I1,
            CustomAttributeArgument::U1(_) => TypeSig::U1,
            CustomAttributeArgument::I2(_) => TypeSig::I2,
            CustomAttributeArgument::U2(_) => TypeSig::U2,
            CustomAttributeArgument::I4(_) => TypeSig::I4,
            CustomAttributeArgument::U4(_) => TypeSig::U4,
            CustomAttributeArgument::I8(_) => TypeSig::I8,
            CustomAttributeArgument::U8(_) => TypeSig::U8,
            CustomAttributeArgument::R4(_) => TypeSig::R4,
            CustomAttributeArgument::R8(_) => TypeSig::R8,
            CustomAttributeArgument::String(_) => TypeSig::String,
            CustomAttributeArgument::Enum(ty, _) => TypeSig::ValueType(ty.clone()),
            CustomAttributeArgument::Array(element, _) => TypeSig::array_of(element.clone()),
        }
    }

    /// Boolean view of the value
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CustomAttributeArgument::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer view of the value, looking through enums
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CustomAttributeArgument::I1(v) => Some(i64::from(*v)),
            CustomAttributeArgument::U1(v) => Some(i64::from(*v)),
            CustomAttributeArgument::I2(v) => Some(i64::from(*v)),
            CustomAttributeArgument::U2(v) => Some(i64::from(*v)),
            CustomAttributeArgument::I4(v) => Some(i64::from(*v)),
            CustomAttributeArgument::U4(v) => Some(i64::from(*v)),
            CustomAttributeArgument::I8(v) => Some(*v),
            CustomAttributeArgument::U8(v) => i64::try_from(*v).ok(),
            CustomAttributeArgument::Enum(_, inner) => inner.as_i64(),
            _ => None,
        }
    }

    /// String view of the value; a null string reads as `None`
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CustomAttributeArgument::String(value) => Some(value),
            _ => None,
        }
    }
}

/// Represents a named argument (field or property) in a custom attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttributeNamedArgument {
    /// Whether this is a field (true) or property (false)
    pub is_field: bool,
    /// Name of the field or property
    pub name: String,
    /// Value of the argument
    pub value: CustomAttributeArgument,
}
