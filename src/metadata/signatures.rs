//! Type signatures and type identities.
//!
//! A [`TypeSig`] describes the static type of a parameter, local, field or return slot.
//! A [`TypeRef`] names a type by full name, optionally qualified by the referenced module
//! that defines it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A type identity: full name plus the module that defines it.
///
/// Full names follow the `Namespace.Name` convention for top-level types and
/// `Outer/Inner` for nested types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRef {
    /// Referenced module defining the type, `None` for the current module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Full name of the type
    pub full_name: String,
}

impl TypeRef {
    /// A type defined in the module that holds the reference
    pub fn local(full_name: impl Into<String>) -> Self {
        TypeRef {
            scope: None,
            full_name: full_name.into(),
        }
    }

    /// A type defined in the referenced module `scope`
    pub fn external(scope: impl Into<String>, full_name: impl Into<String>) -> Self {
        TypeRef {
            scope: Some(scope.into()),
            full_name: full_name.into(),
        }
    }

    /// The bare type name without namespace or enclosing types
    #[must_use]
    pub fn name(&self) -> &str {
        let tail = self
            .full_name
            .rsplit_once('/')
            .map_or(self.full_name.as_str(), |(_, name)| name);
        tail.rsplit_once('.').map_or(tail, |(_, name)| name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "[{scope}]{}", self.full_name),
            None => f.write_str(&self.full_name),
        }
    }
}

/// Static type of a value slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSig {
    /// No value
    Void,
    /// `bool`
    Boolean,
    /// UTF-16 code unit
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
    /// `string`
    String,
    /// `object`
    Object,
    /// A reference type
    Class(TypeRef),
    /// A user value type or enum
    ValueType(TypeRef),
    /// Single-dimension zero-based array
    SzArray(Box<TypeSig>),
    /// Managed pointer, used for `ref` and `out` parameters
    ByRef(Box<TypeSig>),
    /// Generic parameter of the declaring type
    GenericParam(u16),
    /// Generic parameter of the method
    MethodGenericParam(u16),
}

impl TypeSig {
    /// Reference to the named class
    pub fn class(full_name: impl Into<String>) -> Self {
        TypeSig::Class(TypeRef::local(full_name))
    }

    /// Array of `element`
    #[must_use]
    pub fn array_of(element: TypeSig) -> Self {
        TypeSig::SzArray(Box::new(element))
    }

    /// Managed pointer to `element`
    #[must_use]
    pub fn by_ref(element: TypeSig) -> Self {
        TypeSig::ByRef(Box::new(element))
    }

    /// True for primitives and user value types
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            TypeSig::Boolean
                | TypeSig::Char
                | TypeSig::I1
                | TypeSig::U1
                | TypeSig::I2
                | TypeSig::U2
                | TypeSig::I4
                | TypeSig::U4
                | TypeSig::I8
                | TypeSig::U8
                | TypeSig::R4
                | TypeSig::R8
                | TypeSig::ValueType(_)
        )
    }

    /// True for unresolved generic parameters
    #[must_use]
    pub fn is_generic_param(&self) -> bool {
        matches!(self, TypeSig::GenericParam(_) | TypeSig::MethodGenericParam(_))
    }

    /// True if a value of this type must be boxed before it can live in an `object` slot
    #[must_use]
    pub fn needs_boxing(&self) -> bool {
        self.is_value_type() || self.is_generic_param()
    }

    /// True for `ref`/`out` slots
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        matches!(self, TypeSig::ByRef(_))
    }

    /// The pointee of a by-ref signature, or the signature itself
    #[must_use]
    pub fn strip_by_ref(&self) -> &TypeSig {
        match self {
            TypeSig::ByRef(inner) => inner,
            other => other,
        }
    }

    /// Element type of an array signature
    #[must_use]
    pub fn element(&self) -> Option<&TypeSig> {
        match self {
            TypeSig::SzArray(inner) => Some(inner),
            _ => None,
        }
    }

    /// Full type name this signature denotes when used as a runtime type
    #[must_use]
    pub fn runtime_name(&self) -> String {
        match self {
            TypeSig::Void => "System.Void".to_string(),
            TypeSig::Boolean => "System.Boolean".to_string(),
            TypeSig::Char => "System.Char".to_string(),
            TypeSig::I1 => "System.SByte".to_string(),
            TypeSig::U1 => "System.Byte".to_string(),
            TypeSig::I2 => "System.Int16".to_string(),
            TypeSig::U2 => "System.UInt16".to_string(),
            TypeSig::I4 => "System.Int32".to_string(),
            TypeSig::U4 => "System.UInt32".to_string(),
            TypeSig::I8 => "System.Int64".to_string(),
            TypeSig::U8 => "System.UInt64".to_string(),
            TypeSig::R4 => "System.Single".to_string(),
            TypeSig::R8 => "System.Double".to_string(),
            TypeSig::String => "System.String".to_string(),
            TypeSig::Object => "System.Object".to_string(),
            TypeSig::Class(r) | TypeSig::ValueType(r) => r.full_name.clone(),
            TypeSig::SzArray(inner) => format!("{}[]", inner.runtime_name()),
            TypeSig::ByRef(inner) => format!("{}&", inner.runtime_name()),
            TypeSig::GenericParam(n) => format!("!{n}"),
            TypeSig::MethodGenericParam(n) => format!("!!{n}"),
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => f.write_str("void"),
            TypeSig::Boolean => f.write_str("bool"),
            TypeSig::Char => f.write_str("char"),
            TypeSig::I1 => f.write_str("int8"),
            TypeSig::U1 => f.write_str("uint8"),
            TypeSig::I2 => f.write_str("int16"),
            TypeSig::U2 => f.write_str("uint16"),
            TypeSig::I4 => f.write_str("int32"),
            TypeSig::U4 => f.write_str("uint32"),
            TypeSig::I8 => f.write_str("int64"),
            TypeSig::U8 => f.write_str("uint64"),
            TypeSig::R4 => f.write_str("float32"),
            TypeSig::R8 => f.write_str("float64"),
            TypeSig::String => f.write_str("string"),
            TypeSig::Object => f.write_str("object"),
            TypeSig::Class(r) => write!(f, "class {r}"),
            TypeSig::ValueType(r) => write!(f, "valuetype {r}"),
            TypeSig::SzArray(inner) => write!(f, "{inner}[]"),
            TypeSig::ByRef(inner) => write!(f, "{inner}&"),
            TypeSig::GenericParam(n) => write!(f, "!{n}"),
            TypeSig::MethodGenericParam(n) => write!(f, "!!{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ref_name() {
        assert_eq!(TypeRef::local("Sample.Outer/Inner").name(), "Inner");
        assert_eq!(TypeRef::local("Sample.Outer").name(), "Outer");
        assert_eq!(TypeRef::local("Global").name(), "Global");
        assert_eq!(
            TypeRef::external("Contracts", "A.B").to_string(),
            "[Contracts]A.B"
        );
    }

    #[test]
    fn test_boxing_rules() {
        assert!(TypeSig::I4.needs_boxing());
        assert!(TypeSig::ValueType(TypeRef::local("S.Point")).needs_boxing());
        assert!(TypeSig::GenericParam(0).needs_boxing());
        assert!(!TypeSig::String.needs_boxing());
        assert!(!TypeSig::class("S.Foo").needs_boxing());
        assert!(!TypeSig::array_of(TypeSig::I4).needs_boxing());
    }

    #[test]
    fn test_by_ref() {
        let sig = TypeSig::by_ref(TypeSig::I4);
        assert!(sig.is_by_ref());
        assert_eq!(sig.strip_by_ref(), &TypeSig::I4);
        assert_eq!(sig.to_string(), "int32&");
    }
}
