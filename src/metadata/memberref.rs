//! References to methods and fields, possibly defined in another module.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metadata::signatures::{TypeRef, TypeSig};

/// A reference to a method by declaring type, name and signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// Type declaring the method
    pub declaring_type: TypeRef,
    /// Method name
    pub name: String,
    /// Parameter signatures, excluding `this`
    #[serde(default)]
    pub params: Vec<TypeSig>,
    /// Return type
    pub return_type: TypeSig,
    /// True if the method takes an implicit `this`
    pub has_this: bool,
}

impl MethodRef {
    /// Reference to an instance method
    pub fn instance(
        declaring_type: TypeRef,
        name: impl Into<String>,
        params: Vec<TypeSig>,
        return_type: TypeSig,
    ) -> Self {
        MethodRef {
            declaring_type,
            name: name.into(),
            params,
            return_type,
            has_this: true,
        }
    }

    /// Reference to a static method
    pub fn static_method(
        declaring_type: TypeRef,
        name: impl Into<String>,
        params: Vec<TypeSig>,
        return_type: TypeSig,
    ) -> Self {
        MethodRef {
            declaring_type,
            name: name.into(),
            params,
            return_type,
            has_this: false,
        }
    }

    /// Reference to the instance constructor taking `params`
    #[must_use]
    pub fn constructor(declaring_type: TypeRef, params: Vec<TypeSig>) -> Self {
        MethodRef::instance(declaring_type, ".ctor", params, TypeSig::Void)
    }

    /// True for instance constructor references
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" && self.has_this
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}(", self.return_type, self.declaring_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A reference to a field by declaring type and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Type declaring the field
    pub declaring_type: TypeRef,
    /// Field name
    pub name: String,
    /// Field type
    pub sig: TypeSig,
}

impl FieldRef {
    /// Creates a field reference
    pub fn new(declaring_type: TypeRef, name: impl Into<String>, sig: TypeSig) -> Self {
        FieldRef {
            declaring_type,
            name: name.into(),
            sig,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.sig, self.declaring_type, self.name)
    }
}
