//! The in-memory module model.
//!
//! A [`Module`] owns flat tables of types, methods, fields and properties. Rows are
//! addressed through [`Token`]s whose table byte selects the table and whose row is the
//! 1-based position in it. Adding a definition assigns its token and links it to its
//! declaring type.

use serde::{Deserialize, Serialize};

use crate::{
    metadata::{
        customattributes::CustomAttribute,
        method::{FieldDef, MethodDef, PropertyDef},
        signatures::TypeRef,
        token::Token,
        typedef::TypeDef,
    },
    Result,
};

/// Strong-name information recorded on a signed module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongName {
    /// Hex encoded public key token
    pub public_key_token: String,
    /// Hex encoded signature digest
    pub signature: String,
}

/// A compiled module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module (assembly) name
    pub name: String,
    /// Names of referenced modules
    #[serde(default)]
    pub references: Vec<String>,
    /// Assembly and module level custom attributes
    #[serde(default)]
    pub attributes: Vec<CustomAttribute>,
    /// Type definitions
    #[serde(default)]
    pub types: Vec<TypeDef>,
    /// Method definitions
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    /// Field definitions
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Property definitions
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    /// Strong-name signature, present once the module is signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strong_name: Option<StrongName>,
}

fn next_token(table: u8, len: usize) -> Result<Token> {
    let row = u32::try_from(len + 1)
        .ok()
        .filter(|row| *row <= 0x00FF_FFFF)
        .ok_or_else(|| malformed_error!("Table 0x{:02x} is full", table))?;
    Ok(Token::from_parts(table, row))
}

impl Module {
    /// An empty module called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a type and returns its token
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the enclosing type does not exist or the
    /// table is full.
    pub fn add_type(&mut self, mut ty: TypeDef) -> Result<Token> {
        if let Some(enclosing) = ty.enclosing {
            if self.type_def(enclosing).is_none() {
                return Err(malformed_error!("Enclosing type {} does not exist", enclosing));
            }
        }
        let token = next_token(Token::TYPE_DEF, self.types.len())?;
        ty.token = token;
        self.types.push(ty);
        Ok(token)
    }

    /// Adds a method to `owner` and returns its token
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `owner` does not exist.
    pub fn add_method(&mut self, owner: Token, mut method: MethodDef) -> Result<Token> {
        let token = next_token(Token::METHOD_DEF, self.methods.len())?;
        let ty = self
            .type_def_mut(owner)
            .ok_or_else(|| malformed_error!("Declaring type {} does not exist", owner))?;
        ty.methods.push(token);
        method.token = token;
        method.declaring_type = owner;
        self.methods.push(method);
        Ok(token)
    }

    /// Adds a field to `owner` and returns its token
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `owner` does not exist.
    pub fn add_field(&mut self, owner: Token, mut field: FieldDef) -> Result<Token> {
        let token = next_token(Token::FIELD, self.fields.len())?;
        let ty = self
            .type_def_mut(owner)
            .ok_or_else(|| malformed_error!("Declaring type {} does not exist", owner))?;
        ty.fields.push(token);
        field.token = token;
        field.declaring_type = owner;
        self.fields.push(field);
        Ok(token)
    }

    /// Adds a property to `owner` and returns its token
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `owner` does not exist.
    pub fn add_property(&mut self, owner: Token, mut property: PropertyDef) -> Result<Token> {
        let token = next_token(Token::PROPERTY, self.properties.len())?;
        let ty = self
            .type_def_mut(owner)
            .ok_or_else(|| malformed_error!("Declaring type {} does not exist", owner))?;
        ty.properties.push(token);
        property.token = token;
        property.declaring_type = owner;
        self.properties.push(property);
        Ok(token)
    }

    /// Type definition for `token`
    #[must_use]
    pub fn type_def(&self, token: Token) -> Option<&TypeDef> {
        if token.table() != Token::TYPE_DEF {
            return None;
        }
        self.types.get(token.index()?)
    }

    /// Mutable type definition for `token`
    pub fn type_def_mut(&mut self, token: Token) -> Option<&mut TypeDef> {
        if token.table() != Token::TYPE_DEF {
            return None;
        }
        self.types.get_mut(token.index()?)
    }

    /// Method definition for `token`
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDef> {
        if token.table() != Token::METHOD_DEF {
            return None;
        }
        self.methods.get(token.index()?)
    }

    /// Mutable method definition for `token`
    pub fn method_mut(&mut self, token: Token) -> Option<&mut MethodDef> {
        if token.table() != Token::METHOD_DEF {
            return None;
        }
        self.methods.get_mut(token.index()?)
    }

    /// Field definition for `token`
    #[must_use]
    pub fn field(&self, token: Token) -> Option<&FieldDef> {
        if token.table() != Token::FIELD {
            return None;
        }
        self.fields.get(token.index()?)
    }

    /// Property definition for `token`
    #[must_use]
    pub fn property(&self, token: Token) -> Option<&PropertyDef> {
        if token.table() != Token::PROPERTY {
            return None;
        }
        self.properties.get(token.index()?)
    }

    /// Full name of a type: `Namespace.Name`, or `Outer/Inner` for nested types
    #[must_use]
    pub fn full_name(&self, token: Token) -> Option<String> {
        let ty = self.type_def(token)?;
        match ty.enclosing {
            Some(enclosing) => Some(format!("{}/{}", self.full_name(enclosing)?, ty.name)),
            None if ty.namespace.is_empty() => Some(ty.name.clone()),
            None => Some(format!("{}.{}", ty.namespace, ty.name)),
        }
    }

    /// Type defined in this module with the given full name
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        self.types
            .iter()
            .find(|ty| self.full_name(ty.token).as_deref() == Some(full_name))
    }

    /// Enclosing types of `token` from outermost to innermost, followed by `token` itself
    #[must_use]
    pub fn nesting_chain(&self, token: Token) -> Vec<Token> {
        let mut chain = Vec::new();
        let mut current = Some(token);
        while let Some(tok) = current {
            if chain.contains(&tok) {
                break;
            }
            chain.push(tok);
            current = self.type_def(tok).and_then(|ty| ty.enclosing);
        }
        chain.reverse();
        chain
    }

    /// The property owning accessor `method`, if any
    #[must_use]
    pub fn owning_property(&self, method: Token) -> Option<&PropertyDef> {
        let declaring = self.method(method)?.declaring_type;
        self.type_def(declaring)?
            .properties
            .iter()
            .filter_map(|tok| self.property(*tok))
            .find(|prop| prop.getter == Some(method) || prop.setter == Some(method))
    }

    /// Method of `owner` called `name` with `arity` parameters
    #[must_use]
    pub fn find_method(&self, owner: Token, name: &str, arity: usize) -> Option<&MethodDef> {
        self.type_def(owner)?
            .methods
            .iter()
            .filter_map(|tok| self.method(*tok))
            .find(|m| m.name == name && m.params.len() == arity)
    }

    /// Type reference naming a type defined in this module
    #[must_use]
    pub fn type_ref(&self, token: Token) -> Option<TypeRef> {
        self.full_name(token).map(TypeRef::local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        method::{MethodModifiers, PropertyDef},
        signatures::TypeSig,
        typedef::TypeAttributes,
    };

    #[test]
    fn test_nested_full_names() -> Result<()> {
        let mut module = Module::new("Sample");
        let outer = module.add_type(TypeDef::new("Sample.Tests", "Outer", TypeAttributes::PUBLIC))?;
        let mut inner = TypeDef::new("", "Inner", TypeAttributes::NESTED_PUBLIC);
        inner.enclosing = Some(outer);
        let inner = module.add_type(inner)?;
        let mut innermost = TypeDef::new("", "Deep", TypeAttributes::NESTED_PUBLIC);
        innermost.enclosing = Some(inner);
        let innermost = module.add_type(innermost)?;

        assert_eq!(
            module.full_name(innermost).as_deref(),
            Some("Sample.Tests.Outer/Inner/Deep")
        );
        assert_eq!(module.nesting_chain(innermost), vec![outer, inner, innermost]);
        assert_eq!(
            module.find_type("Sample.Tests.Outer/Inner").map(|t| t.token),
            Some(inner)
        );
        Ok(())
    }

    #[test]
    fn test_missing_enclosing_type() {
        let mut module = Module::new("Sample");
        let mut ty = TypeDef::new("", "Orphan", TypeAttributes::NESTED_PUBLIC);
        ty.enclosing = Some(Token::from_parts(Token::TYPE_DEF, 9));
        assert!(module.add_type(ty).is_err());
    }

    #[test]
    fn test_owning_property() -> Result<()> {
        let mut module = Module::new("Sample");
        let ty = module.add_type(TypeDef::new("S", "C", TypeAttributes::PUBLIC))?;
        let getter = module.add_method(
            ty,
            MethodDef::new(
                "get_Value",
                MethodModifiers::PUBLIC | MethodModifiers::SPECIAL_NAME,
                TypeSig::I4,
            ),
        )?;
        let plain = module.add_method(ty, MethodDef::new("Run", MethodModifiers::PUBLIC, TypeSig::Void))?;
        module.add_property(
            ty,
            PropertyDef {
                token: Token::new(0),
                name: "Value".into(),
                declaring_type: Token::new(0),
                sig: TypeSig::I4,
                getter: Some(getter),
                setter: None,
                attributes: Vec::new(),
            },
        )?;

        assert_eq!(module.owning_property(getter).map(|p| p.name.as_str()), Some("Value"));
        assert!(module.owning_property(plain).is_none());
        assert_eq!(module.find_method(ty, "Run", 0).map(|m| m.token), Some(plain));
        Ok(())
    }
}
