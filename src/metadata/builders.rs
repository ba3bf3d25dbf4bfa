//! Fluent builders for adding types and methods to a [`Module`].
//!
//! [`ClassBuilder`] collects a type with its fields, auto-properties and methods and adds
//! everything in one [`ClassBuilder::build`] call. [`MethodBuilder`] describes one method;
//! its body comes from a [`MethodBodyBuilder`].
//!
//! # Examples
//!
//! ```rust
//! use aspectweave::metadata::{builders::ClassBuilder, module::Module, signatures::TypeSig};
//!
//! # fn example() -> aspectweave::Result<()> {
//! let mut module = Module::new("Sample");
//! ClassBuilder::new("Sample.Calc")
//!     .public()
//!     .auto_property("Total", TypeSig::I4)
//!     .method(|method| {
//!         method
//!             .public()
//!             .static_method()
//!             .parameter("a", TypeSig::I4)
//!             .parameter("b", TypeSig::I4)
//!             .returns(TypeSig::I4)
//!             .named("Add")
//!             .implementation(|body| {
//!                 body.implementation(|asm| {
//!                     asm.ldarg(0).ldarg(1).add().ret();
//!                     Ok(())
//!                 })
//!             })
//!     })
//!     .default_constructor()
//!     .build(&mut module)?;
//! assert!(module.find_type("Sample.Calc").is_some());
//! # Ok(())
//! # }
//! ```

use crate::{
    assembly::MethodBodyBuilder,
    metadata::{
        customattributes::CustomAttribute,
        memberref::{FieldRef, MethodRef},
        method::{FieldAttributes, FieldDef, MethodDef, MethodModifiers, ParamDef, PropertyDef},
        module::Module,
        signatures::{TypeRef, TypeSig},
        token::Token,
        typedef::{TypeAttributes, TypeDef, TYPE_VISIBILITY_MASK},
    },
    weaver::contract,
    Result,
};

const METHOD_ACCESS_MASK: u32 = 0x0007;

/// Builder for one method
pub struct MethodBuilder {
    name: String,
    flags: MethodModifiers,
    params: Vec<ParamDef>,
    return_type: TypeSig,
    attributes: Vec<CustomAttribute>,
    body: Option<MethodBodyBuilder>,
}

impl MethodBuilder {
    /// A private instance method returning `void`
    pub fn new(name: impl Into<String>) -> Self {
        MethodBuilder {
            name: name.into(),
            flags: MethodModifiers::PRIVATE,
            params: Vec::new(),
            return_type: TypeSig::Void,
            attributes: Vec::new(),
            body: None,
        }
    }

    /// An instance constructor
    #[must_use]
    pub fn constructor() -> Self {
        let mut builder = MethodBuilder::new(".ctor");
        builder.flags = MethodModifiers::PUBLIC | MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME;
        builder
    }

    fn access(mut self, access: MethodModifiers) -> Self {
        self.flags = (self.flags - MethodModifiers::from_bits_retain(METHOD_ACCESS_MASK)) | access;
        self
    }

    /// Renames the method
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Public access
    #[must_use]
    pub fn public(self) -> Self {
        self.access(MethodModifiers::PUBLIC)
    }

    /// Assembly access
    #[must_use]
    pub fn internal(self) -> Self {
        self.access(MethodModifiers::ASSEM)
    }

    /// Static method
    #[must_use]
    pub fn static_method(mut self) -> Self {
        self.flags |= MethodModifiers::STATIC;
        self
    }

    /// Virtual method taking a new slot
    #[must_use]
    pub fn virtual_method(mut self) -> Self {
        self.flags |= MethodModifiers::VIRTUAL | MethodModifiers::NEW_SLOT;
        self
    }

    /// Abstract method; such a method has no body
    #[must_use]
    pub fn abstract_method(mut self) -> Self {
        self.flags |= MethodModifiers::ABSTRACT | MethodModifiers::VIRTUAL;
        self.body = None;
        self
    }

    /// Extra modifier flags
    #[must_use]
    pub fn flags(mut self, flags: MethodModifiers) -> Self {
        self.flags |= flags;
        self
    }

    /// Appends a by-value parameter
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, sig: TypeSig) -> Self {
        self.params.push(ParamDef::new(name, sig));
        self
    }

    /// Appends a `ref` parameter of element type `sig`
    #[must_use]
    pub fn ref_parameter(mut self, name: impl Into<String>, sig: TypeSig) -> Self {
        self.params.push(ParamDef::by_ref(name, sig));
        self
    }

    /// Appends an `out` parameter of element type `sig`
    #[must_use]
    pub fn out_parameter(mut self, name: impl Into<String>, sig: TypeSig) -> Self {
        self.params.push(ParamDef::out(name, sig));
        self
    }

    /// Return type
    #[must_use]
    pub fn returns(mut self, sig: TypeSig) -> Self {
        self.return_type = sig;
        self
    }

    /// Attaches a custom attribute
    #[must_use]
    pub fn attribute(mut self, attribute: CustomAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Body of the method
    #[must_use]
    pub fn implementation<F>(mut self, body: F) -> Self
    where
        F: FnOnce(MethodBodyBuilder) -> MethodBodyBuilder,
    {
        self.body = Some(body(MethodBodyBuilder::new()));
        self
    }

    /// Adds the method to `owner`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body fails to build or `owner` does not
    /// exist.
    pub fn build(self, module: &mut Module, owner: Token) -> Result<Token> {
        let mut method = MethodDef::new(self.name, self.flags, self.return_type);
        method.params = self.params;
        method.attributes = self.attributes;
        method.body = self.body.map(MethodBodyBuilder::build).transpose()?;
        module.add_method(owner, method)
    }
}

struct PropertySpec {
    name: String,
    sig: TypeSig,
    attributes: Vec<CustomAttribute>,
}

/// Builder for one type
pub struct ClassBuilder {
    namespace: String,
    name: String,
    flags: TypeAttributes,
    base: Option<TypeRef>,
    enclosing: Option<String>,
    attributes: Vec<CustomAttribute>,
    fields: Vec<FieldDef>,
    properties: Vec<PropertySpec>,
    methods: Vec<MethodBuilder>,
    default_constructor: bool,
}

impl ClassBuilder {
    /// A non-public class deriving from `System.Object`. A dotted name is split into
    /// namespace and name.
    pub fn new(name: &str) -> Self {
        let (namespace, name) = name.rsplit_once('.').unwrap_or(("", name));
        ClassBuilder {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: TypeAttributes::empty(),
            base: Some(contract::object_type()),
            enclosing: None,
            attributes: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            default_constructor: false,
        }
    }

    fn visibility(mut self, visibility: TypeAttributes) -> Self {
        self.flags = (self.flags - TypeAttributes::from_bits_retain(TYPE_VISIBILITY_MASK)) | visibility;
        self
    }

    /// Namespace of a top-level type
    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Public visibility, nested public for nested types
    #[must_use]
    pub fn public(self) -> Self {
        let visibility = if self.enclosing.is_some() {
            TypeAttributes::NESTED_PUBLIC
        } else {
            TypeAttributes::PUBLIC
        };
        self.visibility(visibility)
    }

    /// Nests the type inside the type called `enclosing`, nested private by default
    #[must_use]
    pub fn nested_in(mut self, enclosing: &str) -> Self {
        self.enclosing = Some(enclosing.to_string());
        self.namespace.clear();
        self.visibility(TypeAttributes::NESTED_PRIVATE)
    }

    /// Explicit visibility bits
    #[must_use]
    pub fn with_visibility(self, visibility: TypeAttributes) -> Self {
        self.visibility(visibility)
    }

    /// Extra type flags
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.flags |= flags;
        self
    }

    /// Base type; `None` for interfaces
    #[must_use]
    pub fn extends(mut self, base: Option<TypeRef>) -> Self {
        self.base = base;
        self
    }

    /// Attaches a custom attribute
    #[must_use]
    pub fn attribute(mut self, attribute: CustomAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Adds a field
    #[must_use]
    pub fn field(mut self, name: &str, sig: TypeSig, flags: FieldAttributes) -> Self {
        self.fields.push(FieldDef::new(name, sig, flags));
        self
    }

    /// Adds a property with a backing field and generated accessors
    #[must_use]
    pub fn auto_property(mut self, name: &str, sig: TypeSig) -> Self {
        self.properties.push(PropertySpec {
            name: name.to_string(),
            sig,
            attributes: Vec::new(),
        });
        self
    }

    /// Attaches a custom attribute to the previously added property `name`
    #[must_use]
    pub fn property_attribute(mut self, name: &str, attribute: CustomAttribute) -> Self {
        if let Some(property) = self.properties.iter_mut().find(|p| p.name == name) {
            property.attributes.push(attribute);
        }
        self
    }

    /// Adds a method
    #[must_use]
    pub fn method<F>(mut self, method: F) -> Self
    where
        F: FnOnce(MethodBuilder) -> MethodBuilder,
    {
        self.methods.push(method(MethodBuilder::new("Method")));
        self
    }

    /// Adds a public parameterless constructor calling the base constructor
    #[must_use]
    pub fn default_constructor(mut self) -> Self {
        self.default_constructor = true;
        self
    }

    /// Adds the type and its members to `module`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the enclosing type does not exist or a body
    /// fails to build.
    pub fn build(self, module: &mut Module) -> Result<Token> {
        let mut ty = TypeDef::new(self.namespace, self.name, self.flags);
        ty.base = self.base.clone();
        ty.attributes = self.attributes;
        if let Some(enclosing) = &self.enclosing {
            let token = module
                .find_type(enclosing)
                .map(|t| t.token)
                .ok_or_else(|| malformed_error!("Enclosing type {} does not exist", enclosing))?;
            ty.enclosing = Some(token);
        }
        let owner = module.add_type(ty)?;
        let own = module
            .type_ref(owner)
            .ok_or_else(|| malformed_error!("Type {} was not added", owner))?;

        for field in self.fields {
            module.add_field(owner, field)?;
        }

        if self.default_constructor {
            let base = self.base.clone().unwrap_or_else(contract::object_type);
            MethodBuilder::constructor()
                .implementation(|body| {
                    body.implementation(move |asm| {
                        asm.ldarg(0).call(MethodRef::constructor(base, Vec::new())).ret();
                        Ok(())
                    })
                })
                .build(module, owner)?;
        }

        for method in self.methods {
            method.build(module, owner)?;
        }

        for property in self.properties {
            add_auto_property(module, owner, &own, property)?;
        }
        Ok(owner)
    }
}

fn add_auto_property(module: &mut Module, owner: Token, own: &TypeRef, property: PropertySpec) -> Result<()> {
    let backing = format!("<{}>k__BackingField", property.name);
    module.add_field(owner, FieldDef::new(&backing, property.sig.clone(), FieldAttributes::PRIVATE))?;
    let field = FieldRef::new(own.clone(), backing, property.sig.clone());

    let getter_field = field.clone();
    let getter = MethodBuilder::new(format!("get_{}", property.name))
        .public()
        .flags(MethodModifiers::SPECIAL_NAME)
        .returns(property.sig.clone())
        .implementation(|body| {
            body.implementation(move |asm| {
                asm.ldarg(0).ldfld(getter_field).ret();
                Ok(())
            })
        })
        .build(module, owner)?;
    let setter = MethodBuilder::new(format!("set_{}", property.name))
        .public()
        .flags(MethodModifiers::SPECIAL_NAME)
        .parameter("value", property.sig.clone())
        .implementation(|body| {
            body.implementation(move |asm| {
                asm.ldarg(0).ldarg(1).stfld(field).ret();
                Ok(())
            })
        })
        .build(module, owner)?;

    module.add_property(
        owner,
        PropertyDef {
            token: Token::new(0),
            name: property.name,
            declaring_type: Token::new(0),
            sig: property.sig,
            getter: Some(getter),
            setter: Some(setter),
            attributes: property.attributes,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typedef::TypeVisibility;

    #[test]
    fn test_class_with_members() -> Result<()> {
        let mut module = Module::new("Sample");
        let token = ClassBuilder::new("Sample.Person")
            .public()
            .auto_property("Name", TypeSig::String)
            .default_constructor()
            .method(|m| m.public().named("Greet").returns(TypeSig::String).implementation(|b| {
                b.implementation(|asm| {
                    asm.ldstr("hi").ret();
                    Ok(())
                })
            }))
            .build(&mut module)?;

        let ty = module.type_def(token).expect("type added");
        assert_eq!(ty.visibility(), TypeVisibility::Public);
        let names: Vec<&str> = ty
            .methods
            .iter()
            .filter_map(|t| module.method(*t))
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec![".ctor", "Greet", "get_Name", "set_Name"]);
        assert!(module.method(ty.methods[0]).is_some_and(MethodDef::is_constructor));
        assert_eq!(ty.properties.len(), 1);
        Ok(())
    }

    #[test]
    fn test_nested_type() -> Result<()> {
        let mut module = Module::new("Sample");
        ClassBuilder::new("Sample.Host").public().build(&mut module)?;
        let hidden = ClassBuilder::new("Hidden").nested_in("Sample.Host").build(&mut module)?;
        assert_eq!(module.full_name(hidden).as_deref(), Some("Sample.Host/Hidden"));
        assert_eq!(
            module.type_def(hidden).map(TypeDef::visibility),
            Some(TypeVisibility::NestedPrivate)
        );
        assert!(ClassBuilder::new("Orphan").nested_in("Sample.Missing").build(&mut module).is_err());
        Ok(())
    }
}
