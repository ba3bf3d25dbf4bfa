//! Shared fixtures for unit tests.
//!
//! [`FixtureModule`] assembles a small user module that references the system and contract
//! modules: aspect types deriving from `BaseAspect`, plain classes with simple method bodies
//! and module level attributes.

use crate::{
    metadata::{
        builders::{ClassBuilder, MethodBuilder},
        customattributes::CustomAttribute,
        module::Module,
        signatures::TypeSig,
    },
    weaver::contract,
    Result,
};

/// A class under construction inside a [`FixtureModule`]
pub struct ClassFixture(ClassBuilder);

impl ClassFixture {
    /// Attaches a custom attribute to the class
    #[must_use]
    pub fn attribute(self, attribute: CustomAttribute) -> Self {
        ClassFixture(self.0.attribute(attribute))
    }

    /// Adds `public static int name(int a, int b) => a + b`
    #[must_use]
    pub fn adder(self, name: &str) -> Self {
        let name = name.to_string();
        self.method(move |m| {
            m.named(name)
                .public()
                .static_method()
                .parameter("a", TypeSig::I4)
                .parameter("b", TypeSig::I4)
                .returns(TypeSig::I4)
                .implementation(|body| {
                    body.implementation(|asm| {
                        asm.ldarg(0).ldarg(1).add().ret();
                        Ok(())
                    })
                })
        })
    }

    /// Adds an arbitrary method
    #[must_use]
    pub fn method<F>(self, method: F) -> Self
    where
        F: FnOnce(MethodBuilder) -> MethodBuilder,
    {
        ClassFixture(self.0.method(method))
    }

    /// Applies any other class builder call
    #[must_use]
    pub fn with<F>(self, f: F) -> Self
    where
        F: FnOnce(ClassBuilder) -> ClassBuilder,
    {
        ClassFixture(f(self.0))
    }
}

/// Builder of a user module for tests
pub struct FixtureModule {
    module: Module,
    classes: Vec<ClassBuilder>,
}

impl FixtureModule {
    /// An empty module called `name` referencing the system and contract modules
    pub fn new(name: &str) -> Self {
        let mut module = Module::new(name);
        module.references.push(contract::SYSTEM_MODULE.to_string());
        module.references.push(contract::CONTRACT_MODULE.to_string());
        FixtureModule {
            module,
            classes: Vec::new(),
        }
    }

    /// Adds a public aspect type with a parameterless constructor
    #[must_use]
    pub fn aspect(mut self, full_name: &str) -> Self {
        self.classes.push(
            ClassBuilder::new(full_name)
                .public()
                .extends(Some(contract::base_aspect_type()))
                .default_constructor(),
        );
        self
    }

    /// Adds an aspect nested privately inside `enclosing`
    #[must_use]
    pub fn nested_private_aspect(mut self, enclosing: &str, name: &str) -> Self {
        self.classes.push(
            ClassBuilder::new(name)
                .nested_in(enclosing)
                .extends(Some(contract::base_aspect_type()))
                .default_constructor(),
        );
        self
    }

    /// Adds a public class without constructors
    #[must_use]
    pub fn class<F>(mut self, full_name: &str, f: F) -> Self
    where
        F: FnOnce(ClassFixture) -> ClassFixture,
    {
        let fixture = f(ClassFixture(ClassBuilder::new(full_name).public()));
        self.classes.push(fixture.0);
        self
    }

    /// Attaches a module level custom attribute
    #[must_use]
    pub fn module_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.module.attributes.push(attribute);
        self
    }

    /// Builds the module, adding types in the order they were declared
    ///
    /// # Errors
    /// Fails if a nested type names a missing enclosing type or a body is malformed.
    pub fn build(self) -> Result<Module> {
        let mut module = self.module;
        for class in self.classes {
            class.build(&mut module)?;
        }
        Ok(module)
    }
}
