//! Aspect discovery, resolution and weaving.
//!
//! The [`Weaver`] drives one module through the full pipeline:
//!
//! 1. **Discovery** - every custom attribute whose type derives from
//!    `AspectWeave.BaseAspect` becomes an [`AspectDeclaration`] in a [`DeclarationArena`],
//!    indexed by its [`DeclaringScope`]
//! 2. **Resolution** - for every candidate member the declarations along its scope chain are
//!    merged, filtered and ordered into an [`EffectiveAspectSet`]
//! 3. **Transformation** - each member with a non-empty set gets one instance slot per aspect
//!    and its body is rewritten by [`transform::weave_method`]
//! 4. **Initialization** - the [`InitializerBuilder`] emits the type holding the instances
//!
//! Weaving runs on a copy of the module which replaces the caller's module only when every
//! step succeeded.
//!
//! # Key Components
//!
//! - [`pattern`] - `TypeTargets`/`MemberTargets` matching
//! - [`targets`] - Element target classification
//! - [`declaration`] - The declaration model
//! - [`scope`] - Scope chains, the merge engine and ordering
//! - [`initializer`] - Aspect instance construction
//! - [`transform`] - Method body rewriting
//! - [`contract`] - Names shared with the aspect runtime

pub mod contract;
pub mod declaration;
pub mod initializer;
pub mod pattern;
pub mod scope;
pub mod targets;
pub mod transform;

use std::fmt;

use serde::Serialize;

use crate::{
    metadata::{
        customattributes::CustomAttribute,
        module::Module,
        signatures::TypeRef,
        token::Token,
        typedef::{TypeDef, TypeVisibility},
    },
    resolver::Resolver,
    Error, Result,
};

pub use declaration::{AspectDeclaration, DeclarationArena, DeclarationId, DeclaringScope};
pub use initializer::{InitializerBuilder, InstanceHandle};
pub use scope::{EffectiveAspectSet, ScopeIndex};
pub use targets::{ElementTargets, MemberKind};
pub use transform::{BlockSplit, TransformOutcome};

/// Marker attribute of compiler-synthesized types (closures, iterators, async state machines)
const COMPILER_GENERATED: &str = "System.Runtime.CompilerServices.CompilerGeneratedAttribute";

/// One aspect applied to a member, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedAspect {
    /// Full name of the aspect type
    pub aspect_type: String,
    /// Scope the declaration is attached to
    pub declared_at: String,
    /// Explicit order
    pub order: i32,
}

/// The effective aspects of one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberPlan {
    /// Member token
    pub token: Token,
    /// `Type.Member` display name
    pub member: String,
    /// Structural kind
    pub kind: String,
    /// Aspects in call order
    pub aspects: Vec<AppliedAspect>,
}

/// A member rewritten by the weaver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WovenMember {
    /// The plan that was applied
    pub plan: MemberPlan,
    /// Instance slots used by the member, in call order
    pub fields: Vec<String>,
    /// Constructor split, if one was made
    pub split: Option<BlockSplit>,
}

/// Result of weaving a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeaveReport {
    /// Module name
    pub module: String,
    /// Full name of the synthesized initializer type
    pub initializer: String,
    /// Number of aspect instances emitted
    pub emitted_aspects: usize,
    /// Rewritten members in processing order
    pub members: Vec<WovenMember>,
}

/// Outcome of [`Weaver::weave`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WeaveOutcome {
    /// At least one member was rewritten
    Woven(WeaveReport),
    /// No member had an effective aspect; the module is unchanged
    NoAspects,
    /// The module already carries an initializer type; the module is unchanged
    AlreadyProcessed,
}

impl WeaveOutcome {
    /// Number of emitted aspect instances, zero unless woven
    #[must_use]
    pub fn emitted_aspects(&self) -> usize {
        match self {
            WeaveOutcome::Woven(report) => report.emitted_aspects,
            _ => 0,
        }
    }
}

impl fmt::Display for WeaveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeaveOutcome::Woven(report) => write!(
                f,
                "{}: {} aspect instances across {} members",
                report.module,
                report.emitted_aspects,
                report.members.len()
            ),
            WeaveOutcome::NoAspects => f.write_str("no aspects detected"),
            WeaveOutcome::AlreadyProcessed => f.write_str("already processed"),
        }
    }
}

/// Declarations discovered in one module
#[derive(Debug, Default)]
pub struct Discovery {
    /// All declarations in discovery order
    pub arena: DeclarationArena,
    /// Declarations by scope
    pub index: ScopeIndex,
}

/// Drives discovery, resolution and rewriting of one module against a [`Resolver`]
pub struct Weaver<'a> {
    resolver: &'a Resolver,
}

impl<'a> Weaver<'a> {
    /// A weaver resolving external types through `resolver`
    #[must_use]
    pub fn new(resolver: &'a Resolver) -> Self {
        Weaver { resolver }
    }

    /// True if `module` already contains a synthesized initializer type
    #[must_use]
    pub fn is_processed(module: &Module) -> bool {
        module
            .types
            .iter()
            .any(|ty| contract::is_initializer_type(&ty.namespace, &ty.name))
    }

    /// Collects every aspect declaration of `module`.
    ///
    /// # Errors
    /// Returns the first declaration error: a conflicting `Exclude`/`Replace`, an invalid
    /// target pattern or a setting of the wrong type.
    pub fn discover(&self, module: &Module) -> Result<Discovery> {
        let mut discovery = Discovery::default();

        self.declare_all(module, &mut discovery, DeclaringScope::Module, &module.attributes)?;
        for ty in &module.types {
            self.declare_all(module, &mut discovery, DeclaringScope::Type(ty.token), &ty.attributes)?;
        }
        for property in &module.properties {
            self.declare_all(
                module,
                &mut discovery,
                DeclaringScope::Property(property.token),
                &property.attributes,
            )?;
        }
        for method in &module.methods {
            self.declare_all(
                module,
                &mut discovery,
                DeclaringScope::Method(method.token),
                &method.attributes,
            )?;
        }

        log::debug!(
            "Discovered {} aspect declarations in {}",
            discovery.arena.len(),
            module.name
        );
        Ok(discovery)
    }

    fn declare_all(
        &self,
        module: &Module,
        discovery: &mut Discovery,
        scope: DeclaringScope,
        attributes: &[CustomAttribute],
    ) -> Result<()> {
        let level = scope::nesting_level(module, scope);
        for attribute in attributes {
            let Some(aspect_type) = self.aspect_identity(module, &attribute.attribute_type) else {
                continue;
            };
            let declaration = AspectDeclaration::from_attribute(
                discovery.arena.next_id(),
                aspect_type,
                attribute.clone(),
                scope,
                level,
            )?;
            let id = discovery.arena.push(declaration)?;
            discovery.index.insert(scope, id);
        }
        Ok(())
    }

    /// Canonical identity of `attribute_type` if it is an aspect
    fn aspect_identity(&self, module: &Module, attribute_type: &TypeRef) -> Option<TypeRef> {
        let Some(resolved) = self.resolver.resolve(module, attribute_type) else {
            log::debug!("Skipping unresolvable attribute {attribute_type}");
            return None;
        };
        self.resolver
            .inherits_from(module, attribute_type, contract::BASE_ASPECT)
            .then(|| resolved.canonical())
    }

    fn is_woven_type(&self, module: &Module, ty: &TypeDef) -> bool {
        if ty.is_interface() || contract::is_initializer_type(&ty.namespace, &ty.name) {
            return false;
        }
        if ty
            .attributes
            .iter()
            .any(|attr| attr.attribute_type.full_name == COMPILER_GENERATED)
        {
            return false;
        }
        let Some(own) = module.type_ref(ty.token) else {
            return false;
        };
        !self
            .resolver
            .inherits_from(module, &own, contract::BASE_ASPECT)
    }

    /// Methods of `module` eligible for weaving, in type order
    #[must_use]
    pub fn candidates(&self, module: &Module) -> Vec<Token> {
        module
            .types
            .iter()
            .filter(|ty| self.is_woven_type(module, ty))
            .flat_map(|ty| ty.methods.iter().copied())
            .filter(|token| module.method(*token).is_some_and(|m| m.body.is_some()))
            .collect()
    }

    /// Resolves the effective aspects of every candidate member without rewriting anything.
    ///
    /// # Errors
    /// Returns discovery errors and [`Error::Malformed`] for dangling member tokens.
    pub fn plan(&self, module: &Module) -> Result<Vec<MemberPlan>> {
        let discovery = self.discover(module)?;
        let mut plans = Vec::new();
        for token in self.candidates(module) {
            let set = scope::resolve(&discovery.arena, &discovery.index, module, token)?;
            if !set.is_empty() {
                plans.push(member_plan(module, &discovery.arena, &set)?);
            }
        }
        Ok(plans)
    }

    /// Weaves every member of `module` that has effective aspects.
    ///
    /// On error `module` is left exactly as it was.
    ///
    /// # Errors
    /// - Discovery errors (see [`Weaver::discover`])
    /// - [`Error::AspectVisibility`] if an applied aspect type is nested private or protected
    /// - [`Error::MemberNotFound`] if an aspect constructor or named member is missing
    /// - [`Error::Malformed`] if a method body fails validation
    pub fn weave(&self, module: &mut Module) -> Result<WeaveOutcome> {
        if Self::is_processed(module) {
            log::info!("{} already contains woven aspects, skipping", module.name);
            return Ok(WeaveOutcome::AlreadyProcessed);
        }

        let mut work = module.clone();
        let discovery = self.discover(&work)?;
        let mut initializer = InitializerBuilder::new(&work.name);
        let mut members = Vec::new();

        for token in self.candidates(&work) {
            let set = scope::resolve(&discovery.arena, &discovery.index, &work, token)?;
            if set.is_empty() {
                continue;
            }
            let plan = member_plan(&work, &discovery.arena, &set)?;
            let mut fields = Vec::with_capacity(set.aspects.len());
            for id in &set.aspects {
                let declaration = discovery
                    .arena
                    .get(*id)
                    .ok_or_else(|| malformed_error!("Unknown declaration {}", id.0))?;
                self.check_visibility(&work, &declaration.aspect_type)?;
                let handle = initializer.allocate(*id, token);
                fields.push(initializer.field_ref(
                    handle,
                    Resolver::localize(&work, &declaration.aspect_type),
                ));
            }

            let (own_type, base_type) = declaring_types(&work, token)?;
            let method = work
                .method_mut(token)
                .ok_or_else(|| malformed_error!("Method {} does not exist", token))?;
            let outcome = transform::weave_method(method, &own_type, base_type.as_ref(), &fields)?;
            log::debug!(
                "Wove {} with {} aspects",
                plan.member,
                plan.aspects.len()
            );
            members.push(WovenMember {
                plan,
                fields: fields.into_iter().map(|f| f.name).collect(),
                split: outcome.split,
            });
        }

        let emitted_aspects = initializer.emitted_aspects();
        let initializer_name = initializer.type_full_name();
        if initializer
            .finish(&mut work, &discovery.arena, self.resolver)?
            .is_none()
        {
            return Ok(WeaveOutcome::NoAspects);
        }

        *module = work;
        Ok(WeaveOutcome::Woven(WeaveReport {
            module: module.name.clone(),
            initializer: initializer_name,
            emitted_aspects,
            members,
        }))
    }

    fn check_visibility(&self, module: &Module, aspect_type: &TypeRef) -> Result<()> {
        let local = Resolver::localize(module, aspect_type);
        let resolved = self.resolver.require(module, &local)?;
        match resolved.def.visibility() {
            TypeVisibility::NestedPrivate
            | TypeVisibility::NestedFamily
            | TypeVisibility::NestedFamAndAssem => {
                Err(Error::AspectVisibility(resolved.full_name()))
            }
            _ => Ok(()),
        }
    }
}

/// The declaring type of `method` and its base type
fn declaring_types(module: &Module, method: Token) -> Result<(TypeRef, Option<TypeRef>)> {
    let owner = module
        .method(method)
        .map(|m| m.declaring_type)
        .ok_or_else(|| malformed_error!("Method {} does not exist", method))?;
    let ty = module
        .type_def(owner)
        .ok_or_else(|| malformed_error!("Type {} does not exist", owner))?;
    let own = module
        .type_ref(owner)
        .ok_or_else(|| malformed_error!("Type {} has no name", owner))?;
    Ok((own, ty.base.clone()))
}

fn member_plan(module: &Module, arena: &DeclarationArena, set: &EffectiveAspectSet) -> Result<MemberPlan> {
    let candidate = scope::MemberCandidate::new(module, set.member)?;
    let mut aspects = Vec::with_capacity(set.aspects.len());
    for id in &set.aspects {
        let declaration = arena
            .get(*id)
            .ok_or_else(|| malformed_error!("Unknown declaration {}", id.0))?;
        aspects.push(AppliedAspect {
            aspect_type: declaration.aspect_type.full_name.clone(),
            declared_at: describe_scope(module, declaration.scope),
            order: declaration.order,
        });
    }
    Ok(MemberPlan {
        token: set.member,
        member: format!("{}.{}", candidate.type_full_name, candidate.name),
        kind: candidate.kind.to_string(),
        aspects,
    })
}

fn describe_scope(module: &Module, scope: DeclaringScope) -> String {
    match scope {
        DeclaringScope::Module => format!("module {}", module.name),
        DeclaringScope::Type(token) => module
            .full_name(token)
            .map_or_else(|| scope.to_string(), |name| format!("type {name}")),
        DeclaringScope::Property(token) => module
            .property(token)
            .map_or_else(|| scope.to_string(), |p| format!("property {}", p.name)),
        DeclaringScope::Method(token) => module
            .method(token)
            .map_or_else(|| scope.to_string(), |m| format!("method {}", m.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::customattributes::CustomAttributeArgument as Arg,
        test::FixtureModule,
    };

    #[test]
    fn test_weave_marks_module_processed() -> Result<()> {
        let resolver = Resolver::new()?;
        let mut module = FixtureModule::new("Sample")
            .aspect("Sample.LogAspect")
            .class("Sample.Calc", |class| {
                class
                    .attribute(CustomAttribute::new(TypeRef::local("Sample.LogAspect")))
                    .adder("Add")
            })
            .build()?;

        let weaver = Weaver::new(&resolver);
        let outcome = weaver.weave(&mut module)?;
        let WeaveOutcome::Woven(report) = outcome else {
            panic!("expected a woven module");
        };
        assert_eq!(report.emitted_aspects, 1);
        assert_eq!(report.members[0].plan.member, "Sample.Calc.Add");
        assert!(Weaver::is_processed(&module));
        assert_eq!(weaver.weave(&mut module)?, WeaveOutcome::AlreadyProcessed);
        Ok(())
    }

    #[test]
    fn test_no_aspects_leaves_module_untouched() -> Result<()> {
        let resolver = Resolver::new()?;
        let mut module = FixtureModule::new("Sample")
            .class("Sample.Calc", |class| class.adder("Add"))
            .build()?;
        let before = module.clone();
        assert_eq!(Weaver::new(&resolver).weave(&mut module)?, WeaveOutcome::NoAspects);
        assert_eq!(module, before);
        Ok(())
    }

    #[test]
    fn test_abstract_and_static_classes_are_woven() -> Result<()> {
        use crate::metadata::typedef::TypeAttributes;
        let resolver = Resolver::new()?;
        let tagged = || CustomAttribute::new(TypeRef::local("Sample.LogAspect"));
        let module = FixtureModule::new("Sample")
            .aspect("Sample.LogAspect")
            .class("Sample.Shape", |class| {
                class
                    .attribute(tagged())
                    .with(|c| c.flags(TypeAttributes::ABSTRACT))
                    .adder("Area")
            })
            .class("Sample.MathUtil", |class| {
                class
                    .attribute(tagged())
                    .with(|c| c.flags(TypeAttributes::ABSTRACT | TypeAttributes::SEALED))
                    .adder("Sum")
            })
            .build()?;
        let plans = Weaver::new(&resolver).plan(&module)?;
        let members: Vec<&str> = plans.iter().map(|p| p.member.as_str()).collect();
        assert_eq!(members, vec!["Sample.Shape.Area", "Sample.MathUtil.Sum"]);
        Ok(())
    }

    #[test]
    fn test_aspect_types_are_not_woven() -> Result<()> {
        let resolver = Resolver::new()?;
        let module = FixtureModule::new("Sample")
            .aspect("Sample.LogAspect")
            .module_attribute(CustomAttribute::new(TypeRef::local("Sample.LogAspect")))
            .class("Sample.Calc", |class| class.adder("Add"))
            .build()?;
        let plans = Weaver::new(&resolver).plan(&module)?;
        let members: Vec<&str> = plans.iter().map(|p| p.member.as_str()).collect();
        assert_eq!(members, vec!["Sample.Calc.Add"]);
        assert_eq!(plans[0].aspects[0].declared_at, "module Sample");
        Ok(())
    }

    #[test]
    fn test_unresolvable_attribute_is_not_an_aspect() -> Result<()> {
        let resolver = Resolver::new()?;
        let module = FixtureModule::new("Sample")
            .class("Sample.Calc", |class| {
                class
                    .attribute(CustomAttribute::new(TypeRef::external("Elsewhere", "Elsewhere.Marker")))
                    .adder("Add")
            })
            .build()?;
        let discovery = Weaver::new(&resolver).discover(&module)?;
        assert!(discovery.arena.is_empty());
        Ok(())
    }

    #[test]
    fn test_private_aspect_rejected() -> Result<()> {
        let resolver = Resolver::new()?;
        let mut module = FixtureModule::new("Sample")
            .class("Sample.Host", |class| class)
            .nested_private_aspect("Sample.Host", "Hidden")
            .class("Sample.Calc", |class| {
                class
                    .attribute(CustomAttribute::new(TypeRef::local("Sample.Host/Hidden")))
                    .adder("Add")
            })
            .build()?;
        let before = module.clone();
        let result = Weaver::new(&resolver).weave(&mut module);
        assert!(matches!(result, Err(Error::AspectVisibility(name)) if name == "Sample.Host/Hidden"));
        assert_eq!(module, before);
        Ok(())
    }

    #[test]
    fn test_failed_weave_leaves_module_untouched() -> Result<()> {
        let resolver = Resolver::new()?;
        let mut module = FixtureModule::new("Sample")
            .aspect("Sample.LogAspect")
            .class("Sample.Calc", |class| {
                class
                    .attribute(
                        CustomAttribute::new(TypeRef::local("Sample.LogAspect"))
                            .property("Missing", Arg::I4(1)),
                    )
                    .adder("Add")
            })
            .build()?;
        let before = module.clone();
        let result = Weaver::new(&resolver).weave(&mut module);
        assert!(matches!(result, Err(Error::MemberNotFound(_))));
        assert_eq!(module, before);
        Ok(())
    }
}
