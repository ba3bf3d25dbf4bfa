//! Scope resolution and merging.
//!
//! Declarations are indexed by the scope they are attached to. For a member, the chain of
//! scopes is walked outer to inner (module, enclosing types, declaring type, owning
//! property, member) and each level is nested into the running candidate list. The merged
//! list is then filtered by element targets and patterns and put into call order.

use std::{cmp::Reverse, collections::HashMap};

use crate::{
    metadata::{module::Module, token::Token},
    weaver::{
        declaration::{DeclarationArena, DeclarationId, DeclaringScope},
        targets::{is_applicable, MemberKind},
    },
    Result,
};

/// Declarations grouped by the scope they are attached to, in discovery order
#[derive(Debug, Default)]
pub struct ScopeIndex {
    by_scope: HashMap<DeclaringScope, Vec<DeclarationId>>,
}

impl ScopeIndex {
    /// An empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as declared at `scope`
    pub fn insert(&mut self, scope: DeclaringScope, id: DeclarationId) {
        self.by_scope.entry(scope).or_default().push(id);
    }

    /// Declarations attached directly at `scope`
    #[must_use]
    pub fn declared_at(&self, scope: DeclaringScope) -> &[DeclarationId] {
        self.by_scope.get(&scope).map_or(&[], Vec::as_slice)
    }
}

/// Nesting depth of a scope: the module is 0, each type counts one deeper than its
/// enclosing type, a property or method one deeper than its type and an accessor one deeper
/// than its property.
#[must_use]
pub fn nesting_level(module: &Module, scope: DeclaringScope) -> u32 {
    let type_depth = |ty: Token| u32::try_from(module.nesting_chain(ty).len()).unwrap_or(u32::MAX);
    match scope {
        DeclaringScope::Module => 0,
        DeclaringScope::Type(ty) => type_depth(ty),
        DeclaringScope::Property(prop) => module
            .property(prop)
            .map_or(1, |p| type_depth(p.declaring_type).saturating_add(1)),
        DeclaringScope::Method(method) => {
            let Some(def) = module.method(method) else {
                return 1;
            };
            let depth = type_depth(def.declaring_type).saturating_add(1);
            if module.owning_property(method).is_some() {
                depth.saturating_add(1)
            } else {
                depth
            }
        }
    }
}

/// Scopes enclosing `method` from outermost to innermost, ending with the method itself
#[must_use]
pub fn scope_chain(module: &Module, method: Token) -> Vec<DeclaringScope> {
    let mut chain = vec![DeclaringScope::Module];
    if let Some(def) = module.method(method) {
        chain.extend(
            module
                .nesting_chain(def.declaring_type)
                .into_iter()
                .map(DeclaringScope::Type),
        );
        if let Some(prop) = module.owning_property(method) {
            chain.push(DeclaringScope::Property(prop.token));
        }
    }
    chain.push(DeclaringScope::Method(method));
    chain
}

/// Nests the declarations of an inner scope into the candidates of the enclosing scopes.
///
/// `Replace` and `Exclude` declarations remove every prior candidate of the same aspect type.
/// Replacing declarations then join the list, excluding ones are dropped and plain ones are
/// appended next to any same-type candidates they inherit.
#[must_use]
pub fn nest_with(
    arena: &DeclarationArena,
    outer: &[DeclarationId],
    nested: &[DeclarationId],
) -> Vec<DeclarationId> {
    let decls: Vec<_> = nested.iter().filter_map(|id| arena.get(*id)).collect();
    let overrides_type = |candidate: DeclarationId, replace: bool| {
        arena.get(candidate).is_some_and(|c| {
            decls
                .iter()
                .filter(|d| if replace { d.replace } else { d.exclude })
                .any(|d| d.same_aspect_type(c))
        })
    };

    let mut merged: Vec<DeclarationId> = outer
        .iter()
        .copied()
        .filter(|id| !overrides_type(*id, true))
        .collect();
    merged.extend(decls.iter().filter(|d| d.replace).map(|d| d.id));
    merged.retain(|id| !overrides_type(*id, false));
    merged.extend(
        decls
            .iter()
            .filter(|d| !d.replace && !d.exclude)
            .map(|d| d.id),
    );
    merged
}

/// The member being resolved, with the names patterns are evaluated against
#[derive(Debug, Clone)]
pub struct MemberCandidate {
    /// Method token
    pub token: Token,
    /// Structural kind
    pub kind: MemberKind,
    /// Method name
    pub name: String,
    /// Owning property name for accessors
    pub property_name: Option<String>,
    /// Bare name of the declaring type
    pub type_name: String,
    /// Full name of the declaring type
    pub type_full_name: String,
}

impl MemberCandidate {
    /// Describes `method` as found in `module`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the method or its declaring type is missing.
    pub fn new(module: &Module, method: Token) -> Result<Self> {
        let def = module
            .method(method)
            .ok_or_else(|| malformed_error!("Method {} does not exist", method))?;
        let ty = module
            .type_def(def.declaring_type)
            .ok_or_else(|| malformed_error!("Declaring type of {} does not exist", def.name))?;
        let kind = MemberKind::classify(def);
        let property_name = match kind {
            MemberKind::PropertyAccessor => module.owning_property(method).map(|p| p.name.clone()),
            _ => None,
        };
        Ok(MemberCandidate {
            token: method,
            kind,
            name: def.name.clone(),
            property_name,
            type_name: ty.name.clone(),
            type_full_name: module.full_name(ty.token).unwrap_or_else(|| ty.name.clone()),
        })
    }

    fn member_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.property_name.as_deref())
    }
}

/// Final, ordered list of aspects instrumenting one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAspectSet {
    /// Instrumented member
    pub member: Token,
    /// Declarations in call order
    pub aspects: Vec<DeclarationId>,
}

impl EffectiveAspectSet {
    /// True if nothing instruments the member
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }
}

/// Drops merged declarations that do not apply to `member`
#[must_use]
pub fn filter(
    arena: &DeclarationArena,
    merged: Vec<DeclarationId>,
    member: &MemberCandidate,
) -> Vec<DeclarationId> {
    merged
        .into_iter()
        .filter(|id| {
            let Some(decl) = arena.get(*id) else {
                return false;
            };
            is_applicable(member.kind, decl.element_targets)
                && decl
                    .type_targets
                    .matches(&member.type_name, &member.type_full_name)
                && member.member_names().any(|name| {
                    decl.member_targets
                        .matches(name, &format!("{}.{name}", member.type_full_name))
                })
        })
        .collect()
}

/// Puts declarations into call order: `Order` ascending, then innermost scope first, then
/// discovery order.
pub fn order(arena: &DeclarationArena, aspects: &mut [DeclarationId]) {
    aspects.sort_by_key(|id| {
        arena
            .get(*id)
            .map(|d| (d.order, Reverse(d.nesting_level), d.id))
            .unwrap_or((i32::MAX, Reverse(0), *id))
    });
}

/// Resolves the effective aspect set of `method`
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the method or its declaring type is missing.
pub fn resolve(
    arena: &DeclarationArena,
    index: &ScopeIndex,
    module: &Module,
    method: Token,
) -> Result<EffectiveAspectSet> {
    let member = MemberCandidate::new(module, method)?;
    let merged = scope_chain(module, method)
        .into_iter()
        .fold(Vec::new(), |candidates, scope| {
            nest_with(arena, &candidates, index.declared_at(scope))
        });
    let mut aspects = filter(arena, merged, &member);
    order(arena, &mut aspects);
    Ok(EffectiveAspectSet {
        member: method,
        aspects,
    })
}
