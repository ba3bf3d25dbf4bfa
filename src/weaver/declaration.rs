//! The aspect declaration model.
//!
//! Every aspect annotation found in the module becomes one immutable
//! [`AspectDeclaration`] stored in a [`DeclarationArena`]. Declarations are addressed by
//! [`DeclarationId`], which doubles as the discovery sequence number.

use std::fmt;

use crate::{
    metadata::{
        customattributes::{CustomAttribute, CustomAttributeArgument},
        signatures::TypeRef,
        token::Token,
    },
    weaver::{pattern::TargetPattern, targets::ElementTargets},
    Error, Result,
};

/// Index of a declaration in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclarationId(pub usize);

/// The scope an annotation is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaringScope {
    /// Module or assembly level
    Module,
    /// A type
    Type(Token),
    /// A property
    Property(Token),
    /// A method or constructor
    Method(Token),
}

impl fmt::Display for DeclaringScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaringScope::Module => f.write_str("module"),
            DeclaringScope::Type(t) => write!(f, "type {t}"),
            DeclaringScope::Property(t) => write!(f, "property {t}"),
            DeclaringScope::Method(t) => write!(f, "method {t}"),
        }
    }
}

/// One aspect annotation occurrence with its settings decoded
#[derive(Debug, Clone)]
pub struct AspectDeclaration {
    /// Arena id, also the discovery order
    pub id: DeclarationId,
    /// Canonical identity of the aspect type (defining module + full name)
    pub aspect_type: TypeRef,
    /// The raw annotation: constructor arguments and named initializers
    pub attribute: CustomAttribute,
    /// Where the annotation is attached
    pub scope: DeclaringScope,
    /// Depth of the declaring scope; module is 0
    pub nesting_level: u32,
    /// Removes same-type declarations from enclosing scopes and contributes nothing
    pub exclude: bool,
    /// Removes same-type declarations from enclosing scopes and takes their place
    pub replace: bool,
    /// Global call order, lower runs earlier
    pub order: i32,
    /// Member kinds the aspect applies to
    pub element_targets: ElementTargets,
    /// Filter on the member's declaring type
    pub type_targets: TargetPattern,
    /// Filter on the member name
    pub member_targets: TargetPattern,
}

impl AspectDeclaration {
    /// Decodes the named settings of `attribute`.
    ///
    /// # Errors
    /// - [`Error::ConflictingDeclaration`] if both `Exclude` and `Replace` are set
    /// - [`Error::InvalidPattern`] if a target pattern does not parse
    /// - [`Error::UnsupportedAttributeValue`] if a setting has the wrong value type
    pub fn from_attribute(
        id: DeclarationId,
        aspect_type: TypeRef,
        attribute: CustomAttribute,
        scope: DeclaringScope,
        nesting_level: u32,
    ) -> Result<Self> {
        let flag = |name: &str| -> Result<bool> {
            match attribute.named_property(name) {
                None => Ok(false),
                Some(value) => value.as_bool().ok_or_else(|| {
                    Error::UnsupportedAttributeValue(format!(
                        "{name} on {aspect_type} must be a bool"
                    ))
                }),
            }
        };
        let integer = |name: &str| -> Result<i64> {
            match attribute.named_property(name) {
                None => Ok(0),
                Some(value) => value.as_i64().ok_or_else(|| {
                    Error::UnsupportedAttributeValue(format!(
                        "{name} on {aspect_type} must be an integer"
                    ))
                }),
            }
        };
        let pattern = |name: &str| -> Result<TargetPattern> {
            match attribute.named_property(name) {
                None | Some(CustomAttributeArgument::Null(_)) => TargetPattern::parse(None),
                Some(value) => {
                    let text = value.as_str().ok_or_else(|| {
                        Error::UnsupportedAttributeValue(format!(
                            "{name} on {aspect_type} must be a string"
                        ))
                    })?;
                    TargetPattern::parse(Some(text))
                }
            }
        };

        let exclude = flag("Exclude")?;
        let replace = flag("Replace")?;
        if exclude && replace {
            return Err(Error::ConflictingDeclaration(aspect_type.full_name.clone()));
        }

        let order = i32::try_from(integer("Order")?).map_err(|_| {
            Error::UnsupportedAttributeValue(format!("Order on {aspect_type} is out of range"))
        })?;
        let element_targets = u32::try_from(integer("ElementTargets")?)
            .ok()
            .and_then(ElementTargets::from_bits)
            .ok_or_else(|| {
                Error::UnsupportedAttributeValue(format!(
                    "ElementTargets on {aspect_type} has unknown bits"
                ))
            })?;
        let type_targets = pattern("TypeTargets")?;
        let member_targets = pattern("MemberTargets")?;

        Ok(AspectDeclaration {
            id,
            aspect_type,
            attribute,
            scope,
            nesting_level,
            exclude,
            replace,
            order,
            element_targets,
            type_targets,
            member_targets,
        })
    }

    /// True if both declarations use the same aspect type
    #[must_use]
    pub fn same_aspect_type(&self, other: &AspectDeclaration) -> bool {
        self.aspect_type == other.aspect_type
    }
}

/// Arena owning every declaration discovered in one weave
#[derive(Debug, Default)]
pub struct DeclarationArena {
    declarations: Vec<AspectDeclaration>,
}

impl DeclarationArena {
    /// An empty arena
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted declaration will receive
    #[must_use]
    pub fn next_id(&self) -> DeclarationId {
        DeclarationId(self.declarations.len())
    }

    /// Stores a declaration built for [`Self::next_id`]
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the declaration was built for a different id.
    pub fn push(&mut self, declaration: AspectDeclaration) -> Result<DeclarationId> {
        let id = self.next_id();
        if declaration.id != id {
            return Err(malformed_error!(
                "Declaration id {} does not match arena slot {}",
                declaration.id.0,
                id.0
            ));
        }
        self.declarations.push(declaration);
        Ok(id)
    }

    /// Declaration `id`
    #[must_use]
    pub fn get(&self, id: DeclarationId) -> Option<&AspectDeclaration> {
        self.declarations.get(id.0)
    }

    /// All declarations in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &AspectDeclaration> {
        self.declarations.iter()
    }

    /// Number of declarations
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// True if nothing was discovered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}
