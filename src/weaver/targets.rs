//! Element-target classification and filtering.

use bitflags::bitflags;
use strum::Display;

use crate::metadata::method::MethodDef;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Kinds of members an aspect may be restricted to. The empty mask is unrestricted.
    pub struct ElementTargets: u32 {
        /// Plain methods
        const METHOD = 0x01;
        /// Property accessors
        const PROPERTY = 0x02;
        /// Instance constructors
        const INSTANCE_CONSTRUCTOR = 0x04;
        /// Static constructors
        const STATIC_CONSTRUCTOR = 0x08;
        /// Every member kind
        const ANY_MEMBER = 0x0F;
    }
}

/// Structural kind of a member, exactly one per method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MemberKind {
    /// Type initializer
    StaticConstructor,
    /// Instance constructor
    InstanceConstructor,
    /// Compiler-generated property getter or setter
    PropertyAccessor,
    /// Any other method
    PlainMethod,
}

impl MemberKind {
    /// Classifies `method` by its structure
    #[must_use]
    pub fn classify(method: &MethodDef) -> Self {
        if method.is_static_constructor() {
            MemberKind::StaticConstructor
        } else if method.is_constructor() {
            MemberKind::InstanceConstructor
        } else if method.is_special_name()
            && (method.name.starts_with("get_") || method.name.starts_with("set_"))
        {
            MemberKind::PropertyAccessor
        } else {
            MemberKind::PlainMethod
        }
    }

    /// The element target bit of this kind
    #[must_use]
    pub fn target_bit(self) -> ElementTargets {
        match self {
            MemberKind::StaticConstructor => ElementTargets::STATIC_CONSTRUCTOR,
            MemberKind::InstanceConstructor => ElementTargets::INSTANCE_CONSTRUCTOR,
            MemberKind::PropertyAccessor => ElementTargets::PROPERTY,
            MemberKind::PlainMethod => ElementTargets::METHOD,
        }
    }
}

/// True if an aspect restricted to `targets` applies to a member of `kind`
#[must_use]
pub fn is_applicable(kind: MemberKind, targets: ElementTargets) -> bool {
    targets.is_empty() || targets.contains(kind.target_bit())
}
