//! Module metadata: tokens, type identities, definitions and custom attributes.
//!
//! # Key Components
//!
//! - [`token::Token`] - Table-qualified row references
//! - [`module::Module`] - The module model owning all definition tables
//! - [`typedef::TypeDef`] - Type definitions and their [`typedef::TypeAttributes`]
//! - [`method::MethodDef`] - Method definitions, parameters, fields and properties
//! - [`signatures::TypeSig`] - Static types of value slots
//! - [`memberref::MethodRef`] / [`memberref::FieldRef`] - Member references used as operands
//! - [`customattributes::CustomAttribute`] - Decoded annotation instances
//! - [`builders::ClassBuilder`] / [`builders::MethodBuilder`] - Fluent construction of types

pub mod builders;
pub mod customattributes;
pub mod memberref;
pub mod method;
pub mod module;
pub mod signatures;
pub mod token;
pub mod typedef;
