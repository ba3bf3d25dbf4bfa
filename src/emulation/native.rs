//! Native method implementations.
//!
//! A [`NativeRegistry`] maps `(declaring type, method name)` to a Rust closure. Dispatch
//! consults the registry at every level of the receiver's base chain before the IR body of
//! that level, so a native registered for a user aspect type takes precedence over the
//! aspect's own code. A native may return [`NativeResult::Continue`] to fall through to the
//! IR body and the base types.
//!
//! [`NativeRegistry::with_builtins`] provides the runtime side of the built-in `System` and
//! `AspectWeave` types.

use std::{collections::HashMap, fmt, rc::Rc};

use crate::{
    emulation::{EmValue, HeapRef, Runtime},
    weaver::contract::{self, Hook},
    Result,
};

/// Arguments of one native invocation
#[derive(Debug)]
pub struct NativeCall<'a> {
    /// Full name of the type the native is registered for
    pub type_name: &'a str,
    /// Method name
    pub method_name: &'a str,
    /// Receiver of instance calls
    pub this: Option<&'a EmValue>,
    /// Arguments without the receiver
    pub args: &'a [EmValue],
}

impl NativeCall<'_> {
    /// Argument `index`, null when absent
    #[must_use]
    pub fn arg(&self, index: usize) -> EmValue {
        self.args.get(index).cloned().unwrap_or_default()
    }

    /// The receiver, null for static calls
    #[must_use]
    pub fn this(&self) -> EmValue {
        self.this.cloned().unwrap_or_default()
    }
}

/// Result of a native invocation
#[derive(Debug, Clone, PartialEq)]
pub enum NativeResult {
    /// Let dispatch continue with the IR body and the base types
    Continue,
    /// Complete the call, with a return value for non-void methods
    Return(Option<EmValue>),
    /// Complete the call by throwing the given exception object
    Throw(HeapRef),
}

/// A native method implementation
pub type NativeFn = Rc<dyn Fn(&NativeCall<'_>, &mut Runtime) -> Result<NativeResult>>;

/// Registry of native implementations
#[derive(Clone, Default)]
pub struct NativeRegistry {
    natives: HashMap<(String, String), NativeFn>,
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .natives
            .keys()
            .map(|(ty, method)| format!("{ty}::{method}"))
            .collect();
        keys.sort();
        f.debug_struct("NativeRegistry").field("natives", &keys).finish()
    }
}

fn void() -> Result<NativeResult> {
    Ok(NativeResult::Return(None))
}

impl NativeRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the runtime side of the built-in types
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(contract::SYSTEM_OBJECT, ".ctor", |_, _| void());
        registry.register(contract::SYSTEM_OBJECT, "ToString", |call, rt| {
            let name = rt.type_name(&call.this()).unwrap_or_default();
            Ok(NativeResult::Return(Some(rt.new_string(&name)?)))
        });
        registry.register("System.String", "Concat", |call, rt| {
            let joined = format!("{}{}", rt.display(&call.arg(0))?, rt.display(&call.arg(1))?);
            Ok(NativeResult::Return(Some(rt.new_string(&joined)?)))
        });

        let exception_types = std::iter::once(contract::SYSTEM_EXCEPTION)
            .chain(contract::SYSTEM_EXCEPTIONS.iter().map(|(name, _)| *name));
        for name in exception_types {
            registry.register(name, ".ctor", |call, rt| {
                rt.set_field(&call.this(), "Message", call.arg(0))?;
                void()
            });
        }

        registry.register(contract::MEMBER_INFO, "get_Name", |call, rt| {
            let name = rt.member_name(&call.this()).unwrap_or_default();
            Ok(NativeResult::Return(Some(rt.new_string(&name)?)))
        });

        registry.register(contract::METHOD_EXEC_INFO, ".ctor", |call, rt| {
            rt.set_field(&call.this(), "Arguments", call.arg(0))?;
            void()
        });

        registry.register(contract::BASE_ASPECT, ".ctor", |_, _| void());
        registry.register(contract::BASE_ASPECT, "Initialize", |_, _| void());
        for hook in [Hook::OnEntry, Hook::OnSuccess, Hook::OnException, Hook::OnExit] {
            registry.register(contract::BASE_ASPECT, hook.as_ref(), |_, _| void());
        }
        registry
    }

    /// Registers `native` for `type_name::method`, replacing an earlier registration
    pub fn register<F>(&mut self, type_name: &str, method: &str, native: F)
    where
        F: Fn(&NativeCall<'_>, &mut Runtime) -> Result<NativeResult> + 'static,
    {
        self.natives
            .insert((type_name.to_string(), method.to_string()), Rc::new(native));
    }

    /// The native registered for `type_name::method`
    #[must_use]
    pub fn get(&self, type_name: &str, method: &str) -> Option<NativeFn> {
        self.natives
            .get(&(type_name.to_string(), method.to_string()))
            .cloned()
    }

    /// Number of registrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.natives.len()
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_contract() {
        let registry = NativeRegistry::with_builtins();
        for hook in ["OnEntry", "OnSuccess", "OnException", "OnExit", "Initialize", ".ctor"] {
            assert!(registry.get(contract::BASE_ASPECT, hook).is_some(), "{hook}");
        }
        assert!(registry.get(contract::METHOD_EXEC_INFO, ".ctor").is_some());
        assert!(registry.get("System.InvalidOperationException", ".ctor").is_some());
        assert!(registry.get(contract::BASE_ASPECT, "OnSomething").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = NativeRegistry::new();
        registry.register("S.T", "M", |_, _| Ok(NativeResult::Continue));
        registry.register("S.T", "M", |_, _| void());
        assert_eq!(registry.len(), 1);
    }
}
