//! Resolution of type identities across referenced modules.
//!
//! A [`Resolver`] owns the modules a weave can see besides the one being rewritten: the
//! built-in system and contract modules plus every module named on the reference list.
//! Type references are resolved relative to the module that holds them, so a reference with
//! no scope is looked up in that module and a scoped reference in the named module.

use std::path::{Path, PathBuf};

use crate::{
    file,
    metadata::{
        method::{FieldDef, PropertyDef},
        module::Module,
        signatures::TypeRef,
        typedef::TypeDef,
    },
    weaver::contract,
    Error, Result,
};

/// Upper bound on base-chain walks, guards against cyclic inheritance in malformed input
const MAX_BASE_DEPTH: usize = 64;

/// A type definition together with the module defining it
#[derive(Debug, Clone, Copy)]
pub struct ResolvedType<'a> {
    /// Defining module
    pub module: &'a Module,
    /// The definition
    pub def: &'a TypeDef,
}

impl<'a> ResolvedType<'a> {
    /// Full name of the type
    #[must_use]
    pub fn full_name(&self) -> String {
        self.module
            .full_name(self.def.token)
            .unwrap_or_else(|| self.def.name.clone())
    }

    /// Canonical identity: defining module plus full name
    #[must_use]
    pub fn canonical(&self) -> TypeRef {
        TypeRef::external(self.module.name.clone(), self.full_name())
    }

    /// Field `name` declared directly on this type
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'a FieldDef> {
        self.def
            .fields
            .iter()
            .filter_map(|tok| self.module.field(*tok))
            .find(|f| f.name == name)
    }

    /// Property `name` declared directly on this type
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&'a PropertyDef> {
        self.def
            .properties
            .iter()
            .filter_map(|tok| self.module.property(*tok))
            .find(|p| p.name == name)
    }
}

/// The set of modules available for resolution
#[derive(Debug, Clone)]
pub struct Resolver {
    modules: Vec<Module>,
}

impl Resolver {
    /// A resolver that knows only the built-in system and contract modules
    ///
    /// # Errors
    /// Fails only if the built-in modules cannot be constructed.
    pub fn new() -> Result<Self> {
        Ok(Resolver {
            modules: vec![contract::system_module()?, contract::contract_module()?],
        })
    }

    /// A resolver that additionally loads every module in `paths`
    ///
    /// # Errors
    /// Returns [`Error::AssemblyResolution`] naming the first module that cannot be loaded.
    pub fn with_references<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut resolver = Self::new()?;
        for path in paths {
            let path = path.as_ref();
            let module = file::load_module(path).map_err(|e| {
                Error::AssemblyResolution(format!("{}: {e}", path.display()))
            })?;
            log::debug!("Loaded reference {} from {}", module.name, path.display());
            resolver.add_module(module);
        }
        Ok(resolver)
    }

    /// Adds a module; a later module with the same name shadows an earlier one
    pub fn add_module(&mut self, module: Module) {
        self.modules.retain(|m| m.name != module.name);
        self.modules.push(module);
    }

    /// The loaded module called `name`
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Mutable access to the loaded module called `name`
    pub fn module_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.modules.iter_mut().find(|m| m.name == name)
    }

    /// Resolves `ty` as referenced from `from`
    #[must_use]
    pub fn resolve<'a>(&'a self, from: &'a Module, ty: &TypeRef) -> Option<ResolvedType<'a>> {
        let module = match &ty.scope {
            None => from,
            Some(scope) if *scope == from.name => from,
            Some(scope) => self.module(scope)?,
        };
        let def = module.find_type(&ty.full_name)?;
        Some(ResolvedType { module, def })
    }

    /// Resolves `ty` or reports it as missing
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if `ty` does not resolve.
    pub fn require<'a>(&'a self, from: &'a Module, ty: &TypeRef) -> Result<ResolvedType<'a>> {
        self.resolve(from, ty)
            .ok_or_else(|| Error::TypeNotFound(ty.to_string()))
    }

    /// `ty` followed by its base types, nearest first, as far as they resolve
    #[must_use]
    pub fn base_chain<'a>(&'a self, from: &'a Module, ty: &TypeRef) -> Vec<ResolvedType<'a>> {
        let mut chain = Vec::new();
        let mut current = self.resolve(from, ty);
        while let Some(resolved) = current {
            if chain.len() >= MAX_BASE_DEPTH {
                break;
            }
            chain.push(resolved);
            current = resolved
                .def
                .base
                .as_ref()
                .and_then(|base| self.resolve(resolved.module, base));
        }
        chain
    }

    /// True if `ty` is `base_full_name` or derives from it
    #[must_use]
    pub fn inherits_from(&self, from: &Module, ty: &TypeRef, base_full_name: &str) -> bool {
        self.base_chain(from, ty)
            .iter()
            .any(|resolved| resolved.full_name() == base_full_name)
    }

    /// Reference to `canonical` as written inside `from`: unscoped when `from` defines it
    #[must_use]
    pub fn localize(from: &Module, canonical: &TypeRef) -> TypeRef {
        match &canonical.scope {
            Some(scope) if *scope == from.name => TypeRef::local(canonical.full_name.clone()),
            _ => canonical.clone(),
        }
    }
}

/// Splits a `;`-delimited reference list, ignoring empty entries
#[must_use]
pub fn parse_reference_list(list: &str) -> Vec<PathBuf> {
    list.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typedef::TypeAttributes;

    fn user_module() -> Result<Module> {
        let mut module = Module::new("Sample");
        module.references.push(contract::CONTRACT_MODULE.to_string());
        let mut log = TypeDef::new("Sample", "LogAspect", TypeAttributes::PUBLIC);
        log.base = Some(contract::base_aspect_type());
        module.add_type(log)?;
        let mut derived = TypeDef::new("Sample", "TimedLogAspect", TypeAttributes::PUBLIC);
        derived.base = Some(TypeRef::local("Sample.LogAspect"));
        module.add_type(derived)?;
        module.add_type(TypeDef::new("Sample", "Plain", TypeAttributes::PUBLIC))?;
        Ok(module)
    }

    #[test]
    fn test_cross_module_inheritance() -> Result<()> {
        let resolver = Resolver::new()?;
        let module = user_module()?;
        let derived = TypeRef::local("Sample.TimedLogAspect");
        assert!(resolver.inherits_from(&module, &derived, contract::BASE_ASPECT));
        assert!(resolver.inherits_from(&module, &derived, contract::SYSTEM_OBJECT));
        assert!(!resolver.inherits_from(&module, &TypeRef::local("Sample.Plain"), contract::BASE_ASPECT));

        let chain: Vec<String> = resolver
            .base_chain(&module, &derived)
            .iter()
            .map(ResolvedType::full_name)
            .collect();
        assert_eq!(
            chain,
            vec![
                "Sample.TimedLogAspect",
                "Sample.LogAspect",
                "AspectWeave.BaseAspect",
                "System.Object"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unresolved_scope() -> Result<()> {
        let resolver = Resolver::new()?;
        let module = user_module()?;
        let missing = TypeRef::external("Missing", "Missing.Aspect");
        assert!(resolver.resolve(&module, &missing).is_none());
        assert!(matches!(
            resolver.require(&module, &missing),
            Err(Error::TypeNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_canonical_and_localize() -> Result<()> {
        let resolver = Resolver::new()?;
        let module = user_module()?;
        let resolved = resolver.require(&module, &TypeRef::local("Sample.LogAspect"))?;
        let canonical = resolved.canonical();
        assert_eq!(canonical, TypeRef::external("Sample", "Sample.LogAspect"));
        assert_eq!(Resolver::localize(&module, &canonical), TypeRef::local("Sample.LogAspect"));
        assert_eq!(
            Resolver::localize(&module, &contract::base_aspect_type()),
            contract::base_aspect_type()
        );
        Ok(())
    }

    #[test]
    fn test_reference_list() {
        assert_eq!(
            parse_reference_list("a.json; ;b.json;"),
            vec![PathBuf::from("a.json"), PathBuf::from("b.json")]
        );
        assert!(parse_reference_list("").is_empty());
    }

    #[test]
    fn test_missing_reference_file() {
        let result = Resolver::with_references(&["/nonexistent/reference.json"]);
        assert!(matches!(result, Err(Error::AssemblyResolution(_))));
    }
}
