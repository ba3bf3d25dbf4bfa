//! Configuration of a weave run.
//!
//! [`WeaveConfig`] names the module to rewrite and everything the run needs around it:
//! reference modules for resolving external aspect types, an optional strong-name key and
//! whether the debug-symbol side-file is carried along.
//!
//! # Examples
//!
//! ```rust
//! use aspectweave::WeaveConfig;
//!
//! let config = WeaveConfig::new("bin/Sample.module.json")
//!     .with_reference_list("lib/Aspects.module.json;;lib/Util.module.json")
//!     .with_key_file("Sample.snk");
//! assert_eq!(config.references.len(), 2);
//! assert!(config.validate().is_ok());
//! ```

use std::path::{Path, PathBuf};

use crate::{resolver::parse_reference_list, signing::SigningKey, Error, Result};

/// Settings of one [`crate::WeaveTask`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaveConfig {
    /// Module rewritten in place
    pub module: PathBuf,
    /// Modules used to resolve types the module references
    pub references: Vec<PathBuf>,
    /// Raw `.snk` key pair, or a `.pfx` with a companion `.snk`
    pub key_file: Option<PathBuf>,
    /// Name of a key in the key store
    pub key_container: Option<String>,
    /// Key store directory; defaults to the `ASPECTWEAVE_KEY_STORE` environment variable
    pub key_store: Option<PathBuf>,
    /// Remap and rewrite `<module>.pdb` when it exists (default: true)
    pub symbols: bool,
}

impl WeaveConfig {
    /// A configuration for the module at `module` with no references and no signing
    pub fn new(module: impl Into<PathBuf>) -> Self {
        WeaveConfig {
            module: module.into(),
            references: Vec::new(),
            key_file: None,
            key_container: None,
            key_store: None,
            symbols: true,
        }
    }

    /// Adds one reference module
    #[must_use]
    pub fn with_reference(mut self, path: impl Into<PathBuf>) -> Self {
        self.references.push(path.into());
        self
    }

    /// Adds every entry of a `;`-delimited reference list
    #[must_use]
    pub fn with_reference_list(mut self, list: &str) -> Self {
        self.references.extend(parse_reference_list(list));
        self
    }

    /// Signs the result with the key at `path`
    #[must_use]
    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    /// Signs the result with the key stored as `name`
    #[must_use]
    pub fn with_key_container(mut self, name: impl Into<String>) -> Self {
        self.key_container = Some(name.into());
        self
    }

    /// Looks key containers up in `dir`
    #[must_use]
    pub fn with_key_store(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_store = Some(dir.into());
        self
    }

    /// Enables or disables debug-symbol handling
    #[must_use]
    pub fn with_symbols(mut self, symbols: bool) -> Self {
        self.symbols = symbols;
        self
    }

    /// True if the run signs its output
    #[must_use]
    pub fn signs(&self) -> bool {
        self.key_file.is_some() || self.key_container.is_some()
    }

    /// Checks the configuration for inconsistencies that need no I/O
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if no module path is given, a reference path is
    /// the module itself, or both a key file and a key container are set.
    pub fn validate(&self) -> Result<()> {
        if self.module.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("no module path given".to_string()));
        }
        if let Some(reference) = self.references.iter().find(|r| r.as_path() == self.module) {
            return Err(Error::InvalidConfig(format!(
                "{} is listed as a reference of itself",
                reference.display()
            )));
        }
        if self.key_file.is_some() && self.key_container.is_some() {
            return Err(Error::InvalidConfig(
                "a key file and a key container are mutually exclusive".to_string(),
            ));
        }
        if self.key_container.as_deref().is_some_and(str::is_empty) {
            return Err(Error::InvalidConfig("the key container name is empty".to_string()));
        }
        Ok(())
    }

    /// Loads the configured signing key, if any
    ///
    /// # Errors
    /// Returns [`Error::SigningKey`] if the key cannot be read.
    pub fn signing_key(&self) -> Result<Option<SigningKey>> {
        if let Some(path) = &self.key_file {
            return SigningKey::from_file(path).map(Some);
        }
        if let Some(name) = &self.key_container {
            return SigningKey::from_container(name, self.key_store.as_deref()).map(Some);
        }
        Ok(None)
    }

    /// Path of the module's debug-symbol side-file
    #[must_use]
    pub fn symbols_path(&self) -> PathBuf {
        crate::file::symbols_path(Path::new(&self.module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WeaveConfig::new("Sample.module.json");
        assert!(config.symbols);
        assert!(!config.signs());
        assert!(config.references.is_empty());
        assert_eq!(config.symbols_path(), PathBuf::from("Sample.module.pdb"));
    }

    #[test]
    fn test_reference_list() {
        let config = WeaveConfig::new("Sample.module.json")
            .with_reference("System.module.json")
            .with_reference_list(" a.json ; ;b.json;");
        assert_eq!(
            config.references,
            vec![
                PathBuf::from("System.module.json"),
                PathBuf::from("a.json"),
                PathBuf::from("b.json")
            ]
        );
    }

    #[test]
    fn test_validate() {
        assert!(matches!(WeaveConfig::new("").validate(), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            WeaveConfig::new("a.json").with_reference("a.json").validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            WeaveConfig::new("a.json")
                .with_key_file("k.snk")
                .with_key_container("k")
                .validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(WeaveConfig::new("a.json").with_key_container("k").validate().is_ok());
    }

    #[test]
    fn test_signing_key_none() -> Result<()> {
        assert!(WeaveConfig::new("a.json").signing_key()?.is_none());
        Ok(())
    }
}
