//! Strong-name signing of woven modules.
//!
//! A [`SigningKey`] is read from a raw `.snk` key pair, either given directly, found next to
//! a `.pfx` container with the same stem, or looked up by container name in a key store
//! directory. Signing records a [`StrongName`] on the module: the public key token and a
//! digest over the key and the serialized module content.
//!
//! # Examples
//!
//! ```rust,no_run
//! use aspectweave::{metadata::module::Module, signing::SigningKey};
//! use std::path::Path;
//!
//! let key = SigningKey::from_file(Path::new("Sample.snk"))?;
//! let mut module = Module::new("Sample");
//! key.sign(&mut module)?;
//! println!("token {}", key.public_key_token());
//! # Ok::<(), aspectweave::Error>(())
//! ```

use std::{
    env,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};

use crate::{
    metadata::module::{Module, StrongName},
    Error, Result,
};

/// Environment variable naming the key store directory
pub const KEY_STORE_ENV: &str = "ASPECTWEAVE_KEY_STORE";

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// A strong-name key pair
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    data: Vec<u8>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("token", &self.public_key_token())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Wraps raw key pair bytes
    ///
    /// # Errors
    /// Returns [`Error::SigningKey`] if `data` is empty.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::SigningKey("The strong-name key is empty".to_string()));
        }
        Ok(SigningKey { data })
    }

    /// Reads the key file at `path`.
    ///
    /// `.pfx` containers cannot be read directly; the key pair is taken from a `.snk` with
    /// the same stem next to it.
    ///
    /// # Errors
    /// Returns [`Error::SigningKey`] for a `.pfx` without a companion `.snk`, or if the key
    /// file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let is_pfx = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pfx"));

        let key_path = if is_pfx {
            let companion = path.with_extension("snk");
            if !companion.is_file() {
                return Err(Error::SigningKey(format!(
                    "PFX key files are not supported ({}). Extract the key pair with `sn -p` into {} and use it instead.",
                    path.display(),
                    companion.display()
                )));
            }
            log::debug!(
                "Using {} in place of {}",
                companion.display(),
                path.display()
            );
            companion
        } else {
            path.to_path_buf()
        };

        let data = fs::read(&key_path).map_err(|error| {
            Error::SigningKey(format!(
                "Cannot read strong-name key {}: {error}",
                key_path.display()
            ))
        })?;
        Self::from_bytes(data)
    }

    /// Reads the key stored under `name` in `store`, or in the directory named by
    /// [`KEY_STORE_ENV`] when `store` is `None`.
    ///
    /// # Errors
    /// Returns [`Error::SigningKey`] if no store is configured or the key is missing.
    pub fn from_container(name: &str, store: Option<&Path>) -> Result<Self> {
        let store = match store {
            Some(store) => store.to_path_buf(),
            None => env::var_os(KEY_STORE_ENV).map(PathBuf::from).ok_or_else(|| {
                Error::SigningKey(format!(
                    "Key container {name} requested but no key store is configured; set {KEY_STORE_ENV}"
                ))
            })?,
        };
        Self::from_file(&store.join(format!("{name}.snk")))
    }

    /// Public key token: the last eight bytes of the key digest in reverse order
    #[must_use]
    pub fn public_key_token(&self) -> String {
        let digest = Sha1::digest(&self.data);
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&digest[digest.len() - 8..]);
        format!("{:016x}", u64::from_le_bytes(tail))
    }

    /// Signs `module`, replacing any earlier signature
    ///
    /// # Errors
    /// Returns [`Error::Json`] if the module cannot be serialized.
    pub fn sign(&self, module: &mut Module) -> Result<()> {
        module.strong_name = None;
        let content = serde_json::to_vec(module)?;

        let mut hasher = Sha1::new();
        hasher.update(&self.data);
        hasher.update(&content);

        module.strong_name = Some(StrongName {
            public_key_token: self.public_key_token(),
            signature: to_hex(&hasher.finalize()),
        });
        log::info!("Signed {} with key token {}", module.name, self.public_key_token());
        Ok(())
    }

    /// True if `module` carries a signature made with this key over its current content
    ///
    /// # Errors
    /// Returns [`Error::Json`] if the module cannot be serialized.
    pub fn verify(&self, module: &Module) -> Result<bool> {
        let Some(strong_name) = &module.strong_name else {
            return Ok(false);
        };
        let mut copy = module.clone();
        self.sign(&mut copy)?;
        Ok(copy.strong_name.as_ref() == Some(strong_name))
    }
}
