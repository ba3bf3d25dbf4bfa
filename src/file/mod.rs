//! Module file access: loading, atomic saving and the debug-symbol side-file.
//!
//! A module is stored as a JSON document. Loading goes through a [`Backend`], memory-mapped
//! [`physical::Physical`] for files on disk or [`memory::Memory`] for buffers already in
//! memory. Saving never leaves a truncated file behind: the new content is written next to
//! the target and moved into place in one rename.
//!
//! # Key Components
//!
//! - [`Backend`] - Trait over the data sources
//! - [`load_module`] / [`module_from_bytes`] - Parse a module
//! - [`save_module`] - Serialize and atomically replace a module file
//! - [`symbols::SymbolFile`] - Sequence points kept in `<module>.pdb`
//!
//! # Examples
//!
//! ```rust,no_run
//! use aspectweave::file;
//! use std::path::Path;
//!
//! let module = file::load_module(Path::new("Sample.module.json"))?;
//! println!("{} declares {} types", module.name, module.types.len());
//! file::save_module(&module, Path::new("Sample.module.json"))?;
//! # Ok::<(), aspectweave::Error>(())
//! ```

pub mod memory;
pub mod physical;
pub mod symbols;

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{metadata::module::Module, Result};

pub use memory::Memory;
pub use physical::Physical;

/// Backend for abstracting file and memory access.
///
/// The trait provides a common interface for reading module data regardless of whether it
/// is mapped from a file on disk or held in a memory buffer.
pub trait Backend {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;

    /// True if the backend holds no data
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn checked_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let Some(offset_end) = offset.checked_add(len) else {
        return Err(malformed_error!("Range {}+{} overflows", offset, len));
    };
    if offset_end > data.len() {
        return Err(malformed_error!(
            "Range {}..{} is out of bounds for {} bytes",
            offset,
            offset_end,
            data.len()
        ));
    }
    Ok(&data[offset..offset_end])
}

fn parse<T: Backend>(backend: &T) -> Result<Module> {
    if backend.is_empty() {
        return Err(malformed_error!("Module file is empty"));
    }
    Ok(serde_json::from_slice(backend.data())?)
}

/// Loads the module stored at `path`
///
/// # Errors
/// Returns [`crate::Error::FileError`] if the file cannot be opened,
/// [`crate::Error::Malformed`] if it is empty and [`crate::Error::Json`] if it does not
/// hold a module.
pub fn load_module(path: &Path) -> Result<Module> {
    let module = parse(&Physical::new(path)?)?;
    log::debug!("Loaded module {} from {}", module.name, path.display());
    Ok(module)
}

/// Parses a module from a buffer
///
/// # Errors
/// Same as [`load_module`], minus the I/O failures.
pub fn module_from_bytes(data: Vec<u8>) -> Result<Module> {
    parse(&Memory::new(data))
}

/// Serializes `module` and atomically replaces the file at `path`
///
/// # Errors
/// Returns [`crate::Error::FileError`] if the file cannot be written.
pub fn save_module(module: &Module, path: &Path) -> Result<()> {
    let data = serde_json::to_vec_pretty(module)?;
    write_atomic(path, &data)
}

/// Writes `data` to a sibling of `path` and renames it over `path`
///
/// # Errors
/// Returns [`crate::Error::FileError`] if writing or renaming fails; the original file is
/// left untouched in that case.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    write_all_atomic(&[(path, data)])
}

/// Replaces several files as one step.
///
/// Every file is staged next to its target before the first rename. Renames run in the
/// given order, so the file that marks the output as complete goes last.
///
/// # Errors
/// Returns [`crate::Error::FileError`] if staging or renaming fails. A staging failure
/// leaves every target untouched and removes what was staged.
pub fn write_all_atomic(files: &[(&Path, &[u8])]) -> Result<()> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(files.len());
    for (path, data) in files {
        let staging = staging_path(path);
        if let Err(error) = fs::write(&staging, data) {
            let _ = fs::remove_file(&staging);
            discard(staged.iter().map(|(s, _)| s));
            return Err(error.into());
        }
        staged.push((staging, *path));
    }

    for (i, (staging, path)) in staged.iter().enumerate() {
        if let Err(error) = fs::rename(staging, path) {
            discard(staged[i..].iter().map(|(s, _)| s));
            return Err(error.into());
        }
    }
    Ok(())
}

fn discard<'a>(staged: impl Iterator<Item = &'a PathBuf>) {
    for staging in staged {
        let _ = fs::remove_file(staging);
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".weaving");
    path.with_file_name(name)
}

/// Path of the debug-symbol side-file of the module at `module_path`
#[must_use]
pub fn symbols_path(module_path: &Path) -> PathBuf {
    module_path.with_extension("pdb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Sample.module.json");
        let mut module = Module::new("Sample");
        module.references.push("AspectWeave".into());
        save_module(&module, &path)?;
        assert_eq!(load_module(&path)?, module);
        assert!(!staging_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_failed_staging_touches_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("Sample.module.pdb");
        let second = dir.path().join("Sample.module.json");
        fs::write(&first, b"old symbols")?;
        fs::write(&second, b"old module")?;
        fs::create_dir(staging_path(&second))?;

        let result = write_all_atomic(&[
            (first.as_path(), &b"new symbols"[..]),
            (second.as_path(), &b"new module"[..]),
        ]);
        assert!(matches!(result, Err(crate::Error::FileError(_))));
        assert_eq!(fs::read(&first)?, b"old symbols");
        assert_eq!(fs::read(&second)?, b"old module");
        assert!(!staging_path(&first).exists());
        Ok(())
    }

    #[test]
    fn test_empty_and_garbage() {
        assert!(matches!(module_from_bytes(Vec::new()), Err(crate::Error::Malformed { .. })));
        assert!(matches!(module_from_bytes(b"{not json".to_vec()), Err(crate::Error::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_module(Path::new("/nonexistent/Sample.module.json"));
        assert!(matches!(result, Err(crate::Error::FileError(e)) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_symbols_path() {
        assert_eq!(
            symbols_path(Path::new("out/Sample.module.json")),
            PathBuf::from("out/Sample.module.pdb")
        );
    }
}
