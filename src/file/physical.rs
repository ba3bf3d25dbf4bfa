//! Physical file backend for memory-mapped I/O.
//!
//! [`Physical`] maps a module file read-only into the address space so that parsing works
//! directly on the mapped bytes without an intermediate copy.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::{checked_slice, Backend};
use crate::Result;

/// A file backend that uses memory-mapped I/O
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data, `None` for empty files which cannot be mapped
    data: Option<Mmap>,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;
        Self::from_std_file(file)
    }

    /// Creates a backend from an already opened file
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be mapped.
    #[allow(clippy::needless_pass_by_value)]
    pub fn from_std_file(file: fs::File) -> Result<Physical> {
        if file.metadata()?.len() == 0 {
            return Ok(Physical { data: None });
        }
        // The mapping is read-only and lives no longer than the backend.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Physical { data: Some(mmap) })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        checked_slice(self.data(), offset, len)
    }

    fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.data().len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_physical_maps_content() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"{\"name\":\"Sample\"}")?;
        let physical = Physical::new(file.path())?;
        assert_eq!(physical.len(), 17);
        assert_eq!(physical.data_slice(2, 4)?, b"name");
        assert!(physical.data_slice(10, 100).is_err());
        assert!(physical.data_slice(usize::MAX, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_physical_empty_file() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let physical = Physical::new(file.path())?;
        assert!(physical.is_empty());
        assert_eq!(physical.data(), b"");
        Ok(())
    }

    #[test]
    fn test_physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/module.json");
        assert!(matches!(result, Err(crate::Error::FileError(e)) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
