use std::path::{Path, PathBuf};

use anyhow::Context;
use aspectweave::{file, metadata::module::Module, resolver::Resolver, WeaveConfig};

/// Load a module file.
pub fn load_module(path: &Path) -> anyhow::Result<Module> {
    file::load_module(path).with_context(|| format!("failed to load module: {}", path.display()))
}

/// Build a resolver over the `;`-separated reference list.
pub fn load_resolver(references: &str) -> anyhow::Result<Resolver> {
    let paths: Vec<PathBuf> = WeaveConfig::new("").with_reference_list(references).references;
    Resolver::with_references(&paths).context("failed to load reference modules")
}

/// Display-friendly filename of a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}
