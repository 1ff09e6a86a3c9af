//! Locating the loader's runtime data directory.
//!
//! The upstream build step places layers, configs and the generated
//! configuration next to the loader in a runfiles tree. The tree root is
//! taken from `RUNFILES_DIR` when set, otherwise derived from the path the
//! loader was invoked as (`<argv0>.runfiles`), falling back to the directory
//! containing the loader itself.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variable overriding the runfiles root.
pub const RUNFILES_DIR_ENV: &str = "RUNFILES_DIR";

/// Root of the runfiles tree; relative data paths resolve against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runfiles {
    root: PathBuf,
}

impl Runfiles {
    /// Use `root` as the runfiles root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discover the runfiles root from the process environment.
    pub fn discover(argv0: &Path) -> Result<Self> {
        Self::discover_with(std::env::var_os(RUNFILES_DIR_ENV), argv0)
    }

    /// Discover the runfiles root from an explicit override and invocation path.
    pub fn discover_with(override_dir: Option<OsString>, argv0: &Path) -> Result<Self> {
        if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
            return Ok(Self::new(std::path::absolute(PathBuf::from(dir))?));
        }

        let argv0 = executable_path(argv0)?;
        let mut adjacent = argv0.clone().into_os_string();
        adjacent.push(".runfiles");
        let adjacent = PathBuf::from(adjacent);
        if adjacent.is_dir() {
            return Ok(Self::new(adjacent));
        }

        let parent = argv0
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Ok(Self::new(parent))
    }

    /// The runfiles root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a data path; absolute paths are returned unchanged.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Path of the running loader.
///
/// A bare `argv[0]` came from a `PATH` search and says nothing about where
/// the loader lives, so the kernel's view of the executable is used instead.
fn executable_path(argv0: &Path) -> Result<PathBuf> {
    let has_dir = argv0
        .parent()
        .is_some_and(|parent| !parent.as_os_str().is_empty());
    if has_dir && argv0.exists() {
        Ok(std::path::absolute(argv0)?)
    } else {
        Ok(std::env::current_exe()?)
    }
}
