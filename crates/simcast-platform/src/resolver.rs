//! Locating optional host binaries.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Capability to find a host tool by name.
pub trait ToolResolver: Send + Sync {
    /// Return the first existing candidate, else look the name up on `PATH`.
    fn resolve(&self, name: &str, candidates: &[PathBuf]) -> Option<PathBuf>;
}

/// Resolves against the real filesystem and a `PATH`-style search list.
pub struct PathResolver {
    search_path: Option<OsString>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    fn which(&self, name: &str) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        std::env::split_paths(search_path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolResolver for PathResolver {
    fn resolve(&self, name: &str, candidates: &[PathBuf]) -> Option<PathBuf> {
        candidates
            .iter()
            .find(|c| is_executable(c))
            .cloned()
            .or_else(|| self.which(name))
    }
}

/// A resolver with a fixed answer table, for wiring known paths.
pub struct FixedResolver {
    tools: Vec<(String, PathBuf)>,
}

impl FixedResolver {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.tools.push((name.to_string(), path.into()));
        self
    }
}

impl Default for FixedResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolResolver for FixedResolver {
    fn resolve(&self, name: &str, _candidates: &[PathBuf]) -> Option<PathBuf> {
        self.tools
            .iter()
            .find(|(tool, _)| tool == name)
            .map(|(_, path)| path.clone())
    }
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode() & 0o111 != 0
            }
            #[cfg(not(unix))]
            {
                true
            }
        }
        _ => false,
    }
}
