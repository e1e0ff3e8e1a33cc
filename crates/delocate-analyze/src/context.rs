use std::path::{Path, PathBuf};

/// Search state for dependency resolution, captured once at the start
/// of a run.
///
/// The environment is only consulted in [`SearchContext::from_env`];
/// the resolver itself never reads it, so tests and embedders can
/// construct a context by hand.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    /// Directories from `DYLD_LIBRARY_PATH`.
    pub library_paths: Vec<PathBuf>,
    /// Directories from `DYLD_FALLBACK_LIBRARY_PATH`.
    pub fallback_library_paths: Vec<PathBuf>,
    /// Substitution for `@executable_path` references.
    pub executable_path: Option<PathBuf>,
}

impl SearchContext {
    /// Capture `DYLD_LIBRARY_PATH` and `DYLD_FALLBACK_LIBRARY_PATH`
    /// from the process environment.
    pub fn from_env(executable_path: Option<PathBuf>) -> Self {
        Self {
            library_paths: paths_from_var("DYLD_LIBRARY_PATH"),
            fallback_library_paths: paths_from_var("DYLD_FALLBACK_LIBRARY_PATH"),
            executable_path,
        }
    }

    /// All environment search directories, in the order they extend a
    /// binary's rpaths.
    pub(crate) fn environment_paths(&self) -> impl Iterator<Item = &Path> {
        self.library_paths
            .iter()
            .chain(&self.fallback_library_paths)
            .map(PathBuf::as_path)
    }
}

fn paths_from_var(name: &str) -> Vec<PathBuf> {
    std::env::var_os(name)
        .map(|value| std::env::split_paths(&value).collect())
        .unwrap_or_default()
}
