use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Which files to inspect for dependencies.
#[derive(Clone)]
pub enum LibraryInspection {
    /// Inspect every file.
    All,
    /// Inspect only files with the known dynamic-library extensions
    /// `.so` and `.dylib`.
    DylibExtensionsOnly,
    /// Inspect files for which the predicate returns true.
    Predicate(Arc<dyn Fn(&Path) -> bool + Send + Sync>),
}

impl LibraryInspection {
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            Self::All => true,
            Self::DylibExtensionsOnly => path
                .extension()
                .is_some_and(|extension| extension == "so" || extension == "dylib"),
            Self::Predicate(predicate) => predicate(path),
        }
    }
}

impl Default for LibraryInspection {
    fn default() -> Self {
        Self::All
    }
}

impl fmt::Debug for LibraryInspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::DylibExtensionsOnly => f.write_str("DylibExtensionsOnly"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Which resolved dependencies may be copied into the bundle.
#[derive(Debug, Clone, Default)]
pub struct CopyFilter {
    /// Copy macOS system libraries too. Almost always wrong: it drags
    /// large parts of the system runtime into the wheel.
    pub copy_system_libs: bool,
    /// Reject any dependency whose path contains one of these
    /// substrings.
    pub exclude: Vec<String>,
}

impl CopyFilter {
    pub fn accepts(&self, path: &Path) -> bool {
        if !self.copy_system_libs && !filter_system_libs(path) {
            return false;
        }
        let lossy = path.to_string_lossy();
        !self.exclude.iter().any(|needle| lossy.contains(needle))
    }
}

/// The filter pair threaded through resolution and tree walking.
///
/// Inspection decisions combine both parts: a library that will not be
/// copied is not followed either, which keeps the walk from chasing
/// system dependencies that will never be bundled.
#[derive(Debug, Default)]
pub struct WalkFilter {
    pub inspect: LibraryInspection,
    pub copy: CopyFilter,
}

impl WalkFilter {
    pub fn inspects(&self, path: &Path) -> bool {
        self.inspect.accepts(path) && self.copy.accepts(path)
    }

    pub fn copies(&self, path: &Path) -> bool {
        self.copy.accepts(path)
    }
}

/// False for macOS system libraries, true for anything else.
///
/// System libraries live under `/usr/lib` and `/System`; since Big Sur
/// they exist only inside the dyld shared cache, not as files.
pub fn filter_system_libs(path: &Path) -> bool {
    let lossy = path.to_string_lossy();
    !(lossy.starts_with("/usr/lib") || lossy.starts_with("/System"))
}
