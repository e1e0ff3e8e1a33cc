use std::path::{Path, PathBuf};

use tracing::warn;

use delocate_analyze::{
    CopyFilter, DependencyGraph, LibraryInspection, SearchContext, WalkFilter, realpath,
    tree_libs_from_directory,
};
use delocate_relink::delocate_tree_libs;

use crate::Error;

/// Options shared by tree- and wheel-level delocation.
#[derive(Debug, Default)]
pub struct DelocationOptions {
    /// Which files to inspect for dependencies.
    pub inspection: LibraryInspection,
    /// Reject dependencies whose path contains one of these substrings.
    pub exclude: Vec<String>,
    /// Substitution for `@executable_path` references.
    pub executable_path: Option<PathBuf>,
    /// Warn about unresolvable non-system dependencies instead of
    /// failing.
    pub ignore_missing: bool,
    /// Strip absolute rpath entries from rewritten binaries.
    pub sanitize_rpaths: bool,
}

impl DelocationOptions {
    pub(crate) fn walk_filter(&self) -> WalkFilter {
        WalkFilter {
            inspect: self.inspection.clone(),
            copy: CopyFilter {
                copy_system_libs: false,
                exclude: self.exclude.clone(),
            },
        }
    }
}

/// Copy the libraries required by the binaries under `tree_path` into
/// `lib_path` and rewrite all references to them.
///
/// `lib_path` is created when missing. Returns the copied libraries as
/// a graph keyed by their original locations.
pub fn delocate_path(
    tree_path: &Path,
    lib_path: &Path,
    options: &DelocationOptions,
) -> Result<DependencyGraph, Error> {
    let context = SearchContext::from_env(options.executable_path.clone());
    delocate_path_in_context(tree_path, lib_path, options, &context)
}

pub(crate) fn delocate_path_in_context(
    tree_path: &Path,
    lib_path: &Path,
    options: &DelocationOptions,
    context: &SearchContext,
) -> Result<DependencyGraph, Error> {
    if !lib_path.exists() {
        fs_err::create_dir_all(lib_path)?;
    }
    let tree_path = realpath(tree_path);
    let filter = options.walk_filter();
    let tree = tree_libs_from_directory(&tree_path, context, &filter)?;
    if !tree.missing.is_empty() {
        if options.ignore_missing {
            warn!(
                "Ignoring {} missing dependenc{}",
                tree.missing.len(),
                if tree.missing.len() == 1 { "y" } else { "ies" }
            );
        } else {
            return Err(Error::MissingDependencies {
                missing: tree.missing,
            });
        }
    }
    Ok(delocate_tree_libs(
        &tree.graph,
        lib_path,
        &tree_path,
        options.sanitize_rpaths,
    )?)
}
