use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::debug;
use walkdir::WalkDir;

use crate::graph::DependencyGraph;
use crate::resolve::{MissingDependency, get_dependencies, realpath};
use crate::{Error, SearchContext, WalkFilter};

/// The result of walking a library or directory tree: every reachable
/// binary plus the dependencies that could not be resolved along the
/// way.
#[derive(Debug, Clone, Default)]
pub struct LibraryWalk {
    /// Visited binaries (roots and dependencies), deduplicated by
    /// canonical path, in discovery order.
    pub libraries: Vec<PathBuf>,
    pub missing: Vec<MissingDependency>,
}

/// Walk `lib` and everything it transitively depends on.
///
/// Yields `lib` itself first. A library rejected by the filter is
/// pruned together with all of its dependencies.
pub fn walk_library(
    lib: &Path,
    context: &SearchContext,
    filter: &WalkFilter,
) -> Result<LibraryWalk, Error> {
    let mut walk = LibraryWalk::default();
    let mut visited = FxHashSet::default();
    walk_library_inner(lib, context, filter, &mut visited, &mut walk)?;
    Ok(walk)
}

fn walk_library_inner(
    lib: &Path,
    context: &SearchContext,
    filter: &WalkFilter,
    visited: &mut FxHashSet<PathBuf>,
    walk: &mut LibraryWalk,
) -> Result<(), Error> {
    if !visited.insert(lib.to_path_buf()) {
        return Ok(());
    }
    if !filter.inspects(lib) {
        debug!("Ignoring {} and its dependencies", lib.display());
        return Ok(());
    }
    walk.libraries.push(lib.to_path_buf());
    let dependencies = get_dependencies(lib, context, filter)?;
    walk.missing.extend(dependencies.missing);
    for (dependency, _install_name) in dependencies.resolved {
        walk_library_inner(&dependency, context, filter, visited, walk)?;
    }
    Ok(())
}

/// Walk every file under `root` and, transitively, everything those
/// files depend on, without duplicates.
pub fn walk_directory(
    root: &Path,
    context: &SearchContext,
    filter: &WalkFilter,
) -> Result<LibraryWalk, Error> {
    let mut walk = LibraryWalk::default();
    let mut visited = FxHashSet::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let depending = realpath(entry.path());
        if visited.contains(&depending) {
            // Already seen as a dependency of another library.
            continue;
        }
        walk_library_inner(&depending, context, filter, &mut visited, &mut walk)?;
    }
    Ok(walk)
}

/// A dependency analysis of a directory tree.
#[derive(Debug, Clone, Default)]
pub struct TreeLibs {
    pub graph: DependencyGraph,
    pub missing: Vec<MissingDependency>,
}

/// Analyze the tree under `root` into a dependency graph.
///
/// Graph keys are restricted by the filter's copy side; inspection
/// follows the combined filter so dependencies of uncopied libraries
/// are never chased. Missing dependencies are collected, not fatal:
/// the caller decides, typically honoring an `ignore_missing` flag.
pub fn tree_libs_from_directory(
    root: &Path,
    context: &SearchContext,
    filter: &WalkFilter,
) -> Result<TreeLibs, Error> {
    let walk = walk_directory(root, context, filter)?;
    let mut tree = TreeLibs {
        missing: walk.missing,
        ..TreeLibs::default()
    };
    for library in &walk.libraries {
        for (depended, install_name) in get_dependencies(library, context, filter)?.resolved {
            if !filter.copies(&depended) {
                continue;
            }
            tree.graph.insert(depended, library.clone(), install_name);
        }
    }
    Ok(tree)
}
