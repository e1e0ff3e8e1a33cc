//! Analyze library dependencies in directory trees.
//!
//! Resolution follows the dyld search semantics: anchored install names
//! (`@rpath`, `@loader_path`, `@executable_path`) are substituted and
//! chased through the binary's rpaths, bare names are searched on the
//! `DYLD_LIBRARY_PATH`/`DYLD_FALLBACK_LIBRARY_PATH` directories, and
//! absolute names are canonicalized. The walkers deduplicate by
//! canonical path and collect the full set of unresolvable dependencies
//! instead of failing on the first one, so a user sees every missing
//! library at once.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use context::SearchContext;
pub use filter::{CopyFilter, LibraryInspection, WalkFilter, filter_system_libs};
pub use graph::{DependencyEdge, DependencyGraph};
pub use resolve::{
    MissingDependency, ResolvedDependencies, get_dependencies, realpath, resolve_dynamic_paths,
    search_environment_for_lib,
};
pub use walk::{LibraryWalk, TreeLibs, tree_libs_from_directory, walk_directory, walk_library};

mod context;
mod filter;
mod graph;
mod resolve;
mod walk;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Macho(#[from] delocate_macho::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error("Expected dependency {} does not exist", .path.display())]
    MissingLibrary { path: PathBuf },
}
