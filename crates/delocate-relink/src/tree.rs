use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use tracing::info;

use delocate_analyze::{DependencyGraph, realpath};
use delocate_macho::{change_install_name, remove_absolute_rpaths};

use crate::Error;

/// Copy the out-of-tree libraries of `graph` into `lib_path` and
/// rewrite every depending binary to find its dependencies through
/// `@loader_path`.
///
/// Libraries already inside `root_path` stay where they are; their
/// dependers are rewritten to relative references in place. With
/// `sanitize_rpaths`, absolute rpath entries are stripped from every
/// rewritten binary afterwards.
///
/// Returns the subgraph of copied libraries, keyed by their *original*
/// paths. `lib_path` must exist.
pub fn delocate_tree_libs(
    graph: &DependencyGraph,
    lib_path: &Path,
    root_path: &Path,
    sanitize_rpaths: bool,
) -> Result<DependencyGraph, Error> {
    // Check for errors first, to avoid getting half-way through
    // changing the tree.
    let (to_copy, to_relink) = analyze_tree_libs(graph, root_path)?;
    let copied_report = graph.subgraph(to_copy.iter().map(PathBuf::as_path));

    let (working, destinations) = copy_required_libs(graph, lib_path, root_path, &to_copy)?;

    let mut to_delocate = to_relink;
    to_delocate.extend(destinations);
    update_install_names(&working, root_path, &to_delocate)?;
    if sanitize_rpaths {
        strip_absolute_rpaths(&working, &to_delocate)?;
    }

    Ok(copied_report)
}

/// Partition the depended libraries into out-of-tree (copy) and
/// in-tree (relink only), failing on anchored keys, basename
/// collisions among the copies, and missing files.
fn analyze_tree_libs(
    graph: &DependencyGraph,
    root_path: &Path,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), Error> {
    let root_path = realpath(root_path);
    let mut to_copy = Vec::new();
    let mut to_relink = Vec::new();
    let mut copied_basenames = IndexSet::new();
    for depended in graph.depended_paths() {
        let lossy = depended.to_string_lossy();
        if lossy.starts_with('@') {
            // Anchored keys mean the resolver failed upstream.
            return Err(Error::Unresolved {
                name: lossy.into_owned(),
            });
        }
        if depended.starts_with(&root_path) {
            to_relink.push(depended.to_path_buf());
            continue;
        }
        let basename = depended
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !copied_basenames.insert(basename.clone()) {
            return Err(Error::Collision { basename });
        }
        if !depended.exists() {
            return Err(Error::Missing {
                path: depended.to_path_buf(),
            });
        }
        to_copy.push(depended.to_path_buf());
    }
    Ok((to_copy, to_relink))
}

/// Copy each library into `lib_path` and return a graph with the
/// copied paths substituted, plus the destination paths (which now
/// need their dependers rewritten).
fn copy_required_libs(
    graph: &DependencyGraph,
    lib_path: &Path,
    root_path: &Path,
    to_copy: &[PathBuf],
) -> Result<(DependencyGraph, Vec<PathBuf>), Error> {
    use std::os::unix::fs::PermissionsExt;

    let mut working = graph.clone();
    let mut destinations = Vec::new();
    let lib_path = realpath(lib_path);
    for old_path in to_copy {
        let new_path = lib_path.join(old_path.file_name().unwrap_or_default());
        info!(
            "Copying library {} to {}",
            old_path.display(),
            pathdiff::diff_paths(&new_path, root_path)
                .unwrap_or_else(|| new_path.clone())
                .display()
        );
        fs_err::copy(old_path, &new_path)?;
        // The copy keeps the source permissions; delocation must be
        // able to rewrite it.
        let permissions = fs_err::metadata(&new_path)?.permissions();
        if permissions.mode() & 0o200 == 0 {
            fs_err::set_permissions(
                &new_path,
                std::fs::Permissions::from_mode(permissions.mode() | 0o200),
            )?;
        }
        working.rename(old_path, &new_path);
        destinations.push(new_path);
    }
    Ok((working, destinations))
}

/// Point every depender of `files` at the file's location relative to
/// the depender's own directory.
fn update_install_names(
    graph: &DependencyGraph,
    root_path: &Path,
    files: &[PathBuf],
) -> Result<(), Error> {
    for required in files {
        for (requiring, original_name) in graph.dependers_of(required) {
            let requiring_dir = requiring.parent().unwrap_or_else(|| Path::new("/"));
            let relative = pathdiff::diff_paths(required, requiring_dir).ok_or_else(|| {
                Error::NoRelativePath {
                    from: required.clone(),
                    to: requiring_dir.to_path_buf(),
                }
            })?;
            let new_name = format!("@loader_path/{}", relative.display());
            let requiring_display = pathdiff::diff_paths(requiring, root_path)
                .unwrap_or_else(|| requiring.to_path_buf());
            if original_name == new_name {
                info!(
                    "NOT modifying install name in {} from {original_name}, as the new name \
                     would be the same",
                    requiring_display.display()
                );
            } else {
                info!(
                    "Modifying install name in {} from {original_name} to {new_name}",
                    requiring_display.display()
                );
                change_install_name(requiring, original_name, &new_name, true)?;
            }
        }
    }
    Ok(())
}

fn strip_absolute_rpaths(graph: &DependencyGraph, files: &[PathBuf]) -> Result<(), Error> {
    let mut sanitized = IndexSet::new();
    for required in files {
        for (requiring, _) in graph.dependers_of(required) {
            if sanitized.insert(requiring.to_path_buf()) {
                remove_absolute_rpaths(requiring)?;
            }
        }
    }
    Ok(())
}
