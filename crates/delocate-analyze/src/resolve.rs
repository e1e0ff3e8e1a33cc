use std::path::{Component, Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::{debug, error};

use crate::filter::{WalkFilter, filter_system_libs};
use crate::{Error, SearchContext};

/// Paths the macOS loader tries after exhausting the anchored search
/// candidates.
const DEFAULT_PATHS_TO_SEARCH: [&str; 2] = ["/usr/local/lib", "/usr/lib"];

/// A dependency whose install name could not be resolved to an existing
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    /// The binary that references the dependency.
    pub needed_by: PathBuf,
    /// The install name as stored in the load command.
    pub install_name: String,
}

/// The direct dependencies of one binary.
#[derive(Debug, Clone, Default)]
pub struct ResolvedDependencies {
    /// `(canonical path, install name)` for each resolved reference.
    pub resolved: Vec<(PathBuf, String)>,
    /// References that did not resolve to an existing non-system file.
    pub missing: Vec<MissingDependency>,
}

/// Canonicalize `path`, falling back to a lexically normalized absolute
/// path when it does not exist.
pub fn realpath(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| lexical_absolute(path))
}

fn lexical_absolute(path: &Path) -> PathBuf {
    let mut absolute = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                absolute.pop();
            }
            component => absolute.push(component),
        }
    }
    absolute
}

/// Resolve an anchored install name against the dyld substitution
/// rules.
///
/// `@loader_path` is replaced by `loader_path` (the directory of the
/// referencing binary), `@executable_path` by the context's executable
/// path, and `@rpath` by each of `rpaths` in turn; the loader's default
/// paths are appended last. Candidates may themselves be anchored
/// (rpaths routinely start with `@loader_path`) and are resolved
/// recursively. Returns the realpath of the first candidate that
/// exists, or `None`.
///
/// Non-anchored names resolve to their realpath without an existence
/// check; the caller decides how to treat dangling paths.
pub fn resolve_dynamic_paths(
    install_name: &str,
    rpaths: &[String],
    loader_path: &Path,
    context: &SearchContext,
) -> Option<PathBuf> {
    let (anchor, rest) = install_name
        .split_once('/')
        .unwrap_or((install_name, ""));
    let prefixes: Vec<PathBuf> = match anchor {
        "@loader_path" => vec![loader_path.to_path_buf()],
        "@executable_path" => context.executable_path.iter().cloned().collect(),
        "@rpath" => rpaths.iter().map(PathBuf::from).collect(),
        _ => return Some(realpath(Path::new(install_name))),
    };

    for prefix in prefixes
        .into_iter()
        .chain(DEFAULT_PATHS_TO_SEARCH.map(PathBuf::from))
    {
        let candidate = prefix.join(rest);
        let Some(resolved) =
            resolve_dynamic_paths(&candidate.to_string_lossy(), &[], loader_path, context)
        else {
            continue;
        };
        if resolved.exists() {
            return Some(realpath(&resolved));
        }
    }
    None
}

/// Search the environment directories for a bare install name.
///
/// Follows the order Apple documents for names with a directory
/// component: `DYLD_LIBRARY_PATH` by basename, then the name itself,
/// then `DYLD_FALLBACK_LIBRARY_PATH` by basename. Returns the realpath
/// of the first location that exists, or the realpath of the name
/// itself (likely dangling) when nothing does.
pub fn search_environment_for_lib(install_name: &str, context: &SearchContext) -> PathBuf {
    let name = Path::new(install_name);
    let basename = name.file_name().unwrap_or(name.as_os_str());

    let locations = context
        .library_paths
        .iter()
        .map(|directory| directory.join(basename))
        .chain([realpath(name)])
        .chain(
            context
                .fallback_library_paths
                .iter()
                .map(|directory| directory.join(basename)),
        );
    for location in locations {
        if location.exists() {
            return realpath(&location);
        }
    }
    realpath(name)
}

/// Find the real paths of the direct dependencies of `lib`.
///
/// The same install name listed by several architectures is reported
/// once. Unresolvable references to system libraries are dropped
/// silently (they live in the dyld shared cache, not on disk); any
/// other unresolvable reference is logged and reported in
/// [`ResolvedDependencies::missing`] so the caller can fail with the
/// complete list.
pub fn get_dependencies(
    lib: &Path,
    context: &SearchContext,
    filter: &WalkFilter,
) -> Result<ResolvedDependencies, Error> {
    let mut dependencies = ResolvedDependencies::default();
    if !filter.inspects(lib) {
        debug!("Ignoring dependencies of {}", lib.display());
        return Ok(dependencies);
    }
    if !lib.is_file() {
        if !filter_system_libs(lib) {
            debug!(
                "Ignoring missing library {} because it is a system library",
                lib.display()
            );
            return Ok(dependencies);
        }
        return Err(Error::MissingLibrary {
            path: lib.to_path_buf(),
        });
    }

    let loader_path = lib.parent().unwrap_or_else(|| Path::new("/"));
    let rpaths_by_arch = delocate_macho::rpaths(lib)?;
    let mut seen = FxHashSet::default();
    for (arch, install_names) in delocate_macho::install_names(lib)? {
        let mut rpaths: Vec<String> = rpaths_by_arch
            .iter()
            .find(|(rpath_arch, _)| *rpath_arch == arch)
            .map(|(_, rpaths)| rpaths.clone())
            .unwrap_or_default();
        rpaths.extend(
            context
                .environment_paths()
                .map(|path| path.to_string_lossy().into_owned()),
        );

        for install_name in install_names {
            if !seen.insert(install_name.clone()) {
                // The same dependency listed by multiple architectures
                // only counts once.
                continue;
            }
            let resolved = if install_name.starts_with('@') {
                resolve_dynamic_paths(&install_name, &rpaths, loader_path, context)
            } else {
                Some(search_environment_for_lib(&install_name, context))
            };
            match resolved {
                Some(path) if path.is_file() => {
                    if path != Path::new(&install_name) {
                        debug!("{install_name} resolved to: {}", path.display());
                    }
                    dependencies.resolved.push((path, install_name));
                }
                Some(path) if !filter_system_libs(&path) => {
                    debug!(
                        "Skipped missing dependency {} because it is a system library",
                        path.display()
                    );
                }
                resolved => {
                    let mut message =
                        format!("\n{install_name} not found:\n  Needed by: {}", lib.display());
                    if resolved.is_none() {
                        message.push_str("\n  Search path:\n    ");
                        message.push_str(&rpaths.join("\n    "));
                    }
                    error!("{message}");
                    dependencies.missing.push(MissingDependency {
                        needed_by: lib.to_path_buf(),
                        install_name,
                    });
                }
            }
        }
    }
    Ok(dependencies)
}
