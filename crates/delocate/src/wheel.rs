use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use delocate_analyze::{
    CopyFilter, DependencyGraph, LibraryInspection, SearchContext, WalkFilter, filter_system_libs,
    realpath, tree_libs_from_directory,
};
use delocate_relink::{DLC_PREFIX, bads_report, check_archs, make_install_ids_unique};
use delocate_tags::MacosVersion;
use delocate_wheel::{WheelFilename, dir2zip, find_package_dirs, rewrite_record, zip2dir};

use crate::path::{DelocationOptions, delocate_path_in_context};
use crate::tags::{check_and_update_wheel_name, update_wheelfile};
use crate::Error;

/// Options for [`delocate_wheel`].
#[derive(Debug)]
pub struct WheelDelocationOptions {
    /// Where to write the delocated wheel; `None` replaces the input
    /// in place.
    pub out_wheel: Option<PathBuf>,
    /// Subdirectory of the package directory for the copied libraries.
    pub lib_sdir: String,
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
    /// Architectures every bundled library must provide; an empty set
    /// checks dependers against dependees only, `None` skips the check.
    pub require_archs: Option<BTreeSet<String>>,
    /// Fail if any bundled binary demands a newer macOS than this.
    pub require_target_macos_version: Option<MacosVersion>,
    /// Timestamp for reproducible output archives, from
    /// `SOURCE_DATE_EPOCH`.
    pub source_date_epoch: Option<i64>,
}

impl Default for WheelDelocationOptions {
    fn default() -> Self {
        Self {
            out_wheel: None,
            lib_sdir: ".dylibs".to_string(),
            inspection: LibraryInspection::All,
            exclude: Vec::new(),
            executable_path: None,
            ignore_missing: false,
            sanitize_rpaths: false,
            require_archs: None,
            require_target_macos_version: None,
            source_date_epoch: None,
        }
    }
}

/// Update a wheel by copying its required external libraries into the
/// wheel and rewriting all references to them.
///
/// The input wheel stays untouched until the output archive has been
/// written; when nothing needed copying and neither name nor tags
/// change, an in-place output is skipped entirely. Returns the copied
/// libraries keyed by their original paths, with in-wheel paths
/// reported relative to the wheel root.
pub fn delocate_wheel(
    in_wheel: &Path,
    options: &WheelDelocationOptions,
) -> Result<DependencyGraph, Error> {
    let in_wheel = realpath(in_wheel);
    let out_wheel = match &options.out_wheel {
        Some(out_wheel) => std::path::absolute(out_wheel)?,
        None => in_wheel.clone(),
    };
    let replace_input = out_wheel == in_wheel;

    let staging = tempfile::tempdir()?;
    let wheel_dir = realpath(staging.path()).join("wheel");
    zip2dir(&in_wheel, &wheel_dir)?;

    let wheel_name = in_wheel
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = WheelFilename::from_str(&wheel_name)?;

    let lib_path = decide_dylib_bundle_directory(&wheel_dir, &filename.name, &options.lib_sdir)?;
    let lib_path_occupied = lib_path.is_dir()
        && fs_err::read_dir(&lib_path)?.next().is_some();

    let delocation_options = DelocationOptions {
        inspection: options.inspection.clone(),
        exclude: options.exclude.clone(),
        executable_path: options.executable_path.clone(),
        ignore_missing: options.ignore_missing,
        sanitize_rpaths: options.sanitize_rpaths,
    };
    let context = SearchContext::from_env(options.executable_path.clone());
    let copied = delocate_path_in_context(&wheel_dir, &lib_path, &delocation_options, &context)?;

    if !copied.is_empty() && lib_path_occupied {
        return Err(Error::Occupied {
            lib_path: lib_path
                .strip_prefix(&wheel_dir)
                .unwrap_or(&lib_path)
                .to_path_buf(),
            needed: copied
                .depended_paths()
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
        });
    }
    if fs_err::read_dir(&lib_path)?.next().is_none() {
        fs_err::remove_dir(&lib_path)?;
    }

    if let Some(require_archs) = &options.require_archs {
        let bads = check_archs(&copied, require_archs, false)?;
        if !bads.is_empty() {
            return Err(Error::ArchMismatch {
                report: bads_report(&bads, Some(&wheel_dir)),
            });
        }
    }

    let copied_destinations: Vec<PathBuf> = copied
        .depended_paths()
        .iter()
        .map(|library| lib_path.join(library.file_name().unwrap_or_default()))
        .collect();
    let lib_sdir_relative = lib_path
        .strip_prefix(&wheel_dir)
        .unwrap_or(&lib_path)
        .to_path_buf();
    make_install_ids_unique(
        copied_destinations.iter().map(PathBuf::as_path),
        &format!("{DLC_PREFIX}{}", lib_sdir_relative.display()),
    )?;

    let final_out_wheel = check_and_update_wheel_name(
        &out_wheel,
        &wheel_dir,
        options.require_target_macos_version,
    )?;
    let renamed = final_out_wheel != out_wheel;
    let final_name = final_out_wheel
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    update_wheelfile(&wheel_dir, &WheelFilename::from_str(&final_name)?)?;
    rewrite_record(&wheel_dir)?;

    if !copied.is_empty() || !replace_input || renamed {
        if final_out_wheel == in_wheel {
            // Overwriting the input: write next to it, then swap.
            let staged = tempfile::NamedTempFile::new_in(
                final_out_wheel
                    .parent()
                    .unwrap_or_else(|| Path::new(".")),
            )?;
            dir2zip(&wheel_dir, staged.path(), options.source_date_epoch)?;
            staged
                .persist(&final_out_wheel)
                .map_err(|err| Error::Io(err.error))?;
        } else {
            dir2zip(&wheel_dir, &final_out_wheel, options.source_date_epoch)?;
            if replace_input {
                fs_err::remove_file(&in_wheel)?;
                info!("Deleted:{}", in_wheel.display());
            }
        }
        info!("Output:{}", final_out_wheel.display());
    }

    Ok(copied.strip_prefix(&wheel_dir))
}

/// Analyze the library dependencies of a wheel without modifying it.
///
/// Returns the dependency graph with in-wheel paths relative to the
/// wheel root.
pub fn wheel_libs(
    wheel_path: &Path,
    inspection: &LibraryInspection,
    all: bool,
    ignore_missing: bool,
) -> Result<DependencyGraph, Error> {
    let staging = tempfile::tempdir()?;
    let wheel_dir = realpath(staging.path()).join("wheel");
    zip2dir(&realpath(wheel_path), &wheel_dir)?;

    let user_inspection = inspection.clone();
    let inspect = if all {
        user_inspection
    } else {
        // Do not chase the dependencies of system libraries.
        LibraryInspection::Predicate(std::sync::Arc::new(move |path: &Path| {
            user_inspection.accepts(path) && filter_system_libs(path)
        }))
    };
    let filter = WalkFilter {
        inspect,
        copy: CopyFilter {
            copy_system_libs: true,
            exclude: Vec::new(),
        },
    };
    let tree = tree_libs_from_directory(&wheel_dir, &SearchContext::from_env(None), &filter)?;
    if !tree.missing.is_empty() && !ignore_missing {
        return Err(Error::MissingDependencies {
            missing: tree.missing,
        });
    }
    Ok(tree.graph.strip_prefix(&wheel_dir))
}

/// Choose the in-wheel directory that receives copied libraries.
///
/// Prefer the package directory named like the distribution; otherwise
/// the alphabetically first package directory; wheels without package
/// directories get a top-level `<package><lib_sdir>` directory
/// (auditwheel's convention).
fn decide_dylib_bundle_directory(
    wheel_dir: &Path,
    package_name: &str,
    lib_sdir: &str,
) -> Result<PathBuf, Error> {
    let package_dirs = find_package_dirs(wheel_dir)?;
    for directory in &package_dirs {
        if directory.file_name().is_some_and(|name| name == package_name) {
            return Ok(directory.join(lib_sdir));
        }
    }
    if let Some(first) = package_dirs.first() {
        return Ok(first.join(lib_sdir));
    }
    Ok(wheel_dir.join(format!("{package_name}{lib_sdir}")))
}
