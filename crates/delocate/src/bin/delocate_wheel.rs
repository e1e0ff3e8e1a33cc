//! Copy the external dynamic libraries a wheel's binaries depend on
//! into the wheel and rewrite everything to find the copies through
//! relative loader paths.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use delocate::{
    LibraryInspection, MacosVersion, WheelDelocationOptions, delocate_wheel, parse_require_archs,
};

#[derive(Parser)]
#[command(name = "delocate-wheel", version)]
struct Args {
    /// Wheels to delocate.
    #[arg(required = true)]
    wheels: Vec<PathBuf>,
    /// Directory to write the delocated wheels into; default is to
    /// overwrite each input in place.
    #[arg(short = 'w', long = "wheel-dir")]
    wheel_dir: Option<PathBuf>,
    /// Subdirectory to store copied libraries in.
    #[arg(short = 'L', long = "lib-sdir", default_value = ".dylibs")]
    lib_sdir: String,
    /// Inspect only files ending in .so or .dylib.
    #[arg(short = 'd', long = "dylibs-only")]
    dylibs_only: bool,
    /// Do not copy dependencies whose path contains this substring.
    #[arg(short = 'e', long = "exclude")]
    exclude: Vec<String>,
    /// Path used to resolve @executable_path references.
    #[arg(long = "executable-path")]
    executable_path: Option<PathBuf>,
    /// Warn about missing dependencies instead of failing.
    #[arg(long = "ignore-missing-dependencies")]
    ignore_missing: bool,
    /// Keep absolute rpath entries instead of stripping them.
    #[arg(long = "no-sanitize-rpaths", action = clap::ArgAction::SetFalse)]
    sanitize_rpaths: bool,
    /// Check that depended libraries cover the architectures of the
    /// binaries depending on them.
    #[arg(long = "check-archs")]
    check_archs: bool,
    /// Architectures that every bundled library must have
    /// (e.g. "x86_64", "intel", "universal2", or a comma-separated
    /// list); implies --check-archs.
    #[arg(long = "require-archs")]
    require_archs: Option<String>,
    /// Fail if a bundled library requires a newer macOS than this
    /// version.
    #[arg(long = "require-target-macos-version", env = "MACOSX_DEPLOYMENT_TARGET")]
    require_target_macos_version: Option<MacosVersion>,
    /// Timestamp for reproducible archives, seconds since the epoch.
    #[arg(long = "source-date-epoch", env = "SOURCE_DATE_EPOCH", hide = true)]
    source_date_epoch: Option<i64>,
    /// Show more output; repeat for debug output.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    delocate::logging::init(args.verbose);

    let require_archs: Option<BTreeSet<String>> = match (&args.require_archs, args.check_archs) {
        (Some(archs), _) => Some(parse_require_archs(archs)),
        (None, true) => Some(BTreeSet::new()),
        (None, false) => None,
    };

    for wheel in &args.wheels {
        if args.verbose > 0 {
            eprintln!("Fixing: {}", wheel.display());
        }
        let options = WheelDelocationOptions {
            out_wheel: args.wheel_dir.as_ref().map(|wheel_dir| {
                wheel_dir.join(wheel.file_name().unwrap_or(wheel.as_os_str()))
            }),
            lib_sdir: args.lib_sdir.clone(),
            inspection: if args.dylibs_only {
                LibraryInspection::DylibExtensionsOnly
            } else {
                LibraryInspection::All
            },
            exclude: args.exclude.clone(),
            executable_path: args.executable_path.clone(),
            ignore_missing: args.ignore_missing,
            sanitize_rpaths: args.sanitize_rpaths,
            require_archs: require_archs.clone(),
            require_target_macos_version: args.require_target_macos_version,
            source_date_epoch: args.source_date_epoch,
        };
        if let Some(wheel_dir) = &args.wheel_dir {
            fs_err::create_dir_all(wheel_dir)?;
        }
        let copied = delocate_wheel(wheel, &options)
            .with_context(|| format!("Failed to delocate {}", wheel.display()))?;
        if args.verbose > 0 && !copied.is_empty() {
            eprintln!("Copied to package {} directory:", args.lib_sdir);
            let mut paths: Vec<String> = copied
                .depended_paths()
                .iter()
                .map(|path| path.display().to_string())
                .collect();
            paths.sort();
            for path in paths {
                eprintln!("  {path}");
            }
        }
    }
    Ok(())
}
