//! Copy the external libraries that binaries under a directory tree
//! depend on into the tree, rewriting references to them.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use delocate::{DelocationOptions, LibraryInspection, delocate_path};

#[derive(Parser)]
#[command(name = "delocate-path", version)]
struct Args {
    /// Directory trees to delocate.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Directory (relative to each tree) to copy libraries into.
    #[arg(short = 'L', long = "lib-path", default_value = ".dylibs")]
    lib_path: PathBuf,
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
    /// Show more output; repeat for debug output.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    delocate::logging::init(args.verbose);

    for path in &args.paths {
        let options = DelocationOptions {
            inspection: if args.dylibs_only {
                LibraryInspection::DylibExtensionsOnly
            } else {
                LibraryInspection::All
            },
            exclude: args.exclude.clone(),
            executable_path: args.executable_path.clone(),
            ignore_missing: args.ignore_missing,
            sanitize_rpaths: args.sanitize_rpaths,
        };
        let lib_path = if args.lib_path.is_absolute() {
            args.lib_path.clone()
        } else {
            path.join(&args.lib_path)
        };
        let copied = delocate_path(path, &lib_path, &options)
            .with_context(|| format!("Failed to delocate {}", path.display()))?;
        if args.verbose > 0 {
            for library in copied.depended_paths() {
                eprintln!("Copied {}", library.display());
            }
        }
    }
    Ok(())
}
