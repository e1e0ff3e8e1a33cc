//! List the library dependencies of wheels.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use delocate::{LibraryInspection, wheel_libs};

#[derive(Parser)]
#[command(name = "delocate-listdeps", version)]
struct Args {
    /// Wheels to analyze.
    #[arg(required = true)]
    wheels: Vec<PathBuf>,
    /// Show all dependencies, including macOS system libraries.
    #[arg(long = "all")]
    all: bool,
    /// Show which libraries depend on each dependency.
    #[arg(short = 'd', long = "depending")]
    depending: bool,
    /// Inspect only files ending in .so or .dylib.
    #[arg(long = "dylibs-only")]
    dylibs_only: bool,
    /// Continue when dependencies cannot be resolved.
    #[arg(long = "ignore-missing-dependencies")]
    ignore_missing: bool,
    /// Show more output; repeat for debug output.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    delocate::logging::init(args.verbose);

    let multiple = args.wheels.len() > 1;
    for wheel in &args.wheels {
        if multiple {
            println!("{}:", wheel.display());
        }
        let inspection = if args.dylibs_only {
            LibraryInspection::DylibExtensionsOnly
        } else {
            LibraryInspection::All
        };
        let graph = wheel_libs(wheel, &inspection, args.all, args.ignore_missing)
            .with_context(|| format!("Failed to analyze {}", wheel.display()))?;

        let indent = if multiple { "    " } else { "" };
        let mut depended: Vec<String> = graph
            .depended_paths()
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        depended.sort();
        for library in &depended {
            println!("{indent}{library}");
            if args.depending {
                let dependings: BTreeSet<String> = graph
                    .dependers_of(std::path::Path::new(library))
                    .map(|(depending, _)| depending.display().to_string())
                    .collect();
                for depending in &dependings {
                    println!("{indent}    {depending}");
                }
            }
        }
    }
    Ok(())
}
