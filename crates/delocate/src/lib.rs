//! Make macOS Python wheels self-contained.
//!
//! Delocation copies every external dynamic library a wheel's binaries
//! depend on into the wheel, rewrites the depending binaries to find
//! the copies through `@loader_path`, gives the copies collision-free
//! install ids, and renames the wheel to the platform tags its bundled
//! binaries actually demand.

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use delocate_analyze::{
    CopyFilter, DependencyGraph, LibraryInspection, MissingDependency, SearchContext,
};
pub use delocate_tags::MacosVersion;
pub use path::{DelocationOptions, delocate_path};
pub use wheel::{WheelDelocationOptions, delocate_wheel, wheel_libs};

pub mod logging;
mod path;
mod tags;
mod wheel;

/// The version advertised in the `Generator:` header of processed
/// wheels.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Analyze(#[from] delocate_analyze::Error),
    #[error(transparent)]
    Relink(#[from] delocate_relink::Error),
    #[error(transparent)]
    Macho(#[from] delocate_macho::Error),
    #[error(transparent)]
    Wheel(#[from] delocate_wheel::Error),
    #[error(transparent)]
    Tag(#[from] delocate_tags::PlatformTagError),
    #[error("Could not find all dependencies:\n{}", format_missing(.missing))]
    MissingDependencies { missing: Vec<MissingDependency> },
    #[error("{} already exists in wheel but need to copy {}", .lib_path.display(), .needed.join("; "))]
    Occupied {
        lib_path: PathBuf,
        needed: Vec<String>,
    },
    #[error("Some missing architectures in wheel\n{report}")]
    ArchMismatch { report: String },
    #[error("Failed to find any binary with the required architecture: '{archs}'")]
    MissingArch { archs: String },
    #[error(
        "Library dependencies do not satisfy target MacOS version {required}:\n{report}\n\
         Set the environment variable 'MACOSX_DEPLOYMENT_TARGET={minimum_valid}' to update \
         minimum supported macOS for this wheel."
    )]
    OsTooOld {
        required: MacosVersion,
        report: String,
        minimum_valid: MacosVersion,
    },
    #[error("Cannot change platform tags of a pure wheel")]
    CannotTagPure,
}

fn format_missing(missing: &[MissingDependency]) -> String {
    missing
        .iter()
        .map(|dependency| {
            format!(
                "  {} (needed by {})",
                dependency.install_name,
                dependency.needed_by.display()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expand a `--require-archs` argument into the set of architecture
/// names every bundled library must provide.
///
/// Accepts the `intel`/`universal2` shorthands, single architectures,
/// and comma-separated combinations; the empty string means "check
/// depended against depending architectures only".
pub fn parse_require_archs(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .filter(|part| !part.is_empty())
        .flat_map(|part| delocate_tags::required_arch_set(part.trim()))
        .collect()
}
