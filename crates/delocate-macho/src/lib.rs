//! Inspect and rewrite Mach-O binaries.
//!
//! The inspection side reads install names, install ids, rpaths,
//! architectures and minimum macOS versions out of thin and universal
//! (fat) files with `goblin`. The mutation side rewrites load-command
//! strings in place when they fit inside the command's recorded
//! `cmdsize` (binaries linked with `-headerpad_max_install_names`
//! leave generous room), and falls back to the host `install_name_tool`
//! otherwise. Mutations preserve file modes and modification times and
//! can re-sign the result ad hoc, since any edit invalidates an
//! existing code signature.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use inspect::{
    ArchSlice, MachSummary, archs, install_id, install_names, is_macho_file, min_os_versions,
    rpaths, summarize,
};
pub use rewrite::{change_install_name, remove_absolute_rpaths, set_install_id};
pub use sign::{replace_signature, validate_signature};

mod inspect;
mod rewrite;
mod sign;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to parse Mach-O file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: goblin::error::Error,
    },
    #[error("\"{name}\" is not an install name in {}", .path.display())]
    InstallNameNotFound { path: PathBuf, name: String },
    #[error("{} has no install id", .path.display())]
    NoInstallId { path: PathBuf },
    #[error("{tool} is needed to rewrite {} but was not found on PATH", .path.display())]
    ToolMissing {
        tool: &'static str,
        path: PathBuf,
    },
    #[error("{tool} failed on {}: {stderr}", .path.display())]
    ToolFailed {
        tool: &'static str,
        path: PathBuf,
        stderr: String,
    },
}
