//! Execute a delocation: copy required libraries into a bundle
//! directory, rewrite the install names of everything that depends on
//! them to `@loader_path`-relative references, and give the copies
//! unique install ids.
//!
//! All error conditions (unresolved names, basename collisions, missing
//! files) are detected before the first byte of the tree is mutated.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use arch::{ArchMismatch, bads_report, check_archs};
pub use tree::delocate_tree_libs;
pub use uniquify::{DLC_PREFIX, make_install_ids_unique};

mod arch;
mod tree;
mod uniquify;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Macho(#[from] delocate_macho::Error),
    #[error("{name} was expected to be resolved")]
    Unresolved { name: String },
    #[error("Already planning to copy library with same basename as: {basename}")]
    Collision { basename: String },
    #[error("library \"{}\" does not exist", .path.display())]
    Missing { path: PathBuf },
    #[error("No relative path from {} to {}", .from.display(), .to.display())]
    NoRelativePath { from: PathBuf, to: PathBuf },
    #[error("install id prefix should start with '/', got {prefix:?}")]
    InvalidInstallIdPrefix { prefix: String },
}
