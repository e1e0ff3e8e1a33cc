//! macOS platform tags, architectures, and deployment-target versions.
//!
//! The types here cover the `macosx_{major}_{minor}_{arch}` platform tags
//! found in wheel filenames and `WHEEL` metadata, including the "packed"
//! `universal2` and `intel` architecture forms and their expansion into
//! thin architectures.

pub use arch::{PlatformArch, pack_architectures, required_arch_set, unpack_architectures};
pub use tag::PlatformTag;
pub use version::MacosVersion;

use thiserror::Error;

mod arch;
mod tag;
mod version;

#[derive(Error, Debug)]
pub enum PlatformTagError {
    #[error("The macOS version \"{0}\" is invalid: {1}")]
    InvalidVersion(String, String),
    #[error("The platform tag \"{0}\" is invalid: {1}")]
    InvalidPlatformTag(String, String),
    #[error("Unknown macOS architecture: {0}")]
    UnknownArchitecture(String),
}
