//! Wheel container handling.
//!
//! Everything about the wheel as an artifact, independent of
//! delocation: parsing the PEP 427 filename, unpacking and repacking
//! the zip (reproducibly, honoring `SOURCE_DATE_EPOCH`), rewriting the
//! `RECORD` manifest, and editing the RFC-822-style `WHEEL` metadata
//! file.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use archive::{dir2zip, zip2dir};
pub use filename::WheelFilename;
pub use metadata::WheelMetadata;
pub use record::{find_dist_info, rewrite_record};

mod archive;
mod filename;
mod metadata;
mod record;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to read zip archive")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error("RECORD file is invalid")]
    RecordCsv(#[from] csv::Error),
    #[error("The wheel filename \"{0}\" is invalid: {1}")]
    InvalidWheelFilename(String, String),
    #[error("Archive member {0:?} escapes the destination directory")]
    UnsafeArchiveMember(String),
    #[error("Line {line} of the {} file is invalid", .path.display())]
    MalformedMetadata { path: PathBuf, line: usize },
    #[error("Should be exactly one `*.dist-info` directory in {}", .path.display())]
    DistInfo { path: PathBuf },
}

/// Find top-level python package directories (directories holding an
/// `__init__.py`) under `root`.
pub fn find_package_dirs(root: &std::path::Path) -> Result<Vec<PathBuf>, Error> {
    let mut package_dirs = Vec::new();
    for entry in fs_err::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && path.join("__init__.py").is_file() {
            package_dirs.push(path);
        }
    }
    package_dirs.sort();
    Ok(package_dirs)
}
