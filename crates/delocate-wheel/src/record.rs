use std::path::{Path, PathBuf};

use data_encoding::BASE64URL_NOPAD;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::Error;

/// Rewrite the `RECORD` file of an unpacked wheel with fresh hashes for
/// every file in the tree.
///
/// Any `RECORD.jws` signature is removed, since changing the record
/// invalidates it. The `RECORD` row itself is listed without hash or
/// size, per the wheel spec.
pub fn rewrite_record(wheel_dir: &Path) -> Result<(), Error> {
    let info_dir = find_dist_info(wheel_dir)?;
    let record_path = info_dir.join("RECORD");
    let jws_path = info_dir.join("RECORD.jws");
    if jws_path.exists() {
        fs_err::remove_file(&jws_path)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(fs_err::File::create(&record_path)?);
    for entry in WalkDir::new(wheel_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(wheel_dir)
            .expect("walked path is under the wheel root");
        let relative = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.path() == record_path {
            writer.write_record([relative.as_str(), "", ""])?;
            continue;
        }
        let contents = fs_err::read(entry.path())?;
        let digest = Sha256::digest(&contents);
        let hash = format!("sha256={}", BASE64URL_NOPAD.encode(&digest));
        let size = contents.len().to_string();
        writer.write_record([relative.as_str(), hash.as_str(), size.as_str()])?;
    }
    writer.flush().map_err(std::io::Error::from)?;
    Ok(())
}

/// The single `*.dist-info` directory of an unpacked wheel.
pub fn find_dist_info(wheel_dir: &Path) -> Result<PathBuf, Error> {
    let mut dist_infos = Vec::new();
    for entry in fs_err::read_dir(wheel_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir()
            && path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(".dist-info"))
        {
            dist_infos.push(path);
        }
    }
    match dist_infos.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(Error::DistInfo {
            path: wheel_dir.to_path_buf(),
        }),
    }
}
