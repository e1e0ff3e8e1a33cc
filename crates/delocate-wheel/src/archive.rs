use std::io::{Read, Write};
use std::path::Path;

use jiff::Timestamp;
use jiff::tz::TimeZone;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::Error;

/// The zip format cannot represent times before 1980-01-01.
const ZIP_EPOCH: i64 = 315_532_800;

/// Extract `zip_path` into `out_dir`, restoring unix permissions.
pub fn zip2dir(zip_path: &Path, out_dir: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    fs_err::create_dir_all(out_dir)?;
    let mut archive = ZipArchive::new(fs_err::File::open(zip_path)?)?;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let Some(relative) = file.enclosed_name() else {
            return Err(Error::UnsafeArchiveMember(file.name().to_string()));
        };
        let target = out_dir.join(relative);
        if file.is_dir() {
            fs_err::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut contents = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut contents)?;
        fs_err::write(&target, contents)?;
        if let Some(mode) = file.unix_mode() {
            fs_err::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Write the contents of `in_dir` to the zip archive `zip_path`.
///
/// Entries are DEFLATE-compressed, sorted, and recorded relative to
/// `in_dir`, so unpacking into an empty directory reproduces the
/// original contents. When `source_date_epoch` is given, it becomes
/// every entry's modification time (clamped to the zip epoch,
/// 1980-01-01) and the output is byte-for-byte reproducible.
pub fn dir2zip(in_dir: &Path, zip_path: &Path, source_date_epoch: Option<i64>) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let timestamp = source_date_epoch.map(zip_datetime).transpose()?;
    let mut writer = ZipWriter::new(fs_err::File::create(zip_path)?);
    for entry in WalkDir::new(in_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(in_dir)
            .expect("walked path is under the walk root");
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mode = fs_err::metadata(entry.path())?.permissions().mode();
        let mut options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(mode);
        if let Some(timestamp) = timestamp {
            options = options.last_modified_time(timestamp);
        }
        writer.start_file(name, options)?;
        writer.write_all(&fs_err::read(entry.path())?)?;
    }
    writer.finish()?;
    debug!("Wrote {}", zip_path.display());
    Ok(())
}

fn zip_datetime(source_date_epoch: i64) -> Result<DateTime, Error> {
    let clamped = source_date_epoch.max(ZIP_EPOCH);
    let timestamp = Timestamp::from_second(clamped).map_err(invalid_epoch)?;
    let datetime = timestamp.to_zoned(TimeZone::UTC).datetime();
    DateTime::from_date_and_time(
        u16::try_from(datetime.year()).map_err(|_| invalid_epoch("year out of range"))?,
        u8::try_from(datetime.month()).expect("month fits in u8"),
        u8::try_from(datetime.day()).expect("day fits in u8"),
        u8::try_from(datetime.hour()).expect("hour fits in u8"),
        u8::try_from(datetime.minute()).expect("minute fits in u8"),
        u8::try_from(datetime.second()).expect("second fits in u8"),
    )
    .map_err(invalid_epoch)
}

fn invalid_epoch(err: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("SOURCE_DATE_EPOCH out of range: {err}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree(root: &Path) {
        fs_err::create_dir_all(root.join("plat/.dylibs")).unwrap();
        fs_err::write(root.join("plat/__init__.py"), "").unwrap();
        fs_err::write(root.join("plat/.dylibs/libext.dylib"), b"\xfe\xed\xfa\xcf").unwrap();
        use std::os::unix::fs::PermissionsExt;
        fs_err::set_permissions(
            root.join("plat/.dylibs/libext.dylib"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();
    }

    #[test]
    fn round_trip_preserves_contents_and_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        build_tree(&tree);

        let archive = dir.path().join("out.whl");
        dir2zip(&tree, &archive, Some(1_700_000_000)).unwrap();

        let unpacked = dir.path().join("unpacked");
        zip2dir(&archive, &unpacked).unwrap();

        assert_eq!(
            fs_err::read(unpacked.join("plat/.dylibs/libext.dylib")).unwrap(),
            b"\xfe\xed\xfa\xcf"
        );
        assert_eq!(
            fs_err::metadata(unpacked.join("plat/.dylibs/libext.dylib"))
                .unwrap()
                .permissions()
                .mode()
                & 0o777,
            0o755
        );
        assert!(unpacked.join("plat/__init__.py").is_file());
    }

    #[test]
    fn reproducible_with_source_date_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        build_tree(&tree);

        let first = dir.path().join("first.whl");
        let second = dir.path().join("second.whl");
        dir2zip(&tree, &first, Some(1_700_000_000)).unwrap();
        // Touch the tree in between; mtimes must not leak into the zip.
        fs_err::write(tree.join("plat/__init__.py"), "").unwrap();
        dir2zip(&tree, &second, Some(1_700_000_000)).unwrap();

        assert_eq!(fs_err::read(&first).unwrap(), fs_err::read(&second).unwrap());
    }

    #[test]
    fn epoch_clamped_to_zip_minimum() {
        // 1970-01-01 is before the zip epoch and must not error.
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        build_tree(&tree);
        let archive = dir.path().join("out.whl");
        dir2zip(&tree, &archive, Some(0)).unwrap();
        assert!(archive.is_file());
    }

    #[test]
    fn rejects_escaping_members() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.whl");
        let mut writer = ZipWriter::new(fs_err::File::create(&archive).unwrap());
        writer
            .start_file("../evil.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"boom").unwrap();
        writer.finish().unwrap();

        let err = zip2dir(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::UnsafeArchiveMember(_)));
    }
}
