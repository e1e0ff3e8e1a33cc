use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use goblin::mach::load_command::CommandVariant;
use scroll::Pread;
use tracing::{debug, warn};

use crate::Error;
use crate::inspect::{raw_slices, read_lc_string};
use crate::sign::{adhoc_resign, host_tools};

const LC_RPATH: u32 = 0x8000_001c;

/// Rewrite the load command referring to `old` so that it refers to
/// `new`, in every architecture slice.
///
/// Fails with [`Error::InstallNameNotFound`] when `old` is not an
/// install name of `path`. The new string is written in place when the
/// load command has room for it, otherwise `install_name_tool -change`
/// is invoked.
pub fn change_install_name(
    path: &Path,
    old: &str,
    new: &str,
    adhoc_sign: bool,
) -> Result<(), Error> {
    let _restore_mtime = MtimeGuard::capture(path)?;
    let targets = dylib_name_targets(path, Selector::LoadName(old))?;
    if targets.is_empty() {
        return Err(Error::InstallNameNotFound {
            path: path.to_path_buf(),
            name: old.to_string(),
        });
    }
    rewrite_targets(path, &targets, new, &["-change", old, new])?;
    if adhoc_sign {
        adhoc_resign(path)?;
    }
    Ok(())
}

/// Replace the install id (`LC_ID_DYLIB`) of `path` with `new`.
///
/// Fails with [`Error::NoInstallId`] for files without one (bundles and
/// executables).
pub fn set_install_id(path: &Path, new: &str, adhoc_sign: bool) -> Result<(), Error> {
    let _restore_mtime = MtimeGuard::capture(path)?;
    let targets = dylib_name_targets(path, Selector::InstallId)?;
    if targets.is_empty() {
        return Err(Error::NoInstallId {
            path: path.to_path_buf(),
        });
    }
    rewrite_targets(path, &targets, new, &["-id", new])?;
    if adhoc_sign {
        adhoc_resign(path)?;
    }
    Ok(())
}

/// Delete every `LC_RPATH` entry whose stored value is an absolute
/// path, in every architecture slice. Relative and anchored rpaths are
/// kept.
pub fn remove_absolute_rpaths(path: &Path) -> Result<(), Error> {
    let _restore_mtime = MtimeGuard::capture(path)?;
    let mut data = fs_err::read(path)?;

    // (slice offset, is 64-bit, little-endian, absolute rpaths)
    let mut plans: Vec<(usize, bool, bool, Vec<String>)> = Vec::new();
    for slice in &raw_slices(&data, path)? {
        let mut absolute = Vec::new();
        for command in &slice.macho.load_commands {
            if let CommandVariant::Rpath(ref rpath) = command.command {
                let entry =
                    read_lc_string(slice.bytes, command.offset + rpath.path as usize, path)?;
                if entry.starts_with('/') {
                    absolute.push(entry.to_string());
                }
            }
        }
        if !absolute.is_empty() {
            plans.push((
                slice.offset,
                slice.macho.is_64,
                slice.macho.little_endian,
                absolute,
            ));
        }
    }
    if plans.is_empty() {
        return Ok(());
    }

    if plans.iter().all(|(_, _, little_endian, _)| *little_endian) {
        for (offset, is_64, _, _) in &plans {
            strip_absolute_rpath_commands(&mut data, *offset, *is_64, path)?;
        }
        write_in_place(path, &data)?;
    } else {
        // Big-endian (ppc) slices: leave the surgery to the host tool.
        for (_, _, _, absolute) in &plans {
            for rpath in absolute {
                run_install_name_tool(path, &["-delete_rpath", rpath])?;
            }
        }
    }
    adhoc_resign(path)?;
    Ok(())
}

#[derive(Clone, Copy)]
enum Selector<'a> {
    LoadName(&'a str),
    InstallId,
}

struct RewriteTarget {
    /// Offset of the name string within the file.
    file_offset: usize,
    /// Bytes available for the string inside the load command.
    available: usize,
    little_endian: bool,
}

fn dylib_name_targets(path: &Path, selector: Selector<'_>) -> Result<Vec<RewriteTarget>, Error> {
    let data = fs_err::read(path)?;
    let mut targets = Vec::new();
    for slice in &raw_slices(&data, path)? {
        for command in &slice.macho.load_commands {
            let dylib = match (&command.command, &selector) {
                (CommandVariant::IdDylib(dylib), Selector::InstallId) => dylib,
                (
                    CommandVariant::LoadDylib(dylib)
                    | CommandVariant::LoadWeakDylib(dylib)
                    | CommandVariant::ReexportDylib(dylib)
                    | CommandVariant::LazyLoadDylib(dylib)
                    | CommandVariant::LoadUpwardDylib(dylib),
                    Selector::LoadName(_),
                ) => dylib,
                _ => continue,
            };
            let name_offset = dylib.dylib.name as usize;
            let name = read_lc_string(slice.bytes, command.offset + name_offset, path)?;
            if let Selector::LoadName(old) = selector {
                if name != old {
                    continue;
                }
            }
            targets.push(RewriteTarget {
                file_offset: slice.offset + command.offset + name_offset,
                available: (dylib.cmdsize as usize).saturating_sub(name_offset),
                little_endian: slice.macho.little_endian,
            });
        }
    }
    Ok(targets)
}

fn rewrite_targets(
    path: &Path,
    targets: &[RewriteTarget],
    new: &str,
    tool_args: &[&str],
) -> Result<(), Error> {
    // The trailing NUL must fit too.
    let fits = targets
        .iter()
        .all(|target| target.little_endian && new.len() < target.available);
    if !fits {
        debug!(
            "\"{new}\" does not fit the load commands of {}, using install_name_tool",
            path.display()
        );
        return run_install_name_tool(path, tool_args);
    }

    let mut data = fs_err::read(path)?;
    for target in targets {
        let end = target.file_offset + target.available;
        data[target.file_offset..target.file_offset + new.len()].copy_from_slice(new.as_bytes());
        data[target.file_offset + new.len()..end].fill(0);
    }
    write_in_place(path, &data)
}

/// Rebuild one slice's load-command region without its absolute
/// `LC_RPATH` entries, fixing up `ncmds` and `sizeofcmds` in the
/// header. Little-endian slices only.
fn strip_absolute_rpath_commands(
    data: &mut [u8],
    base: usize,
    is_64: bool,
    path: &Path,
) -> Result<(), Error> {
    let header_size = if is_64 { 32 } else { 28 };
    let ncmds = read_u32_le(data, base + 16, path)? as usize;
    let sizeofcmds = read_u32_le(data, base + 20, path)? as usize;
    let lc_start = base + header_size;
    let lc_end = lc_start + sizeofcmds;
    if lc_end > data.len() {
        return Err(malformed(path, "load commands extend past end of file"));
    }
    let region = data[lc_start..lc_end].to_vec();

    let mut kept = Vec::with_capacity(region.len());
    let mut kept_count: u32 = 0;
    let mut pos = 0;
    for _ in 0..ncmds {
        let cmd = read_u32_le(&region, pos, path)?;
        let cmdsize = read_u32_le(&region, pos + 4, path)? as usize;
        if cmdsize < 8 || pos + cmdsize > region.len() {
            return Err(malformed(path, "load command size out of bounds"));
        }
        let mut keep = true;
        if cmd == LC_RPATH {
            let path_offset = read_u32_le(&region, pos + 8, path)? as usize;
            let entry: &str = region
                .pread(pos + path_offset)
                .map_err(|source: scroll::Error| Error::Parse {
                    path: path.to_path_buf(),
                    source: source.into(),
                })?;
            if entry.starts_with('/') {
                debug!("Removing rpath {entry} from {}", path.display());
                keep = false;
            }
        }
        if keep {
            kept.extend_from_slice(&region[pos..pos + cmdsize]);
            kept_count += 1;
        }
        pos += cmdsize;
    }

    let new_sizeofcmds =
        u32::try_from(kept.len()).map_err(|_| malformed(path, "load commands too large"))?;
    kept.resize(sizeofcmds, 0);
    data[lc_start..lc_end].copy_from_slice(&kept);
    write_u32_le(data, base + 16, kept_count);
    write_u32_le(data, base + 20, new_sizeofcmds);
    Ok(())
}

fn write_in_place(path: &Path, data: &[u8]) -> Result<(), Error> {
    let _writable = PermissionGuard::new(path)?;
    fs_err::write(path, data)?;
    Ok(())
}

fn run_install_name_tool(path: &Path, args: &[&str]) -> Result<(), Error> {
    let Some(tool) = &host_tools().install_name_tool else {
        return Err(Error::ToolMissing {
            tool: "install_name_tool",
            path: path.to_path_buf(),
        });
    };
    let _writable = PermissionGuard::new(path)?;
    let output = Command::new(tool).args(args).arg(path).output()?;
    if !output.status.success() {
        return Err(Error::ToolFailed {
            tool: "install_name_tool",
            path: path.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn malformed(path: &Path, message: &str) -> Error {
    Error::Parse {
        path: path.to_path_buf(),
        source: goblin::error::Error::Malformed(message.to_string()),
    }
}

fn read_u32_le(data: &[u8], offset: usize, path: &Path) -> Result<u32, Error> {
    data.get(offset..offset + 4)
        .map(|bytes| u32::from_le_bytes(bytes.try_into().expect("slice is four bytes")))
        .ok_or_else(|| malformed(path, "unexpected end of file"))
}

fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Grants user write permission for the lifetime of the guard and
/// restores the original mode on drop.
pub(crate) struct PermissionGuard {
    path: PathBuf,
    original: Option<std::fs::Permissions>,
}

impl PermissionGuard {
    pub(crate) fn new(path: &Path) -> Result<Self, Error> {
        use std::os::unix::fs::PermissionsExt;

        let permissions = fs_err::metadata(path)?.permissions();
        let mode = permissions.mode();
        if mode & 0o200 == 0 {
            fs_err::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o200))?;
            Ok(Self {
                path: path.to_path_buf(),
                original: Some(permissions),
            })
        } else {
            Ok(Self {
                path: path.to_path_buf(),
                original: None,
            })
        }
    }
}

impl Drop for PermissionGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            if let Err(err) = std::fs::set_permissions(&self.path, original) {
                warn!("Failed to restore permissions of {}: {err}", self.path.display());
            }
        }
    }
}

/// Restores the file's modification time on drop.
struct MtimeGuard {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl MtimeGuard {
    fn capture(path: &Path) -> Result<Self, Error> {
        Ok(Self {
            path: path.to_path_buf(),
            modified: fs_err::metadata(path)?.modified().ok(),
        })
    }
}

impl Drop for MtimeGuard {
    fn drop(&mut self) {
        let Some(modified) = self.modified else { return };
        // The file may have been left read-only again by now.
        let _writable = PermissionGuard::new(&self.path).ok();
        let restored = std::fs::File::options()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_modified(modified));
        if let Err(err) = restored {
            debug!("Failed to restore mtime of {}: {err}", self.path.display());
        }
    }
}
