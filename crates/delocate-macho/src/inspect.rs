use std::collections::BTreeSet;
use std::path::Path;

use goblin::mach::constants::cputype::{
    CPU_TYPE_ARM64, CPU_TYPE_I386, CPU_TYPE_POWERPC, CPU_TYPE_POWERPC64, CPU_TYPE_X86_64,
};
use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};
use scroll::Pread;

use delocate_tags::MacosVersion;

use crate::Error;

const MH_MAGIC: u32 = 0xfeed_face;
const MH_CIGAM: u32 = 0xcefa_edfe;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_CIGAM_64: u32 = 0xcffa_edfe;
const FAT_MAGIC: u32 = 0xcafe_babe;
const FAT_CIGAM: u32 = 0xbeba_feca;

/// The load-command contents of one architecture slice.
#[derive(Debug, Clone)]
pub struct ArchSlice {
    /// Architecture name as used in platform tags (`x86_64`, `arm64`,
    /// `i386`, `ppc`, `ppc64`) or `unknown`.
    pub arch: String,
    /// The `LC_ID_DYLIB` name, absent for executables and bundles.
    pub install_id: Option<String>,
    /// Referenced install names, in load-command order.
    pub install_names: Vec<String>,
    /// `LC_RPATH` entries, in load-command order.
    pub rpaths: Vec<String>,
    /// Minimum macOS version from `LC_BUILD_VERSION` or
    /// `LC_VERSION_MIN_MACOSX`, whichever appears first.
    pub min_os: Option<MacosVersion>,
}

/// All architecture slices of a Mach-O file.
#[derive(Debug, Clone)]
pub struct MachSummary {
    pub slices: Vec<ArchSlice>,
}

/// Whether `path` looks like a Mach-O file (thin or fat), judged by its
/// magic number.
pub fn is_macho_file(path: &Path) -> Result<bool, Error> {
    use std::io::Read;

    let mut file = fs_err::File::open(path)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
        Err(err) => return Err(err.into()),
    }
    let value = u32::from_le_bytes(magic);
    Ok(matches!(
        value,
        MH_MAGIC | MH_CIGAM | MH_MAGIC_64 | MH_CIGAM_64 | FAT_MAGIC | FAT_CIGAM
    ))
}

/// Parse `path` into per-architecture load-command summaries.
///
/// Returns `None` for files that are not Mach-O at all; fails only on
/// io errors and on files that carry a Mach-O magic but do not parse.
pub fn summarize(path: &Path) -> Result<Option<MachSummary>, Error> {
    if !is_macho_file(path)? {
        return Ok(None);
    }
    let data = fs_err::read(path)?;
    let slices = raw_slices(&data, path)?;
    let summary = MachSummary {
        slices: slices
            .iter()
            .map(|slice| summarize_slice(slice, path))
            .collect::<Result<_, _>>()?,
    };
    Ok(Some(summary))
}

/// Install names referenced by each architecture of `path`, excluding
/// the file's own install id. Empty for non-Mach-O files.
pub fn install_names(path: &Path) -> Result<Vec<(String, Vec<String>)>, Error> {
    Ok(summarize(path)?
        .map(|summary| {
            summary
                .slices
                .into_iter()
                .map(|slice| (slice.arch, slice.install_names))
                .collect()
        })
        .unwrap_or_default())
}

/// The install id (`LC_ID_DYLIB`) of `path`, if it has one.
pub fn install_id(path: &Path) -> Result<Option<String>, Error> {
    Ok(summarize(path)?
        .and_then(|summary| summary.slices.into_iter().next())
        .and_then(|slice| slice.install_id))
}

/// The rpath entries of each architecture of `path`.
pub fn rpaths(path: &Path) -> Result<Vec<(String, Vec<String>)>, Error> {
    Ok(summarize(path)?
        .map(|summary| {
            summary
                .slices
                .into_iter()
                .map(|slice| (slice.arch, slice.rpaths))
                .collect()
        })
        .unwrap_or_default())
}

/// The set of architectures in `path`; empty for non-Mach-O files.
pub fn archs(path: &Path) -> Result<BTreeSet<String>, Error> {
    Ok(summarize(path)?
        .map(|summary| summary.slices.into_iter().map(|slice| slice.arch).collect())
        .unwrap_or_default())
}

/// Per-architecture minimum macOS versions recorded in `path`.
///
/// Architectures without a version load command are omitted.
pub fn min_os_versions(path: &Path) -> Result<Vec<(String, MacosVersion)>, Error> {
    Ok(summarize(path)?
        .map(|summary| {
            summary
                .slices
                .into_iter()
                .filter_map(|slice| slice.min_os.map(|version| (slice.arch, version)))
                .collect()
        })
        .unwrap_or_default())
}

pub(crate) struct RawSlice<'a> {
    /// Offset of this slice within the file.
    pub(crate) offset: usize,
    pub(crate) bytes: &'a [u8],
    pub(crate) macho: MachO<'a>,
}

pub(crate) fn raw_slices<'a>(data: &'a [u8], path: &Path) -> Result<Vec<RawSlice<'a>>, Error> {
    let parse_error = |source| Error::Parse {
        path: path.to_path_buf(),
        source,
    };
    match Mach::parse(data).map_err(parse_error)? {
        Mach::Binary(macho) => Ok(vec![RawSlice {
            offset: 0,
            bytes: data,
            macho,
        }]),
        Mach::Fat(multi) => {
            let mut slices = Vec::new();
            for arch in multi.arches().map_err(parse_error)? {
                let start = arch.offset as usize;
                let end = start + arch.size as usize;
                let bytes = data.get(start..end).ok_or_else(|| Error::Parse {
                    path: path.to_path_buf(),
                    source: goblin::error::Error::Malformed(format!(
                        "fat arch slice {start}..{end} is out of bounds"
                    )),
                })?;
                let macho = MachO::parse(bytes, 0).map_err(parse_error)?;
                slices.push(RawSlice {
                    offset: start,
                    bytes,
                    macho,
                });
            }
            Ok(slices)
        }
    }
}

pub(crate) fn arch_name(cputype: u32) -> &'static str {
    match cputype {
        CPU_TYPE_POWERPC => "ppc",
        CPU_TYPE_POWERPC64 => "ppc64",
        CPU_TYPE_I386 => "i386",
        CPU_TYPE_X86_64 => "x86_64",
        CPU_TYPE_ARM64 => "arm64",
        _ => "unknown",
    }
}

pub(crate) fn read_lc_string<'a>(
    bytes: &'a [u8],
    offset: usize,
    path: &Path,
) -> Result<&'a str, Error> {
    bytes.pread::<&str>(offset).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source: source.into(),
    })
}

fn summarize_slice(slice: &RawSlice<'_>, path: &Path) -> Result<ArchSlice, Error> {
    let mut install_id = None;
    let mut install_names = Vec::new();
    let mut rpaths = Vec::new();
    let mut min_os = None;

    for command in &slice.macho.load_commands {
        match command.command {
            CommandVariant::IdDylib(ref dylib) => {
                let name =
                    read_lc_string(slice.bytes, command.offset + dylib.dylib.name as usize, path)?;
                install_id = Some(name.to_string());
            }
            CommandVariant::LoadDylib(ref dylib)
            | CommandVariant::LoadWeakDylib(ref dylib)
            | CommandVariant::ReexportDylib(ref dylib)
            | CommandVariant::LazyLoadDylib(ref dylib)
            | CommandVariant::LoadUpwardDylib(ref dylib) => {
                let name =
                    read_lc_string(slice.bytes, command.offset + dylib.dylib.name as usize, path)?;
                install_names.push(name.to_string());
            }
            CommandVariant::Rpath(ref rpath) => {
                let entry = read_lc_string(slice.bytes, command.offset + rpath.path as usize, path)?;
                rpaths.push(entry.to_string());
            }
            CommandVariant::BuildVersion(ref version) if min_os.is_none() => {
                min_os = Some(MacosVersion::from_load_command(version.minos));
            }
            CommandVariant::VersionMinMacosx(ref version) if min_os.is_none() => {
                min_os = Some(MacosVersion::from_load_command(version.version));
            }
            _ => {}
        }
    }

    Ok(ArchSlice {
        arch: arch_name(slice.macho.header.cputype).to_string(),
        install_id,
        install_names,
        rpaths,
        min_os,
    })
}
