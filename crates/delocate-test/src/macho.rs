use std::io;
use std::path::Path;

const MH_MAGIC: u32 = 0xfeed_face;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_EXECUTE: u32 = 0x2;
const MH_DYLIB: u32 = 0x6;
const MH_BUNDLE: u32 = 0x8;

const LC_ID_DYLIB: u32 = 0xd;
const LC_LOAD_DYLIB: u32 = 0xc;
const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;
const LC_RPATH: u32 = 0x8000_001c;
const LC_VERSION_MIN_MACOSX: u32 = 0x24;
const LC_BUILD_VERSION: u32 = 0x32;

const FAT_MAGIC: u32 = 0xcafe_babe;

/// Architectures the fixture builder can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureArch {
    I386,
    X86_64,
    Arm64,
}

impl FixtureArch {
    fn cputype(self) -> u32 {
        match self {
            Self::I386 => 0x7,
            Self::X86_64 => 0x0100_0007,
            Self::Arm64 => 0x0100_000c,
        }
    }

    fn cpusubtype(self) -> u32 {
        match self {
            Self::I386 | Self::X86_64 => 0x3,
            Self::Arm64 => 0x0,
        }
    }

    fn is_64(self) -> bool {
        !matches!(self, Self::I386)
    }
}

/// Builds a minimal Mach-O image: a header followed by the load
/// commands delocation cares about, with no segments or code.
///
/// Name strings are padded the way `-headerpad_max_install_names`
/// binaries are, so in-place rewrites to longer names have room to
/// land; `string_padding(0)` produces the tightly-packed layout where
/// they do not.
#[derive(Debug, Clone)]
pub struct DylibBuilder {
    arch: FixtureArch,
    filetype: u32,
    install_id: Option<String>,
    dylibs: Vec<(u32, String)>,
    rpaths: Vec<String>,
    build_version: Option<(u16, u16)>,
    version_min: Option<(u16, u16)>,
    string_padding: usize,
}

impl DylibBuilder {
    pub fn new(arch: FixtureArch) -> Self {
        Self {
            arch,
            filetype: MH_DYLIB,
            install_id: None,
            dylibs: Vec::new(),
            rpaths: Vec::new(),
            build_version: None,
            version_min: None,
            string_padding: 128,
        }
    }

    /// Emit an `MH_EXECUTE` image instead of a dylib.
    pub fn executable(mut self) -> Self {
        self.filetype = MH_EXECUTE;
        self
    }

    /// Emit an `MH_BUNDLE` image (a Python extension module).
    pub fn bundle(mut self) -> Self {
        self.filetype = MH_BUNDLE;
        self
    }

    pub fn install_id(mut self, id: impl Into<String>) -> Self {
        self.install_id = Some(id.into());
        self
    }

    /// Add an `LC_LOAD_DYLIB` reference.
    pub fn dylib(mut self, name: impl Into<String>) -> Self {
        self.dylibs.push((LC_LOAD_DYLIB, name.into()));
        self
    }

    /// Add an `LC_LOAD_WEAK_DYLIB` reference.
    pub fn weak_dylib(mut self, name: impl Into<String>) -> Self {
        self.dylibs.push((LC_LOAD_WEAK_DYLIB, name.into()));
        self
    }

    /// Add an `LC_RPATH` entry.
    pub fn rpath(mut self, path: impl Into<String>) -> Self {
        self.rpaths.push(path.into());
        self
    }

    /// Record a minimum macOS version via `LC_BUILD_VERSION`.
    pub fn build_version(mut self, major: u16, minor: u16) -> Self {
        self.build_version = Some((major, minor));
        self
    }

    /// Record a minimum macOS version via the legacy
    /// `LC_VERSION_MIN_MACOSX`.
    pub fn version_min(mut self, major: u16, minor: u16) -> Self {
        self.version_min = Some((major, minor));
        self
    }

    /// Reserve `padding` spare bytes after every name string.
    pub fn string_padding(mut self, padding: usize) -> Self {
        self.string_padding = padding;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut commands: Vec<Vec<u8>> = Vec::new();
        if let Some(id) = &self.install_id {
            commands.push(self.dylib_command(LC_ID_DYLIB, id));
        }
        for (cmd, name) in &self.dylibs {
            commands.push(self.dylib_command(*cmd, name));
        }
        for rpath in &self.rpaths {
            commands.push(self.rpath_command(rpath));
        }
        if let Some((major, minor)) = self.build_version {
            let minos = encode_version(major, minor);
            commands.push(pack_u32s(&[LC_BUILD_VERSION, 24, 1, minos, minos, 0]));
        }
        if let Some((major, minor)) = self.version_min {
            let version = encode_version(major, minor);
            commands.push(pack_u32s(&[LC_VERSION_MIN_MACOSX, 16, version, version]));
        }

        let ncmds = u32::try_from(commands.len()).expect("command count fits in u32");
        let sizeofcmds =
            u32::try_from(commands.iter().map(Vec::len).sum::<usize>()).expect("commands fit");

        let mut image = if self.arch.is_64() {
            pack_u32s(&[
                MH_MAGIC_64,
                self.arch.cputype(),
                self.arch.cpusubtype(),
                self.filetype,
                ncmds,
                sizeofcmds,
                0,
                0,
            ])
        } else {
            pack_u32s(&[
                MH_MAGIC,
                self.arch.cputype(),
                self.arch.cpusubtype(),
                self.filetype,
                ncmds,
                sizeofcmds,
                0,
            ])
        };
        for command in commands {
            image.extend_from_slice(&command);
        }
        image
    }

    pub fn write(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs_err::write(path.as_ref(), self.build())
    }

    fn dylib_command(&self, cmd: u32, name: &str) -> Vec<u8> {
        // dylib_command: cmd, cmdsize, name offset, timestamp,
        // current_version, compatibility_version, then the name string.
        let cmdsize = align8(24 + name.len() + 1 + self.string_padding);
        let mut bytes = pack_u32s(&[
            cmd,
            u32::try_from(cmdsize).expect("cmdsize fits"),
            24,
            2,
            0x0001_0000,
            0x0001_0000,
        ]);
        bytes.extend_from_slice(name.as_bytes());
        bytes.resize(cmdsize, 0);
        bytes
    }

    fn rpath_command(&self, path: &str) -> Vec<u8> {
        let cmdsize = align8(12 + path.len() + 1 + self.string_padding);
        let mut bytes = pack_u32s(&[LC_RPATH, u32::try_from(cmdsize).expect("cmdsize fits"), 12]);
        bytes.extend_from_slice(path.as_bytes());
        bytes.resize(cmdsize, 0);
        bytes
    }
}

/// Combine thin images into a universal (fat) file.
pub fn write_fat(path: impl AsRef<Path>, slices: &[Vec<u8>]) -> io::Result<()> {
    let mut offsets = Vec::with_capacity(slices.len());
    let mut cursor = align8(8 + 20 * slices.len());
    for slice in slices {
        offsets.push(cursor);
        cursor = align8(cursor + slice.len());
    }

    let mut fat = Vec::with_capacity(cursor);
    fat.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    fat.extend_from_slice(&u32::try_from(slices.len()).expect("arch count fits").to_be_bytes());
    for (slice, offset) in slices.iter().zip(&offsets) {
        let cputype = u32::from_le_bytes(slice[4..8].try_into().expect("slice has a header"));
        let cpusubtype = u32::from_le_bytes(slice[8..12].try_into().expect("slice has a header"));
        for field in [
            cputype,
            cpusubtype,
            u32::try_from(*offset).expect("offset fits"),
            u32::try_from(slice.len()).expect("slice fits"),
            3,
        ] {
            fat.extend_from_slice(&field.to_be_bytes());
        }
    }
    for (slice, offset) in slices.iter().zip(&offsets) {
        fat.resize(*offset, 0);
        fat.extend_from_slice(slice);
    }
    fs_err::write(path.as_ref(), fat)
}

fn encode_version(major: u16, minor: u16) -> u32 {
    (u32::from(major) << 16) | (u32::from(minor) << 8)
}

fn align8(len: usize) -> usize {
    len.next_multiple_of(8)
}

fn pack_u32s(values: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
