use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::{MacosVersion, PlatformTagError};

/// An architecture component of a macOS platform tag.
///
/// `Intel` and `Universal2` are "packed" forms covering two thin
/// architectures each; the remaining variants are thin architectures as
/// reported by the Mach-O headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlatformArch {
    Ppc,
    Ppc64,
    I386,
    X86_64,
    Arm64,
    Intel,
    Universal2,
}

impl PlatformArch {
    pub fn is_packed(self) -> bool {
        matches!(self, Self::Intel | Self::Universal2)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ppc => "ppc",
            Self::Ppc64 => "ppc64",
            Self::I386 => "i386",
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
            Self::Intel => "intel",
            Self::Universal2 => "universal2",
        }
    }
}

impl Display for PlatformArch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformArch {
    type Err = PlatformTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ppc" => Ok(Self::Ppc),
            "ppc64" => Ok(Self::Ppc64),
            "i386" => Ok(Self::I386),
            "x86_64" => Ok(Self::X86_64),
            "arm64" => Ok(Self::Arm64),
            "intel" => Ok(Self::Intel),
            "universal2" => Ok(Self::Universal2),
            _ => Err(PlatformTagError::UnknownArchitecture(s.to_string())),
        }
    }
}

/// Replace packed architecture entries by the thin architectures they
/// cover.
///
/// `universal2` becomes `x86_64` at the same version and `arm64` at no
/// less than 11.0 (arm64 binaries cannot run on anything older), while
/// `intel` becomes `i386` and `x86_64` at the same version. Inverse of
/// [`pack_architectures`] on valid inputs.
pub fn unpack_architectures(
    architecture_versions: &BTreeMap<PlatformArch, MacosVersion>,
) -> BTreeMap<PlatformArch, MacosVersion> {
    let mut unpacked = architecture_versions.clone();
    if let Some(version) = unpacked.remove(&PlatformArch::Universal2) {
        unpacked.insert(PlatformArch::X86_64, version);
        unpacked.insert(PlatformArch::Arm64, version.max(MacosVersion::BIG_SUR));
    }
    if let Some(version) = unpacked.remove(&PlatformArch::Intel) {
        unpacked.insert(PlatformArch::I386, version);
        unpacked.insert(PlatformArch::X86_64, version);
    }
    unpacked
}

/// Combine thin architecture entries into their packed forms where the
/// versions allow it. Inverse of [`unpack_architectures`].
pub fn pack_architectures(
    architecture_versions: &BTreeMap<PlatformArch, MacosVersion>,
) -> BTreeMap<PlatformArch, MacosVersion> {
    let mut packed = architecture_versions.clone();
    if let (Some(&x86_64), Some(&arm64)) = (
        packed.get(&PlatformArch::X86_64),
        packed.get(&PlatformArch::Arm64),
    ) {
        if x86_64 == arm64 || arm64 == MacosVersion::BIG_SUR {
            packed.remove(&PlatformArch::X86_64);
            packed.remove(&PlatformArch::Arm64);
            packed.insert(PlatformArch::Universal2, x86_64);
        }
    }
    if let (Some(&i386), Some(&x86_64)) = (
        packed.get(&PlatformArch::I386),
        packed.get(&PlatformArch::X86_64),
    ) {
        if i386 == x86_64 {
            packed.remove(&PlatformArch::I386);
            packed.remove(&PlatformArch::X86_64);
            packed.insert(PlatformArch::Intel, i386);
        }
    }
    packed
}

/// Expand a required-architecture name into the set of thin architecture
/// names it stands for.
///
/// `intel` and `universal2` are shorthands for their thin pairs; any
/// other name is required as-is.
pub fn required_arch_set(name: &str) -> BTreeSet<String> {
    match name {
        "intel" => ["i386", "x86_64"].map(String::from).into(),
        "universal2" => ["x86_64", "arm64"].map(String::from).into(),
        _ => [name.to_string()].into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(s: &str) -> MacosVersion {
        s.parse().unwrap()
    }

    #[test]
    fn unpack() {
        let arm64_only = BTreeMap::from([(PlatformArch::Arm64, version("11.0"))]);
        assert_eq!(unpack_architectures(&arm64_only), arm64_only);

        assert_eq!(
            unpack_architectures(&BTreeMap::from([(PlatformArch::Universal2, version("10.5"))])),
            BTreeMap::from([
                (PlatformArch::X86_64, version("10.5")),
                (PlatformArch::Arm64, version("11.0")),
            ])
        );
        assert_eq!(
            unpack_architectures(&BTreeMap::from([(PlatformArch::Intel, version("10.5"))])),
            BTreeMap::from([
                (PlatformArch::I386, version("10.5")),
                (PlatformArch::X86_64, version("10.5")),
            ])
        );
        assert_eq!(unpack_architectures(&BTreeMap::new()), BTreeMap::new());
    }

    #[test]
    fn pack() {
        let arm64_only = BTreeMap::from([(PlatformArch::Arm64, version("11.0"))]);
        assert_eq!(pack_architectures(&arm64_only), arm64_only);

        assert_eq!(
            pack_architectures(&BTreeMap::from([
                (PlatformArch::I386, version("10.5")),
                (PlatformArch::X86_64, version("10.5")),
            ])),
            BTreeMap::from([(PlatformArch::Intel, version("10.5"))])
        );
        assert_eq!(
            pack_architectures(&BTreeMap::from([
                (PlatformArch::X86_64, version("10.5")),
                (PlatformArch::Arm64, version("11.0")),
            ])),
            BTreeMap::from([(PlatformArch::Universal2, version("10.5"))])
        );
        // Differing versions with arm64 above 11.0 stay thin.
        let mixed = BTreeMap::from([
            (PlatformArch::X86_64, version("11.0")),
            (PlatformArch::Arm64, version("12.0")),
        ]);
        assert_eq!(pack_architectures(&mixed), mixed);
        assert_eq!(
            pack_architectures(&BTreeMap::from([
                (PlatformArch::I386, version("11.0")),
                (PlatformArch::X86_64, version("11.0")),
                (PlatformArch::Arm64, version("11.0")),
            ])),
            BTreeMap::from([
                (PlatformArch::I386, version("11.0")),
                (PlatformArch::Universal2, version("11.0")),
            ])
        );
        assert_eq!(pack_architectures(&BTreeMap::new()), BTreeMap::new());
    }

    #[test]
    fn pack_unpack_round_trip() {
        let packed = BTreeMap::from([(PlatformArch::Universal2, version("10.9"))]);
        assert_eq!(pack_architectures(&unpack_architectures(&packed)), packed);
        let unpacked = BTreeMap::from([
            (PlatformArch::X86_64, version("10.9")),
            (PlatformArch::Arm64, version("11.0")),
        ]);
        assert_eq!(unpack_architectures(&pack_architectures(&unpacked)), unpacked);
    }

    #[test]
    fn required_archs() {
        assert_eq!(
            required_arch_set("intel"),
            BTreeSet::from(["i386".to_string(), "x86_64".to_string()])
        );
        assert_eq!(
            required_arch_set("universal2"),
            BTreeSet::from(["x86_64".to_string(), "arm64".to_string()])
        );
        assert_eq!(required_arch_set("arm64"), BTreeSet::from(["arm64".to_string()]));
    }
}
