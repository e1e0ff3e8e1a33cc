use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::{MacosVersion, PlatformArch, PlatformTagError};

/// A single `macosx_{major}_{minor}_{arch}` platform tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformTag {
    pub version: MacosVersion,
    pub arch: PlatformArch,
}

impl PlatformTag {
    pub const fn new(version: MacosVersion, arch: PlatformArch) -> Self {
        Self { version, arch }
    }
}

impl Display for PlatformTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "macosx_{}_{}_{}",
            self.version.major, self.version.minor, self.arch
        )
    }
}

impl FromStr for PlatformTag {
    type Err = PlatformTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            PlatformTagError::InvalidPlatformTag(s.to_string(), reason.to_string())
        };
        let rest = s
            .strip_prefix("macosx_")
            .ok_or_else(|| invalid("must start with \"macosx_\""))?;
        let (major, rest) = rest
            .split_once('_')
            .ok_or_else(|| invalid("must have a minor version"))?;
        let (minor, arch) = rest
            .split_once('_')
            .ok_or_else(|| invalid("must have an architecture"))?;
        let major = major
            .parse::<u16>()
            .map_err(|_| invalid("major version must be a number"))?;
        let minor = minor
            .parse::<u16>()
            .map_err(|_| invalid("minor version must be a number"))?;
        let arch = arch.parse::<PlatformArch>()?;
        Ok(Self {
            version: MacosVersion::new(major, minor),
            arch,
        })
    }
}
