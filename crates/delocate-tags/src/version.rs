use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::PlatformTagError;

/// A minimum macOS version, as found in deployment targets, platform tags
/// and `LC_BUILD_VERSION`/`LC_VERSION_MIN_MACOSX` load commands.
///
/// Only the major and minor components take part in tagging; a dotted
/// patch component is accepted on parse and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacosVersion {
    pub major: u16,
    pub minor: u16,
}

impl MacosVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// The first macOS release that supports arm64.
    pub const BIG_SUR: Self = Self::new(11, 0);

    /// Decode the packed `xxxx.yy.zz` version field of an
    /// `LC_BUILD_VERSION` or `LC_VERSION_MIN_MACOSX` load command.
    pub fn from_load_command(bits: u32) -> Self {
        Self {
            major: u16::try_from((bits >> 16) & 0xffff).expect("masked to 16 bits"),
            minor: u16::try_from((bits >> 8) & 0xff).expect("masked to 8 bits"),
        }
    }
}

impl Display for MacosVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for MacosVersion {
    type Err = PlatformTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            PlatformTagError::InvalidVersion(s.to_string(), reason.to_string())
        };
        let mut parts = s.split('.');
        let major = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| invalid("must not be empty"))?
            .parse::<u16>()
            .map_err(|_| invalid("major version must be a number"))?;
        let minor = match parts.next() {
            Some(part) => part
                .parse::<u16>()
                .map_err(|_| invalid("minor version must be a number"))?,
            None => 0,
        };
        if let Some(patch) = parts.next() {
            patch
                .parse::<u16>()
                .map_err(|_| invalid("patch version must be a number"))?;
        }
        if parts.next().is_some() {
            return Err(invalid("must have at most three components"));
        }
        Ok(Self { major, minor })
    }
}
