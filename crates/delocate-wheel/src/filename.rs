use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::Error;

/// A parsed PEP 427 wheel filename:
/// `{name}-{version}(-{build})?-{pyver}-{abi}-{plat}.whl`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct WheelFilename {
    pub name: String,
    pub version: String,
    pub build_tag: Option<String>,
    pub python_tag: Vec<String>,
    pub abi_tag: Vec<String>,
    pub platform_tag: Vec<String>,
}

impl FromStr for WheelFilename {
    type Err = Error;

    fn from_str(filename: &str) -> Result<Self, Self::Err> {
        let stem = filename.strip_suffix(".whl").ok_or_else(|| {
            Error::InvalidWheelFilename(filename.to_string(), "Must end with .whl".to_string())
        })?;
        Self::parse(stem, filename)
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.whl", self.stem())
    }
}

impl WheelFilename {
    /// Parse a wheel filename from its stem (e.g.
    /// `foo-1.2.3-py3-none-any`).
    pub fn from_stem(stem: &str) -> Result<Self, Error> {
        Self::parse(stem, stem)
    }

    /// The filename without the `.whl` extension.
    pub fn stem(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.compound_tag())
    }

    /// `true` for pure wheels tagged `any`.
    pub fn is_any(&self) -> bool {
        self.platform_tag == ["any"]
    }

    /// The `{pyver}-{abi}-{plat}` portion, with the optional build tag
    /// in front.
    fn compound_tag(&self) -> String {
        let tag = format!(
            "{}-{}-{}",
            self.python_tag.join("."),
            self.abi_tag.join("."),
            self.platform_tag.join(".")
        );
        match &self.build_tag {
            Some(build_tag) => format!("{build_tag}-{tag}"),
            None => tag,
        }
    }

    /// The expanded `Tag:` entries for the `WHEEL` metadata file, one
    /// per python/abi/platform combination.
    pub fn expanded_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        for python_tag in &self.python_tag {
            for abi_tag in &self.abi_tag {
                for platform_tag in &self.platform_tag {
                    tags.push(format!("{python_tag}-{abi_tag}-{platform_tag}"));
                }
            }
        }
        tags
    }

    /// This filename with a different set of platform tags.
    pub fn with_platform_tags(&self, platform_tag: Vec<String>) -> Self {
        Self {
            platform_tag,
            ..self.clone()
        }
    }

    /// The originating `filename` is used for high-fidelity error
    /// messages.
    fn parse(stem: &str, filename: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| {
            Error::InvalidWheelFilename(filename.to_string(), reason.to_string())
        };

        // The stem has either five or six `-`-separated segments; with
        // six, the third is the build tag.
        // https://www.python.org/dev/peps/pep-0427/#file-name-convention
        let mut parts = stem.split('-');
        let name = parts.next().expect("split always yields one element");
        let Some(version) = parts.next() else {
            return Err(invalid("Must have a version"));
        };
        let Some(build_tag_or_python_tag) = parts.next() else {
            return Err(invalid("Must have a Python tag"));
        };
        let Some(python_tag_or_abi_tag) = parts.next() else {
            return Err(invalid("Must have an ABI tag"));
        };
        let Some(abi_tag_or_platform_tag) = parts.next() else {
            return Err(invalid("Must have a platform tag"));
        };
        let (build_tag, python_tag, abi_tag, platform_tag) =
            if let Some(platform_tag) = parts.next() {
                if parts.next().is_some() {
                    return Err(invalid("Must have 5 or 6 components, but has more"));
                }
                (
                    Some(build_tag_or_python_tag),
                    python_tag_or_abi_tag,
                    abi_tag_or_platform_tag,
                    platform_tag,
                )
            } else {
                (
                    None,
                    build_tag_or_python_tag,
                    python_tag_or_abi_tag,
                    abi_tag_or_platform_tag,
                )
            };
        if name.is_empty() {
            return Err(invalid("Must have a package name"));
        }
        if let Some(build_tag) = build_tag {
            if !build_tag.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(invalid("Build tag must start with a digit"));
            }
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            build_tag: build_tag.map(String::from),
            python_tag: python_tag.split('.').map(String::from).collect(),
            abi_tag: abi_tag.split('.').map(String::from).collect(),
            platform_tag: platform_tag.split('.').map(String::from).collect(),
        })
    }
}
