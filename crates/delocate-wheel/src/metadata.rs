use std::path::Path;

use crate::Error;

/// The RFC-822-style headers of a `WHEEL` metadata file.
///
/// Order and duplicate headers are significant (`Tag` appears once per
/// tag), so the file is kept as an ordered list rather than a map.
/// Header names compare case-insensitively, like the email parsers the
/// packaging tools use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WheelMetadata {
    headers: Vec<(String, String)>,
}

impl WheelMetadata {
    pub fn read_from(path: &Path) -> Result<Self, Error> {
        let contents = fs_err::read_to_string(path)?;
        let mut headers = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                break;
            }
            let (name, value) = line.split_once(": ").ok_or_else(|| {
                Error::MalformedMetadata {
                    path: path.to_path_buf(),
                    line: index + 1,
                }
            })?;
            headers.push((name.to_string(), value.to_string()));
        }
        Ok(Self { headers })
    }

    pub fn write_to(&self, path: &Path) -> Result<(), Error> {
        let mut contents = String::new();
        for (name, value) in &self.headers {
            contents.push_str(name);
            contents.push_str(": ");
            contents.push_str(value);
            contents.push('\n');
        }
        fs_err::write(path, contents)?;
        Ok(())
    }

    /// The first value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'meta>(&'meta self, name: &'meta str) -> impl Iterator<Item = &'meta str> {
        self.headers
            .iter()
            .filter(move |(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str, value: &str) -> bool {
        self.get_all(name).any(|existing| existing == value)
    }

    /// Remove every header called `name`.
    pub fn remove_all(&mut self, name: &str) {
        self.headers
            .retain(|(header, _)| !header.eq_ignore_ascii_case(name));
    }

    /// Append a header at the end.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }
}
