use std::io::Write;
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Assembles a small but well-formed wheel around arbitrary file
/// contents: the named files plus a `{name}-{version}.dist-info/`
/// directory holding `WHEEL`, `METADATA` and `RECORD`.
#[derive(Debug, Clone)]
pub struct WheelBuilder {
    name: String,
    version: String,
    tag: String,
    purelib: bool,
    files: Vec<(String, Vec<u8>, u32)>,
}

impl WheelBuilder {
    /// `tag` is the compound `{pyver}-{abi}-{plat}` portion of the
    /// wheel filename, e.g. `cp311-cp311-macosx_10_9_x86_64`.
    pub fn new(name: impl Into<String>, version: impl Into<String>, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            name: name.into(),
            version: version.into(),
            purelib: tag.ends_with("any"),
            tag,
            files: Vec::new(),
        }
    }

    pub fn purelib(mut self, purelib: bool) -> Self {
        self.purelib = purelib;
        self
    }

    pub fn file(self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.file_with_mode(path, contents, 0o644)
    }

    pub fn file_with_mode(
        mut self,
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
        mode: u32,
    ) -> Self {
        self.files.push((path.into(), contents.into(), mode));
        self
    }

    pub fn filename(&self) -> String {
        format!("{}-{}-{}.whl", self.name, self.version, self.tag)
    }

    /// Write the wheel into `dir` and return its path.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let wheel_path = dir.as_ref().join(self.filename());
        let dist_info = format!("{}-{}.dist-info", self.name, self.version);

        let mut wheel_file = String::from("Wheel-Version: 1.0\nGenerator: bdist_wheel (0.41.2)\n");
        wheel_file.push_str(&format!(
            "Root-Is-Purelib: {}\n",
            if self.purelib { "true" } else { "false" }
        ));
        wheel_file.push_str(&format!("Tag: {}\n", self.tag));
        let metadata = format!(
            "Metadata-Version: 2.1\nName: {}\nVersion: {}\n",
            self.name, self.version
        );

        let mut record = String::new();
        let mut entries: Vec<(String, Vec<u8>, u32)> = self.files.clone();
        entries.push((format!("{dist_info}/WHEEL"), wheel_file.into_bytes(), 0o644));
        entries.push((format!("{dist_info}/METADATA"), metadata.into_bytes(), 0o644));
        for (path, _, _) in &entries {
            record.push_str(&format!("{path},,\n"));
        }
        record.push_str(&format!("{dist_info}/RECORD,,\n"));
        entries.push((format!("{dist_info}/RECORD"), record.into_bytes(), 0o644));

        let mut writer = ZipWriter::new(fs_err::File::create(&wheel_path)?);
        for (path, contents, mode) in &entries {
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .unix_permissions(*mode);
            writer.start_file(path.clone(), options)?;
            writer.write_all(contents)?;
        }
        writer.finish()?;
        Ok(wheel_path)
    }
}
