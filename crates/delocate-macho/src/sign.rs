use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::Error;
use crate::rewrite::PermissionGuard;

pub(crate) struct HostTools {
    pub(crate) install_name_tool: Option<PathBuf>,
    pub(crate) codesign: Option<PathBuf>,
}

pub(crate) fn host_tools() -> &'static HostTools {
    static TOOLS: OnceLock<HostTools> = OnceLock::new();
    TOOLS.get_or_init(|| HostTools {
        install_name_tool: which::which("install_name_tool").ok(),
        codesign: which::which("codesign").ok(),
    })
}

/// Replace an *invalid* signature on `path` with an ad-hoc one.
///
/// Files whose signature is missing or still valid are left alone;
/// removing a signature outright is not possible on macOS, so an ad-hoc
/// signature is the closest replacement.
pub fn validate_signature(path: &Path) -> Result<(), Error> {
    let Some(codesign) = &host_tools().codesign else {
        debug!("codesign not found, skipping signature validation");
        return Ok(());
    };
    let output = Command::new(codesign).arg("--verify").arg(path).output()?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("code object is not signed at all") {
        return Ok(());
    }
    replace_signature(path, "-")
}

/// Force-sign `path` with the given identity (`-` for ad hoc).
pub fn replace_signature(path: &Path, identity: &str) -> Result<(), Error> {
    let Some(codesign) = &host_tools().codesign else {
        debug!("codesign not found, leaving {} unsigned", path.display());
        return Ok(());
    };
    let _writable = PermissionGuard::new(path)?;
    let output = Command::new(codesign)
        .args(["--force", "--sign", identity])
        .arg(path)
        .output()?;
    if !output.status.success() {
        return Err(Error::ToolFailed {
            tool: "codesign",
            path: path.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Best-effort ad-hoc re-sign after a load command was rewritten.
///
/// An edit invalidates any existing signature; unsigned binaries stay
/// loadable on x86_64, so a failed re-sign is reported but not fatal.
pub(crate) fn adhoc_resign(path: &Path) -> Result<(), Error> {
    match replace_signature(path, "-") {
        Ok(()) => Ok(()),
        Err(Error::ToolFailed { stderr, .. }) => {
            warn!("Ad-hoc signing of {} failed: {stderr}", path.display());
            Ok(())
        }
        Err(err) => Err(err),
    }
}
