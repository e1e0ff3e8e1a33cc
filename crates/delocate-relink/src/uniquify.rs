use std::path::Path;

use tracing::debug;

use delocate_macho::{set_install_id, validate_signature};

use crate::Error;

/// Prefix for the install id of copied libraries.
///
/// The literal is load-bearing: wheels already on PyPI carry ids under
/// this prefix, and runtime loaders use the id to tell two bundled
/// copies of the same library apart.
pub const DLC_PREFIX: &str = "/DLC/";

/// Give each library an install id of `<prefix>/<basename>`, so copies
/// of the same library bundled by different wheels do not alias each
/// other in process space.
///
/// `install_id_prefix` must be an absolute path; a trailing `/` is
/// added when missing. Signatures are revalidated after the rewrite.
pub fn make_install_ids_unique<'lib>(
    libraries: impl IntoIterator<Item = &'lib Path>,
    install_id_prefix: &str,
) -> Result<(), Error> {
    if !install_id_prefix.starts_with('/') {
        return Err(Error::InvalidInstallIdPrefix {
            prefix: install_id_prefix.to_string(),
        });
    }
    let mut prefix = install_id_prefix.to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    for library in libraries {
        let basename = library
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let install_id = format!("{prefix}{basename}");
        debug!("Setting install id of {} to {install_id}", library.display());
        set_install_id(library, &install_id, true)?;
        validate_signature(library)?;
    }
    Ok(())
}
