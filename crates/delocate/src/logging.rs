//! Logging setup shared by the command-line binaries.

use tracing_subscriber::EnvFilter;

/// Initialize tracing output on stderr.
///
/// `verbosity` counts `-v` flags: 0 shows warnings, 1 adds info, 2 or
/// more adds debug output. `RUST_LOG` overrides when set.
pub fn init(verbosity: u8) {
    let directive = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
