//! Test support: build synthetic Mach-O binaries and wheels in memory.
//!
//! The delocation crates are exercised on Linux CI as well as macOS, so
//! their tests cannot rely on a host toolchain (`clang`,
//! `install_name_tool`, `lipo`). The builders here emit just enough of
//! the Mach-O and wheel formats for the production code to parse and
//! rewrite: headers plus load commands on one side, a zip with
//! `*.dist-info/WHEEL` and `RECORD` entries on the other.

pub use macho::{DylibBuilder, FixtureArch, write_fat};
pub use wheel::WheelBuilder;

mod macho;
mod wheel;
