//! Statica - environment preparation for static runtime builds
//!
//! This crate provides the library behind the `statica` CLI: fetching
//! sources through pluggable download strategies, diagnosing and fixing the
//! build host, running patch scripts at pipeline phases, and introspecting
//! the toolchain.

pub mod doctor;
pub mod patch;
pub mod sources;
pub mod toolchain;
pub mod util;

/// Test utilities and mocks for statica unit tests.
///
/// Only compiled for tests. Provides scripted command and HTTP doubles and
/// a fake host root.
#[cfg(test)]
pub mod test_support;

pub use doctor::{Doctor, DoctorOptions, DoctorReport};
pub use patch::{interrupt, InterruptSignal, PatchDriver, PatchError, PatchPoint};
pub use sources::{AcquireError, DownloadSpec, SourceAcquirer, StrategyRegistry};
pub use toolchain::{OsFamily, SystemProbe, ToolchainFacts};
pub use util::Config;
