//! Shared utilities

pub mod config;
pub mod fs;
pub mod hash;
pub mod pattern;
pub mod process;

pub use config::Config;
pub use pattern::{match_pattern, version_at_least};
pub use process::{run_command, CommandOutput, CommandRunner, ShellRunner};
