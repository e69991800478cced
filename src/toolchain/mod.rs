//! Toolchain introspection.
//!
//! Detects the host's distribution and libc flavor, locates static
//! libraries and headers, counts CPUs and classifies compilers. Results
//! feed both the doctor and the compiler invocation.

pub mod compiler;
pub mod distro;
pub mod probe;

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::Serialize;

pub use compiler::{
    arch_cflags, arch_to_gnu, cc_type, cross_compile_prefix, linux_arch_cflags, CompilerType,
};
pub use distro::{install_command, supported_distros, OsRelease};
pub use probe::SystemProbe;

use crate::util::process::CommandRunner;

/// Operating system family used for check applicability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OsFamily {
    Linux,
    Darwin,
    Windows,
    Bsd,
}

impl OsFamily {
    pub const ALL: [OsFamily; 4] = [
        OsFamily::Linux,
        OsFamily::Darwin,
        OsFamily::Windows,
        OsFamily::Bsd,
    ];

    /// The family this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            OsFamily::Darwin
        } else if cfg!(target_os = "windows") {
            OsFamily::Windows
        } else if cfg!(any(
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            OsFamily::Bsd
        } else {
            OsFamily::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "Linux",
            OsFamily::Darwin => "Darwin",
            OsFamily::Windows => "Windows",
            OsFamily::Bsd => "BSD",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(OsFamily::Linux),
            "darwin" | "macos" => Ok(OsFamily::Darwin),
            "windows" => Ok(OsFamily::Windows),
            "bsd" | "freebsd" => Ok(OsFamily::Bsd),
            other => bail!("unknown OS family: {}", other),
        }
    }
}

/// Snapshot of derived toolchain facts. Recomputed on every call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolchainFacts {
    pub distro: Option<OsRelease>,
    pub is_musl: bool,
    pub cpu_count: usize,
    pub compiler_type: CompilerType,
    pub cross_prefix: Option<String>,
}

impl ToolchainFacts {
    /// Gather facts for compiler `cc`, optionally cross-compiling to
    /// `target_arch`.
    pub fn detect<R: CommandRunner>(
        probe: &SystemProbe<R>,
        cc: &str,
        target_arch: Option<&str>,
    ) -> Self {
        let cross_prefix = target_arch.and_then(|arch| match cross_compile_prefix(cc, arch) {
            Ok(prefix) => Some(prefix),
            Err(e) => {
                tracing::debug!("No cross prefix for {}: {:#}", cc, e);
                None
            }
        });

        ToolchainFacts {
            distro: probe.os_release(),
            is_musl: probe.is_musl_dist(),
            cpu_count: probe.cpu_count(),
            compiler_type: cc_type(cc),
            cross_prefix,
        }
    }
}
