//! Built-in check providers.
//!
//! Each provider registers its checks and fixes against a shared
//! [`DoctorHost`]. Checks only read host state; fixes are the only routines
//! that change it.

pub mod common;
pub mod linux;
pub mod macos;
pub mod musl;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::doctor::CheckRegistry;
use crate::sources::{AcquiredSource, DownloadSpec, SourceAcquirer};
use crate::toolchain::SystemProbe;
use crate::util::config::ToolchainSettings;
use crate::util::process::{CommandRunner, ShellRunner};

/// Install prefix of the musl toolchain.
pub const MUSL_PREFIX: &str = "/usr/local/musl";

/// Everything the built-in checks and fixes need from the host.
pub struct DoctorHost<R = ShellRunner> {
    pub probe: SystemProbe<R>,
    pub toolchain: ToolchainSettings,

    /// Where prebuilt packages are unpacked
    pub pkg_root: PathBuf,

    /// Where sources fetched by fixes are kept
    pub source_dir: PathBuf,

    /// Needed by fixes that download; `None` makes those fixes fail.
    pub acquirer: Option<Arc<SourceAcquirer>>,
}

impl<R: CommandRunner> DoctorHost<R> {
    pub fn new(probe: SystemProbe<R>, pkg_root: impl Into<PathBuf>) -> Self {
        let pkg_root = pkg_root.into();
        DoctorHost {
            probe,
            toolchain: ToolchainSettings::default(),
            source_dir: pkg_root.join("src"),
            pkg_root,
            acquirer: None,
        }
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainSettings) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_acquirer(mut self, acquirer: Arc<SourceAcquirer>) -> Self {
        self.acquirer = Some(acquirer);
        self
    }

    pub fn runner(&self) -> &R {
        self.probe.runner()
    }

    /// Fetch `spec` into `dest` through the configured acquirer.
    pub fn acquire(&self, name: &str, spec: &DownloadSpec, dest: &Path) -> Result<AcquiredSource> {
        let acquirer = self
            .acquirer
            .as_ref()
            .with_context(|| format!("no source acquirer available to fetch {}", name))?;
        let acquired = acquirer
            .acquire_named(name, spec, dest)
            .with_context(|| format!("failed to fetch {}", name))?;
        Ok(acquired)
    }

    /// Run `cmd` and fail on a nonzero exit.
    pub fn run_checked(&self, cmd: &str) -> Result<()> {
        self.runner().run_checked(cmd, None)?;
        Ok(())
    }
}

/// Register every built-in provider.
pub fn register_builtin<R>(registry: &mut CheckRegistry, host: Arc<DoctorHost<R>>) -> Result<()>
where
    R: CommandRunner + 'static,
{
    linux::register(registry, Arc::clone(&host))?;
    macos::register(registry, Arc::clone(&host))?;
    common::register(registry, Arc::clone(&host))?;
    musl::register(registry, host)?;
    Ok(())
}
