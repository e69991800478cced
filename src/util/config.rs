//! Configuration file support.
//!
//! Two locations are consulted:
//! - Global: `~/.statica/config.toml` - user-wide defaults
//! - Project: `.statica/config.toml` - overrides for one checkout
//!
//! Project values take precedence over global ones. A handful of
//! environment variables override both (see [`Config::apply_env`]).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Comma-separated doctor check names to skip.
pub const SKIP_DOCTOR_CHECKS_ENV: &str = "STATICA_SKIP_DOCTOR_CHECKS";

/// Token used for authenticated GitHub API requests.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Merged configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directories
    pub paths: PathsConfig,

    /// Source acquisition settings
    pub download: DownloadConfig,

    /// Environment doctor settings
    pub doctor: DoctorConfig,

    /// Toolchain preferences
    pub toolchain: ToolchainSettings,
}

/// Directory layout for sources, prebuilt packages and builds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source_dir: Option<PathBuf>,
    pub pkg_root: Option<PathBuf>,
    pub build_root: Option<PathBuf>,
}

/// Source acquisition settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Extra attempts after a transient fetch failure
    pub retry: Option<u32>,

    /// Number of packages fetched concurrently
    pub parallel: Option<usize>,

    /// Skip pre-releases when picking GitHub releases
    pub prefer_stable: Option<bool>,

    /// Default runtime version for `php-release` sources
    pub php_version: Option<String>,

    /// Initial delay between retries, doubled after each attempt
    pub backoff_ms: Option<u64>,
}

impl DownloadConfig {
    pub fn retry(&self) -> u32 {
        self.retry.unwrap_or(2)
    }

    pub fn parallel(&self) -> usize {
        self.parallel.unwrap_or(1).max(1)
    }

    pub fn prefer_stable(&self) -> bool {
        self.prefer_stable.unwrap_or(true)
    }

    pub fn php_version(&self) -> &str {
        self.php_version.as_deref().unwrap_or("8.4")
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.unwrap_or(500))
    }
}

/// Environment doctor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    /// Check names that are never run
    pub skip: Vec<String>,

    /// Run paired fixes for failing checks without asking
    pub auto_fix: Option<bool>,

    /// Evaluate checks concurrently
    pub parallel: Option<bool>,
}

/// Toolchain preferences used by probes and doctor gating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSettings {
    /// C compiler (e.g., /usr/bin/gcc or x86_64-linux-musl-gcc)
    pub cc: Option<String>,

    /// C++ compiler
    pub cxx: Option<String>,

    /// Target architecture for cross builds (e.g., aarch64)
    pub target_arch: Option<String>,

    /// Requested libc flavor: `musl` or `glibc`
    pub libc: Option<String>,
}

impl ToolchainSettings {
    pub fn wants_musl(&self) -> bool {
        self.libc
            .as_deref()
            .is_some_and(|libc| libc.eq_ignore_ascii_case("musl"))
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        let paths = other.paths;
        merge_opt(&mut self.paths.source_dir, paths.source_dir);
        merge_opt(&mut self.paths.pkg_root, paths.pkg_root);
        merge_opt(&mut self.paths.build_root, paths.build_root);

        let download = other.download;
        merge_opt(&mut self.download.retry, download.retry);
        merge_opt(&mut self.download.parallel, download.parallel);
        merge_opt(&mut self.download.prefer_stable, download.prefer_stable);
        merge_opt(&mut self.download.php_version, download.php_version);
        merge_opt(&mut self.download.backoff_ms, download.backoff_ms);

        if !other.doctor.skip.is_empty() {
            self.doctor.skip = other.doctor.skip;
        }
        merge_opt(&mut self.doctor.auto_fix, other.doctor.auto_fix);
        merge_opt(&mut self.doctor.parallel, other.doctor.parallel);

        let toolchain = other.toolchain;
        merge_opt(&mut self.toolchain.cc, toolchain.cc);
        merge_opt(&mut self.toolchain.cxx, toolchain.cxx);
        merge_opt(&mut self.toolchain.target_arch, toolchain.target_arch);
        merge_opt(&mut self.toolchain.libc, toolchain.libc);
    }

    /// Apply environment overrides: extra doctor skips and `CC`.
    pub fn apply_env(&mut self) {
        if let Ok(skip) = std::env::var(SKIP_DOCTOR_CHECKS_ENV) {
            self.doctor.skip.extend(parse_name_list(&skip));
        }
        if self.toolchain.cc.is_none() {
            if let Ok(cc) = std::env::var("CC") {
                if !cc.trim().is_empty() {
                    self.toolchain.cc = Some(cc);
                }
            }
        }
    }

    /// Check names the doctor must not run.
    pub fn doctor_skip_set(&self) -> BTreeSet<String> {
        self.doctor.skip.iter().cloned().collect()
    }

    /// GitHub API token from the environment, if any.
    pub fn github_token(&self) -> Option<String> {
        std::env::var(GITHUB_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    /// Where source trees are materialized.
    pub fn source_dir(&self, base: &Path) -> PathBuf {
        resolve_dir(&self.paths.source_dir, base, "source")
    }

    /// Where prebuilt packages are unpacked.
    pub fn pkg_root(&self, base: &Path) -> PathBuf {
        resolve_dir(&self.paths.pkg_root, base, "pkgroot")
    }

    /// Where builds run and patch scripts start.
    pub fn build_root(&self, base: &Path) -> PathBuf {
        resolve_dir(&self.paths.build_root, base, "buildroot")
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn resolve_dir(configured: &Option<PathBuf>, base: &Path, default: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => base.join(path),
        None => base.join(default),
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.statica/config.toml)
/// 2. Global config (~/.statica/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the global config directory (~/.statica).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".statica"))
}

/// Get the project config path (.statica/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".statica").join("config.toml")
}

/// Load configuration for `project_root`, including environment overrides.
pub fn load_for_project(project_root: &Path) -> Config {
    let global = global_config_dir()
        .map(|dir| dir.join("config.toml"))
        .unwrap_or_default();
    let mut config = load_config(&global, &project_config_path(project_root));
    config.apply_env();
    config
}
