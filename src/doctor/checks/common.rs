//! Checks shared by every Unix host: re2c and pkg-config.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::{bail, Result};
use regex::Regex;

use crate::doctor::checks::DoctorHost;
use crate::doctor::{CheckDecl, CheckOutcome, CheckRegistry};
use crate::sources::DownloadSpec;
use crate::toolchain::OsFamily;
use crate::util::pattern::version_at_least;
use crate::util::process::{shell_quote, CommandRunner};

pub const RE2C_CHECK: &str = "if re2c version >= 1.0.3";
pub const PKG_CONFIG_CHECK: &str = "if pkg-config is installed or built";
pub const PKG_CONFIG_FUNCTIONAL_CHECK: &str = "if pkg-config is functional";
pub const INSTALL_PKG_CONFIG_FIX: &str = "install-pkg-config";

const MIN_RE2C: &str = "1.0.3";

/// Parse the version out of `re2c --version` output.
pub fn parse_re2c_version(line: &str) -> Option<String> {
    static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VERSION
        .get_or_init(|| Regex::new(r"re2c\s+(\d+\.\d+(?:\.\d+)?)").ok())
        .as_ref()?;
    re.captures(line).map(|caps| caps[1].to_string())
}

fn check_re2c<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let version = host
        .runner()
        .run("re2c --version")
        .ok()
        .filter(|out| out.success())
        .and_then(|out| parse_re2c_version(&out.first_line));
    match version {
        None => Ok(CheckOutcome::fail("Failed to get re2c version")),
        Some(v) if !version_at_least(&v, MIN_RE2C) => Ok(CheckOutcome::fail(format!(
            "re2c version is too low ({})",
            v
        ))),
        Some(v) => Ok(CheckOutcome::pass_with(v)),
    }
}

/// The pkg-config binary to use: a built one under the package root first,
/// then one on `PATH`.
pub fn find_pkg_config<R: CommandRunner>(host: &DoctorHost<R>) -> Option<PathBuf> {
    let built = host.pkg_root.join("pkg-config").join("bin").join("pkg-config");
    if built.is_file() {
        return Some(built);
    }
    host.probe.find_command("pkg-config")
}

fn check_pkg_config<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    match find_pkg_config(host) {
        Some(path) => Ok(CheckOutcome::pass_with(path.display().to_string())),
        None => Ok(CheckOutcome::fail("pkg-config is not installed")),
    }
}

fn check_pkg_config_functional<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let Some(path) = find_pkg_config(host) else {
        return Ok(CheckOutcome::fail("pkg-config is not installed"));
    };
    let cmd = format!("{} --version", shell_quote(&path.to_string_lossy()));
    match host.runner().run(&cmd) {
        Ok(out) if out.success() => Ok(CheckOutcome::pass_with(out.first_line)),
        Ok(out) => Ok(CheckOutcome::fail(format!(
            "pkg-config is not functional (exit code {})",
            out.code
        ))),
        Err(e) => Ok(CheckOutcome::fail(format!("pkg-config is not functional: {:#}", e))),
    }
}

fn install_pkg_config<R: CommandRunner>(host: &DoctorHost<R>) -> Result<()> {
    let dest = host.pkg_root.join("pkg-config");
    let spec = DownloadSpec::new("hosted").with_option("name", "pkg-config");
    let acquired = host.acquire("pkg-config", &spec, &dest)?;
    tracing::info!("pkg-config installed at {}", acquired.path.display());
    if find_pkg_config(host).is_none() {
        bail!("pkg-config package at {} has no bin/pkg-config", dest.display());
    }
    Ok(())
}

pub fn register<R>(registry: &mut CheckRegistry, host: Arc<DoctorHost<R>>) -> Result<()>
where
    R: CommandRunner + 'static,
{
    let h = Arc::clone(&host);
    registry.check_each(
        vec![
            CheckDecl::new(RE2C_CHECK)
                .limit_os(OsFamily::Linux)
                .level(900)
                .guidance("Install re2c 1.0.3 or newer with your package manager"),
            CheckDecl::new(RE2C_CHECK)
                .limit_os(OsFamily::Darwin)
                .level(900)
                .guidance("Install re2c 1.0.3 or newer with: brew install re2c"),
        ],
        move || check_re2c(&h),
    );

    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(PKG_CONFIG_CHECK)
            .level(210)
            .fix(INSTALL_PKG_CONFIG_FIX),
        move || check_pkg_config(&h),
    );
    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(PKG_CONFIG_FUNCTIONAL_CHECK)
            .level(211)
            .fix(INSTALL_PKG_CONFIG_FIX),
        move || check_pkg_config_functional(&h),
    );

    let h = Arc::clone(&host);
    registry.optional(&[PKG_CONFIG_CHECK, PKG_CONFIG_FUNCTIONAL_CHECK], move || {
        h.probe.os() != OsFamily::Windows
    });

    registry.fix(INSTALL_PKG_CONFIG_FIX, move |_| install_pkg_config(&host))?;
    Ok(())
}
