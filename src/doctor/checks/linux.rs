//! Linux build prerequisites.

use std::sync::{Arc, OnceLock};

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::doctor::checks::DoctorHost;
use crate::doctor::{CheckDecl, CheckOutcome, CheckRegistry};
use crate::toolchain::{install_command, OsFamily, OsRelease};
use crate::util::pattern::version_at_least;
use crate::util::process::{shell_quote, sudo_prefix, CommandRunner};

pub const TOOLS_CHECK: &str = "if necessary tools are installed";
pub const CMAKE_CHECK: &str = "if cmake version >= 3.18";
pub const HEADERS_CHECK: &str = "if necessary linux headers are installed";
pub const INSTALL_TOOLS_FIX: &str = "install-linux-tools";

const MIN_CMAKE: &str = "3.18";

pub const TOOLS_ALPINE: &[&str] = &[
    "make", "bison", "re2c", "flex", "git", "autoconf", "automake", "gettext-dev", "tar", "unzip",
    "gzip", "bzip2", "cmake", "gcc", "g++", "patch", "binutils-gold", "libtoolize", "which",
    "patchelf",
];

pub const TOOLS_DEBIAN: &[&str] = &[
    "make", "bison", "re2c", "flex", "git", "autoconf", "automake", "autopoint", "tar", "unzip",
    "gzip", "bzip2", "cmake", "patch", "xz", "libtoolize", "which", "patchelf",
];

pub const TOOLS_RHEL: &[&str] = &[
    "perl", "make", "bison", "re2c", "flex", "git", "autoconf", "automake", "tar", "unzip", "gzip",
    "gcc", "bzip2", "cmake", "patch", "which", "xz", "libtool", "gettext-devel", "patchelf",
];

pub const TOOLS_ARCH: &[&str] = &["base-devel", "cmake"];

/// Packages required on `dist`. Unknown distros get the Debian list.
pub fn required_tools(dist: &str) -> &'static [&'static str] {
    match dist {
        "alpine" => TOOLS_ALPINE,
        "redhat" => TOOLS_RHEL,
        "arch" => TOOLS_ARCH,
        _ => TOOLS_DEBIAN,
    }
}

/// What proves a package is installed: a command, or an absolute file path.
fn provided_by(package: &str) -> &str {
    match package {
        "perl" => "/usr/share/perl5/FindBin.pm",
        "binutils-gold" => "ld.gold",
        "base-devel" => "automake",
        "gettext-devel" | "gettext-dev" => "gettextize",
        "perl-IPC-Cmd" => "/usr/share/doc/perl-IPC-Cmd",
        other => other,
    }
}

/// Required packages for `dist` that are not present on the host.
pub fn missing_tools<R: CommandRunner>(host: &DoctorHost<R>, dist: &str) -> Vec<String> {
    required_tools(dist)
        .iter()
        .filter(|package| host.probe.find_command(provided_by(package)).is_none())
        .map(|package| package.to_string())
        .collect()
}

/// Translate tool names into package names for `release`'s package manager.
pub fn install_packages(release: &OsRelease, tools: &[String]) -> Vec<String> {
    tools
        .iter()
        .map(|tool| match tool.as_str() {
            "xz" if release.is_debian_like() => "xz-utils".to_string(),
            "libtoolize" => "libtool".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// Parse the version out of `cmake --version` output.
pub fn parse_cmake_version(line: &str) -> Option<String> {
    static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VERSION
        .get_or_init(|| Regex::new(r"cmake version (\d+(?:\.\d+)*)").ok())
        .as_ref()?;
    re.captures(line).map(|caps| caps[1].to_string())
}

fn check_tools<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let dist = host
        .probe
        .os_release()
        .map(|release| release.dist)
        .unwrap_or_else(|| "unknown".to_string());
    let missing = missing_tools(host, &dist);
    if missing.is_empty() {
        return Ok(CheckOutcome::pass_with(dist));
    }
    Ok(CheckOutcome::fail_with_args(
        format!("{} not installed on your system", missing.join(", ")),
        missing,
    ))
}

fn check_cmake<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let version = host
        .runner()
        .run("cmake --version")
        .ok()
        .filter(|out| out.success())
        .and_then(|out| parse_cmake_version(&out.first_line));
    let Some(version) = version else {
        return Ok(CheckOutcome::fail("Failed to get cmake version"));
    };
    if version_at_least(&version, MIN_CMAKE) {
        Ok(CheckOutcome::pass_with(version))
    } else {
        Ok(CheckOutcome::fail(format!(
            "cmake version is too low ({}), please update it manually",
            version
        )))
    }
}

fn check_headers<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    if !host.probe.is_musl_dist() {
        return Ok(CheckOutcome::skip("only needed on musl distros"));
    }
    if host.probe.host_path("/usr/include/linux/mman.h").exists() {
        Ok(CheckOutcome::pass())
    } else {
        Ok(CheckOutcome::fail_with_args(
            "linux-headers not installed on your system",
            vec!["linux-headers".to_string()],
        ))
    }
}

fn install_tools<R: CommandRunner>(host: &DoctorHost<R>, tools: &[String]) -> Result<()> {
    if tools.is_empty() {
        return Ok(());
    }
    let release = host
        .probe
        .os_release()
        .context("cannot identify the Linux distribution")?;
    let Some(install) = install_command(&release.dist) else {
        bail!(
            "automatic installation is not supported on {}, install {} manually",
            release.dist,
            tools.join(", ")
        );
    };

    let packages = install_packages(&release, tools)
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ");
    let cmd = format!("{}{} {}", sudo_prefix(host.runner()), install, packages);
    tracing::info!("Installing packages: {}", cmd);
    host.run_checked(&cmd)
}

pub fn register<R>(registry: &mut CheckRegistry, host: Arc<DoctorHost<R>>) -> Result<()>
where
    R: CommandRunner + 'static,
{
    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(TOOLS_CHECK)
            .limit_os(OsFamily::Linux)
            .level(1)
            .fix(INSTALL_TOOLS_FIX),
        move || check_tools(&h),
    );

    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(CMAKE_CHECK)
            .limit_os(OsFamily::Linux)
            .guidance("Install cmake 3.18 or newer from https://cmake.org/download/"),
        move || check_cmake(&h),
    );

    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(HEADERS_CHECK)
            .limit_os(OsFamily::Linux)
            .fix(INSTALL_TOOLS_FIX),
        move || check_headers(&h),
    );

    registry.fix(INSTALL_TOOLS_FIX, move |tools| install_tools(&host, tools))?;
    Ok(())
}
