//! macOS build prerequisites, installed through Homebrew.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::doctor::checks::DoctorHost;
use crate::doctor::{CheckDecl, CheckOutcome, CheckRegistry};
use crate::toolchain::OsFamily;
use crate::util::process::{shell_quote, CommandRunner};

pub const BREW_CHECK: &str = "if homebrew has installed";
pub const TOOLS_CHECK: &str = "if necessary tools are installed";
pub const INSTALL_TOOLS_FIX: &str = "install-brew-tools";

const APPLE_SILICON_BREW: &str = "/opt/homebrew/bin/brew";

const BREW_GUIDANCE: &str = "Install Homebrew with: /bin/bash -c \"$(curl -fsSL https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh)\"";

pub const REQUIRED_COMMANDS: &[&str] = &[
    "curl", "make", "bison", "flex", "pkg-config", "git", "autoconf", "automake", "tar", "libtool",
    "unzip", "xz", "gzip", "bzip2", "cmake", "glibtoolize",
];

/// Homebrew formula providing `command`.
fn formula_for(command: &str) -> &str {
    match command {
        "glibtoolize" => "libtool",
        other => other,
    }
}

fn check_brew<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let Some(brew) = host.probe.find_command("brew") else {
        return Ok(CheckOutcome::fail("Homebrew is not installed"));
    };
    let native = host.probe.host_path(APPLE_SILICON_BREW);
    if host.probe.arch() == "aarch64" && brew != native && brew != Path::new(APPLE_SILICON_BREW) {
        return Ok(CheckOutcome::fail(format!(
            "Homebrew at {} is not the Apple Silicon installation, reinstall it under /opt/homebrew",
            brew.display()
        )));
    }
    Ok(CheckOutcome::pass_with(brew.display().to_string()))
}

fn check_tools<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let missing: Vec<String> = REQUIRED_COMMANDS
        .iter()
        .filter(|cmd| host.probe.find_command(cmd).is_none())
        .map(|cmd| cmd.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(CheckOutcome::pass());
    }
    Ok(CheckOutcome::fail_with_args(
        format!("missing system commands: {}", missing.join(", ")),
        missing,
    ))
}

fn install_tools<R: CommandRunner>(host: &DoctorHost<R>, commands: &[String]) -> Result<()> {
    for command in commands {
        let formula = formula_for(command);
        tracing::info!("Installing {} with Homebrew", formula);
        host.run_checked(&format!("brew install --formula {}", shell_quote(formula)))?;
    }
    Ok(())
}

pub fn register<R>(registry: &mut CheckRegistry, host: Arc<DoctorHost<R>>) -> Result<()>
where
    R: CommandRunner + 'static,
{
    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(BREW_CHECK)
            .limit_os(OsFamily::Darwin)
            .level(2)
            .manual()
            .guidance(BREW_GUIDANCE),
        move || check_brew(&h),
    );

    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(TOOLS_CHECK)
            .limit_os(OsFamily::Darwin)
            .level(3)
            .fix(INSTALL_TOOLS_FIX),
        move || check_tools(&h),
    );

    registry.fix(INSTALL_TOOLS_FIX, move |commands| install_tools(&host, commands))?;
    Ok(())
}
