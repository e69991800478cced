//! musl toolchain checks for glibc hosts building musl binaries.
//!
//! Both checks belong to an optional group that is only enabled when the
//! toolchain asks for musl and the host libc is not already musl.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::doctor::checks::{DoctorHost, MUSL_PREFIX};
use crate::doctor::{CheckDecl, CheckOutcome, CheckRegistry};
use crate::sources::DownloadSpec;
use crate::toolchain::{arch_to_gnu, OsFamily};
use crate::util::fs::remove_dir_all_if_exists;
use crate::util::process::{shell_quote, sudo_prefix, CommandRunner};

pub const WRAPPER_CHECK: &str = "if musl-wrapper is installed";
pub const CROSS_MAKE_CHECK: &str = "if musl-cross-make is installed";
pub const WRAPPER_FIX: &str = "fix-musl-wrapper";
pub const CROSS_MAKE_FIX: &str = "fix-musl-cross-make";

pub const MUSL_SOURCE_URL: &str = "https://musl.libc.org/releases/musl-1.2.5.tar.gz";

/// Compiler environment used to build the musl wrapper with the host gcc.
const WRAPPER_BUILD_ENV: &[(&str, &str)] = &[("CC", "gcc"), ("CXX", "g++"), ("AR", "ar"), ("LD", "ld")];

fn check_wrapper<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let loader = format!("/lib/ld-musl-{}.so.1", host.probe.arch());
    let libc = format!("{}/lib/libc.a", MUSL_PREFIX);
    let missing: Vec<&str> = [loader.as_str(), libc.as_str()]
        .into_iter()
        .filter(|path| !host.probe.host_path(path).exists())
        .collect();
    if missing.is_empty() {
        Ok(CheckOutcome::pass())
    } else {
        Ok(CheckOutcome::fail(format!(
            "musl-wrapper is not installed ({} missing)",
            missing.join(", ")
        )))
    }
}

fn check_cross_make<R: CommandRunner>(host: &DoctorHost<R>) -> Result<CheckOutcome> {
    let gnu = arch_to_gnu(host.probe.arch())?;
    let libc = format!("{}/{}-linux-musl/lib/libc.a", MUSL_PREFIX, gnu);
    let gcc = format!("{}/bin/{}-linux-musl-gcc", MUSL_PREFIX, gnu);
    if host.probe.host_path(&libc).exists() && host.probe.host_path(&gcc).exists() {
        Ok(CheckOutcome::pass_with(format!("{}-linux-musl", gnu)))
    } else {
        Ok(CheckOutcome::fail("musl-cross-make is not installed"))
    }
}

fn fix_wrapper<R: CommandRunner>(host: &DoctorHost<R>) -> Result<()> {
    let spec = DownloadSpec::new("url").with_option("url", MUSL_SOURCE_URL);
    let source = host.acquire("musl-wrapper", &spec, &host.source_dir.join("musl-wrapper"))?;

    let env: Vec<(String, String)> = WRAPPER_BUILD_ENV
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let sudo = sudo_prefix(host.runner());
    let steps = [
        "./configure --disable-gcc-wrapper".to_string(),
        format!("make -j{}", host.probe.cpu_count()),
        format!("{}make install", sudo),
    ];
    for step in &steps {
        tracing::info!("musl-wrapper: {}", step);
        let out = host.runner().run_in(step, Some(&source.path), &env)?;
        if !out.success() {
            bail!("`{}` failed with exit code {}", step, out.code);
        }
    }
    Ok(())
}

fn fix_cross_make<R: CommandRunner>(host: &DoctorHost<R>) -> Result<()> {
    let dest = host.pkg_root.join("musl-toolchain");
    let spec = DownloadSpec::new("hosted").with_option("name", "musl-toolchain");
    let toolchain = host.acquire("musl-toolchain", &spec, &dest)?;

    let sudo = sudo_prefix(host.runner());
    host.run_checked(&format!("{}mkdir -p {}", sudo, MUSL_PREFIX))?;
    host.run_checked(&format!(
        "{}cp -rf {}/* {}",
        sudo,
        shell_quote(&toolchain.path.to_string_lossy()),
        MUSL_PREFIX
    ))?;
    remove_dir_all_if_exists(&toolchain.path)?;
    Ok(())
}

pub fn register<R>(registry: &mut CheckRegistry, host: Arc<DoctorHost<R>>) -> Result<()>
where
    R: CommandRunner + 'static,
{
    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(WRAPPER_CHECK)
            .limit_os(OsFamily::Linux)
            .level(200)
            .fix(WRAPPER_FIX),
        move || check_wrapper(&h),
    );
    let h = Arc::clone(&host);
    registry.check(
        CheckDecl::new(CROSS_MAKE_CHECK)
            .limit_os(OsFamily::Linux)
            .level(201)
            .fix(CROSS_MAKE_FIX),
        move || check_cross_make(&h),
    );

    let h = Arc::clone(&host);
    registry.optional(&[WRAPPER_CHECK, CROSS_MAKE_CHECK], move || {
        h.toolchain.wants_musl() && !h.probe.is_musl_dist()
    });

    let h = Arc::clone(&host);
    registry.fix(WRAPPER_FIX, move |_| fix_wrapper(&h))?;
    registry.fix(CROSS_MAKE_FIX, move |_| fix_cross_make(&host))?;
    Ok(())
}
