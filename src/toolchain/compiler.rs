//! Compiler-name classification and target flag derivation.
//!
//! Everything here is a pure function of its arguments.

use std::fmt;
use std::path::Path;

use anyhow::{bail, Result};
use serde::Serialize;

/// Compiler family as inferred from the binary name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerType {
    Gcc,
    Clang,
    Unknown,
}

impl fmt::Display for CompilerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompilerType::Gcc => "gcc",
            CompilerType::Clang => "clang",
            CompilerType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// File name of `cc` with a trailing `-<version>` removed (`gcc-13` -> `gcc`).
fn compiler_stem(cc: &str) -> String {
    let name = Path::new(cc)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cc.to_string());
    let name = name.strip_suffix(".exe").unwrap_or(&name).to_string();

    match name.rsplit_once('-') {
        Some((head, tail))
            if !head.is_empty()
                && !tail.is_empty()
                && tail.chars().all(|c| c.is_ascii_digit() || c == '.') =>
        {
            head.to_string()
        }
        _ => name,
    }
}

/// Classify a compiler binary name. Cross prefixes are tolerated:
/// `x86_64-linux-musl-gcc` is gcc, `musl-clang` is clang.
pub fn cc_type(cc: &str) -> CompilerType {
    let stem = compiler_stem(cc);
    if stem.ends_with("clang") || stem.ends_with("clang++") || stem.starts_with("musl-clang") {
        CompilerType::Clang
    } else if ["gcc", "g++", "cc", "c++"]
        .iter()
        .any(|suffix| stem.ends_with(suffix))
    {
        CompilerType::Gcc
    } else {
        CompilerType::Unknown
    }
}

/// Normalize an architecture name to its GNU spelling.
pub fn arch_to_gnu(arch: &str) -> Result<&'static str> {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" | "x64" => Ok("x86_64"),
        "aarch64" | "arm64" => Ok("aarch64"),
        other => bail!("unsupported architecture: {}", other),
    }
}

/// Derive the `<arch>-<os>-` prefix used to locate cross binutils.
///
/// A gcc with its own prefix (`aarch64-linux-musl-gcc`) yields that prefix;
/// clang and unprefixed gcc fall back to `<arch>-linux-gnu-`.
pub fn cross_compile_prefix(cc: &str, target_arch: &str) -> Result<String> {
    match cc_type(cc) {
        CompilerType::Clang => Ok(format!("{}-linux-gnu-", arch_to_gnu(target_arch)?)),
        CompilerType::Gcc => {
            let stem = compiler_stem(cc);
            for suffix in ["-gcc", "-g++", "-cc", "-c++"] {
                if let Some(prefix) = stem.strip_suffix(suffix) {
                    if !prefix.is_empty() {
                        return Ok(format!("{}-", prefix));
                    }
                }
            }
            Ok(format!("{}-linux-gnu-", arch_to_gnu(target_arch)?))
        }
        CompilerType::Unknown => {
            bail!("cannot derive a cross-compile prefix from compiler `{}`", cc)
        }
    }
}

/// Target flag for Apple clang.
pub fn arch_cflags(arch: &str) -> Result<&'static str> {
    match arch_to_gnu(arch)? {
        "x86_64" => Ok("--target=x86_64-apple-darwin"),
        _ => Ok("--target=arm64-apple-darwin"),
    }
}

/// Target flag for a Linux cross build, empty for native builds and for gcc
/// (which selects its target through the binary prefix instead).
pub fn linux_arch_cflags(cc: &str, target_arch: &str, host_arch: &str) -> Result<String> {
    let target = arch_to_gnu(target_arch)?;
    if arch_to_gnu(host_arch).ok() == Some(target) {
        return Ok(String::new());
    }
    match cc_type(cc) {
        CompilerType::Clang => match target {
            "aarch64" => Ok("--target=arm64-unknown-linux".to_string()),
            _ => Ok(format!("--target={}-unknown-linux", target)),
        },
        CompilerType::Gcc => Ok(String::new()),
        CompilerType::Unknown => bail!("unknown compiler `{}` for cross build", cc),
    }
}
