//! Host introspection.
//!
//! [`SystemProbe`] reads the host filesystem (relative to a configurable
//! root, `/` in production) and runs probes through a [`CommandRunner`].
//! Nothing is cached: every call re-reads current host state.

use std::path::{Path, PathBuf};

use crate::toolchain::distro::{parse_os_release, parse_redhat_release, OsRelease};
use crate::toolchain::OsFamily;
use crate::util::process::{shell_quote, CommandRunner, ShellRunner};

/// Colon-separated library directories searched before the defaults.
pub const LIBPATH_ENV: &str = "LIBPATH";

/// Colon-separated include directories searched before the defaults.
pub const INCLUDEPATH_ENV: &str = "INCLUDEPATH";

/// Stateless view of a host system.
#[derive(Debug, Clone)]
pub struct SystemProbe<R = ShellRunner> {
    root: PathBuf,
    runner: R,
    os: OsFamily,
    arch: String,
    lib_paths: Option<Vec<PathBuf>>,
    include_paths: Option<Vec<PathBuf>>,
    command_paths: Option<Vec<PathBuf>>,
}

impl SystemProbe<ShellRunner> {
    /// Probe for the machine this process runs on.
    pub fn host() -> Self {
        SystemProbe::new("/", ShellRunner)
    }
}

impl<R: CommandRunner> SystemProbe<R> {
    pub fn new(root: impl Into<PathBuf>, runner: R) -> Self {
        SystemProbe {
            root: root.into(),
            runner,
            os: OsFamily::current(),
            arch: std::env::consts::ARCH.to_string(),
            lib_paths: None,
            include_paths: None,
            command_paths: None,
        }
    }

    pub fn with_os(mut self, os: OsFamily) -> Self {
        self.os = os;
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Replace the library search list entirely.
    pub fn with_lib_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.lib_paths = Some(paths);
        self
    }

    /// Replace the include search list entirely.
    pub fn with_include_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.include_paths = Some(paths);
        self
    }

    /// Search these directories for commands instead of `PATH`.
    pub fn with_command_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.command_paths = Some(paths);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn os(&self) -> OsFamily {
        self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Map an absolute host path under the probe root.
    pub fn host_path(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }

    /// Identify the Linux distribution; `None` when no source is readable.
    pub fn os_release(&self) -> Option<OsRelease> {
        if let Ok(content) = std::fs::read_to_string(self.host_path("/etc/os-release")) {
            return parse_os_release(&content);
        }
        ["/etc/centos-release", "/etc/redhat-release"]
            .iter()
            .find_map(|file| std::fs::read_to_string(self.host_path(file)).ok())
            .and_then(|content| parse_redhat_release(&content))
    }

    /// True on Alpine and on any other host whose libc is musl.
    pub fn is_musl_dist(&self) -> bool {
        let alpine = self
            .os_release()
            .is_some_and(|release| release.dist == "alpine");
        alpine || self.libc_is_musl()
    }

    /// Identify musl by its dynamic loader, falling back to `ldd --version`.
    pub fn libc_is_musl(&self) -> bool {
        if self.os != OsFamily::Linux {
            return false;
        }
        let pattern = self.host_path("/lib/ld-musl-*.so.1");
        let loader_present = glob::glob(&pattern.to_string_lossy())
            .map(|mut paths| paths.any(|p| p.is_ok()))
            .unwrap_or(false);
        if loader_present {
            return true;
        }

        match self.runner.run("ldd --version 2>&1") {
            Ok(out) => out
                .lines
                .iter()
                .any(|line| line.to_ascii_lowercase().contains("musl")),
            Err(e) => {
                tracing::debug!("libc probe failed: {:#}", e);
                false
            }
        }
    }

    /// Library directories in search order.
    pub fn lib_search_dirs(&self) -> Vec<PathBuf> {
        if let Some(ref paths) = self.lib_paths {
            return paths.clone();
        }
        let mut dirs = env_paths(LIBPATH_ENV);
        let gnu = crate::toolchain::arch_to_gnu(&self.arch).unwrap_or("x86_64");
        for dir in [
            "/lib".to_string(),
            "/lib64".to_string(),
            "/usr/lib".to_string(),
            "/usr/lib64".to_string(),
            "/usr/local/lib".to_string(),
            "/usr/local/lib64".to_string(),
            format!("/usr/lib/{}-linux-gnu", gnu),
            format!("/usr/lib/{}-linux-musl", gnu),
        ] {
            dirs.push(self.host_path(&dir));
        }
        dirs
    }

    /// Include directories in search order.
    pub fn include_search_dirs(&self) -> Vec<PathBuf> {
        if let Some(ref paths) = self.include_paths {
            return paths.clone();
        }
        let mut dirs = env_paths(INCLUDEPATH_ENV);
        let gnu = crate::toolchain::arch_to_gnu(&self.arch).unwrap_or("x86_64");
        for dir in [
            "/usr/include".to_string(),
            "/usr/local/include".to_string(),
            format!("/usr/include/{}-linux-gnu", gnu),
        ] {
            dirs.push(self.host_path(&dir));
        }
        dirs
    }

    /// Every location of a static library. `z`, `libz` and `libz.a` are
    /// equivalent names.
    pub fn find_static_lib(&self, name: &str) -> Vec<PathBuf> {
        let file = static_lib_file_name(name);
        find_in(&self.lib_search_dirs(), &file, Path::is_file)
    }

    /// [`find_static_lib`](Self::find_static_lib) for several names, in input order.
    pub fn find_static_libs(&self, names: &[&str]) -> Vec<(String, Vec<PathBuf>)> {
        names
            .iter()
            .map(|name| (name.to_string(), self.find_static_lib(name)))
            .collect()
    }

    /// Every location of a header file or header directory.
    pub fn find_header(&self, name: &str) -> Vec<PathBuf> {
        find_in(&self.include_search_dirs(), name, Path::exists)
    }

    /// [`find_header`](Self::find_header) for several names, in input order.
    pub fn find_headers(&self, names: &[&str]) -> Vec<(String, Vec<PathBuf>)> {
        names
            .iter()
            .map(|name| (name.to_string(), self.find_header(name)))
            .collect()
    }

    /// Logical CPU count, at least 1.
    pub fn cpu_count(&self) -> usize {
        let detected = match self.os {
            OsFamily::Linux => std::fs::read_to_string(self.host_path("/proc/cpuinfo"))
                .ok()
                .map(|info| {
                    info.lines()
                        .filter(|line| line.starts_with("processor"))
                        .count()
                }),
            OsFamily::Darwin | OsFamily::Bsd => self
                .runner
                .run("sysctl -n hw.ncpu")
                .ok()
                .filter(|out| out.success())
                .and_then(|out| out.first_line.trim().parse::<usize>().ok()),
            OsFamily::Windows => None,
        };

        detected
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }

    /// Locate a command. Absolute names are checked under the probe root.
    pub fn find_command(&self, name: &str) -> Option<PathBuf> {
        if name.starts_with('/') {
            let path = self.host_path(name);
            return path.exists().then_some(path);
        }
        match self.command_paths {
            Some(ref dirs) => {
                let joined = std::env::join_paths(dirs).ok()?;
                which::which_in(name, Some(joined), &self.root).ok()
            }
            None => which::which(name).ok(),
        }
    }

    /// Whether `cc` accepts `flag` when compiling an empty translation unit.
    pub fn check_cc_flag(&self, flag: &str, cc: &str) -> bool {
        let cmd = format!(
            "echo | {} -E -x c - {} >/dev/null 2>&1",
            shell_quote(cc),
            shell_quote(flag)
        );
        self.runner.run(&cmd).map(|out| out.success()).unwrap_or(false)
    }
}

fn static_lib_file_name(name: &str) -> String {
    if name.ends_with(".a") {
        name.to_string()
    } else if name.starts_with("lib") {
        format!("{}.a", name)
    } else {
        format!("lib{}.a", name)
    }
}

fn env_paths(var: &str) -> Vec<PathBuf> {
    std::env::var_os(var)
        .map(|value| {
            std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn find_in(dirs: &[PathBuf], name: &str, accept: fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        let candidate = dir.join(name);
        if accept(&candidate) && !found.contains(&candidate) {
            found.push(candidate);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeHost, MockRunner};
    use crate::util::process::CommandOutput;

    #[test]
    fn test_os_release_from_fake_root() {
        let host = FakeHost::new().os_release("ID=alpine\nVERSION_ID=3.19.0\n");
        let probe = host.probe(MockRunner::new());
        let release = probe.os_release().unwrap();
        assert_eq!(release.dist, "alpine");
        assert_eq!(release.ver, "3.19.0");
    }

    #[test]
    fn test_os_release_absent_is_none() {
        let host = FakeHost::new();
        assert!(host.probe(MockRunner::new()).os_release().is_none());
    }

    #[test]
    fn test_os_release_redhat_fallback() {
        let host = FakeHost::new().file(
            "etc/redhat-release",
            "Red Hat Enterprise Linux release 9.3 (Plow)\n",
        );
        let release = host.probe(MockRunner::new()).os_release().unwrap();
        assert_eq!(release, OsRelease::new("redhat", "9.3"));
    }

    #[test]
    fn test_alpine_is_musl() {
        let host = FakeHost::new().os_release("ID=alpine\n");
        let probe = host.probe(MockRunner::new()).with_os(OsFamily::Linux);
        assert!(probe.is_musl_dist());
    }

    #[test]
    fn test_non_alpine_musl_detected_by_loader() {
        let host = FakeHost::new()
            .os_release("ID=void\n")
            .file("lib/ld-musl-x86_64.so.1", "");
        let probe = host.probe(MockRunner::new()).with_os(OsFamily::Linux);
        assert_eq!(probe.os_release().unwrap().dist, "void");
        assert!(probe.is_musl_dist());
    }

    #[test]
    fn test_non_alpine_musl_detected_by_ldd() {
        let host = FakeHost::new().os_release("ID=chimera\n");
        let runner = MockRunner::new();
        runner.expect(
            "ldd --version 2>&1",
            CommandOutput::from_stdout("musl libc (x86_64)\nVersion 1.2.5\n", 1),
        );
        let probe = host.probe(runner).with_os(OsFamily::Linux);
        assert!(probe.is_musl_dist());
    }

    #[test]
    fn test_glibc_host_is_not_musl() {
        let host = FakeHost::new().os_release("ID=debian\nVERSION_ID=\"12\"\n");
        let runner = MockRunner::new();
        runner.expect(
            "ldd --version 2>&1",
            CommandOutput::from_stdout("ldd (Debian GLIBC 2.36-9) 2.36\n", 0),
        );
        let probe = host.probe(runner).with_os(OsFamily::Linux);
        assert!(!probe.is_musl_dist());
    }

    #[test]
    fn test_find_static_lib_present_and_absent() {
        let host = FakeHost::new()
            .file("usr/lib/libz.a", "!<arch>")
            .file("usr/local/lib/libz.a", "!<arch>");
        let probe = host
            .probe(MockRunner::new())
            .with_lib_paths(vec![host.path("usr/lib"), host.path("usr/local/lib")]);

        let found = probe.find_static_lib("z");
        assert_eq!(found.len(), 2);
        assert_eq!(found, probe.find_static_lib("libz.a"));
        assert!(probe.find_static_lib("definitely_absent_lib").is_empty());
    }

    #[test]
    fn test_default_lib_dirs_include_arch_specific() {
        let host = FakeHost::new().file("usr/lib/aarch64-linux-gnu/libssl.a", "");
        let probe = host.probe(MockRunner::new()).with_arch("arm64");
        let found = probe.find_static_lib("ssl");
        assert!(found.contains(&host.path("usr/lib/aarch64-linux-gnu/libssl.a")));
    }

    #[test]
    fn test_find_static_libs_preserves_order() {
        let host = FakeHost::new().file("usr/lib/libbz2.a", "");
        let probe = host
            .probe(MockRunner::new())
            .with_lib_paths(vec![host.path("usr/lib")]);
        let result = probe.find_static_libs(&["zstd", "bz2"]);
        assert_eq!(result[0].0, "zstd");
        assert!(result[0].1.is_empty());
        assert_eq!(result[1].0, "bz2");
        assert_eq!(result[1].1.len(), 1);
    }

    #[test]
    fn test_find_header_file_and_dir() {
        let host = FakeHost::new()
            .file("usr/include/zlib.h", "")
            .file("usr/include/openssl/ssl.h", "");
        let probe = host
            .probe(MockRunner::new())
            .with_include_paths(vec![host.path("usr/include")]);

        assert_eq!(probe.find_header("zlib.h").len(), 1);
        assert_eq!(probe.find_header("openssl").len(), 1);
        let batch = probe.find_headers(&["zlib.h", "missing.h"]);
        assert_eq!(batch[1].1.len(), 0);
    }

    #[test]
    fn test_cpu_count_linux() {
        let host = FakeHost::new().file(
            "proc/cpuinfo",
            "processor\t: 0\nmodel name\t: x\n\nprocessor\t: 1\n\nprocessor\t: 2\n",
        );
        let probe = host.probe(MockRunner::new()).with_os(OsFamily::Linux);
        assert_eq!(probe.cpu_count(), 3);
    }

    #[test]
    fn test_cpu_count_darwin_sysctl() {
        let host = FakeHost::new();
        let runner = MockRunner::new();
        runner.expect("sysctl -n hw.ncpu", CommandOutput::from_stdout("10\n", 0));
        let probe = host.probe(runner).with_os(OsFamily::Darwin);
        assert_eq!(probe.cpu_count(), 10);
    }

    #[test]
    fn test_cpu_count_falls_back() {
        let host = FakeHost::new();
        let probe = host.probe(MockRunner::new()).with_os(OsFamily::Linux);
        assert!(probe.cpu_count() >= 1);
    }

    #[test]
    fn test_find_absolute_command_under_root() {
        let host = FakeHost::new().file("usr/share/perl5/FindBin.pm", "");
        let probe = host.probe(MockRunner::new());
        assert!(probe.find_command("/usr/share/perl5/FindBin.pm").is_some());
        assert!(probe.find_command("/usr/bin/nothing-here").is_none());
    }

    #[test]
    fn test_check_cc_flag_uses_runner() {
        let runner = MockRunner::new();
        runner.expect_contains("-march=native", CommandOutput::from_stdout("", 0));
        runner.set_default(CommandOutput::from_stdout("", 1));
        let host = FakeHost::new();
        let probe = host.probe(runner);
        assert!(probe.check_cc_flag("-march=native", "gcc"));
        assert!(!probe.check_cc_flag("-fbogus", "gcc"));
    }
}
