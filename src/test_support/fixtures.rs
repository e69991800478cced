//! Fixtures: a fake host root and in-memory archives.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::toolchain::SystemProbe;
use crate::util::process::CommandRunner;

/// A scratch directory laid out like a host root filesystem.
pub struct FakeHost {
    root: TempDir,
}

impl FakeHost {
    pub fn new() -> Self {
        FakeHost {
            root: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Write `content` at `relative`, creating parent directories.
    pub fn file(self, relative: &str, content: &str) -> Self {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create fixture dir");
        }
        std::fs::write(&path, content).expect("failed to write fixture file");
        self
    }

    /// Create an executable at `relative`.
    pub fn executable(self, relative: &str, script: &str) -> Self {
        let host = self.file(relative, script);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = host.path(relative);
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to mark fixture executable");
        }
        host
    }

    pub fn os_release(self, content: &str) -> Self {
        self.file("etc/os-release", content)
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// A probe rooted at this fake host.
    pub fn probe<R: CommandRunner>(&self, runner: R) -> SystemProbe<R> {
        SystemProbe::new(self.root.path(), runner)
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a gzip-compressed tarball from `(path, contents)` entries.
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut data = Vec::new();
    {
        let encoder = GzEncoder::new(&mut data, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).expect("invalid tar path");
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append(&header, *contents)
                .expect("failed to append tar entry");
        }
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .expect("failed to finish tarball");
    }
    data
}
