//! Archive detection and extraction.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::util::fs::{ensure_dir, flatten_single_root};
use crate::util::process::{shell_quote, CommandRunner};

/// Archive format inferred from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    TarXz,
    TarBz2,
    Zip,
    /// Not an archive; placed as-is.
    Plain,
}

impl ArchiveKind {
    pub fn detect(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            ArchiveKind::TarXz
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            ArchiveKind::TarBz2
        } else if lower.ends_with(".zip") {
            ArchiveKind::Zip
        } else {
            ArchiveKind::Plain
        }
    }

    /// Conventional extension, used when naming downloads.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarXz => "tar.xz",
            ArchiveKind::TarBz2 => "tar.bz2",
            ArchiveKind::Zip => "zip",
            ArchiveKind::Plain => "",
        }
    }
}

/// Put a downloaded file into `dest`: archives are unpacked with a single
/// top-level directory stripped, other files are copied under their name.
pub fn place_download(file: &Path, dest: &Path, runner: &dyn CommandRunner) -> Result<()> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    ensure_dir(dest)?;
    match ArchiveKind::detect(&name) {
        ArchiveKind::Plain => {
            std::fs::copy(file, dest.join(&name)).with_context(|| {
                format!("failed to copy {} into {}", file.display(), dest.display())
            })?;
            Ok(())
        }
        kind => extract_archive(file, kind, dest, runner),
    }
}

/// Extract `archive` into `dest` and hoist a lone top-level directory.
pub fn extract_archive(
    archive: &Path,
    kind: ArchiveKind,
    dest: &Path,
    runner: &dyn CommandRunner,
) -> Result<()> {
    tracing::debug!("Extracting {} into {}", archive.display(), dest.display());
    ensure_dir(dest)?;

    match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive, dest)?,
        ArchiveKind::TarXz | ArchiveKind::TarBz2 => {
            let cmd = format!(
                "tar -xf {} -C {}",
                shell_quote(&archive.to_string_lossy()),
                shell_quote(&dest.to_string_lossy())
            );
            runner
                .run_checked(&cmd, None)
                .with_context(|| format!("failed to extract {}", archive.display()))?;
        }
        ArchiveKind::Zip => {
            let cmd = format!(
                "unzip -q -o {} -d {}",
                shell_quote(&archive.to_string_lossy()),
                shell_quote(&dest.to_string_lossy())
            );
            runner
                .run_checked(&cmd, None)
                .with_context(|| format!("failed to extract {}", archive.display()))?;
        }
        ArchiveKind::Plain => bail!("{} is not an archive", archive.display()),
    }

    flatten_single_root(dest)
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let file = File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;
    let mut tarball = Archive::new(GzDecoder::new(BufReader::new(file)));
    tarball.set_preserve_permissions(true);

    for entry in tarball
        .entries()
        .context("failed to read tarball entries")?
    {
        let mut entry = entry.context("failed to read tarball entry")?;
        let entry_path = entry
            .path()
            .context("failed to get entry path")?
            .into_owned();

        // unpack_in refuses entries that escape `dest`
        let unpacked = entry
            .unpack_in(dest)
            .with_context(|| format!("failed to extract {}", entry_path.display()))?;
        if !unpacked {
            bail!(
                "tarball entry escapes destination directory: {}",
                entry_path.display()
            );
        }
    }

    Ok(())
}
