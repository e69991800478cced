//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

/// Recursively copy a directory, preserving symlinks on unix.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("path outside of {}", src.display()))?;
        let target = dst.join(relative);
        let ty = entry.file_type();

        if ty.is_dir() {
            ensure_dir(&target)?;
        } else if ty.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src)
        .with_context(|| format!("failed to read symlink: {}", src.display()))?;
    std::os::unix::fs::symlink(&link, dst)
        .with_context(|| format!("failed to create symlink: {}", dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// True if `path` is a directory with at least one entry.
pub fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Move a fully populated `staged` directory into place at `dest`.
///
/// An existing `dest` is first renamed aside and only deleted after the new
/// tree is in place, so `dest` is never observed half-written. `staged` must
/// live on the same filesystem as `dest`.
pub fn replace_dir(staged: &Path, dest: &Path) -> Result<()> {
    if !staged.is_dir() {
        bail!("staged directory does not exist: {}", staged.display());
    }
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }

    let backup = if dest.exists() {
        let backup = sibling_path(dest, "old");
        remove_dir_all_if_exists(&backup)?;
        fs::rename(dest, &backup).with_context(|| {
            format!("failed to move {} out of the way", dest.display())
        })?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(staged, dest) {
        if let Some(ref backup) = backup {
            restore_backup(backup, dest);
        }
        return Err(e).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                staged.display(),
                dest.display()
            )
        });
    }

    if let Some(backup) = backup {
        remove_dir_all_if_exists(&backup)?;
    }
    Ok(())
}

/// Move `backup` back to `dest` after a failed swap. Returns whether the
/// previous tree is back in place.
fn restore_backup(backup: &Path, dest: &Path) -> bool {
    match fs::rename(backup, dest) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                "could not restore {} from {}: {}",
                dest.display(),
                backup.display(),
                e
            );
            false
        }
    }
}

/// If `dir` holds exactly one subdirectory and nothing else, hoist that
/// subdirectory's contents into `dir`.
pub fn flatten_single_root(dir: &Path) -> Result<()> {
    let entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;

    let [only] = entries.as_slice() else {
        return Ok(());
    };
    if !only.is_dir() || fs::symlink_metadata(only)?.file_type().is_symlink() {
        return Ok(());
    }

    let holding = dir.join(".statica-unwrap");
    fs::rename(only, &holding)
        .with_context(|| format!("failed to unwrap {}", only.display()))?;
    for entry in fs::read_dir(&holding)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))
            .with_context(|| format!("failed to move {}", entry.path().display()))?;
    }
    fs::remove_dir(&holding)
        .with_context(|| format!("failed to remove {}", holding.display()))?;
    Ok(())
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}-{}", name, suffix, std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_all() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");

        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("file.txt"), "content").unwrap();
        fs::write(src.join("nested/inner.c"), "int x;").unwrap();

        copy_dir_all(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("file.txt")).unwrap(), "content");
        assert_eq!(
            fs::read_to_string(dst.join("nested/inner.c")).unwrap(),
            "int x;"
        );
    }

    #[test]
    fn test_replace_dir_swaps_existing_tree() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("zlib");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        let staged = tmp.path().join("staged");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("zlib.h"), "new").unwrap();

        replace_dir(&staged, &dest).unwrap();

        assert!(!staged.exists());
        assert!(dest.join("zlib.h").exists());
        assert!(!dest.join("stale.txt").exists());
        let leftovers: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_restore_backup() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("pkg");
        let backup = tmp.path().join(".pkg.old");
        fs::create_dir_all(&backup).unwrap();
        fs::write(backup.join("keep.txt"), "v1").unwrap();

        assert!(restore_backup(&backup, &dest));
        assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "v1");

        // Second restore has nothing to move and leaves dest alone.
        assert!(!restore_backup(&backup, &dest));
        assert!(dest.join("keep.txt").is_file());
    }

    #[test]
    fn test_flatten_single_root() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("out");
        fs::create_dir_all(dir.join("php-8.4.1/main")).unwrap();
        fs::write(dir.join("php-8.4.1/configure"), "#!/bin/sh").unwrap();

        flatten_single_root(&dir).unwrap();

        assert!(dir.join("configure").exists());
        assert!(dir.join("main").is_dir());
        assert!(!dir.join("php-8.4.1").exists());
    }

    #[test]
    fn test_flatten_keeps_multiple_entries() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("b.txt"), "b").unwrap();

        flatten_single_root(tmp.path()).unwrap();

        assert!(tmp.path().join("a").is_dir());
        assert!(tmp.path().join("b.txt").exists());
    }

    #[test]
    fn test_is_non_empty_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_non_empty_dir(tmp.path()));
        assert!(!is_non_empty_dir(&tmp.path().join("missing")));
        fs::write(tmp.path().join("x"), "").unwrap();
        assert!(is_non_empty_dir(tmp.path()));
    }
}
