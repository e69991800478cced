//! Source acquisition.
//!
//! A [`DownloadSpec`] names a download type and its options. The
//! [`SourceAcquirer`] resolves the type in the [`StrategyRegistry`], lets
//! the strategy fill a staging tree next to the destination, and swaps the
//! finished tree into place. The destination is therefore either the old
//! tree, the new tree, or absent; never a mix.

pub mod archive;
pub mod bitbucket;
pub mod error;
pub mod git;
pub mod github;
pub mod http;
pub mod local;
pub mod pecl;
pub mod php;
pub mod registry;
pub mod strategy;
pub mod web;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use error::{AcquireError, AcquireErrorKind};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use registry::StrategyRegistry;
pub use strategy::{AcquireContext, DownloadSpec, DownloadStrategy, TargetPlatform};

use crate::util::fs::{ensure_dir, is_non_empty_dir, replace_dir};

/// Marker file recording where a completed tree came from.
pub const SOURCE_MARKER: &str = ".statica-source.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SourceMarker {
    kind: String,
    fingerprint: String,
    version: Option<String>,
    sha256: Option<String>,
}

impl SourceMarker {
    fn read(dest: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(dest.join(SOURCE_MARKER)).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

/// A populated source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredSource {
    pub name: String,
    pub path: PathBuf,
    pub version: Option<String>,
    /// True when an existing tree from the same spec was kept
    pub reused: bool,
}

/// One package in a batch.
#[derive(Debug, Clone)]
pub struct SourceJob {
    pub name: String,
    pub spec: DownloadSpec,
    pub dest: PathBuf,
}

/// Outcome of [`SourceAcquirer::acquire_all`], in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub acquired: Vec<AcquiredSource>,
    pub failed: Vec<(String, AcquireError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches package sources into destination directories.
pub struct SourceAcquirer {
    registry: StrategyRegistry,
    ctx: AcquireContext,
}

impl SourceAcquirer {
    pub fn new(registry: StrategyRegistry, ctx: AcquireContext) -> Self {
        SourceAcquirer { registry, ctx }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn context(&self) -> &AcquireContext {
        &self.ctx
    }

    /// Acquire `spec` into `dest`, naming the package after `dest`.
    pub fn acquire(&self, spec: &DownloadSpec, dest: &Path) -> Result<AcquiredSource, AcquireError> {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        self.acquire_named(&name, spec, dest)
    }

    /// Acquire `spec` for package `name` into `dest`.
    pub fn acquire_named(
        &self,
        name: &str,
        spec: &DownloadSpec,
        dest: &Path,
    ) -> Result<AcquiredSource, AcquireError> {
        let strategy = self.registry.resolve(&spec.kind)?;
        let subpath = extract_subpath(spec)?;
        let fingerprint = spec.fingerprint_with(&strategy.effective_inputs(name, spec, &self.ctx));

        if strategy.reusable() {
            if let Some(marker) = SourceMarker::read(dest) {
                if marker.kind == spec.kind && marker.fingerprint == fingerprint {
                    tracing::info!("Reusing {} at {}", name, dest.display());
                    return Ok(AcquiredSource {
                        name: name.to_string(),
                        path: dest.to_path_buf(),
                        version: marker.version,
                        reused: true,
                    });
                }
            }
        }

        tracing::info!("Fetching {} ({})", name, strategy.name());
        let staging = Staging::next_to(dest).map_err(AcquireError::io)?;
        let fetched = strategy.fetch(&staging.request(name, spec), &self.ctx)?;

        if !is_non_empty_dir(&staging.tree) {
            return Err(AcquireError::Io(format!(
                "{} strategy produced an empty tree for {}",
                strategy.name(),
                name
            )));
        }

        let tree = match subpath {
            Some(ref sub) => staging.nest(sub).map_err(AcquireError::io)?,
            None => staging.tree.clone(),
        };

        let marker = SourceMarker {
            kind: spec.kind.clone(),
            fingerprint,
            version: fetched.version.clone(),
            sha256: fetched.sha256,
        };
        write_marker(&tree, &marker).map_err(AcquireError::io)?;
        replace_dir(&tree, dest).map_err(AcquireError::io)?;

        tracing::debug!("{} ready at {}", name, dest.display());
        Ok(AcquiredSource {
            name: name.to_string(),
            path: dest.to_path_buf(),
            version: fetched.version,
            reused: false,
        })
    }

    /// Acquire every job on a pool of at most `parallel` threads.
    pub fn acquire_all(&self, jobs: &[SourceJob], parallel: usize) -> BatchReport {
        self.acquire_all_with(jobs, parallel, |_, _| {})
    }

    /// Like [`acquire_all`](Self::acquire_all), calling `on_done` as each
    /// package finishes. A failure never stops the other packages.
    pub fn acquire_all_with<F>(&self, jobs: &[SourceJob], parallel: usize, on_done: F) -> BatchReport
    where
        F: Fn(&str, &Result<AcquiredSource, AcquireError>) + Sync,
    {
        let run = |job: &SourceJob| {
            let result = self.acquire_named(&job.name, &job.spec, &job.dest);
            if let Err(ref e) = result {
                tracing::error!("Failed to acquire {}: {}", job.name, e);
            }
            on_done(&job.name, &result);
            (job.name.clone(), result)
        };

        let results: Vec<_> = match rayon::ThreadPoolBuilder::new()
            .num_threads(parallel.max(1))
            .build()
        {
            Ok(pool) => pool.install(|| jobs.par_iter().map(run).collect()),
            Err(e) => {
                tracing::warn!("Could not start download pool ({}), fetching sequentially", e);
                jobs.iter().map(run).collect()
            }
        };

        let mut report = BatchReport::default();
        for (name, result) in results {
            match result {
                Ok(source) => report.acquired.push(source),
                Err(e) => report.failed.push((name, e)),
            }
        }
        report
    }
}

/// The `extract` option as a path under the package tree. A boolean (or no
/// value) leaves the fetched tree at the root.
fn extract_subpath(spec: &DownloadSpec) -> Result<Option<PathBuf>, AcquireError> {
    let raw = match spec.options.get("extract") {
        None | Some(serde_json::Value::Bool(_)) => return Ok(None),
        Some(serde_json::Value::String(raw)) => raw,
        Some(_) => return Err(AcquireError::invalid("extract", "must be a path or a boolean")),
    };

    let mut sub = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => sub.push(part),
            Component::CurDir => {}
            _ => {
                return Err(AcquireError::invalid(
                    "extract",
                    "must be a relative path inside the package tree",
                ))
            }
        }
    }
    Ok((!sub.as_os_str().is_empty()).then_some(sub))
}

/// Temporary tree and scratch space on the destination's filesystem.
struct Staging {
    dir: tempfile::TempDir,
    tree: PathBuf,
    scratch: PathBuf,
}

impl Staging {
    fn next_to(dest: &Path) -> Result<Self> {
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;

        let dir = tempfile::Builder::new()
            .prefix(".statica-stage-")
            .tempdir_in(parent)
            .with_context(|| format!("failed to create staging directory in {}", parent.display()))?;
        let tree = dir.path().join("tree");
        let scratch = dir.path().join("scratch");
        ensure_dir(&tree)?;
        ensure_dir(&scratch)?;

        Ok(Staging {
            dir,
            tree,
            scratch,
        })
    }

    /// Move the fetched tree to `sub` inside a fresh root and return that root.
    fn nest(&self, sub: &Path) -> Result<PathBuf> {
        let root = self.dir.path().join("nested");
        let target = root.join(sub);
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        std::fs::rename(&self.tree, &target)
            .with_context(|| format!("failed to move fetched tree to {}", target.display()))?;
        Ok(root)
    }

    fn request<'a>(&'a self, name: &'a str, spec: &'a DownloadSpec) -> strategy::FetchRequest<'a> {
        strategy::FetchRequest {
            package: name,
            spec,
            tree: &self.tree,
            scratch: &self.scratch,
        }
    }
}

fn write_marker(tree: &Path, marker: &SourceMarker) -> Result<()> {
    let path = tree.join(SOURCE_MARKER);
    let json = serde_json::to_string_pretty(marker)?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
}

/// Load a table of named download specs from a TOML file.
///
/// ```toml
/// [zlib]
/// type = "url"
/// url = "https://zlib.net/zlib-1.3.1.tar.gz"
/// ```
pub fn load_source_list(path: &Path) -> Result<BTreeMap<String, DownloadSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::strategy::testing::context;
    use crate::test_support::{tar_gz, MockHttpClient, MockRunner};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const ARCHIVE_URL: &str = "https://example.com/libfoo-1.0.tar.gz";

    fn url_spec() -> DownloadSpec {
        DownloadSpec::new("url")
            .with_option("url", ARCHIVE_URL)
            .with_option("version", "1.0")
    }

    fn acquirer(http: MockHttpClient) -> SourceAcquirer {
        SourceAcquirer::new(
            StrategyRegistry::with_builtin(),
            context(http, MockRunner::new()).with_retry(0),
        )
    }

    fn good_http() -> MockHttpClient {
        MockHttpClient::new().mock_url(
            ARCHIVE_URL,
            HttpResponse::ok(tar_gz(&[("libfoo-1.0/foo.h", b"#pragma once\n")])),
        )
    }

    #[test]
    fn test_acquire_populates_dest() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("src/libfoo");

        let source = acquirer(good_http()).acquire(&url_spec(), &dest).unwrap();
        assert_eq!(source.name, "libfoo");
        assert_eq!(source.version.as_deref(), Some("1.0"));
        assert!(!source.reused);
        assert!(dest.join("foo.h").is_file());
        assert!(dest.join(SOURCE_MARKER).is_file());

        // no staging leftovers next to dest
        let siblings: Vec<_> = std::fs::read_dir(tmp.path().join("src"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings, vec![std::ffi::OsString::from("libfoo")]);
    }

    #[test]
    fn test_second_acquire_reuses() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("libfoo");
        let acquirer = acquirer(good_http());

        acquirer.acquire(&url_spec(), &dest).unwrap();
        let again = acquirer.acquire(&url_spec(), &dest).unwrap();
        assert!(again.reused);
        assert_eq!(again.version.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_changed_spec_replaces_tree() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("libfoo");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale.txt"), "old").unwrap();

        let source = acquirer(good_http()).acquire(&url_spec(), &dest).unwrap();
        assert!(!source.reused);
        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join("foo.h").is_file());
    }

    fn shared_acquirer(http: &Arc<MockHttpClient>, ctx: impl FnOnce(AcquireContext) -> AcquireContext) -> SourceAcquirer {
        let base = AcquireContext::new(http.clone(), Arc::new(MockRunner::new()))
            .with_backoff(Duration::from_millis(0))
            .with_retry(0);
        SourceAcquirer::new(StrategyRegistry::with_builtin(), ctx(base))
    }

    /// Lay down a finished tree whose marker was computed under `acquirer`.
    fn seed_tree(acquirer: &SourceAcquirer, name: &str, spec: &DownloadSpec, dest: &Path) {
        let strategy = acquirer.registry().resolve(&spec.kind).unwrap();
        let inputs = strategy.effective_inputs(name, spec, acquirer.context());
        std::fs::create_dir_all(dest).unwrap();
        std::fs::write(dest.join("main.c"), "int main;\n").unwrap();
        let marker = SourceMarker {
            kind: spec.kind.clone(),
            fingerprint: spec.fingerprint_with(&inputs),
            version: Some("seeded".to_string()),
            sha256: None,
        };
        write_marker(dest, &marker).unwrap();
    }

    #[test]
    fn test_php_version_change_refetches() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("php-src");
        let spec = DownloadSpec::new("php-release");
        let http = Arc::new(MockHttpClient::new());

        let on_83 = shared_acquirer(&http, |ctx| ctx.with_php_version("8.3"));
        seed_tree(&on_83, "php-src", &spec, &dest);
        let kept = on_83.acquire_named("php-src", &spec, &dest).unwrap();
        assert!(kept.reused);
        assert!(http.requests().is_empty());

        let on_84 = shared_acquirer(&http, |ctx| ctx.with_php_version("8.4"));
        let err = on_84.acquire_named("php-src", &spec, &dest).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::FetchPermanent);
        assert_eq!(
            http.request_count("https://www.php.net/releases/index.php?json&version=8.4"),
            1
        );
        assert!(dest.join("main.c").is_file());
    }

    #[test]
    fn test_hosted_target_change_refetches() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("libfoo");
        let spec = DownloadSpec::new("hosted");
        let http = Arc::new(MockHttpClient::new());
        let linux = TargetPlatform::host()
            .with_os(crate::toolchain::OsFamily::Linux)
            .with_libc("musl", None);

        let on_x86 = shared_acquirer(&http, |ctx| ctx.with_target(linux.clone().with_arch("x86_64")));
        seed_tree(&on_x86, "libfoo", &spec, &dest);
        assert!(on_x86.acquire_named("libfoo", &spec, &dest).unwrap().reused);
        assert!(http.requests().is_empty());

        let on_arm = shared_acquirer(&http, |ctx| ctx.with_target(linux.clone().with_arch("aarch64")));
        assert!(on_arm.acquire_named("libfoo", &spec, &dest).is_err());
        assert_eq!(
            http.request_count("https://api.github.com/repos/static-php/package-bin/releases"),
            1
        );
    }

    #[test]
    fn test_extract_places_tree_under_subpath() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("libfoo");
        let spec = url_spec().with_option("extract", "ext/foo");

        let source = acquirer(good_http()).acquire(&spec, &dest).unwrap();
        assert!(!source.reused);
        assert!(dest.join("ext/foo/foo.h").is_file());
        assert!(!dest.join("foo.h").exists());
        assert!(dest.join(SOURCE_MARKER).is_file());

        let again = acquirer(good_http()).acquire(&spec, &dest).unwrap();
        assert!(again.reused);
    }

    #[test]
    fn test_extract_rejects_escaping_path() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("libfoo");

        for bad in ["../elsewhere", "/abs/path"] {
            let spec = url_spec().with_option("extract", bad);
            let err = acquirer(good_http()).acquire(&spec, &dest).unwrap_err();
            assert_eq!(err.kind(), AcquireErrorKind::InvalidSpec);
        }
        let spec = url_spec().with_option("extract", 3);
        let err = acquirer(good_http()).acquire(&spec, &dest).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::InvalidSpec);
        assert!(!dest.exists());
    }

    #[test]
    fn test_extract_boolean_keeps_root() {
        assert_eq!(extract_subpath(&url_spec().with_option("extract", true)).unwrap(), None);
        assert_eq!(extract_subpath(&url_spec().with_option("extract", "./")).unwrap(), None);
        assert_eq!(
            extract_subpath(&url_spec().with_option("extract", "./ext/foo")).unwrap(),
            Some(PathBuf::from("ext/foo"))
        );
    }

    #[test]
    fn test_failed_fetch_leaves_dest_untouched() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("libfoo");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("keep.txt"), "old").unwrap();

        let http = MockHttpClient::new().mock_url(ARCHIVE_URL, HttpResponse::with_status(404, ""));
        let err = acquirer(http).acquire(&url_spec(), &dest).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::FetchPermanent);
        assert_eq!(std::fs::read_to_string(dest.join("keep.txt")).unwrap(), "old");
    }

    #[test]
    fn test_failed_fetch_leaves_no_dest() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("libfoo");

        let http = MockHttpClient::new().mock_url(ARCHIVE_URL, HttpResponse::with_status(500, ""));
        let err = acquirer(http).acquire(&url_spec(), &dest).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::FetchTransient);
        assert!(!dest.exists());
    }

    #[test]
    fn test_unknown_type() {
        let tmp = TempDir::new().unwrap();
        let err = acquirer(MockHttpClient::new())
            .acquire(&DownloadSpec::new("svn"), &tmp.path().join("x"))
            .unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::UnknownDownloadType);
    }

    #[test]
    fn test_batch_continues_after_failure() {
        let tmp = TempDir::new().unwrap();
        let jobs = vec![
            SourceJob {
                name: "broken".into(),
                spec: DownloadSpec::new("svn"),
                dest: tmp.path().join("broken"),
            },
            SourceJob {
                name: "libfoo".into(),
                spec: url_spec(),
                dest: tmp.path().join("libfoo"),
            },
            SourceJob {
                name: "nourl".into(),
                spec: DownloadSpec::new("url"),
                dest: tmp.path().join("nourl"),
            },
        ];

        let report = acquirer(good_http()).acquire_all(&jobs, 2);
        assert!(!report.is_success());
        assert_eq!(report.acquired.len(), 1);
        assert_eq!(report.acquired[0].name, "libfoo");
        let failed: Vec<_> = report.failed.iter().map(|(n, e)| (n.as_str(), e.kind())).collect();
        assert_eq!(
            failed,
            vec![
                ("broken", AcquireErrorKind::UnknownDownloadType),
                ("nourl", AcquireErrorKind::InvalidSpec)
            ]
        );
    }

    #[test]
    fn test_load_source_list() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sources.toml");
        std::fs::write(
            &path,
            r#"
[zlib]
type = "url"
url = "https://zlib.net/zlib-1.3.1.tar.gz"

[ext]
type = "local"
dirname = "/opt/ext"
"#,
        )
        .unwrap();

        let list = load_source_list(&path).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list["ext"].kind, "local");
        assert_eq!(list["zlib"].opt_str("url"), Some("https://zlib.net/zlib-1.3.1.tar.gz"));
    }
}
