//! The download strategy seam and the shared fetch context.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sources::error::AcquireError;
use crate::sources::http::{HttpClient, HttpResponse};
use crate::toolchain::OsFamily;
use crate::util::config::Config;
use crate::util::hash::sha256_bytes;
use crate::util::process::CommandRunner;

/// How one package's source is obtained.
///
/// In TOML the strategy key is `type` and every other key is a
/// strategy-specific option:
///
/// ```toml
/// [zlib]
/// type = "ghrel"
/// repo = "madler/zlib"
/// match = "zlib-.+\\.tar\\.gz"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSpec {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl DownloadSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        DownloadSpec {
            kind: kind.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// A string option, if present and a string.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// A string option that must be present and non-empty.
    pub fn required_str(&self, key: &str) -> Result<&str, AcquireError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Err(AcquireError::missing(key)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(AcquireError::invalid(key, "must not be empty"))
            }
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(AcquireError::invalid(key, "must be a string")),
        }
    }

    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }

    /// Stable digest of the spec, used to decide whether an existing tree
    /// came from the same declaration.
    pub fn fingerprint(&self) -> String {
        self.fingerprint_with(&[])
    }

    /// Digest of the spec together with the context-derived `inputs` a
    /// strategy resolved for it. Equal to [`fingerprint`](Self::fingerprint)
    /// when `inputs` is empty.
    pub fn fingerprint_with(&self, inputs: &[String]) -> String {
        let encoded = if inputs.is_empty() {
            serde_json::to_vec(self)
        } else {
            serde_json::to_vec(&(self, inputs))
        };
        sha256_bytes(&encoded.unwrap_or_default())
    }
}

/// The platform prebuilt packages are selected for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlatform {
    pub arch: String,
    pub os: OsFamily,
    /// `musl` or `glibc`
    pub libc: String,
    pub libc_version: Option<String>,
}

impl TargetPlatform {
    pub fn host() -> Self {
        TargetPlatform {
            arch: std::env::consts::ARCH.to_string(),
            os: OsFamily::current(),
            libc: if cfg!(target_env = "musl") {
                "musl".to_string()
            } else {
                "glibc".to_string()
            },
            libc_version: None,
        }
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_os(mut self, os: OsFamily) -> Self {
        self.os = os;
        self
    }

    pub fn with_libc(mut self, libc: impl Into<String>, version: Option<String>) -> Self {
        self.libc = libc.into();
        self.libc_version = version;
        self
    }
}

/// Everything a strategy may use while fetching. Shared read-only across
/// concurrent acquisitions.
#[derive(Clone)]
pub struct AcquireContext {
    http: Arc<dyn HttpClient>,
    runner: Arc<dyn CommandRunner>,
    retry: u32,
    backoff: Duration,
    prefer_stable: bool,
    php_version: String,
    target: TargetPlatform,
    github_token: Option<String>,
}

impl AcquireContext {
    pub fn new(http: Arc<dyn HttpClient>, runner: Arc<dyn CommandRunner>) -> Self {
        AcquireContext {
            http,
            runner,
            retry: 2,
            backoff: Duration::from_millis(500),
            prefer_stable: true,
            php_version: "8.4".to_string(),
            target: TargetPlatform::host(),
            github_token: None,
        }
    }

    /// Context with retry, release and auth settings taken from `config`.
    pub fn from_config(
        config: &Config,
        http: Arc<dyn HttpClient>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let mut target = TargetPlatform::host();
        if let Some(ref arch) = config.toolchain.target_arch {
            target.arch = arch.clone();
        }
        if let Some(ref libc) = config.toolchain.libc {
            target.libc = libc.to_ascii_lowercase();
        }

        AcquireContext::new(http, runner)
            .with_retry(config.download.retry())
            .with_backoff(config.download.backoff())
            .with_prefer_stable(config.download.prefer_stable())
            .with_php_version(config.download.php_version())
            .with_target(target)
            .with_github_token(config.github_token())
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_prefer_stable(mut self, prefer_stable: bool) -> Self {
        self.prefer_stable = prefer_stable;
        self
    }

    pub fn with_php_version(mut self, version: impl Into<String>) -> Self {
        self.php_version = version.into();
        self
    }

    pub fn with_target(mut self, target: TargetPlatform) -> Self {
        self.target = target;
        self
    }

    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn prefer_stable(&self) -> bool {
        self.prefer_stable
    }

    pub fn php_version(&self) -> &str {
        &self.php_version
    }

    pub fn target(&self) -> &TargetPlatform {
        &self.target
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    /// Run `op`, retrying transient failures up to the configured count
    /// with exponential backoff. Other errors return immediately.
    pub fn retrying<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, AcquireError>,
    ) -> Result<T, AcquireError> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.retry => {
                    attempt += 1;
                    tracing::warn!(
                        "{} failed ({}), retrying in {:?} [{}/{}]",
                        label,
                        e,
                        delay,
                        attempt,
                        self.retry
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                other => return other,
            }
        }
    }

    /// GET `url`, retrying transient failures, and require a 2xx status.
    pub fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, AcquireError> {
        self.retrying(url, || {
            self.http
                .get(url, headers)
                .and_then(|response| response.error_for_status(url))
        })
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<T, AcquireError> {
        self.get(url, headers)?.json(url)
    }

    /// Download `url` into `dir/filename` and return the file with its
    /// sha256.
    pub fn download(
        &self,
        url: &str,
        headers: &[(String, String)],
        dir: &Path,
        filename: &str,
    ) -> Result<Downloaded, AcquireError> {
        tracing::info!("Downloading {}", url);
        let response = self.get(url, headers)?;

        let path = dir.join(filename);
        std::fs::write(&path, &response.body).map_err(|e| {
            AcquireError::io(
                anyhow::Error::new(e).context(format!("failed to write {}", path.display())),
            )
        })?;

        Ok(Downloaded {
            path,
            sha256: sha256_bytes(&response.body),
            response,
        })
    }

    /// Headers for the GitHub REST API, authenticated when a token is set.
    pub fn github_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "Accept".to_string(),
                "application/vnd.github+json".to_string(),
            ),
            ("X-GitHub-Api-Version".to_string(), "2022-11-28".to_string()),
        ];
        if let Some(ref token) = self.github_token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers
    }
}

/// A file fetched by [`AcquireContext::download`].
#[derive(Debug)]
pub struct Downloaded {
    pub path: PathBuf,
    pub sha256: String,
    pub response: HttpResponse,
}

/// One acquisition job handed to a strategy.
#[derive(Debug)]
pub struct FetchRequest<'a> {
    /// Package name, used for naming downloads and hosted assets
    pub package: &'a str,
    pub spec: &'a DownloadSpec,
    /// Empty directory that becomes the destination on success
    pub tree: &'a Path,
    /// Scratch directory for archives; discarded afterwards
    pub scratch: &'a Path,
}

/// What a strategy reports about a successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    pub version: Option<String>,
    pub sha256: Option<String>,
}

impl Fetched {
    pub fn new(version: Option<String>, sha256: Option<String>) -> Self {
        Fetched { version, sha256 }
    }
}

/// A named way of obtaining a source tree.
///
/// Strategies hold no shared mutable state. A strategy fills
/// `request.tree` and never touches the final destination; the acquirer
/// moves the tree into place only after `fetch` succeeds.
pub trait DownloadStrategy: Send + Sync {
    /// Registry key this strategy was resolved from.
    fn name(&self) -> &'static str;

    /// Whether an existing tree from an identical spec may be reused.
    fn reusable(&self) -> bool {
        true
    }

    /// Settings outside the spec that decide what `fetch` downloads for
    /// `package`, such as the configured runtime version or the target
    /// platform. They are folded into the reuse fingerprint so a changed
    /// setting refetches.
    fn effective_inputs(
        &self,
        _package: &str,
        _spec: &DownloadSpec,
        _ctx: &AcquireContext,
    ) -> Vec<String> {
        Vec::new()
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext)
        -> Result<Fetched, AcquireError>;
}

/// Last path segment of a URL without query string, if it looks like a
/// file name.
pub fn url_filename(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?;
    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}
