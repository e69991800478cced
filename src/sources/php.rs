//! Runtime releases from php.net and extension packages from Packagist.

use serde::Deserialize;
use serde_json::Value;

use crate::sources::archive::place_download;
use crate::sources::error::AcquireError;
use crate::sources::git::clone_into;
use crate::sources::strategy::{AcquireContext, DownloadSpec, DownloadStrategy, FetchRequest, Fetched};
use crate::util::hash::digest_matches;

const RELEASE_API: &str = "https://www.php.net/releases/index.php?json&version=";
const SOURCE_REPO: &str = "https://github.com/php/php-src.git";

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    version: String,
    #[serde(default)]
    source: Vec<SourceFile>,
}

#[derive(Debug, Deserialize)]
struct SourceFile {
    filename: String,
    #[serde(default)]
    sha256: Option<String>,
}

/// `php-release`: an official source release, or php-src master for the
/// version `git`.
///
/// Options: `version` (defaults to the configured runtime version).
pub struct PhpRelease;

impl DownloadStrategy for PhpRelease {
    fn name(&self) -> &'static str {
        "php-release"
    }

    fn effective_inputs(&self, _package: &str, spec: &DownloadSpec, ctx: &AcquireContext) -> Vec<String> {
        vec![format!("version={}", wanted_version(spec, ctx))]
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let wanted = wanted_version(request.spec, ctx);

        if wanted == "git" {
            tracing::debug!("Using php-src master, skipping checksum verification");
            let commit = clone_into(SOURCE_REPO, Some("master"), false, request.tree, ctx)?;
            return Ok(Fetched::new(Some("git".to_string()), Some(commit)));
        }

        let api = format!("{}{}", RELEASE_API, wanted);
        let info: ReleaseInfo = ctx.get_json(&api, &[])?;
        let tarball = info
            .source
            .iter()
            .find(|s| s.filename.ends_with(".tar.xz"))
            .ok_or_else(|| {
                AcquireError::permanent(&api, format!("no .tar.xz source for {}", info.version))
            })?;
        let expected = tarball.sha256.as_deref().ok_or_else(|| {
            AcquireError::permanent(&api, format!("no checksum published for {}", tarball.filename))
        })?;

        let url = format!(
            "https://www.php.net/distributions/php-{}.tar.xz",
            info.version
        );
        tracing::debug!("Downloading PHP {} from {}", info.version, url);
        let downloaded = ctx.download(&url, &[], request.scratch, &tarball.filename)?;
        if !digest_matches(expected, &downloaded.sha256) {
            return Err(AcquireError::ChecksumMismatch {
                file: tarball.filename.clone(),
                expected: expected.to_string(),
                actual: downloaded.sha256,
            });
        }

        place_download(&downloaded.path, request.tree, ctx.runner()).map_err(AcquireError::io)?;
        Ok(Fetched::new(Some(info.version), Some(downloaded.sha256)))
    }
}

fn wanted_version<'a>(spec: &'a DownloadSpec, ctx: &'a AcquireContext) -> &'a str {
    spec.opt_str("version").unwrap_or(ctx.php_version())
}

/// `pie`: an extension package published on Packagist.
///
/// Options: `repo` (required, `vendor/name`). The newest listed version
/// must declare a `php-ext` section.
pub struct Pie;

impl DownloadStrategy for Pie {
    fn name(&self) -> &'static str {
        "pie"
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let repo = request.spec.required_str("repo")?;
        let index = format!("https://repo.packagist.org/p2/{}.json", repo);

        tracing::debug!("Fetching {} from packagist index {}", request.package, index);
        let data: Value = ctx.get_json(&index, &[])?;
        let first = data
            .get("packages")
            .and_then(|p| p.get(repo))
            .and_then(Value::as_array)
            .and_then(|versions| versions.first())
            .ok_or_else(|| AcquireError::permanent(&index, format!("{} is not listed", repo)))?;

        if first.get("php-ext").is_none() {
            return Err(AcquireError::permanent(
                &index,
                format!("{} is not a PHP extension package", repo),
            ));
        }
        let dist = first.get("dist");
        let dist_url = dist.and_then(|d| d.get("url")).and_then(Value::as_str);
        let dist_type = dist.and_then(|d| d.get("type")).and_then(Value::as_str);
        let (Some(dist_url), Some(dist_type)) = (dist_url, dist_type) else {
            return Err(AcquireError::permanent(
                &index,
                format!("no dist archive listed for {}", repo),
            ));
        };

        let version = first
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let extension = if dist_type == "zip" { "zip" } else { "tar.gz" };
        let filename = format!("{}-{}.{}", repo.replace('/', "_"), version, extension);

        let downloaded = ctx.download(dist_url, &[], request.scratch, &filename)?;
        place_download(&downloaded.path, request.tree, ctx.runner()).map_err(AcquireError::io)?;
        Ok(Fetched::new(Some(version), Some(downloaded.sha256)))
    }
}
