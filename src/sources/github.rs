//! GitHub-backed strategies: release assets, release/tag tarballs and
//! hosted prebuilt packages.

use regex::Regex;
use serde::Deserialize;

use crate::sources::archive::place_download;
use crate::sources::error::AcquireError;
use crate::sources::http::attachment_filename;
use crate::sources::strategy::{AcquireContext, DownloadSpec, DownloadStrategy, FetchRequest, Fetched};
use crate::toolchain::OsFamily;
use crate::util::hash::digest_matches;

const API_BASE: &str = "https://api.github.com/repos";

/// Repository publishing prebuilt package binaries.
pub const HOSTED_REPO: &str = "static-php/package-bin";

#[derive(Debug, Clone, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    tarball_url: Option<String>,
    #[serde(default)]
    assets: Vec<Asset>,
}

impl Release {
    /// Tag name for releases, ref name for tags.
    fn version(&self) -> Option<&str> {
        self.tag_name.as_deref().or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Asset {
    id: u64,
    name: String,
    #[serde(default)]
    browser_download_url: Option<String>,
    #[serde(default)]
    digest: Option<String>,
}

fn compile_match(spec: &DownloadSpec) -> Result<Option<Regex>, AcquireError> {
    spec.opt_str("match")
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| AcquireError::invalid("match", format!("is not a valid regex: {}", e)))
        })
        .transpose()
}

fn prefer_stable(spec: &DownloadSpec, ctx: &AcquireContext) -> bool {
    spec.opt_bool("prefer-stable").unwrap_or(ctx.prefer_stable())
}

fn list_releases(
    repo: &str,
    endpoint: &str,
    ctx: &AcquireContext,
) -> Result<Vec<Release>, AcquireError> {
    let url = format!("{}/{}/{}", API_BASE, repo, endpoint);
    tracing::debug!("Fetching GitHub {} of {}", endpoint, repo);
    ctx.get_json(&url, &ctx.github_headers())
}

/// `ghrel`: the first release asset whose name matches `match`.
///
/// Options: `repo` (required), `match` (required regex on asset names),
/// `prefer-stable`. A published `sha256:` digest is verified.
pub struct GitHubReleaseStrategy;

impl DownloadStrategy for GitHubReleaseStrategy {
    fn name(&self) -> &'static str {
        "ghrel"
    }

    fn effective_inputs(&self, _package: &str, spec: &DownloadSpec, ctx: &AcquireContext) -> Vec<String> {
        vec![format!("prefer-stable={}", prefer_stable(spec, ctx))]
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let spec = request.spec;
        let repo = spec.required_str("repo")?;
        spec.required_str("match")?;
        let matcher = compile_match(spec)?;
        let stable = prefer_stable(spec, ctx);

        let releases = list_releases(repo, "releases", ctx)?;
        let (release, asset) = releases
            .iter()
            .filter(|r| !(stable && r.prerelease))
            .find_map(|r| {
                r.assets
                    .iter()
                    .find(|a| matcher.as_ref().is_some_and(|m| m.is_match(&a.name)))
                    .map(|a| (r, a))
            })
            .ok_or_else(|| {
                AcquireError::permanent(
                    format!("{}/{}/releases", API_BASE, repo),
                    "no release asset matched",
                )
            })?;

        let asset_url = format!("{}/{}/releases/assets/{}", API_BASE, repo, asset.id);
        let mut headers = ctx.github_headers();
        headers.retain(|(k, _)| k != "Accept");
        headers.push(("Accept".to_string(), "application/octet-stream".to_string()));

        let downloaded = ctx.download(&asset_url, &headers, request.scratch, &asset.name)?;
        match asset.digest.as_deref() {
            Some(digest) if digest.starts_with("sha256:") => {
                if !digest_matches(digest, &downloaded.sha256) {
                    return Err(AcquireError::ChecksumMismatch {
                        file: asset.name.clone(),
                        expected: digest.trim_start_matches("sha256:").to_string(),
                        actual: downloaded.sha256,
                    });
                }
                tracing::debug!("Verified digest of {}", asset.name);
            }
            _ => tracing::debug!("No digest published for {}, skipping verification", asset.name),
        }

        place_download(&downloaded.path, request.tree, ctx.runner()).map_err(AcquireError::io)?;
        Ok(Fetched::new(
            release.version().map(str::to_string),
            Some(downloaded.sha256),
        ))
    }
}

/// Which listing a [`GitHubTarball`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelType {
    Releases,
    Tags,
}

impl RelType {
    fn endpoint(&self) -> &'static str {
        match self {
            RelType::Releases => "releases",
            RelType::Tags => "tags",
        }
    }
}

/// `ghtar` / `ghtagtar`: the source tarball of a release or a tag.
///
/// Options: `repo` (required), `match` (regex on the tarball URL), `tag`
/// (an exact release tag or tag name), `prefer-stable`.
pub struct GitHubTarball {
    rel_type: RelType,
}

impl GitHubTarball {
    pub fn releases() -> Self {
        GitHubTarball {
            rel_type: RelType::Releases,
        }
    }

    pub fn tags() -> Self {
        GitHubTarball {
            rel_type: RelType::Tags,
        }
    }

    pub fn rel_type(&self) -> RelType {
        self.rel_type
    }
}

impl DownloadStrategy for GitHubTarball {
    fn name(&self) -> &'static str {
        match self.rel_type {
            RelType::Releases => "ghtar",
            RelType::Tags => "ghtagtar",
        }
    }

    fn effective_inputs(&self, _package: &str, spec: &DownloadSpec, ctx: &AcquireContext) -> Vec<String> {
        vec![format!("prefer-stable={}", prefer_stable(spec, ctx))]
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let spec = request.spec;
        let repo = spec.required_str("repo")?;
        let matcher = compile_match(spec)?;
        let wanted_tag = spec.opt_str("tag");
        let stable = prefer_stable(spec, ctx);

        let listing = list_releases(repo, self.rel_type.endpoint(), ctx)?;
        let chosen = listing
            .iter()
            .filter(|r| !(stable && r.prerelease))
            .filter(|r| wanted_tag.map_or(true, |tag| r.version() == Some(tag)))
            .find(|r| match (&matcher, r.tarball_url.as_deref()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(m), Some(url)) => m.is_match(url),
            })
            .ok_or_else(|| {
                AcquireError::permanent(
                    format!("{}/{}/{}", API_BASE, repo, self.rel_type.endpoint()),
                    "no suitable tarball found",
                )
            })?;

        let version = chosen.version().map(str::to_string);
        let tarball_url = chosen.tarball_url.as_deref().unwrap_or_default();
        let response = ctx.get(tarball_url, &ctx.github_headers())?;
        let filename = attachment_filename(&response).unwrap_or_else(|| {
            format!(
                "{}-{}.tar.gz",
                request.package,
                version.as_deref().unwrap_or("latest")
            )
        });

        let path = request.scratch.join(&filename);
        std::fs::write(&path, &response.body).map_err(|e| {
            AcquireError::io(anyhow::Error::new(e).context(format!("failed to write {}", path.display())))
        })?;
        place_download(&path, request.tree, ctx.runner()).map_err(AcquireError::io)?;

        Ok(Fetched::new(
            version,
            Some(crate::util::hash::sha256_bytes(&response.body)),
        ))
    }
}

/// `hosted`: a prebuilt package from the package-bin repository's latest
/// release, chosen by target platform.
///
/// Options: `name` overrides the package name used in the asset name.
pub struct HostedPackageBin;

impl HostedPackageBin {
    /// Asset file name for `name` on `ctx`'s target platform.
    pub fn asset_name(name: &str, ctx: &AcquireContext) -> Result<String, AcquireError> {
        let target = ctx.target();
        let template = match target.os {
            OsFamily::Linux => "{name}-{arch}-{os}-{libc}-{libcver}.txz",
            OsFamily::Darwin => "{name}-{arch}-{os}.txz",
            OsFamily::Windows => "{name}-{arch}-{os}.tgz",
            OsFamily::Bsd => {
                return Err(AcquireError::permanent(
                    HOSTED_REPO,
                    "no hosted packages are published for BSD",
                ))
            }
        };
        Ok(template
            .replace("{name}", name)
            .replace("{arch}", &target.arch)
            .replace("{os}", &target.os.as_str().to_ascii_lowercase())
            .replace("{libc}", &target.libc)
            .replace(
                "{libcver}",
                target.libc_version.as_deref().unwrap_or("default"),
            ))
    }
}

impl DownloadStrategy for HostedPackageBin {
    fn name(&self) -> &'static str {
        "hosted"
    }

    fn effective_inputs(&self, package: &str, spec: &DownloadSpec, ctx: &AcquireContext) -> Vec<String> {
        let name = spec.opt_str("name").unwrap_or(package);
        match Self::asset_name(name, ctx) {
            Ok(asset) => vec![format!("asset={}", asset)],
            Err(_) => Vec::new(),
        }
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let name = request.spec.opt_str("name").unwrap_or(request.package);
        let wanted = Self::asset_name(name, ctx)?;

        let releases = list_releases(HOSTED_REPO, "releases", ctx)?;
        let release = releases
            .iter()
            .find(|r| !r.prerelease)
            .ok_or_else(|| AcquireError::permanent(HOSTED_REPO, "no releases found"))?;
        let asset = release
            .assets
            .iter()
            .find(|a| a.name == wanted)
            .ok_or_else(|| {
                AcquireError::permanent(HOSTED_REPO, format!("no hosted asset named {}", wanted))
            })?;
        let url = asset.browser_download_url.as_deref().ok_or_else(|| {
            AcquireError::permanent(HOSTED_REPO, format!("asset {} has no download URL", wanted))
        })?;

        let version = release.version().map(|v| v.trim_start_matches('v').to_string());
        tracing::debug!(
            "Downloading hosted {} {}",
            name,
            version.as_deref().unwrap_or("")
        );
        let downloaded = ctx.download(url, &ctx.github_headers(), request.scratch, &asset.name)?;
        place_download(&downloaded.path, request.tree, ctx.runner()).map_err(AcquireError::io)?;

        Ok(Fetched::new(version, Some(downloaded.sha256)))
    }
}
