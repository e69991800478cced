//! Extension releases from the PECL channel.

use std::sync::OnceLock;

use regex::Regex;

use crate::sources::archive::place_download;
use crate::sources::error::AcquireError;
use crate::sources::strategy::{AcquireContext, DownloadStrategy, FetchRequest, Fetched};
use crate::util::pattern::compare_versions;

const PECL_BASE: &str = "https://pecl.php.net";

/// `pecl`: the newest stable release of a PECL package.
///
/// Options: `name`, the PECL package name. Defaults to the package name
/// with any `ext-` prefix removed.
pub struct PeclStrategy;

impl DownloadStrategy for PeclStrategy {
    fn name(&self) -> &'static str {
        "pecl"
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let name = pecl_name(request.spec.opt_str("name").unwrap_or(request.package));
        let index = format!("{}/rest/r/{}/allreleases.xml", PECL_BASE, name);

        tracing::debug!("Fetching PECL release list for {} from {}", request.package, index);
        let xml = ctx.get(&index, &[])?.text();
        let releases = parse_releases(&xml);
        if releases.is_empty() {
            return Err(AcquireError::permanent(
                &index,
                format!("could not parse the PECL release list for {}", name),
            ));
        }
        tracing::debug!("Matched {} PECL releases for {}", releases.len(), name);

        let version = releases
            .into_iter()
            .filter(|(_, state)| state == "stable")
            .map(|(version, _)| version)
            .max_by(|a, b| compare_versions(a, b))
            .ok_or_else(|| {
                AcquireError::permanent(&index, format!("no stable release of {} on PECL", name))
            })?;

        let filename = format!("{}-{}.tgz", name, version);
        let url = format!("{}/get/{}", PECL_BASE, filename);
        tracing::debug!("Downloading {} from {}", request.package, url);
        let downloaded = ctx.download(&url, &[], request.scratch, &filename)?;
        place_download(&downloaded.path, request.tree, ctx.runner()).map_err(AcquireError::io)?;
        Ok(Fetched::new(Some(version), Some(downloaded.sha256)))
    }
}

/// `ext-APCu` → `apcu`.
fn pecl_name(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    match lower.strip_prefix("ext-") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Every `(version, state)` pair in an `allreleases.xml` document.
fn parse_releases(xml: &str) -> Vec<(String, String)> {
    static RELEASE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = RELEASE
        .get_or_init(|| Regex::new(r"<r>\s*<v>([^<]+)</v>\s*<s>([^<]+)</s>").ok())
        .as_ref()
    else {
        return Vec::new();
    };
    re.captures_iter(xml)
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
        .collect()
}
