//! Plain URL downloads and directory-listing scrapes.

use regex::Regex;

use crate::sources::archive::place_download;
use crate::sources::error::AcquireError;
use crate::sources::strategy::{url_filename, AcquireContext, DownloadStrategy, FetchRequest, Fetched};
use crate::util::hash::digest_matches;
use crate::util::pattern::compare_versions;

/// Markers that identify a pre-release in a scraped version string.
const PRERELEASE_MARKERS: &[&str] = &["alpha", "beta", "rc", "pre", "nightly", "snapshot", "dev"];

/// `url`: a single file at a fixed URL.
///
/// Options: `url` (required), `filename`, `sha256`, `version`, and
/// `extract = false` to keep an archive packed. A string `extract` is a
/// subpath for the unpacked tree, handled by the acquirer for every type.
pub struct UrlStrategy;

impl DownloadStrategy for UrlStrategy {
    fn name(&self) -> &'static str {
        "url"
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let spec = request.spec;
        let url = spec.required_str("url")?;
        let filename = match spec.opt_str("filename") {
            Some(name) => name.to_string(),
            None => url_filename(url)
                .ok_or_else(|| AcquireError::invalid("url", "has no file name; set `filename`"))?,
        };

        let downloaded = ctx.download(url, &[], request.scratch, &filename)?;
        if let Some(expected) = spec.opt_str("sha256") {
            if !digest_matches(expected, &downloaded.sha256) {
                return Err(AcquireError::ChecksumMismatch {
                    file: filename,
                    expected: expected.to_string(),
                    actual: downloaded.sha256,
                });
            }
        }

        if spec.opt_bool("extract").unwrap_or(true) {
            place_download(&downloaded.path, request.tree, ctx.runner()).map_err(AcquireError::io)?;
        } else {
            std::fs::copy(&downloaded.path, request.tree.join(&filename)).map_err(|e| {
                AcquireError::io(anyhow::Error::new(e).context(format!("failed to copy {}", filename)))
            })?;
        }

        Ok(Fetched::new(
            spec.opt_str("version").map(str::to_string),
            Some(downloaded.sha256),
        ))
    }
}

/// `filelist`: scrape a download index and fetch the newest stable file.
///
/// Options: `url` (required), `regex` (required, with named groups
/// `version` and `file`), and `download-url`, a template with `{file}` and
/// `{version}` placeholders. Without a template the file name is appended
/// to `url`.
pub struct FileListStrategy;

impl DownloadStrategy for FileListStrategy {
    fn name(&self) -> &'static str {
        "filelist"
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let spec = request.spec;
        let index_url = spec.required_str("url")?;
        let pattern = spec.required_str("regex")?;
        let regex = Regex::new(pattern)
            .map_err(|e| AcquireError::invalid("regex", format!("is not a valid regex: {}", e)))?;

        tracing::debug!("Fetching file list from {}", index_url);
        let page = ctx.get(index_url, &[])?.text();
        let (version, file) = newest_stable(&regex, &page).ok_or_else(|| {
            AcquireError::permanent(
                index_url,
                format!("no stable release of {} matched the file list", request.package),
            )
        })?;
        tracing::debug!("Picked {} {} ({})", request.package, version, file);

        let url = match spec.opt_str("download-url") {
            Some(template) => template.replace("{file}", &file).replace("{version}", &version),
            None => format!("{}{}", index_url, file),
        };

        let filename = url_filename(&url).unwrap_or_else(|| file.clone());
        let downloaded = ctx.download(&url, &[], request.scratch, &filename)?;
        place_download(&downloaded.path, request.tree, ctx.runner()).map_err(AcquireError::io)?;

        Ok(Fetched::new(Some(version), Some(downloaded.sha256)))
    }
}

/// Highest non-prerelease `(version, file)` pair matched on `page`.
fn newest_stable(regex: &Regex, page: &str) -> Option<(String, String)> {
    regex
        .captures_iter(page)
        .filter_map(|caps| {
            let version = caps.name("version")?.as_str().to_string();
            let file = caps.name("file")?.as_str().to_string();
            Some((version, file))
        })
        .filter(|(version, _)| !is_prerelease(version))
        .max_by(|(a, _), (b, _)| compare_versions(a, b))
}

fn is_prerelease(version: &str) -> bool {
    let lower = version.to_ascii_lowercase();
    PRERELEASE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::error::AcquireErrorKind;
    use crate::sources::http::HttpResponse;
    use crate::sources::strategy::testing::{context, FetchDirs};
    use crate::sources::strategy::DownloadSpec;
    use crate::test_support::{tar_gz, MockHttpClient, MockRunner};
    use crate::util::hash::sha256_bytes;

    #[test]
    fn test_url_download_extracts() {
        let archive = tar_gz(&[("zlib-1.3.1/zlib.h", b"/* zlib */")]);
        let http = MockHttpClient::new().mock_url(
            "https://zlib.net/zlib-1.3.1.tar.gz",
            HttpResponse::ok(archive.clone()),
        );
        let ctx = context(http, MockRunner::new());
        let spec = DownloadSpec::new("url")
            .with_option("url", "https://zlib.net/zlib-1.3.1.tar.gz")
            .with_option("sha256", sha256_bytes(&archive));
        let dirs = FetchDirs::new();

        let fetched = UrlStrategy.fetch(&dirs.request("zlib", &spec), &ctx).unwrap();
        assert!(dirs.tree.join("zlib.h").is_file());
        assert_eq!(fetched.sha256, Some(sha256_bytes(&archive)));
    }

    #[test]
    fn test_url_checksum_mismatch() {
        let http = MockHttpClient::new()
            .mock_url("https://example.com/a.tar.gz", HttpResponse::ok("tampered"));
        let ctx = context(http, MockRunner::new());
        let spec = DownloadSpec::new("url")
            .with_option("url", "https://example.com/a.tar.gz")
            .with_option("sha256", "00");
        let dirs = FetchDirs::new();

        let err = UrlStrategy.fetch(&dirs.request("a", &spec), &ctx).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::ChecksumMismatch);
        assert!(std::fs::read_dir(&dirs.tree).unwrap().next().is_none());
    }

    #[test]
    fn test_url_requires_url() {
        let ctx = context(MockHttpClient::new(), MockRunner::new());
        let spec = DownloadSpec::new("url");
        let dirs = FetchDirs::new();
        let err = UrlStrategy.fetch(&dirs.request("a", &spec), &ctx).unwrap_err();
        assert!(matches!(err, AcquireError::InvalidSpec { ref field, .. } if field == "url"));
    }

    #[test]
    fn test_url_without_extract_keeps_file() {
        let http = MockHttpClient::new()
            .mock_url("https://curl.se/ca/cacert.pem", HttpResponse::ok("certs"));
        let ctx = context(http, MockRunner::new());
        let spec = DownloadSpec::new("url")
            .with_option("url", "https://curl.se/ca/cacert.pem")
            .with_option("extract", false);
        let dirs = FetchDirs::new();

        UrlStrategy.fetch(&dirs.request("cacert", &spec), &ctx).unwrap();
        assert!(dirs.tree.join("cacert.pem").is_file());
    }

    #[test]
    fn test_newest_stable_skips_prereleases() {
        let page = r#"
<a href="libxml2-2.11.9.tar.gz">
<a href="libxml2-2.13.4.tar.gz">
<a href="libxml2-2.14.0-rc1.tar.gz">
<a href="libxml2-2.9.14.tar.gz">
"#;
        let regex =
            Regex::new(r#"href="(?P<file>libxml2-(?P<version>[^"]+)\.tar\.gz)""#).unwrap();
        let (version, file) = newest_stable(&regex, page).unwrap();
        assert_eq!(version, "2.13.4");
        assert_eq!(file, "libxml2-2.13.4.tar.gz");
    }

    #[test]
    fn test_filelist_uses_download_template() {
        let archive = tar_gz(&[("gmp-6.3.0/gmp.h", b"")]);
        let http = MockHttpClient::new()
            .mock_url(
                "https://gmplib.org/download/gmp/",
                HttpResponse::ok(r#"<a href="gmp-6.2.1.tar.xz"> <a href="gmp-6.3.0.tar.gz">"#),
            )
            .mock_url(
                "https://mirror.example/gmp/6.3.0/gmp-6.3.0.tar.gz",
                HttpResponse::ok(archive),
            );
        let ctx = context(http, MockRunner::new());
        let spec = DownloadSpec::new("filelist")
            .with_option("url", "https://gmplib.org/download/gmp/")
            .with_option(
                "regex",
                r#"href="(?P<file>gmp-(?P<version>[^"]+)\.tar\.(?:gz|xz))""#,
            )
            .with_option("download-url", "https://mirror.example/gmp/{version}/{file}");
        let dirs = FetchDirs::new();

        let fetched = FileListStrategy.fetch(&dirs.request("gmp", &spec), &ctx).unwrap();
        assert_eq!(fetched.version.as_deref(), Some("6.3.0"));
        assert!(dirs.tree.join("gmp.h").is_file());
    }

    #[test]
    fn test_filelist_invalid_regex() {
        let ctx = context(MockHttpClient::new(), MockRunner::new());
        let spec = DownloadSpec::new("filelist")
            .with_option("url", "https://example.com/")
            .with_option("regex", "(unclosed");
        let dirs = FetchDirs::new();
        let err = FileListStrategy.fetch(&dirs.request("x", &spec), &ctx).unwrap_err();
        assert_eq!(err.kind(), AcquireErrorKind::InvalidSpec);
    }
}
