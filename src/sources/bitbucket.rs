//! BitBucket tag tarballs.

use serde::Deserialize;

use crate::sources::archive::place_download;
use crate::sources::error::AcquireError;
use crate::sources::http::attachment_filename;
use crate::sources::strategy::{AcquireContext, DownloadStrategy, FetchRequest, Fetched};
use crate::util::hash::sha256_bytes;

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    values: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// `bitbuckettag`: the tarball of the first tag BitBucket lists.
///
/// Options: `repo` (required, `workspace/name`).
pub struct BitBucketTag;

impl DownloadStrategy for BitBucketTag {
    fn name(&self) -> &'static str {
        "bitbuckettag"
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let repo = request.spec.required_str("repo")?;
        let api = format!("https://api.bitbucket.org/2.0/repositories/{}/refs/tags", repo);

        tracing::debug!("Fetching {} tags from BitBucket", request.package);
        let page: TagPage = ctx.get_json(&api, &[])?;
        let version = page
            .values
            .into_iter()
            .next()
            .map(|tag| tag.name)
            .ok_or_else(|| AcquireError::permanent(&api, "repository has no tags"))?;

        let url = format!("https://bitbucket.org/{}/get/{}.tar.gz", repo, version);
        tracing::debug!("Downloading {} {} from {}", request.package, version, url);
        let response = ctx.get(&url, &[])?;
        let filename = attachment_filename(&response)
            .unwrap_or_else(|| format!("{}-{}.tar.gz", request.package, version));

        let path = request.scratch.join(&filename);
        std::fs::write(&path, &response.body).map_err(|e| {
            AcquireError::io(anyhow::Error::new(e).context(format!("failed to write {}", path.display())))
        })?;
        place_download(&path, request.tree, ctx.runner()).map_err(AcquireError::io)?;

        Ok(Fetched::new(Some(version), Some(sha256_bytes(&response.body))))
    }
}
