//! Local directory sources.

use std::path::PathBuf;

use crate::sources::error::AcquireError;
use crate::sources::strategy::{AcquireContext, DownloadStrategy, FetchRequest, Fetched};
use crate::util::fs::copy_dir_all;

/// `local`: copy a directory from the local filesystem.
///
/// Options: `dirname` (required). Local trees may change between runs, so
/// they are copied afresh every time.
pub struct LocalDir;

impl DownloadStrategy for LocalDir {
    fn name(&self) -> &'static str {
        "local"
    }

    fn reusable(&self) -> bool {
        false
    }

    fn fetch(&self, request: &FetchRequest<'_>, _ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let dirname = PathBuf::from(request.spec.required_str("dirname")?);
        if !dirname.is_dir() {
            return Err(AcquireError::invalid(
                "dirname",
                format!("is not a directory: {}", dirname.display()),
            ));
        }

        tracing::debug!("Copying {} from {}", request.package, dirname.display());
        copy_dir_all(&dirname, request.tree).map_err(AcquireError::io)?;
        Ok(Fetched::default())
    }
}
