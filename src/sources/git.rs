//! Git clone strategy.

use std::path::Path;

use git2::{build::RepoBuilder, ErrorClass, Repository, ResetType};

use crate::sources::error::AcquireError;
use crate::sources::strategy::{AcquireContext, DownloadStrategy, FetchRequest, Fetched};
use crate::util::fs::remove_dir_all_if_exists;

/// `git`: clone a repository and check out a revision.
///
/// Options: `url` (required), `rev` (branch, tag or commit; default branch
/// when absent), `submodules` (default false).
pub struct GitStrategy;

impl DownloadStrategy for GitStrategy {
    fn name(&self) -> &'static str {
        "git"
    }

    fn fetch(&self, request: &FetchRequest<'_>, ctx: &AcquireContext) -> Result<Fetched, AcquireError> {
        let spec = request.spec;
        let url = spec.required_str("url")?;
        let rev = spec.opt_str("rev");
        let submodules = spec.opt_bool("submodules").unwrap_or(false);

        let commit = clone_into(url, rev, submodules, request.tree, ctx)?;
        Ok(Fetched::new(
            Some(rev.map(str::to_string).unwrap_or_else(|| commit.clone())),
            Some(commit),
        ))
    }
}

/// Clone `url` into the empty directory `dest`, check out `rev`, and return
/// the checked-out commit id.
pub fn clone_into(
    url: &str,
    rev: Option<&str>,
    submodules: bool,
    dest: &Path,
    ctx: &AcquireContext,
) -> Result<String, AcquireError> {
    tracing::info!("Cloning {}{}", url, rev.map(|r| format!(" @ {}", r)).unwrap_or_default());

    let repo = ctx.retrying(url, || {
        RepoBuilder::new().clone(url, dest).map_err(|e| {
            // a failed clone can leave a partial .git behind
            let _ = remove_dir_all_if_exists(&dest.join(".git"));
            classify(url, e)
        })
    })?;

    let commit = match rev {
        Some(rev) => checkout(&repo, rev).map_err(|e| {
            AcquireError::permanent(url, format!("cannot check out `{}`: {}", rev, e.message()))
        })?,
        None => repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map(|commit| commit.id().to_string())
            .map_err(|e| classify(url, e))?,
    };

    if submodules {
        update_submodules(&repo).map_err(|e| classify(url, e))?;
    }

    tracing::debug!("Checked out {} at {}", url, commit);
    Ok(commit)
}

fn checkout(repo: &Repository, rev: &str) -> Result<String, git2::Error> {
    let object = repo
        .revparse_single(&format!("origin/{}", rev))
        .or_else(|_| repo.revparse_single(rev))?;
    let commit = object.peel_to_commit()?;

    repo.set_head_detached(commit.id())?;
    repo.reset(commit.as_object(), ResetType::Hard, None)?;
    Ok(commit.id().to_string())
}

fn update_submodules(repo: &Repository) -> Result<(), git2::Error> {
    for mut submodule in repo.submodules()? {
        tracing::debug!("Updating submodule {}", submodule.path().display());
        submodule.update(true, None)?;
    }
    Ok(())
}

fn classify(url: &str, err: git2::Error) -> AcquireError {
    match err.class() {
        ErrorClass::Net | ErrorClass::Os => AcquireError::transient(url, err.message()),
        _ => AcquireError::permanent(url, err.message()),
    }
}
