//! `statica download` command

use std::path::Path;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::DownloadArgs;
use crate::commands::{acquire_context, acquirer};
use statica::sources::{load_source_list, SourceJob};
use statica::util::Config;

pub fn execute(args: DownloadArgs, config: &Config, project_root: &Path) -> Result<()> {
    let specs = load_source_list(&args.sources)?;
    for name in &args.only {
        if !specs.contains_key(name) {
            bail!("`{}` is not listed in {}", name, args.sources.display());
        }
    }

    let dest_root = args
        .dest
        .unwrap_or_else(|| config.source_dir(project_root));
    let jobs: Vec<SourceJob> = specs
        .into_iter()
        .filter(|(name, _)| args.only.is_empty() || args.only.contains(name))
        .map(|(name, spec)| SourceJob {
            dest: dest_root.join(&name),
            name,
            spec,
        })
        .collect();
    if jobs.is_empty() {
        bail!("no sources listed in {}", args.sources.display());
    }

    let mut ctx = acquire_context(config)?;
    if let Some(retry) = args.retry {
        ctx = ctx.with_retry(retry);
    }
    let parallel = args.parallel.unwrap_or_else(|| config.download.parallel());

    let pb = ProgressBar::new(jobs.len() as u64);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => tracing::debug!("Progress template rejected: {}", e),
    }

    let report = acquirer(ctx).acquire_all_with(&jobs, parallel, |name, _| {
        pb.set_message(name.to_string());
        pb.inc(1);
    });
    pb.finish_and_clear();

    for source in &report.acquired {
        let action = if source.reused { "Reused" } else { "Fetched" };
        let version = source
            .version
            .as_deref()
            .map(|v| format!(" {}", v))
            .unwrap_or_default();
        println!(
            "{:>8} {}{} -> {}",
            action,
            source.name,
            version,
            source.path.display()
        );
    }
    for (name, error) in &report.failed {
        eprintln!("  Failed {} ({}): {}", name, error.kind(), error);
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
