//! Statica CLI - environment preparation for static runtime builds

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use statica::util::config::load_for_project;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over the verbosity flag
    let default_filter = if cli.verbose {
        "statica=debug"
    } else {
        "statica=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let project_root = match cli.project {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };
    let config = load_for_project(&project_root);

    // Execute command
    match cli.command {
        Commands::Doctor(args) => commands::doctor::execute(args, &config, &project_root, cli.verbose),
        Commands::Download(args) => commands::download::execute(args, &config, &project_root),
        Commands::Probe(args) => commands::probe::execute(args, &config),
        Commands::Patch(args) => commands::patch::execute(args, &config, &project_root),
    }
}
