//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Statica - prepare and diagnose hosts for static runtime builds
#[derive(Parser)]
#[command(name = "statica")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory holding `.statica/config.toml` (defaults to the
    /// current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Diagnose the build environment and optionally fix it
    Doctor(DoctorArgs),

    /// Fetch package sources listed in a sources file
    Download(DownloadArgs),

    /// Show detected host and toolchain facts
    Probe(ProbeArgs),

    /// Run patch scripts at the given patch points
    Patch(PatchArgs),
}

#[derive(Args)]
pub struct DoctorArgs {
    /// Run fixes for failing checks
    #[arg(long)]
    pub auto_fix: bool,

    /// Evaluate checks concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Check names to skip (comma-separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// List the checks that apply to this host without running them
    #[arg(long)]
    pub list: bool,
}

#[derive(Args)]
pub struct DownloadArgs {
    /// TOML file mapping package names to download specs
    #[arg(default_value = "sources.toml")]
    pub sources: PathBuf,

    /// Directory to place source trees in (defaults to the configured
    /// source directory)
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Only fetch these packages (comma-separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Number of packages fetched concurrently
    #[arg(short = 'j', long)]
    pub parallel: Option<usize>,

    /// Extra attempts after a transient failure
    #[arg(long)]
    pub retry: Option<u32>,
}

#[derive(Args)]
pub struct ProbeArgs {
    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,

    /// C compiler to classify
    #[arg(long, env = "CC")]
    pub cc: Option<String>,

    /// Target architecture for cross builds
    #[arg(long)]
    pub target_arch: Option<String>,

    /// Host root to inspect
    #[arg(long, default_value = "/")]
    pub root: PathBuf,

    /// Static libraries to look for (e.g. z or libssl.a)
    #[arg(long = "find-lib")]
    pub find_lib: Vec<String>,

    /// Headers to look for (e.g. zlib.h)
    #[arg(long = "find-header")]
    pub find_header: Vec<String>,
}

#[derive(Args)]
pub struct PatchArgs {
    /// Patch points to emit, in order
    #[arg(required = true)]
    pub points: Vec<String>,

    /// Patch script files, run in the order given
    #[arg(long = "script", required = true)]
    pub scripts: Vec<PathBuf>,

    /// Directory scripts run in (defaults to the configured build root)
    #[arg(long)]
    pub build_root: Option<PathBuf>,

    /// autoconf `config.status` to load before emitting
    #[arg(long)]
    pub status: Option<PathBuf>,
}
