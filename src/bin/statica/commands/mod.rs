//! Command implementations

pub mod doctor;
pub mod download;
pub mod patch;
pub mod probe;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use statica::sources::{AcquireContext, ReqwestClient, SourceAcquirer, StrategyRegistry};
use statica::util::{CommandRunner, Config, ShellRunner};

/// Request timeout for release APIs and archive downloads.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Acquisition context for the real network and shell.
pub fn acquire_context(config: &Config) -> Result<AcquireContext> {
    let http = Arc::new(ReqwestClient::new(HTTP_TIMEOUT)?);
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
    Ok(AcquireContext::from_config(config, http, runner))
}

/// Acquirer with every built-in download type.
pub fn acquirer(ctx: AcquireContext) -> SourceAcquirer {
    SourceAcquirer::new(StrategyRegistry::with_builtin(), ctx)
}
