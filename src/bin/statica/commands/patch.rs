//! `statica patch` command

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::PatchArgs;
use statica::patch::{BuildStatus, PatchDriver, PhaseOutcome, ShellPatchScript};
use statica::util::{Config, ShellRunner};

pub fn execute(args: PatchArgs, config: &Config, project_root: &Path) -> Result<()> {
    let build_root = args
        .build_root
        .unwrap_or_else(|| config.build_root(project_root));

    let mut driver = PatchDriver::new(Arc::new(ShellRunner), &build_root);
    for script in args.scripts {
        driver = driver.with_script(Box::new(ShellPatchScript::new(script)));
    }

    if let Some(ref path) = args.status {
        match BuildStatus::load(path) {
            Ok(status) => driver = driver.with_status(status),
            Err(signal) => {
                eprintln!("error: {}", signal);
                std::process::exit(signal.code());
            }
        }
    }

    for point in &args.points {
        match driver.run_phase(point, || Ok(())) {
            Ok(PhaseOutcome::Completed) => println!("{}: completed", point),
            Ok(PhaseOutcome::ShortCircuited(signal)) => match signal.message() {
                Some(message) => println!("{}: short-circuited: {}", point, message),
                None => println!("{}: short-circuited", point),
            },
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    Ok(())
}
