//! `statica doctor` command

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::DoctorArgs;
use crate::commands::{acquire_context, acquirer};
use statica::doctor::checks::{register_builtin, DoctorHost};
use statica::doctor::{doctor_with, format_report, DoctorOptions};
use statica::toolchain::SystemProbe;
use statica::util::Config;

pub fn execute(args: DoctorArgs, config: &Config, project_root: &Path, verbose: bool) -> Result<()> {
    let mut skip = config.doctor_skip_set();
    skip.extend(args.skip);

    let mut options = DoctorOptions::from_config(&config.doctor, skip);
    options.auto_fix |= args.auto_fix;
    options.parallel |= args.parallel;

    let host = DoctorHost::new(SystemProbe::host(), config.pkg_root(project_root))
        .with_toolchain(config.toolchain.clone())
        .with_source_dir(config.source_dir(project_root))
        .with_acquirer(Arc::new(acquirer(acquire_context(config)?)));

    let doctor = doctor_with(options, |registry| register_builtin(registry, Arc::new(host)))?;

    if args.list {
        for item in doctor.valid_check_list() {
            let note = if doctor.options().skip.contains(item.name()) {
                " (skipped)"
            } else if item.decl.manual {
                " (manual)"
            } else {
                ""
            };
            println!("{:>5}  {}{}", item.decl.level, item.name(), note);
        }
        return Ok(());
    }

    let report = doctor.check_all();
    print!("{}", format_report(&report, verbose));

    // Exit with error code if a non-manual check is still failing
    if report.has_blocking_failures() {
        std::process::exit(report.exit_code());
    }

    Ok(())
}
