//! Doctor results and their plain-text rendering.

use std::fmt::{self, Write};
use std::time::Duration;

/// Final state of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass(Option<String>),
    Fail(String),
    Skipped(String),
    /// Failed, was fixed, and the re-check passed
    Fixed { original: String },
    /// Failed, and the fix or the re-check failed too
    FixFailed { original: String, fix_error: String },
}

impl CheckStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CheckStatus::Pass(_) => "ok",
            CheckStatus::Fail(_) => "failed",
            CheckStatus::Skipped(_) => "skipped",
            CheckStatus::Fixed { .. } => "fixed",
            CheckStatus::FixFailed { .. } => "fix failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Fail(_) | CheckStatus::FixFailed { .. })
    }
}

/// Result of one check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub item_name: String,
    pub level: i32,
    pub manual: bool,
    pub status: CheckStatus,
    /// What the user can do about a failure
    pub guidance: Option<String>,
    pub duration: Duration,
}

impl CheckResult {
    /// A failure that still needs attention after automated fixing.
    pub fn is_blocking(&self) -> bool {
        !self.manual && self.status.is_failure()
    }
}

/// All results of a doctor run, in level order.
#[derive(Debug, Clone, Default)]
pub struct DoctorReport {
    pub results: Vec<CheckResult>,
    pub total_duration: Duration,
}

impl DoctorReport {
    fn count(&self, pred: impl Fn(&CheckStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn passed_count(&self) -> usize {
        self.count(|s| matches!(s, CheckStatus::Pass(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::is_failure)
    }

    pub fn fixed_count(&self) -> usize {
        self.count(|s| matches!(s, CheckStatus::Fixed { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, CheckStatus::Skipped(_)))
    }

    pub fn has_blocking_failures(&self) -> bool {
        self.results.iter().any(CheckResult::is_blocking)
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.has_blocking_failures() {
            1
        } else {
            0
        }
    }
}

/// Render the report for the terminal.
pub fn format_report(report: &DoctorReport, verbose: bool) -> String {
    let mut output = String::new();
    // writing to a String cannot fail
    let _ = write_report(&mut output, report, verbose);
    output
}

fn write_report(out: &mut String, report: &DoctorReport, verbose: bool) -> fmt::Result {
    writeln!(out, "Checks:")?;
    for result in &report.results {
        let marker = match result.status {
            CheckStatus::Pass(_) | CheckStatus::Fixed { .. } => "[OK]",
            CheckStatus::Skipped(_) => "[--]",
            CheckStatus::Fail(_) | CheckStatus::FixFailed { .. } => "[!!]",
        };
        let manual = if result.manual { " (manual)" } else { "" };
        write!(out, "  {} {}{}", marker, result.item_name, manual)?;

        match &result.status {
            CheckStatus::Pass(Some(detail)) => writeln!(out, " ({})", detail)?,
            CheckStatus::Pass(None) => writeln!(out)?,
            CheckStatus::Skipped(reason) => writeln!(out, " - skipped: {}", reason)?,
            CheckStatus::Fail(reason) => writeln!(out, " - {}", reason)?,
            CheckStatus::Fixed { original } => writeln!(out, " - fixed ({})", original)?,
            CheckStatus::FixFailed {
                original,
                fix_error,
            } => {
                writeln!(out, " - {}", original)?;
                writeln!(out, "      fix failed: {}", fix_error)?;
            }
        }

        if result.status.is_failure() {
            if let Some(ref guidance) = result.guidance {
                writeln!(out, "      {}", guidance)?;
            }
        }
        if verbose {
            writeln!(
                out,
                "      level {}, {:.2}s",
                result.level,
                result.duration.as_secs_f64()
            )?;
        }
    }

    writeln!(out)?;
    writeln!(
        out,
        "Summary: {} passed, {} fixed, {} failed, {} skipped",
        report.passed_count(),
        report.fixed_count(),
        report.failed_count(),
        report.skipped_count()
    )?;

    if report.has_blocking_failures() {
        writeln!(
            out,
            "\nSome checks failed. Re-run with --auto-fix or fix them manually."
        )?;
    } else if report.failed_count() > 0 {
        writeln!(out, "\nOnly manual checks failed; see the guidance above.")?;
    } else {
        writeln!(out, "\nAll checks passed. The environment is ready.")?;
    }
    Ok(())
}
