//! Environment doctor.
//!
//! Checks are declared in a [`CheckRegistry`] with a level, an optional OS
//! restriction and an optional paired fix. The [`Doctor`] selects the checks
//! valid for the host, runs them in level order, and with auto-fix enabled
//! runs the paired fix for each failure before checking once more.
//!
//! ## Usage
//!
//! ```bash
//! statica doctor             # Diagnose only
//! statica doctor --auto-fix  # Run fixes for failing checks
//! ```

pub mod checks;
pub mod item;
pub mod report;

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use anyhow::Result;
use rayon::prelude::*;

pub use item::{CheckDecl, CheckItem, CheckOutcome, CheckRegistry, FixItem, OptionalCheck};
pub use report::{format_report, CheckResult, CheckStatus, DoctorReport};

use crate::toolchain::OsFamily;
use crate::util::config::DoctorConfig;

/// Options for a doctor run.
#[derive(Debug, Clone)]
pub struct DoctorOptions {
    /// OS family checks are selected for
    pub os: OsFamily,

    /// Run paired fixes for failing checks
    pub auto_fix: bool,

    /// Evaluate checks concurrently
    pub parallel: bool,

    /// Check names reported as skipped without running
    pub skip: BTreeSet<String>,
}

impl Default for DoctorOptions {
    fn default() -> Self {
        DoctorOptions {
            os: OsFamily::current(),
            auto_fix: false,
            parallel: false,
            skip: BTreeSet::new(),
        }
    }
}

impl DoctorOptions {
    /// Options from the `[doctor]` config section and a resolved skip set.
    pub fn from_config(config: &DoctorConfig, skip: BTreeSet<String>) -> Self {
        DoctorOptions {
            auto_fix: config.auto_fix.unwrap_or(false),
            parallel: config.parallel.unwrap_or(false),
            skip,
            ..DoctorOptions::default()
        }
    }
}

/// Runs declared checks against the host.
pub struct Doctor {
    registry: CheckRegistry,
    options: DoctorOptions,
}

impl Doctor {
    pub fn new(registry: CheckRegistry, options: DoctorOptions) -> Self {
        tracing::debug!(
            "Loaded doctor checks: {}",
            registry
                .checks()
                .iter()
                .map(CheckItem::name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Doctor { registry, options }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub fn options(&self) -> &DoctorOptions {
        &self.options
    }

    /// Checks that apply to this host, sorted by level. Equal levels keep
    /// declaration order.
    pub fn valid_check_list(&self) -> Vec<&CheckItem> {
        let disabled: BTreeSet<&str> = self
            .registry
            .optional_groups()
            .iter()
            .filter(|group| !group.is_enabled())
            .flat_map(|group| group.checks.iter().map(String::as_str))
            .collect();

        let mut list: Vec<&CheckItem> = self
            .registry
            .checks()
            .iter()
            .filter(|item| item.decl.applies_to(self.options.os))
            .filter(|item| !disabled.contains(item.name()))
            .collect();
        list.sort_by_key(|item| item.decl.level);
        list
    }

    /// Run every valid check.
    pub fn check_all(&self) -> DoctorReport {
        let list = self.valid_check_list();
        self.run_checks(&list)
    }

    /// Run `list` and report in list order. Fixes always run one at a time.
    pub fn run_checks(&self, list: &[&CheckItem]) -> DoctorReport {
        let start = Instant::now();

        let evaluate = |item: &&CheckItem| {
            if self.options.skip.contains(item.name()) {
                return (CheckOutcome::skip("skipped by configuration"), Duration::ZERO);
            }
            tracing::debug!("Checking {}", item.name());
            let began = Instant::now();
            let outcome = run_guarded(item);
            (outcome, began.elapsed())
        };

        let outcomes: Vec<(CheckOutcome, Duration)> = if self.options.parallel {
            list.par_iter().map(evaluate).collect()
        } else {
            list.iter().map(evaluate).collect()
        };

        let results = list
            .iter()
            .zip(outcomes)
            .map(|(item, (outcome, duration))| self.settle(item, outcome, duration))
            .collect();

        DoctorReport {
            results,
            total_duration: start.elapsed(),
        }
    }

    /// Turn an outcome into a result, attempting the paired fix when allowed.
    fn settle(&self, item: &CheckItem, outcome: CheckOutcome, duration: Duration) -> CheckResult {
        let decl = &item.decl;
        let mut result = CheckResult {
            item_name: decl.name.clone(),
            level: decl.level,
            manual: decl.manual,
            status: CheckStatus::Pass(None),
            guidance: decl.guidance.clone(),
            duration,
        };

        let (reason, fix_args) = match outcome {
            CheckOutcome::Pass(detail) => {
                result.status = CheckStatus::Pass(detail);
                return result;
            }
            CheckOutcome::Skip(reason) => {
                result.status = CheckStatus::Skipped(reason);
                return result;
            }
            CheckOutcome::Fail { reason, fix_args } => (reason, fix_args),
        };
        tracing::warn!("Check `{}` failed: {}", decl.name, reason);

        let fix = if decl.manual {
            None
        } else {
            self.registry.fix_for(decl)
        };
        let Some(fix) = fix else {
            result.status = CheckStatus::Fail(reason);
            return result;
        };
        if !self.options.auto_fix {
            if result.guidance.is_none() {
                result.guidance = Some(format!(
                    "Run with --auto-fix to apply `{}` automatically.",
                    fix.name
                ));
            }
            result.status = CheckStatus::Fail(reason);
            return result;
        }

        tracing::info!("Fixing `{}` with {}", decl.name, fix.name);
        let began = Instant::now();
        result.status = match run_fix_guarded(fix, &fix_args) {
            Err(fix_error) => CheckStatus::FixFailed {
                original: reason,
                fix_error,
            },
            Ok(()) => match run_guarded(item) {
                CheckOutcome::Pass(_) => {
                    tracing::info!("Fixed `{}`", decl.name);
                    CheckStatus::Fixed { original: reason }
                }
                CheckOutcome::Fail {
                    reason: recheck, ..
                } => CheckStatus::FixFailed {
                    original: reason,
                    fix_error: format!("still failing after fix: {}", recheck),
                },
                CheckOutcome::Skip(why) => CheckStatus::FixFailed {
                    original: reason,
                    fix_error: format!("re-check skipped: {}", why),
                },
            },
        };
        result.duration += began.elapsed();
        result
    }
}

/// Run a check routine, turning errors and panics into failures.
fn run_guarded(item: &CheckItem) -> CheckOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| item.run())) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => CheckOutcome::fail(format!("internal error: {:#}", e)),
        Err(payload) => CheckOutcome::fail(format!("internal error: {}", panic_message(payload.as_ref()))),
    }
}

fn run_fix_guarded(fix: &FixItem, args: &[String]) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| fix.run(args))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(format!("fix panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Build a doctor over a registry filled by `register`.
pub fn doctor_with<F>(options: DoctorOptions, register: F) -> Result<Doctor>
where
    F: FnOnce(&mut CheckRegistry) -> Result<()>,
{
    let mut registry = CheckRegistry::new();
    register(&mut registry)?;
    Ok(Doctor::new(registry, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn options(os: OsFamily) -> DoctorOptions {
        DoctorOptions {
            os,
            ..DoctorOptions::default()
        }
    }

    fn names(list: &[&CheckItem]) -> Vec<String> {
        list.iter().map(|i| i.name().to_string()).collect()
    }

    #[test]
    fn test_valid_list_filters_os_and_sorts() {
        let mut registry = CheckRegistry::new();
        registry
            .check(CheckDecl::new("late"), || Ok(CheckOutcome::pass()))
            .check(CheckDecl::new("linux-first").level(1).limit_os(OsFamily::Linux), || {
                Ok(CheckOutcome::pass())
            })
            .check(CheckDecl::new("mac").level(1).limit_os(OsFamily::Darwin), || {
                Ok(CheckOutcome::pass())
            })
            .check(CheckDecl::new("also-late"), || Ok(CheckOutcome::pass()));

        let doctor = Doctor::new(registry, options(OsFamily::Linux));
        let list = doctor.valid_check_list();
        assert_eq!(names(&list), vec!["linux-first", "late", "also-late"]);
        // stable across calls
        assert_eq!(names(&doctor.valid_check_list()), names(&list));
    }

    #[test]
    fn test_unrestricted_checks_valid_everywhere() {
        for os in OsFamily::ALL {
            let mut registry = CheckRegistry::new();
            registry.check(CheckDecl::new("any"), || Ok(CheckOutcome::pass()));
            registry.check(CheckDecl::new("linux").limit_os(OsFamily::Linux), || {
                Ok(CheckOutcome::pass())
            });
            let doctor = Doctor::new(registry, options(os));
            let list = names(&doctor.valid_check_list());
            assert!(list.contains(&"any".to_string()));
            assert_eq!(list.contains(&"linux".to_string()), os == OsFamily::Linux);
        }
    }

    #[test]
    fn test_optional_group_gating() {
        let enabled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&enabled);

        let mut registry = CheckRegistry::new();
        registry
            .check(CheckDecl::new("musl-wrapper"), || Ok(CheckOutcome::pass()))
            .check(CheckDecl::new("other"), || Ok(CheckOutcome::pass()))
            .optional(&["musl-wrapper"], move || flag.load(Ordering::SeqCst));

        let doctor = Doctor::new(registry, options(OsFamily::Linux));
        assert_eq!(names(&doctor.valid_check_list()), vec!["other"]);

        enabled.store(true, Ordering::SeqCst);
        assert_eq!(
            names(&doctor.valid_check_list()),
            vec!["musl-wrapper", "other"]
        );
    }

    #[test]
    fn test_errors_and_panics_become_failures() {
        let mut registry = CheckRegistry::new();
        registry
            .check(CheckDecl::new("errors"), || anyhow::bail!("probe exploded"))
            .check(CheckDecl::new("panics"), || panic!("index out of range"))
            .check(CheckDecl::new("fine"), || Ok(CheckOutcome::pass()));

        let report = Doctor::new(registry, options(OsFamily::Linux)).check_all();
        assert_eq!(report.results.len(), 3);
        assert_eq!(
            report.results[0].status,
            CheckStatus::Fail("internal error: probe exploded".into())
        );
        assert_eq!(
            report.results[1].status,
            CheckStatus::Fail("internal error: index out of range".into())
        );
        assert_eq!(report.results[2].status, CheckStatus::Pass(None));
    }

    fn fixable_registry(fix_works: bool) -> (CheckRegistry, Arc<AtomicUsize>) {
        let installed = Arc::new(AtomicBool::new(false));
        let fix_calls = Arc::new(AtomicUsize::new(0));

        let mut registry = CheckRegistry::new();
        let state = Arc::clone(&installed);
        registry.check(CheckDecl::new("tools").fix("install-tools"), move || {
            if state.load(Ordering::SeqCst) {
                Ok(CheckOutcome::pass())
            } else {
                Ok(CheckOutcome::fail_with_args(
                    "make not installed",
                    vec!["make".to_string()],
                ))
            }
        });

        let state = Arc::clone(&installed);
        let calls = Arc::clone(&fix_calls);
        registry
            .fix("install-tools", move |args| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(args, ["make".to_string()]);
                if fix_works {
                    state.store(true, Ordering::SeqCst);
                }
                Ok(())
            })
            .unwrap();
        (registry, fix_calls)
    }

    #[test]
    fn test_auto_fix_reports_fixed() {
        let (registry, calls) = fixable_registry(true);
        let doctor = Doctor::new(
            registry,
            DoctorOptions {
                auto_fix: true,
                ..options(OsFamily::Linux)
            },
        );
        let report = doctor.check_all();
        assert_eq!(
            report.results[0].status,
            CheckStatus::Fixed {
                original: "make not installed".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!report.has_blocking_failures());
    }

    #[test]
    fn test_ineffective_fix_reports_fix_failed() {
        let (registry, calls) = fixable_registry(false);
        let doctor = Doctor::new(
            registry,
            DoctorOptions {
                auto_fix: true,
                ..options(OsFamily::Linux)
            },
        );
        let report = doctor.check_all();
        assert!(matches!(
            report.results[0].status,
            CheckStatus::FixFailed { ref original, .. } if original == "make not installed"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_no_fix_without_auto_fix() {
        let (registry, calls) = fixable_registry(true);
        let report = Doctor::new(registry, options(OsFamily::Linux)).check_all();
        assert_eq!(
            report.results[0].status,
            CheckStatus::Fail("make not installed".into())
        );
        assert!(report.results[0]
            .guidance
            .as_deref()
            .unwrap()
            .contains("--auto-fix"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_check_never_fixed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = CheckRegistry::new();
        registry.check(
            CheckDecl::new("brew").manual().guidance("Install Homebrew"),
            || Ok(CheckOutcome::fail("Homebrew is not installed")),
        );
        registry
            .fix("brew", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let report = Doctor::new(
            registry,
            DoctorOptions {
                auto_fix: true,
                ..options(OsFamily::Darwin)
            },
        )
        .check_all();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(report.results[0].manual);
        assert_eq!(report.results[0].guidance.as_deref(), Some("Install Homebrew"));
        assert!(!report.has_blocking_failures());
    }

    #[test]
    fn test_skip_list() {
        let mut registry = CheckRegistry::new();
        registry.check(CheckDecl::new("slow"), || panic!("must not run"));
        let mut skip = BTreeSet::new();
        skip.insert("slow".to_string());

        let report = Doctor::new(
            registry,
            DoctorOptions {
                skip,
                ..options(OsFamily::Linux)
            },
        )
        .check_all();
        assert_eq!(
            report.results[0].status,
            CheckStatus::Skipped("skipped by configuration".into())
        );
    }

    #[test]
    fn test_parallel_preserves_order() {
        let mut registry = CheckRegistry::new();
        for level in (0..16).rev() {
            registry.check(CheckDecl::new(format!("check-{:02}", level)).level(level), move || {
                std::thread::sleep(Duration::from_millis((16 - level) as u64));
                Ok(CheckOutcome::pass())
            });
        }
        let report = Doctor::new(
            registry,
            DoctorOptions {
                parallel: true,
                ..options(OsFamily::Linux)
            },
        )
        .check_all();
        let order: Vec<_> = report.results.iter().map(|r| r.level).collect();
        assert_eq!(order, (0..16).collect::<Vec<_>>());
    }
}
