//! Running patch scripts at patch points.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::patch::status::BuildStatus;
use crate::patch::{InterruptSignal, PatchError, PatchPoint, PatchPointRegistry};
use crate::util::process::{shell_quote, CommandRunner};

/// Environment variable holding the current point for shell scripts.
pub const PATCH_POINT_ENV: &str = "STATICA_PATCH_POINT";

/// Environment variable holding the build root for shell scripts.
pub const BUILD_ROOT_ENV: &str = "STATICA_BUILD_ROOT";

/// Environment variable holding the path of the loaded `config.status`.
pub const CONFIG_STATUS_ENV: &str = "STATICA_CONFIG_STATUS";

/// A shell script prints `statica:interrupt <code> [message]` to interrupt.
pub const INTERRUPT_DIRECTIVE: &str = "statica:interrupt";

/// What a patch script sees while it runs.
pub struct PatchContext<'a> {
    pub point: &'a PatchPoint,
    pub build_root: &'a Path,
    pub runner: &'a dyn CommandRunner,
    pub status: Option<&'a BuildStatus>,
}

/// A script run at every patch point.
pub trait PatchScript: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Run at `ctx.point`. Returning an interrupt hands the decision to the
    /// driver.
    fn run(&self, ctx: &PatchContext<'_>) -> Result<(), PatchError>;
}

/// In-process patch script backed by a closure.
pub struct FnPatch<F> {
    name: String,
    func: F,
}

impl<F> FnPatch<F>
where
    F: Fn(&PatchContext<'_>) -> Result<(), PatchError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        FnPatch {
            name: name.into(),
            func,
        }
    }
}

impl<F> PatchScript for FnPatch<F>
where
    F: Fn(&PatchContext<'_>) -> Result<(), PatchError> + Send + Sync,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&self, ctx: &PatchContext<'_>) -> Result<(), PatchError> {
        (self.func)(ctx)
    }
}

/// External script file run with `sh`.
///
/// The script gets the point in `STATICA_PATCH_POINT` and usually checks it
/// first, doing nothing at points it does not care about.
#[derive(Debug, Clone)]
pub struct ShellPatchScript {
    path: PathBuf,
}

impl ShellPatchScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ShellPatchScript { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PatchScript for ShellPatchScript {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn run(&self, ctx: &PatchContext<'_>) -> Result<(), PatchError> {
        if !self.path.is_file() {
            return Err(PatchError::ScriptMissing(self.path.clone()));
        }

        let mut env = vec![
            (PATCH_POINT_ENV.to_string(), ctx.point.to_string()),
            (
                BUILD_ROOT_ENV.to_string(),
                ctx.build_root.display().to_string(),
            ),
        ];
        if let Some(status) = ctx.status {
            env.push((
                CONFIG_STATUS_ENV.to_string(),
                status.path().display().to_string(),
            ));
        }

        let cwd = ctx.build_root.is_dir().then_some(ctx.build_root);
        let cmd = format!("sh {}", shell_quote(&self.path.to_string_lossy()));
        let output = ctx
            .runner
            .run_in(&cmd, cwd, &env)
            .map_err(|e| PatchError::ScriptFailed {
                script: self.name(),
                point: ctx.point.to_string(),
                reason: format!("{:#}", e),
            })?;

        if let Some(signal) = output.lines.iter().find_map(|line| parse_directive(line)) {
            return Err(signal.into());
        }
        if !output.success() {
            return Err(PatchError::ScriptFailed {
                script: self.name(),
                point: ctx.point.to_string(),
                reason: format!("exit code {}", output.code),
            });
        }
        Ok(())
    }
}

/// Parse an interrupt directive line. Lines with a malformed code are
/// ignored.
pub fn parse_directive(line: &str) -> Option<InterruptSignal> {
    let rest = line.trim().strip_prefix(INTERRUPT_DIRECTIVE)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    let (code, message) = match rest.split_once(char::is_whitespace) {
        Some((code, message)) => (code, Some(message.trim().to_string())),
        None => (rest, None),
    };
    match code.parse::<i32>() {
        Ok(code) => Some(InterruptSignal::new(code, message)),
        Err(_) => {
            tracing::warn!("Ignoring malformed interrupt directive: {}", line.trim());
            None
        }
    }
}

/// How a phase ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    /// A script interrupted with code 0; the phase body did not finish.
    ShortCircuited(InterruptSignal),
}

/// Runs registered patch scripts at each point the pipeline reaches.
pub struct PatchDriver {
    registry: PatchPointRegistry,
    scripts: Vec<Box<dyn PatchScript>>,
    runner: Arc<dyn CommandRunner>,
    build_root: PathBuf,
    status: Option<BuildStatus>,
    current: Mutex<Option<PatchPoint>>,
}

impl PatchDriver {
    pub fn new(runner: Arc<dyn CommandRunner>, build_root: impl Into<PathBuf>) -> Self {
        PatchDriver {
            registry: PatchPointRegistry::new(),
            scripts: Vec::new(),
            runner,
            build_root: build_root.into(),
            status: None,
            current: Mutex::new(None),
        }
    }

    /// Scripts run in the order they are added.
    pub fn with_script(mut self, script: Box<dyn PatchScript>) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn with_status(mut self, status: BuildStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn registry(&self) -> &PatchPointRegistry {
        &self.registry
    }

    /// The point currently being emitted, if any.
    pub fn current_point(&self) -> Option<PatchPoint> {
        self.lock_current().clone()
    }

    /// Run every script at `point`. The first error stops the remaining
    /// scripts and is returned.
    pub fn emit(&self, point: &str) -> Result<(), PatchError> {
        let point = self.registry.declare_point(point);
        if self.scripts.is_empty() {
            return Ok(());
        }

        *self.lock_current() = Some(point.clone());
        let result = self.run_scripts(&point);
        *self.lock_current() = None;
        result
    }

    fn run_scripts(&self, point: &PatchPoint) -> Result<(), PatchError> {
        let ctx = PatchContext {
            point,
            build_root: &self.build_root,
            runner: self.runner.as_ref(),
            status: self.status.as_ref(),
        };

        for script in &self.scripts {
            tracing::debug!("Applying patch script {} at {}", script.name(), point);
            match script.run(&ctx) {
                Ok(()) => {}
                Err(PatchError::Interrupted(signal)) => {
                    log_interrupt(&script.name(), &signal);
                    return Err(PatchError::Interrupted(signal));
                }
                Err(e) => {
                    tracing::error!("Patch script {} failed to run", script.name());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Emit `point` and then run `body`, inside the interrupt boundary.
    ///
    /// A code 0 interrupt from a script or from `body` ends the phase with
    /// [`PhaseOutcome::ShortCircuited`]; any other error is returned.
    pub fn run_phase<F>(&self, point: &str, body: F) -> Result<PhaseOutcome, PatchError>
    where
        F: FnOnce() -> Result<(), PatchError>,
    {
        match self.emit(point).and_then(|()| body()) {
            Ok(()) => Ok(PhaseOutcome::Completed),
            Err(PatchError::Interrupted(signal)) if signal.is_soft_stop() => {
                tracing::info!("Phase {} short-circuited", point);
                Ok(PhaseOutcome::ShortCircuited(signal))
            }
            Err(e) => Err(e),
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<PatchPoint>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn log_interrupt(script: &str, signal: &InterruptSignal) {
    let detail = signal
        .message()
        .map(|m| format!(": {}", m))
        .unwrap_or_else(|| ".".to_string());
    if signal.is_soft_stop() {
        tracing::info!("Patch script {} interrupted{}", script, detail);
    } else {
        tracing::error!(
            "Patch script {} interrupted with error code [{}]{}",
            script,
            signal.code(),
            detail
        );
    }
}
