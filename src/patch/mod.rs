//! Patch points: named phases of the build pipeline where external scripts
//! may look at the build and redirect it.
//!
//! A script asks for an interrupt by constructing an [`InterruptSignal`] with
//! [`interrupt`] and returning it as an error. Constructing a signal never
//! stops anything by itself; the [`PatchDriver`] decides what it means:
//!
//! - code 0 short-circuits the current phase and the pipeline continues
//! - any other code aborts the pipeline with that exit code

pub mod driver;
pub mod status;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub use driver::{
    FnPatch, PatchContext, PatchDriver, PatchScript, PhaseOutcome, ShellPatchScript,
    INTERRUPT_DIRECTIVE, PATCH_POINT_ENV,
};
pub use status::BuildStatus;

/// Points emitted by the build pipeline, in pipeline order.
pub const WELL_KNOWN_POINTS: &[&str] = &[
    "before-php-extract",
    "after-php-extract",
    "before-micro-extract",
    "after-micro-extract",
    "before-exts-extract",
    "after-exts-extract",
    "before-libs-extract",
    "after-libs-extract",
    "before-php-buildconf",
    "before-php-configure",
    "before-php-make",
];

/// Identifier of a pipeline phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PatchPoint(String);

impl PatchPoint {
    pub fn new(name: impl Into<String>) -> Self {
        PatchPoint(name.into())
    }

    /// `before-library[<pkg>]-extract`
    pub fn before_library(pkg: &str) -> Self {
        PatchPoint(format!("before-library[{}]-extract", pkg))
    }

    /// `after-library[<pkg>]-extract`
    pub fn after_library(pkg: &str) -> Self {
        PatchPoint(format!("after-library[{}]-extract", pkg))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Package name of a per-library extract point.
    pub fn library(&self) -> Option<&str> {
        ["before-library[", "after-library["]
            .iter()
            .find_map(|prefix| self.0.strip_prefix(prefix))
            .and_then(|rest| rest.strip_suffix("]-extract"))
            .filter(|pkg| !pkg.is_empty() && !pkg.contains(['[', ']']))
    }
}

impl fmt::Display for PatchPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatchPoint {
    fn from(name: &str) -> Self {
        PatchPoint::new(name)
    }
}

/// A request from a patch script to stop the current phase or the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct InterruptSignal {
    code: i32,
    message: Option<String>,
}

impl InterruptSignal {
    pub fn new(code: i32, message: Option<String>) -> Self {
        InterruptSignal {
            code,
            message: message.filter(|m| !m.trim().is_empty()),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Code 0: the phase ends early on purpose and the pipeline goes on.
    pub fn is_soft_stop(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for InterruptSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(ref message) => write!(f, "interrupted with code {}: {}", self.code, message),
            None => write!(f, "interrupted with code {}", self.code),
        }
    }
}

/// Construct an interrupt. The caller decides whether to return it.
pub fn interrupt(code: i32, message: Option<&str>) -> InterruptSignal {
    InterruptSignal::new(code, message.map(str::to_string))
}

/// Failure while running patch scripts.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Interrupted(#[from] InterruptSignal),

    #[error("patch script {} does not exist", .0.display())]
    ScriptMissing(PathBuf),

    #[error("patch script {script} failed at {point}: {reason}")]
    ScriptFailed {
        script: String,
        point: String,
        reason: String,
    },
}

impl PatchError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PatchError::Interrupted(signal) => signal.code(),
            PatchError::ScriptMissing(_) | PatchError::ScriptFailed { .. } => 1,
        }
    }
}

/// Recognized point names. Used for logging only, never for gating.
#[derive(Debug, Clone)]
pub struct PatchPointRegistry {
    known: BTreeSet<String>,
}

impl Default for PatchPointRegistry {
    fn default() -> Self {
        PatchPointRegistry {
            known: WELL_KNOWN_POINTS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl PatchPointRegistry {
    pub fn new() -> Self {
        PatchPointRegistry::default()
    }

    /// Recognize an additional point name.
    pub fn with_point(mut self, name: &str) -> Self {
        self.known.insert(name.to_string());
        self
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name) || PatchPoint::new(name).library().is_some()
    }

    /// Mark entry into phase `name`. Unknown names are accepted.
    pub fn declare_point(&self, name: &str) -> PatchPoint {
        if !self.is_known(name) {
            tracing::debug!("Entering unrecognized patch point {}", name);
        }
        PatchPoint::new(name)
    }

    pub fn points(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }
}
