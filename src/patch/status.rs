//! Configure results read from an autoconf `config.status`.
//!
//! Patch scripts at `before-php-make` use these to decide what to change.
//! A missing or unreadable file interrupts the pipeline: it means configure
//! has not run or failed half-way.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::patch::{interrupt, InterruptSignal};

/// Exit code used when configure results are unavailable.
pub const STATUS_UNAVAILABLE: i32 = 1;

/// Substitutions (`S["KEY"]`) and defines (`D["KEY"]`) from `config.status`.
#[derive(Debug, Clone, Default)]
pub struct BuildStatus {
    path: PathBuf,
    substs: BTreeMap<String, String>,
    defines: BTreeMap<String, String>,
}

impl BuildStatus {
    pub fn load(path: &Path) -> Result<Self, InterruptSignal> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            interrupt(
                STATUS_UNAVAILABLE,
                Some(&format!(
                    "cannot read {} ({}), run configure first",
                    path.display(),
                    e
                )),
            )
        })?;
        let status = BuildStatus::parse(path, &content);
        if status.substs.is_empty() && status.defines.is_empty() {
            return Err(interrupt(
                STATUS_UNAVAILABLE,
                Some(&format!("{} holds no configure results", path.display())),
            ));
        }
        tracing::debug!(
            "Loaded {} substitutions and {} defines from {}",
            status.substs.len(),
            status.defines.len(),
            path.display()
        );
        Ok(status)
    }

    /// Parse `content`. Unrecognized lines are ignored.
    pub fn parse(path: &Path, content: &str) -> Self {
        static ENTRY: OnceLock<Option<Regex>> = OnceLock::new();
        let mut status = BuildStatus {
            path: path.to_path_buf(),
            ..BuildStatus::default()
        };
        let Some(re) = ENTRY
            .get_or_init(|| Regex::new(r#"^([SD])\["([^"]+)"\]\s*=\s*"(.*)"\s*$"#).ok())
            .as_ref()
        else {
            return status;
        };

        // long values are split as "part"\<newline>"part"
        let joined = content.replace("\"\\\n\"", "");
        for line in joined.lines() {
            let Some(caps) = re.captures(line.trim_end()) else {
                continue;
            };
            let value = unescape(&caps[3]);
            match &caps[1] {
                "S" => status.substs.insert(caps[2].to_string(), value),
                _ => status.defines.insert(caps[2].to_string(), value.trim().to_string()),
            };
        }
        status
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value substituted for `@KEY@`.
    pub fn subst(&self, key: &str) -> Option<&str> {
        self.substs.get(key).map(String::as_str)
    }

    /// Value of a preprocessor define.
    pub fn define(&self, key: &str) -> Option<&str> {
        self.defines.get(key).map(String::as_str)
    }

    pub fn is_defined(&self, key: &str) -> bool {
        self.defines.contains_key(key)
    }

    /// Like [`subst`](Self::subst) but missing keys interrupt.
    pub fn require_subst(&self, key: &str) -> Result<&str, InterruptSignal> {
        self.subst(key).ok_or_else(|| {
            interrupt(
                STATUS_UNAVAILABLE,
                Some(&format!("{} has no value for {}", self.path.display(), key)),
            )
        })
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
