//! Check and fix declarations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::toolchain::OsFamily;

/// Level given to checks that do not ask for one.
pub const DEFAULT_LEVEL: i32 = 100;

/// What a check routine found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The requirement holds, optionally with a detail such as a version.
    Pass(Option<String>),
    /// The requirement does not hold. `fix_args` are handed to the paired fix.
    Fail { reason: String, fix_args: Vec<String> },
    /// The check does not apply here.
    Skip(String),
}

impl CheckOutcome {
    pub fn pass() -> Self {
        CheckOutcome::Pass(None)
    }

    pub fn pass_with(detail: impl Into<String>) -> Self {
        CheckOutcome::Pass(Some(detail.into()))
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        CheckOutcome::Fail {
            reason: reason.into(),
            fix_args: Vec::new(),
        }
    }

    pub fn fail_with_args(reason: impl Into<String>, fix_args: Vec<String>) -> Self {
        CheckOutcome::Fail {
            reason: reason.into(),
            fix_args,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        CheckOutcome::Skip(reason.into())
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, CheckOutcome::Pass(_))
    }
}

pub type CheckFn = Arc<dyn Fn() -> Result<CheckOutcome> + Send + Sync>;
pub type FixFn = Arc<dyn Fn(&[String]) -> Result<()> + Send + Sync>;
pub type Precondition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Metadata of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDecl {
    pub name: String,
    /// Only valid on this OS family
    pub limit_os: Option<OsFamily>,
    /// Lower levels run first
    pub level: i32,
    /// Never auto-fixed; the user gets guidance instead
    pub manual: bool,
    /// Fix item name; defaults to the check name
    pub fix: Option<String>,
    pub guidance: Option<String>,
}

impl CheckDecl {
    pub fn new(name: impl Into<String>) -> Self {
        CheckDecl {
            name: name.into(),
            limit_os: None,
            level: DEFAULT_LEVEL,
            manual: false,
            fix: None,
            guidance: None,
        }
    }

    pub fn limit_os(mut self, os: OsFamily) -> Self {
        self.limit_os = Some(os);
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn guidance(mut self, text: impl Into<String>) -> Self {
        self.guidance = Some(text.into());
        self
    }

    /// Name of the fix item this check pairs with.
    pub fn fix_name(&self) -> &str {
        self.fix.as_deref().unwrap_or(&self.name)
    }

    pub fn applies_to(&self, os: OsFamily) -> bool {
        self.limit_os.map_or(true, |limit| limit == os)
    }
}

/// A declared check bound to its routine.
#[derive(Clone)]
pub struct CheckItem {
    pub decl: CheckDecl,
    routine: CheckFn,
}

impl CheckItem {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn run(&self) -> Result<CheckOutcome> {
        (self.routine)()
    }
}

impl fmt::Debug for CheckItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckItem").field("decl", &self.decl).finish()
    }
}

/// A named remediation routine.
#[derive(Clone)]
pub struct FixItem {
    pub name: String,
    routine: FixFn,
}

impl FixItem {
    pub fn run(&self, args: &[String]) -> Result<()> {
        (self.routine)(args)
    }
}

/// Checks that are left out of the valid list unless `precondition` holds.
#[derive(Clone)]
pub struct OptionalCheck {
    pub checks: BTreeSet<String>,
    precondition: Precondition,
}

impl OptionalCheck {
    pub fn is_enabled(&self) -> bool {
        (self.precondition)()
    }
}

/// Every declared check, fix and optional group, in declaration order.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: Vec<CheckItem>,
    fixes: BTreeMap<String, FixItem>,
    optional: Vec<OptionalCheck>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        CheckRegistry::default()
    }

    /// Declare a check.
    pub fn check<F>(&mut self, decl: CheckDecl, routine: F) -> &mut Self
    where
        F: Fn() -> Result<CheckOutcome> + Send + Sync + 'static,
    {
        self.checks.push(CheckItem {
            decl,
            routine: Arc::new(routine),
        });
        self
    }

    /// Declare several checks sharing one routine, e.g. the same check
    /// limited to different OS families.
    pub fn check_each<F>(&mut self, decls: Vec<CheckDecl>, routine: F) -> &mut Self
    where
        F: Fn() -> Result<CheckOutcome> + Send + Sync + 'static,
    {
        let routine: CheckFn = Arc::new(routine);
        for decl in decls {
            self.checks.push(CheckItem {
                decl,
                routine: Arc::clone(&routine),
            });
        }
        self
    }

    /// Declare a fix. Fix names are unique.
    pub fn fix<F>(&mut self, name: &str, routine: F) -> Result<&mut Self>
    where
        F: Fn(&[String]) -> Result<()> + Send + Sync + 'static,
    {
        if self.fixes.contains_key(name) {
            bail!("fix item `{}` is declared twice", name);
        }
        self.fixes.insert(
            name.to_string(),
            FixItem {
                name: name.to_string(),
                routine: Arc::new(routine),
            },
        );
        Ok(self)
    }

    /// Make `checks` conditional on `precondition`.
    pub fn optional<F>(&mut self, checks: &[&str], precondition: F) -> &mut Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.optional.push(OptionalCheck {
            checks: checks.iter().map(|c| c.to_string()).collect(),
            precondition: Arc::new(precondition),
        });
        self
    }

    pub fn checks(&self) -> &[CheckItem] {
        &self.checks
    }

    pub fn optional_groups(&self) -> &[OptionalCheck] {
        &self.optional
    }

    /// The fix paired with `decl`, if one is declared.
    pub fn fix_for(&self, decl: &CheckDecl) -> Option<&FixItem> {
        self.fixes.get(decl.fix_name())
    }

    pub fn fix_names(&self) -> impl Iterator<Item = &str> {
        self.fixes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decl_defaults() {
        let decl = CheckDecl::new("if git is installed");
        assert_eq!(decl.level, DEFAULT_LEVEL);
        assert!(!decl.manual);
        assert_eq!(decl.fix_name(), "if git is installed");
        assert!(decl.applies_to(OsFamily::Windows));

        let decl = decl.limit_os(OsFamily::Linux).fix("install-git");
        assert_eq!(decl.fix_name(), "install-git");
        assert!(decl.applies_to(OsFamily::Linux));
        assert!(!decl.applies_to(OsFamily::Darwin));
    }

    #[test]
    fn test_check_each_shares_routine() {
        let mut registry = CheckRegistry::new();
        registry.check_each(
            vec![
                CheckDecl::new("re2c").limit_os(OsFamily::Linux),
                CheckDecl::new("re2c").limit_os(OsFamily::Darwin),
            ],
            || Ok(CheckOutcome::pass_with("3.1")),
        );
        assert_eq!(registry.checks().len(), 2);
        for item in registry.checks() {
            assert_eq!(item.run().unwrap(), CheckOutcome::pass_with("3.1"));
        }
    }

    #[test]
    fn test_duplicate_fix_rejected() {
        let mut registry = CheckRegistry::new();
        registry.fix("install-tools", |_| Ok(())).unwrap();
        assert!(registry.fix("install-tools", |_| Ok(())).is_err());
    }

    #[test]
    fn test_fix_for_uses_declared_name() {
        let mut registry = CheckRegistry::new();
        registry.fix("install-tools", |_| Ok(())).unwrap();
        assert!(registry
            .fix_for(&CheckDecl::new("tools").fix("install-tools"))
            .is_some());
        assert!(registry.fix_for(&CheckDecl::new("tools")).is_none());
    }
}
