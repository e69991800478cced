//! Glob-style matching and loose version comparison.

use std::cmp::Ordering;

use glob::{MatchOptions, Pattern};
use semver::Version;

/// Match `subject` against `pattern`, where `*` is the only wildcard and
/// every other character is literal.
///
/// The whole subject must match, case-insensitively. Returns the matched
/// subject, or `None` for a non-match.
pub fn match_pattern(pattern: &str, subject: &str) -> Option<String> {
    let escaped = pattern
        .split('*')
        .map(Pattern::escape)
        .collect::<Vec<_>>()
        .join("*");
    let compiled = Pattern::new(&escaped).ok()?;
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    compiled
        .matches_with(subject, options)
        .then(|| subject.to_string())
}

/// Parse a version string such as `3.18`, `v1.0.3` or `3.28.1-rc2` into a
/// semver version, padding missing components with zeros.
pub fn parse_loose_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches(['v', 'V']);
    let core = raw
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()?;
    let mut parts = core
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    parts.resize(3, 0);
    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// Order two version strings; unparseable versions sort below parseable ones.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_loose_version(a), parse_loose_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// True if `found` is at least `required`. Unparseable input is never enough.
pub fn version_at_least(found: &str, required: &str) -> bool {
    match (parse_loose_version(found), parse_loose_version(required)) {
        (Some(found), Some(required)) => found >= required,
        _ => false,
    }
}
