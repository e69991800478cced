//! Registry mapping download type keys to strategies.

use std::collections::BTreeMap;

use crate::sources::bitbucket::BitBucketTag;
use crate::sources::error::AcquireError;
use crate::sources::git::GitStrategy;
use crate::sources::github::{GitHubReleaseStrategy, GitHubTarball, HostedPackageBin};
use crate::sources::local::LocalDir;
use crate::sources::pecl::PeclStrategy;
use crate::sources::php::{Pie, PhpRelease};
use crate::sources::strategy::DownloadStrategy;
use crate::sources::web::{FileListStrategy, UrlStrategy};

/// Builds a fresh strategy for one acquisition.
pub type StrategyCtor = fn() -> Box<dyn DownloadStrategy>;

/// Download type key to strategy constructor. Read-only once built.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    entries: BTreeMap<String, StrategyCtor>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        StrategyRegistry::default()
    }

    /// Registry with every built-in download type.
    pub fn with_builtin() -> Self {
        StrategyRegistry::new()
            .with("bitbuckettag", || Box::new(BitBucketTag))
            .with("filelist", || Box::new(FileListStrategy))
            .with("git", || Box::new(GitStrategy))
            .with("ghrel", || Box::new(GitHubReleaseStrategy))
            .with("ghtar", || Box::new(GitHubTarball::releases()))
            .with("ghtagtar", || Box::new(GitHubTarball::tags()))
            .with("local", || Box::new(LocalDir))
            .with("pecl", || Box::new(PeclStrategy))
            .with("pie", || Box::new(Pie))
            .with("url", || Box::new(UrlStrategy))
            .with("php-release", || Box::new(PhpRelease))
            .with("hosted", || Box::new(HostedPackageBin))
    }

    /// Add or replace the strategy for `key`.
    pub fn with(mut self, key: &str, ctor: StrategyCtor) -> Self {
        self.entries.insert(key.to_string(), ctor);
        self
    }

    /// Construct the strategy registered for `key`.
    pub fn resolve(&self, key: &str) -> Result<Box<dyn DownloadStrategy>, AcquireError> {
        self.entries
            .get(key)
            .map(|ctor| ctor())
            .ok_or_else(|| AcquireError::UnknownDownloadType(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::error::AcquireErrorKind;

    #[test]
    fn test_every_builtin_key_resolves() {
        let registry = StrategyRegistry::with_builtin();
        let keys: Vec<_> = registry.keys().collect();
        assert_eq!(
            keys,
            vec![
                "bitbuckettag",
                "filelist",
                "ghrel",
                "ghtagtar",
                "ghtar",
                "git",
                "hosted",
                "local",
                "pecl",
                "php-release",
                "pie",
                "url"
            ]
        );
        for key in keys {
            assert_eq!(registry.resolve(key).unwrap().name(), key);
        }
    }

    #[test]
    fn test_unknown_key() {
        let err = StrategyRegistry::with_builtin()
            .resolve("svn")
            .err()
            .unwrap();
        assert_eq!(err.kind(), AcquireErrorKind::UnknownDownloadType);
    }

    #[test]
    fn test_tarball_keys_are_distinct_entries() {
        let registry = StrategyRegistry::with_builtin();
        assert!(registry.contains("ghtar"));
        assert!(registry.contains("ghtagtar"));
        assert_ne!(
            registry.resolve("ghtar").unwrap().name(),
            registry.resolve("ghtagtar").unwrap().name()
        );
    }

    #[test]
    fn test_custom_entry() {
        let registry = StrategyRegistry::new().with("mirror", || Box::new(UrlStrategy));
        assert!(registry.resolve("mirror").is_ok());
        assert!(registry.resolve("git").is_err());
    }
}
