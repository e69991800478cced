//! Linux distribution identification.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Distro families with a known package-install command.
const SUPPORTED_DISTROS: &[&str] = &[
    "alpine", "debian", "ubuntu", "deepin", "redhat", "centos", "arch",
];

/// Distribution id and version as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsRelease {
    pub dist: String,
    pub ver: String,
}

impl OsRelease {
    pub fn new(dist: impl Into<String>, ver: impl Into<String>) -> Self {
        OsRelease {
            dist: dist.into(),
            ver: ver.into(),
        }
    }

    /// Debian-style systems that install with apt.
    pub fn is_debian_like(&self) -> bool {
        matches!(self.dist.as_str(), "debian" | "ubuntu" | "deepin")
    }
}

/// Parse `/etc/os-release` content. Returns `None` without an `ID=` line.
///
/// CentOS reports itself as `redhat`.
pub fn parse_os_release(content: &str) -> Option<OsRelease> {
    let mut dist = None;
    let mut ver = None;
    for line in content.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("ID=") {
            dist = Some(unquote(value).to_ascii_lowercase());
        } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
            ver = Some(unquote(value).to_string());
        }
    }

    let dist = dist.filter(|d| !d.is_empty())?;
    let dist = if dist == "centos" {
        "redhat".to_string()
    } else {
        dist
    };
    Some(OsRelease {
        dist,
        ver: ver.unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Parse `/etc/centos-release` or `/etc/redhat-release` content.
pub fn parse_redhat_release(content: &str) -> Option<OsRelease> {
    static RELEASE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RELEASE
        .get_or_init(|| Regex::new(r"release\s+(\d+(?:\.\d+)*)").ok())
        .as_ref()?;
    content
        .lines()
        .find_map(|line| re.captures(line))
        .map(|caps| OsRelease::new("redhat", &caps[1]))
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Distro families this probe understands.
pub fn supported_distros() -> &'static [&'static str] {
    SUPPORTED_DISTROS
}

/// Package manager install command for a distro family.
pub fn install_command(dist: &str) -> Option<&'static str> {
    match dist.to_ascii_lowercase().as_str() {
        "debian" | "ubuntu" | "deepin" => Some("apt-get install -y"),
        "alpine" => Some("apk add"),
        "redhat" => Some("dnf install -y"),
        "centos" => Some("yum install -y"),
        "arch" => Some("pacman -S --noconfirm"),
        _ => None,
    }
}
