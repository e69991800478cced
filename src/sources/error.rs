//! Source acquisition errors.

use std::fmt;

use thiserror::Error;

/// Coarse classification of an [`AcquireError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireErrorKind {
    UnknownDownloadType,
    InvalidSpec,
    FetchTransient,
    FetchPermanent,
    ChecksumMismatch,
    Io,
}

impl fmt::Display for AcquireErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquireErrorKind::UnknownDownloadType => "unknown download type",
            AcquireErrorKind::InvalidSpec => "invalid spec",
            AcquireErrorKind::FetchTransient => "transient fetch failure",
            AcquireErrorKind::FetchPermanent => "fetch failure",
            AcquireErrorKind::ChecksumMismatch => "checksum mismatch",
            AcquireErrorKind::Io => "I/O failure",
        };
        f.write_str(name)
    }
}

/// Failure to acquire one package's source.
#[derive(Debug, Clone, Error)]
pub enum AcquireError {
    #[error("unknown download type `{0}`")]
    UnknownDownloadType(String),

    #[error("invalid source spec: option `{field}` {reason}")]
    InvalidSpec { field: String, reason: String },

    #[error("temporary failure fetching {url}: {reason}")]
    FetchTransient { url: String, reason: String },

    #[error("failed to fetch {url}: {reason}")]
    FetchPermanent { url: String, reason: String },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    Io(String),
}

impl AcquireError {
    /// A required option is absent.
    pub fn missing(field: &str) -> Self {
        AcquireError::InvalidSpec {
            field: field.to_string(),
            reason: "is required".to_string(),
        }
    }

    /// An option is present but unusable.
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        AcquireError::InvalidSpec {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transient(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        AcquireError::FetchTransient {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn permanent(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        AcquireError::FetchPermanent {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a filesystem or extraction failure, keeping its context chain.
    pub fn io(err: anyhow::Error) -> Self {
        AcquireError::Io(format!("{:#}", err))
    }

    pub fn kind(&self) -> AcquireErrorKind {
        match self {
            AcquireError::UnknownDownloadType(_) => AcquireErrorKind::UnknownDownloadType,
            AcquireError::InvalidSpec { .. } => AcquireErrorKind::InvalidSpec,
            AcquireError::FetchTransient { .. } => AcquireErrorKind::FetchTransient,
            AcquireError::FetchPermanent { .. } => AcquireErrorKind::FetchPermanent,
            AcquireError::ChecksumMismatch { .. } => AcquireErrorKind::ChecksumMismatch,
            AcquireError::Io(_) => AcquireErrorKind::Io,
        }
    }

    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == AcquireErrorKind::FetchTransient
    }
}
