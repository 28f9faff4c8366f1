//! VIC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, VicError>;

/// Top-level error type for the video integrity checker.
#[derive(Debug, Error)]
pub enum VicError {
    #[error("[VIC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[VIC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[VIC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[VIC-2001] scan root not found: {path}")]
    RootNotFound { path: PathBuf },

    #[error("[VIC-2002] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[VIC-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[VIC-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[VIC-2103] scan history store unusable at {path}: {details}")]
    HistoryCorrupt { path: PathBuf, details: String },

    #[error("[VIC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[VIC-3101] analysis tool invocation failed for {path}: {details}")]
    Invocation { path: PathBuf, details: String },

    #[error("[VIC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

/// Coarse error taxonomy used to decide how far an error may propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad root path or permissions. Aborts the run before scanning.
    Discovery,
    /// Invalid settings. Aborts the run before any task is submitted.
    Configuration,
    /// Per-task subprocess failure. Converted to a scan outcome.
    Invocation,
    /// History persistence failure. Logged; never fails the run.
    HistoryStore,
    /// Anything else.
    Runtime,
}

impl VicError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "VIC-1001",
            Self::MissingConfig { .. } => "VIC-1002",
            Self::ConfigParse { .. } => "VIC-1003",
            Self::RootNotFound { .. } => "VIC-2001",
            Self::PermissionDenied { .. } => "VIC-2002",
            Self::Serialization { .. } => "VIC-2101",
            Self::Sql { .. } => "VIC-2102",
            Self::HistoryCorrupt { .. } => "VIC-2103",
            Self::Io { .. } => "VIC-3002",
            Self::Invocation { .. } => "VIC-3101",
            Self::Runtime { .. } => "VIC-3900",
        }
    }

    /// Taxonomy bucket for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::RootNotFound { .. } | Self::PermissionDenied { .. } => ErrorCategory::Discovery,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. } => {
                ErrorCategory::Configuration
            }
            Self::Invocation { .. } => ErrorCategory::Invocation,
            Self::Sql { .. } | Self::HistoryCorrupt { .. } => ErrorCategory::HistoryStore,
            Self::Serialization { .. } | Self::Io { .. } | Self::Runtime { .. } => {
                ErrorCategory::Runtime
            }
        }
    }

    /// Whether this error must abort a scan run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Discovery | ErrorCategory::Configuration
        )
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Sql { .. } | Self::Invocation { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for VicError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for VicError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for VicError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
