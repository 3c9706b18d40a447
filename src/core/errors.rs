//! SBIN-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SbinError>;

/// Top-level error type for the sorting engine.
///
/// "No bin could be found" is deliberately absent: an unresolved item is a
/// normal outcome carried by [`crate::classify::resolver::Resolution`].
#[derive(Debug, Error)]
pub enum SbinError {
    #[error("[SBIN-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SBIN-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SBIN-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SBIN-2001] invalid bin {color:?} (valid: {valid})")]
    InvalidBin { color: String, valid: String },

    #[error("[SBIN-2002] bin {color:?} not found in store")]
    BinNotFound { color: String },

    #[error("[SBIN-2003] invalid detection for {item:?}: {details}")]
    InvalidDetection { item: String, details: String },

    #[error("[SBIN-2101] storage failure in {context}: {details}")]
    Storage {
        context: &'static str,
        details: String,
    },

    #[error("[SBIN-2102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SBIN-3001] actuator hardware unavailable on {port}: {details}")]
    HardwareUnavailable { port: String, details: String },

    #[error("[SBIN-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SBIN-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SBIN-3004] {operation} timed out after {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("[SBIN-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SbinError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SBIN-1001",
            Self::MissingConfig { .. } => "SBIN-1002",
            Self::ConfigParse { .. } => "SBIN-1003",
            Self::InvalidBin { .. } => "SBIN-2001",
            Self::BinNotFound { .. } => "SBIN-2002",
            Self::InvalidDetection { .. } => "SBIN-2003",
            Self::Storage { .. } => "SBIN-2101",
            Self::Serialization { .. } => "SBIN-2102",
            Self::HardwareUnavailable { .. } => "SBIN-3001",
            Self::Io { .. } => "SBIN-3002",
            Self::ChannelClosed { .. } => "SBIN-3003",
            Self::Timeout { .. } => "SBIN-3004",
            Self::Runtime { .. } => "SBIN-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Nothing in the engine retries on its own; this is advice for the
    /// caller or supervisor.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::HardwareUnavailable { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Timeout { .. }
                | Self::Runtime { .. }
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

    /// Storage error with a fixed context label.
    #[must_use]
    pub fn storage(context: &'static str, details: impl Into<String>) -> Self {
        Self::Storage {
            context,
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for SbinError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SbinError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SbinError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
