//! Error taxonomy for a reconciliation pass.
//!
//! `ConfigError` and `ValidationError` are raised before any unit is touched.
//! `AdapterError` comes back from the service adapter mid-pass and is recorded
//! in the `ReconciliationResult` rather than aborting the pass.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Malformed declarative configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// YAML syntax error, unknown key or wrong value type. `field` is the key
    /// the serde message names, when it names one.
    #[error("invalid configuration: {message}")]
    Parse {
        field: Option<String>,
        message: String,
    },
    #[error("{field}: value {value} out of range ({reason})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        reason: &'static str,
    },
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// The configuration key this error is about, when it names one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::OutOfRange { field, .. } | ConfigError::Invalid { field, .. } => {
                Some(field)
            }
            ConfigError::Parse { field, .. } => field.as_deref(),
            ConfigError::Io { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// A locally detectable violation of a fleet invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("node_id is unset; every node needs a fleet-unique id")]
    NodeIdUnset,
    #[error("controller_port {0} is not a valid TCP port (1-65535)")]
    PortOutOfRange(u32),
    #[error("workers {0} exceeds the per-node limit of {max}", max = crate::config::MAX_WORKERS)]
    TooManyWorkers(u32),
    #[error("controller_ip {0:?} is neither an IP address nor a host name")]
    BadControllerAddress(String),
    #[error("{0} must not be empty")]
    EmptyIdentity(&'static str),
    #[error("{field} must be an absolute path, got {path:?}")]
    RelativePath { field: &'static str, path: String },
}

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

/// Classification of a service adapter failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Timeout,
    Unavailable,
    PermissionDenied,
    NotFound,
    Failed,
}

/// A service adapter operation failed.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        AdapterError {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Timeout, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::PermissionDenied, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Failed, message)
    }

    /// Transient failures are worth retrying; everything else is surfaced at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            AdapterErrorKind::Timeout | AdapterErrorKind::Unavailable
        )
    }
}

// ---------------------------------------------------------------------------
// ReconcileError
// ---------------------------------------------------------------------------

/// Errors that abort a pass before any unit is modified.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Only from dry runs; a real pass reports adapter failures in its result.
    #[error("cannot observe service state: {0}")]
    Observe(#[from] AdapterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AdapterError::timeout("install timed out").is_transient());
        assert!(AdapterError::new(AdapterErrorKind::Unavailable, "bus").is_transient());
        assert!(!AdapterError::permission_denied("no").is_transient());
        assert!(!AdapterError::failed("exit 1").is_transient());
        assert!(!AdapterError::new(AdapterErrorKind::NotFound, "x").is_transient());
    }

    #[test]
    fn config_error_names_field() {
        let e = ConfigError::OutOfRange {
            field: "controller_port",
            value: 70000,
            reason: "must be 1-65535",
        };
        assert_eq!(e.field(), Some("controller_port"));
        assert!(e.to_string().contains("controller_port"));
        assert!(e.to_string().contains("70000"));
    }

    #[test]
    fn adapter_error_display() {
        let e = AdapterError::permission_denied("Access denied");
        assert_eq!(e.to_string(), "PermissionDenied: Access denied");
    }
}
