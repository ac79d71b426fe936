//! Error types for Smart Detect

use thiserror::Error;

/// Errors returned by the fallible engine operations.
///
/// Sensor acquisition failures are not part of this enum: they never reach
/// the host as errors and are reported as `*_unavailable` events instead.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("No live position available")]
    NoPosition,

    #[error("Unknown detection module: {0}")]
    UnknownModule(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Why a sensor could not be acquired.
///
/// Terminal for the current enable cycle; the host must enable the module
/// again to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Acquisition failed: {0}")]
    Failed(String),
}

impl AcquisitionError {
    /// Reason string carried by the `*_unavailable` event.
    pub fn reason(&self) -> &str {
        match self {
            AcquisitionError::PermissionDenied(r)
            | AcquisitionError::Unsupported(r)
            | AcquisitionError::Failed(r) => r,
        }
    }
}
