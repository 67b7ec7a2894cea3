//! Error types shared across the workspace.
//!
//! `NeuroError` is the primary error enum. Subsystems with richer failure
//! taxonomies (devices) carry a structured error with a kind enum so callers
//! can distinguish transient communication faults from permanent ones.

use thiserror::Error;

/// Convenience alias for results using the workspace error type.
pub type NeuroResult<T> = std::result::Result<T, NeuroError>;

/// Category of a device failure, used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Connection,
    Configuration,
    Streaming,
    Impedance,
    Timeout,
    NotSupported,
    InvalidTransition,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceErrorKind::Connection => "connection",
            DeviceErrorKind::Configuration => "configuration",
            DeviceErrorKind::Streaming => "streaming",
            DeviceErrorKind::Impedance => "impedance",
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::NotSupported => "not_supported",
            DeviceErrorKind::InvalidTransition => "invalid_transition",
        };
        write!(f, "{}", label)
    }
}

/// Structured device error with the device identity attached.
#[derive(Error, Debug, Clone)]
#[error("Device '{device_id}' {kind} error: {message}")]
pub struct DeviceError {
    pub device_id: String,
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(
        device_id: impl Into<String>,
        kind: DeviceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Primary error type for the neurostream platform.
///
/// # Error categories
///
/// 1. **Input errors** (`InvalidPacket`, `Buffer`) are dropped with a counter
///    at the ingestion boundary and never propagate past it.
/// 2. **Pipeline errors** (`Feature`, `Classifier`) isolate per classifier;
///    one failing pair never blocks its peers.
/// 3. **Ledger errors** (`Storage`, `Signature`, `ChainViolation`) isolate
///    per storage tier; a chain violation is logged as critical and is never
///    auto-repaired.
#[derive(Error, Debug)]
pub enum NeuroError {
    /// A sample packet failed shape validation (row count, non-finite rate).
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Ring-buffer operation failed (channel mismatch, empty window request).
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Feature extraction failed for one window.
    #[error("Feature extraction error in '{extractor}': {message}")]
    Feature { extractor: String, message: String },

    /// Classification failed for one feature map.
    #[error("Classifier error in '{classifier}': {message}")]
    Classifier { classifier: String, message: String },

    /// Structured device error.
    #[error("{0}")]
    Device(#[from] DeviceError),

    /// Ledger assembly or publication failed.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// A storage tier write failed after retries were exhausted.
    #[error("Storage tier '{tier}' error: {message}")]
    Storage { tier: String, message: String },

    /// Event signature missing or cryptographically invalid.
    #[error("Signature error: {0}")]
    Signature(String),

    /// Hash chain verification found a break.
    #[error("Chain violation at event index {index}")]
    ChainViolation { index: usize },

    /// Configuration value parsed but failed semantic validation.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_display() {
        let err = NeuroError::Device(DeviceError::new(
            "synthetic-0",
            DeviceErrorKind::Connection,
            "probe timed out",
        ));
        assert!(err
            .to_string()
            .contains("Device 'synthetic-0' connection error"));
    }

    #[test]
    fn chain_violation_display() {
        let err = NeuroError::ChainViolation { index: 3 };
        assert_eq!(err.to_string(), "Chain violation at event index 3");
    }
}
