//! # Error Types
//!
//! Custom error types for the ground-station core using `thiserror`.
//!
//! Frames that do not match the telemetry schema are not errors; they are
//! reported as [`crate::telemetry::decoder::DecodeResult::NotTelemetry`].
//! Subscriber faults never surface here either: the dispatcher swallows
//! and logs them.

use thiserror::Error;

/// Main error type for the ground-station core
#[derive(Debug, Error)]
pub enum GroundError {
    /// Serial port open/read/write failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Structured log or raw archive could not be opened or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Uplink intent refused because its precondition does not hold
    #[error("Guard rejected: {0}")]
    GuardRejected(String),

    /// Live link and dummy mode requested at the same time, or a session is already running
    #[error("Mode conflict: {0}")]
    ModeConflict(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// CSV encoding errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GroundError {
    /// Whether the link should fall back to the reconnect loop after this error
    pub fn is_transport(&self) -> bool {
        matches!(self, GroundError::Transport(_))
    }
}

/// Result type alias for the ground-station core
pub type Result<T> = std::result::Result<T, GroundError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GroundError::GuardRejected("SIMP requires SIM ENABLE and ACTIVATE".to_string());
        assert_eq!(
            err.to_string(),
            "Guard rejected: SIMP requires SIM ENABLE and ACTIVATE"
        );

        let err = GroundError::Transport("Failed to open /dev/ttyUSB9".to_string());
        assert!(err.to_string().starts_with("Transport error"));
        assert!(err.is_transport());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: GroundError = io.into();
        assert!(matches!(err, GroundError::Io(_)));
        assert!(!err.is_transport());
    }
}
