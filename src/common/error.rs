//! Error types for the DAP bridge
//!
//! The variants mirror how a failure propagates: connection-fatal errors
//! (framing, adapter exit) terminate the session and fail every pending
//! request, while the rest are returned to the immediate caller only.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    // === Wire Errors ===
    #[error("DAP framing error: {0}")]
    Framing(String),

    #[error("DAP protocol violation: {message}")]
    ProtocolViolation {
        /// Sequence number of the request the offending frame answered, if known
        request_seq: Option<i64>,
        message: String,
    },

    // === Request Errors ===
    #[error("DAP request '{command}' (seq {seq}) timed out after {timeout_ms} ms")]
    RequestTimeout {
        command: String,
        seq: i64,
        timeout_ms: u64,
    },

    #[error("DAP request '{command}' failed: {message}")]
    AdapterError { command: String, message: String },

    #[error("Timed out after {timeout_ms} ms waiting for the program to stop. It may still be running")]
    AwaitTimeout { timeout_ms: u64 },

    // === Session Errors ===
    #[error("Cannot {action} while session is {current}; requires {required}")]
    InvalidState {
        action: String,
        current: String,
        required: String,
    },

    #[error("Debug session terminated: {0}")]
    SessionTerminated(String),

    #[error("No active frame. Fetch the stack trace ('bt') or select a frame first")]
    NoActiveFrame,

    #[error("Frame {0} is not part of the current stop. Fetch the stack trace again")]
    FrameNotFound(i64),

    #[error("Variables reference {0} is not valid for the current stop")]
    UnknownReference(i64),

    // === Adapter Errors ===
    #[error("Debug adapter failed to start: {0}")]
    AdapterStartFailed(String),

    // === Breakpoint Errors ===
    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    #[error("No breakpoint at {path}:{line}")]
    BreakpointNotFound { path: String, line: u32 },

    #[error("Source file '{0}' not found (also searched the configured source directories)")]
    SourceNotFound(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, current: impl ToString, required: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            current: current.to_string(),
            required: required.to_string(),
        }
    }

    /// Create an adapter error from a failed response
    pub fn adapter_error(command: &str, message: &str) -> Self {
        Self::AdapterError {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(request_seq: Option<i64>, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            request_seq,
            message: message.into(),
        }
    }

    /// Whether this error is fatal to the adapter connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Framing(_) | Error::Io(_))
    }

    /// Stable code for the outward command layer
    pub fn code(&self) -> &'static str {
        match self {
            Error::Framing(_) => "FRAMING_ERROR",
            Error::ProtocolViolation { .. } => "PROTOCOL_VIOLATION",
            Error::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            Error::AdapterError { .. } => "ADAPTER_ERROR",
            Error::AwaitTimeout { .. } => "AWAIT_TIMEOUT",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::SessionTerminated(_) => "SESSION_TERMINATED",
            Error::NoActiveFrame => "NO_ACTIVE_FRAME",
            Error::FrameNotFound(_) => "FRAME_NOT_FOUND",
            Error::UnknownReference(_) => "UNKNOWN_REFERENCE",
            Error::AdapterStartFailed(_) => "ADAPTER_START_FAILED",
            Error::InvalidLocation(_) => "INVALID_LOCATION",
            Error::BreakpointNotFound { .. } => "BREAKPOINT_NOT_FOUND",
            Error::SourceNotFound(_) => "SOURCE_NOT_FOUND",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::TestAssertion(_) => "TEST_ASSERTION",
            _ => "INTERNAL_ERROR",
        }
    }
}

/// Serializable error projection handed to the outward command layer
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorReport {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message_names_both_states() {
        let err = Error::invalid_state("step over", "running", "paused");
        assert_eq!(
            err.to_string(),
            "Cannot step over while session is running; requires paused"
        );
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn test_report_carries_code_and_message() {
        let err = Error::adapter_error("evaluate", "name 'x' is not defined");
        let report = ErrorReport::from(&err);
        assert_eq!(report.code, "ADAPTER_ERROR");
        assert!(report.message.contains("name 'x' is not defined"));
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(Error::Framing("bad header".into()).is_fatal());
        assert!(!Error::NoActiveFrame.is_fatal());
        assert!(!Error::protocol_violation(Some(3), "unmatched").is_fatal());
    }
}
