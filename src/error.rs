//! Error types and handling for the gateway
//!
//! Every fallible operation in the crate returns [`GatewayError`]. The
//! polling loop uses [`GatewayError::is_fatal`] to tell a dead serial line
//! apart from per-frame and per-cycle faults that it simply logs and skips.

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed configuration input
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serial line cannot be opened, read or written
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Candidate frame has the wrong size
    #[error("Frame length error: expected {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    /// Trailing CRC does not match the computed one
    #[error("Frame CRC error: expected {expected:#06x}, received {actual:#06x}")]
    FrameCrc { expected: u16, actual: u16 },

    /// No valid frame within the deadline
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Snapshot, battery or status file could not be written
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },
}

impl GatewayError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        GatewayError::Config {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        GatewayError::Transport {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        GatewayError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        GatewayError::Persistence {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        GatewayError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        GatewayError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the error means the serial line is gone.
    ///
    /// Everything else is recoverable within the polling loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }

    /// Whether the error is structural corruption of a single frame
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            GatewayError::FrameLength { .. } | GatewayError::FrameCrc { .. }
        )
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<tokio_serial::Error> for GatewayError {
    fn from(err: tokio_serial::Error) -> Self {
        GatewayError::transport(err.to_string())
    }
}
