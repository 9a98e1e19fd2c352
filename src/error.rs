//! Error types for the URTP streaming pipeline

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Block source already running")]
    AlreadyRunning,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("platform right-shift of negative values is not arithmetic; UNICAM coding disabled")]
    ArithmeticShiftUnsupported,

    #[error("Invalid block length: {0} samples")]
    InvalidBlockLength(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Address resolution failed for {0}")]
    AddressResolution(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Send timed out")]
    Timeout,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Short datagram send: {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },

    #[error("No socket configured")]
    NoSocket,
}

impl NetworkError {
    /// Errors that mean the link itself is gone, as opposed to a transient
    /// failure that is worth retrying on the same socket.
    pub fn tears_connection(&self) -> bool {
        matches!(self, NetworkError::ConnectionLost(_) | NetworkError::NoSocket)
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
