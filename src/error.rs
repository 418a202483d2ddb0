//! Acquisition Link Error Types
//!
//! Core error types shared across the protocol, acquisition and storage layers.

use thiserror::Error;

/// Result type for solarlink operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Acquisition link errors
#[derive(Debug, Error, Clone)]
pub enum LinkError {
    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied argument out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed or corrupt Modbus frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Legitimate Modbus exception response from the slave
    #[error("Modbus exception 0x{code:02X}: {}", crate::protocol::frame::exception_message(*code))]
    ModbusException {
        /// Exception code from the response PDU
        code: u8,
    },

    /// Transport-level failure (HTTP status, timeout, malformed envelope)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Response did not match the request (echo or count mismatch)
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Durable store read/write error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        LinkError::Config(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        LinkError::InvalidArgument(msg.into())
    }

    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        LinkError::InvalidFrame(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        LinkError::Transport(msg.into())
    }

    pub fn protocol_mismatch(msg: impl Into<String>) -> Self {
        LinkError::ProtocolMismatch(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        LinkError::Storage(msg.into())
    }

    /// Exception code carried by a Modbus exception response, if any
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            LinkError::ModbusException { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for LinkError {
    fn from(err: sqlx::Error) -> Self {
        LinkError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinkError::Transport(format!("request timed out: {err}"))
        } else {
            LinkError::Transport(err.to_string())
        }
    }
}
