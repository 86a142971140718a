//! Error types for the LWACP protocol core.
//!
//! Protocol, transport and pairing failures are typed so callers can tell a
//! rejected argument from a dead link. Application glue (discovery, config,
//! TUI) uses `anyhow` on top of these.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while building, decoding or sending LWACP frames.
#[derive(Error, Debug)]
pub enum LwacpError {
    /// Value or arity rejected before any bytes were built.
    #[error("invalid parameter for {command}: {reason}")]
    InvalidParameter {
        command: &'static str,
        reason: String,
    },

    /// Payload does not fit the one-byte length field.
    #[error("parameter payload too large: {0} bytes (max {max})", max = crate::protocol::frame::MAX_PARAMS)]
    ParameterTooLarge(usize),

    /// Structural violation found while decoding a capture.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl LwacpError {
    pub(crate) fn invalid(command: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            command,
            reason: reason.into(),
        }
    }
}

/// I/O failures talking to the speaker. Never retried by the core.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("connect failed: {0}")]
    Connect(String),
}

/// Convenience type alias for protocol results.
pub type Result<T> = std::result::Result<T, LwacpError>;
