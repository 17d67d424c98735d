//! Common error types for Peerlink.

use thiserror::Error;

/// Result type alias using Peerlink's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Peerlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (stdin, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Relay connection failed or is closed
    #[error("relay transport error: {0}")]
    Transport(String),

    /// Malformed or undecodable envelope
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Envelope could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure reported by the peer connection layer
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Bad command or a command that does not apply right now
    #[error("{0}")]
    Input(String),

    /// No open data channel exists for the peer
    #[error("no open data channel to peer {0}")]
    NoOpenChannel(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a negotiation error from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    /// Create an input error from any displayable type.
    pub fn input(msg: impl std::fmt::Display) -> Self {
        Self::Input(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}
