//! Shared pieces for Peerlink: relay protocol, logging, error types.
//!
//! This crate holds the wire format spoken with the signaling relay and the
//! infrastructure every Peerlink component uses.

#![forbid(unsafe_code)]

pub mod error;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::*;

/// Initialize tracing with a specific default level.
///
/// `RUST_LOG` takes precedence when set. Output goes to stderr so that
/// interactive output on stdout is not interleaved with log lines.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
