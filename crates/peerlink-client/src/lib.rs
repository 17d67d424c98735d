//! Peerlink client: negotiates WebRTC data channels with other peers through
//! a WebSocket signaling relay.

#![forbid(unsafe_code)]

pub mod client;
pub mod commands;
pub mod dispatcher;
pub mod negotiation;
pub mod peer;
pub mod registry;
pub mod rtc;
pub mod signaling;
pub mod types;

pub use client::{run_client, run_session};
pub use commands::{execute, run_repl, Command};
pub use dispatcher::Dispatcher;
pub use negotiation::{LocalIdentity, Negotiator};
pub use peer::{
    DataChannel, LinkState, PeerConnection, PeerConnector, PeerEvent, PeerEventKind, PeerEventSink,
};
pub use registry::{PeerSession, Registry, SessionState};
pub use rtc::RtcConnector;
pub use signaling::{split_socket, EnvelopeStream, RelayLink, SignalSender, SignalingClient};
pub use types::{ClientConfig, ClientEvent, NegotiationConfig};
