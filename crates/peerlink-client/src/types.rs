use std::fmt;
use std::time::Duration;

use peerlink_common::{Error, Result};
use url::Url;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_CHANNEL_LABEL: &str = "data";
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_PENDING_CANDIDATES: usize = 64;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: String,
    pub ice_servers: Vec<String>,
    pub negotiation: NegotiationConfig,
}

/// Knobs used by the negotiation engine.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Label of the data channel opened by the initiating side.
    pub channel_label: String,
    /// A session that is not open this long after its offer or answer is
    /// marked failed. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Upper bound on candidates buffered per peer before a remote
    /// description is available.
    pub max_pending_candidates: usize,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            timeout: Some(Duration::from_secs(DEFAULT_NEGOTIATION_TIMEOUT_SECS)),
            max_pending_candidates: DEFAULT_MAX_PENDING_CANDIDATES,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            negotiation: NegotiationConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        validate_relay_url(&self.relay_url)?;
        for server in &self.ice_servers {
            validate_ice_server(server)?;
        }
        if self.negotiation.channel_label.trim().is_empty() {
            return Err(Error::config("data channel label must not be empty"));
        }
        Ok(())
    }
}

fn validate_relay_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| Error::config(format!("invalid relay url {raw}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(Error::config(format!(
            "relay url must use ws:// or wss://, got {other}://"
        ))),
    }
}

fn validate_ice_server(raw: &str) -> Result<()> {
    let scheme = raw.split(':').next().unwrap_or_default();
    if matches!(scheme, "stun" | "stuns" | "turn" | "turns") && raw.len() > scheme.len() + 1 {
        Ok(())
    } else {
        Err(Error::config(format!("invalid ICE server url: {raw}")))
    }
}

/// Something the operator should see, raised from the dispatcher flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Registered { peer_id: String },
    ChannelOpened { peer_id: String },
    MessageReceived { peer_id: String, text: String },
    ChannelClosed { peer_id: String },
    PeerFailed { peer_id: String, reason: String },
    RelayClosed,
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { peer_id } => write!(f, "Registered with peer ID: {}", peer_id),
            Self::ChannelOpened { peer_id } => {
                write!(f, "Data channel opened with peer: {}", peer_id)
            }
            Self::MessageReceived { peer_id, text } => {
                write!(f, "Received message from {}: {}", peer_id, text)
            }
            Self::ChannelClosed { peer_id } => {
                write!(f, "Data channel closed with peer: {}", peer_id)
            }
            Self::PeerFailed { peer_id, reason } => {
                write!(f, "Connection to peer {} failed: {}", peer_id, reason)
            }
            Self::RelayClosed => write!(f, "Relay connection closed"),
        }
    }
}
