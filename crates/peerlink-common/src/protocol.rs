use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Direction of a session description.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque negotiation blob produced and consumed by the peer connection layer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Envelope sent from this client to the relay.
///
/// Wire shape is `{ "type": <kind>, "payload": { .. } }`; the relay forwards
/// everything except `register` to `target`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask the relay for a peer id.
    Register,

    Offer {
        target: String,
        offer: SessionDescription,
    },

    Answer {
        target: String,
        answer: SessionDescription,
    },

    /// Trickled local candidate for `target`.
    IceCandidate {
        target: String,
        candidate: IceCandidate,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Register => "register",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }
}

/// Envelope delivered by the relay to this client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// Reply to `register` carrying our assigned peer id.
    #[serde(rename_all = "camelCase")]
    Registered { peer_id: String },

    Offer {
        source: String,
        offer: SessionDescription,
    },

    Answer {
        source: String,
        answer: SessionDescription,
    },

    IceCandidate {
        source: String,
        candidate: IceCandidate,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

impl RelayMessage {
    /// Envelope kinds this client understands.
    pub const KINDS: &'static [&'static str] = &["registered", "offer", "answer", "ice-candidate"];

    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Registered { .. } => "registered",
            RelayMessage::Offer { .. } => "offer",
            RelayMessage::Answer { .. } => "answer",
            RelayMessage::IceCandidate { .. } => "ice-candidate",
        }
    }

    /// Decode one relay frame.
    ///
    /// Returns `Ok(None)` for well-formed envelopes of a kind we do not know.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let raw: RawEnvelope = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("invalid envelope: {e}")))?;
        if !Self::KINDS.contains(&raw.kind.as_str()) {
            return Ok(None);
        }
        serde_json::from_str(text)
            .map(Some)
            .map_err(|e| Error::protocol(format!("invalid {} payload: {e}", raw.kind)))
    }
}
