//! Seam between the negotiation engine and the peer connection layer.
//!
//! The engine only ever talks to these traits. Callbacks fired by the
//! connection layer are turned into [`PeerEvent`]s and queued for the
//! dispatcher; they never mutate session state directly.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use peerlink_common::{IceCandidate, Result, SessionDescription};
use tokio::sync::mpsc;

/// Creates connection objects, one per negotiation attempt.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn new_connection(
        &self,
        peer_id: &str,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Open an outbound data channel. Its open/message/close callbacks report
    /// through the sink the connection was created with.
    async fn create_data_channel(&self, label: &str) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    async fn send_text(&self, text: &str) -> Result<()>;
}

/// Coarse connection state reported by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    ChannelOpen(Arc<dyn DataChannel>),
    Message(String),
    ChannelClosed,
    Link(LinkState),
    /// Raised by the engine itself when a negotiation takes too long.
    TimedOut,
}

impl fmt::Debug for PeerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::ChannelOpen(ch) => write!(f, "ChannelOpen({})", ch.label()),
            Self::Message(text) => write!(f, "Message({} bytes)", text.len()),
            Self::ChannelClosed => write!(f, "ChannelClosed"),
            Self::Link(state) => write!(f, "Link({:?})", state),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Event about one connection object, identified by peer and generation.
#[derive(Debug)]
pub struct PeerEvent {
    pub peer_id: String,
    pub generation: u64,
    pub kind: PeerEventKind,
}

/// Handle given to a connection so it can report back to the dispatcher.
///
/// Sends never block; if the dispatcher is gone the event is dropped.
#[derive(Clone)]
pub struct PeerEventSink {
    peer_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(peer_id: impl Into<String>, generation: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            peer_id: peer_id.into(),
            generation,
            tx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            peer_id: self.peer_id.clone(),
            generation: self.generation,
            kind,
        });
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(PeerEventKind::LocalCandidate(candidate));
    }

    pub fn channel_open(&self, channel: Arc<dyn DataChannel>) {
        self.emit(PeerEventKind::ChannelOpen(channel));
    }

    pub fn message(&self, text: String) {
        self.emit(PeerEventKind::Message(text));
    }

    pub fn channel_closed(&self) {
        self.emit(PeerEventKind::ChannelClosed);
    }

    pub fn link_state(&self, state: LinkState) {
        self.emit(PeerEventKind::Link(state));
    }
}

impl fmt::Debug for PeerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEventSink")
            .field("peer_id", &self.peer_id)
            .field("generation", &self.generation)
            .finish()
    }
}
