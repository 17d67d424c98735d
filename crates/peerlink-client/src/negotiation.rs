//! Per-peer negotiation state machine.
//!
//! Initiator: `New -> OfferSent -> Open`. Responder: `New -> AnswerSent ->
//! Open`. Failures reported by the connection layer, a closed channel or an
//! expired negotiation timer move a session to `Failed`, from which a new
//! `connect` or a new remote offer starts over. Errors raised while a
//! transition is in flight abort it and leave the session where it was.

use std::sync::{Arc, PoisonError, RwLock};

use peerlink_common::{ClientMessage, Error, IceCandidate, Result, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::peer::{LinkState, PeerConnection, PeerConnector, PeerEvent, PeerEventKind, PeerEventSink};
use crate::registry::{Registry, SessionState};
use crate::signaling::SignalSender;
use crate::types::{ClientEvent, NegotiationConfig};

/// Our own peer id, as last assigned by the relay.
#[derive(Debug, Default)]
pub struct LocalIdentity {
    peer_id: RwLock<Option<String>>,
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.peer_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Overwrites any previous id.
    pub fn set(&self, peer_id: String) {
        *self
            .peer_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(peer_id);
    }
}

pub struct Negotiator {
    config: NegotiationConfig,
    connector: Arc<dyn PeerConnector>,
    registry: Arc<Registry>,
    signals: SignalSender,
    identity: LocalIdentity,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    notices: mpsc::UnboundedSender<ClientEvent>,
}

impl Negotiator {
    /// Build the engine. The returned receiver carries connection-layer
    /// events and must be drained by exactly one dispatcher.
    pub fn new(
        config: NegotiationConfig,
        connector: Arc<dyn PeerConnector>,
        signals: SignalSender,
        notices: mpsc::UnboundedSender<ClientEvent>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new(config.max_pending_candidates));
        let negotiator = Arc::new(Self {
            config,
            connector,
            registry,
            signals,
            identity: LocalIdentity::new(),
            events_tx,
            notices,
        });
        (negotiator, events_rx)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn local_peer_id(&self) -> Option<String> {
        self.identity.get()
    }

    pub fn register(&self) -> Result<()> {
        info!("Sending register message");
        self.signals.send(&ClientMessage::Register)
    }

    pub fn handle_registered(&self, peer_id: String) {
        if peer_id.trim().is_empty() {
            warn!("Received empty peer ID");
            return;
        }
        info!(peer_id = %peer_id, "Registered with relay");
        self.identity.set(peer_id.clone());
        self.notify(ClientEvent::Registered { peer_id });
    }

    /// Start negotiating a data channel with `peer_id` as the initiator.
    pub async fn connect(&self, peer_id: &str) -> Result<()> {
        let peer_id = peer_id.trim();
        if peer_id.is_empty() {
            return Err(Error::input("peer id is required"));
        }
        if self.identity.get().as_deref() == Some(peer_id) {
            return Err(Error::input("cannot connect to our own peer id"));
        }

        let session = self.registry.get_or_create(peer_id).await;
        let mut inner = session.lock().await;
        match inner.state {
            SessionState::New | SessionState::Failed => {}
            SessionState::OfferSent | SessionState::AnswerSent => {
                return Err(Error::input(format!(
                    "negotiation with {peer_id} is already in progress"
                )));
            }
            SessionState::Open => {
                return Err(Error::input(format!(
                    "data channel to {peer_id} is already open"
                )));
            }
        }

        let generation = inner.reserve_generation();
        let connection = self
            .connector
            .new_connection(peer_id, self.sink(peer_id, generation))
            .await?;
        let offer = match self.prepare_offer(connection.as_ref()).await {
            Ok(offer) => offer,
            Err(e) => {
                close_quietly(peer_id, connection).await;
                return Err(e);
            }
        };
        if let Err(e) = self.signals.send(&ClientMessage::Offer {
            target: peer_id.to_string(),
            offer,
        }) {
            close_quietly(peer_id, connection).await;
            return Err(e);
        }

        let old = inner.install_connection(generation, connection);
        inner.state = SessionState::OfferSent;
        drop(inner);
        if let Some(old) = old {
            close_quietly(peer_id, old).await;
        }

        info!(peer_id, generation, "Sent offer");
        self.arm_timeout(peer_id, generation);
        Ok(())
    }

    /// Answer an offer relayed from `source`.
    pub async fn handle_offer(&self, source: &str, offer: SessionDescription) -> Result<()> {
        if source.is_empty() {
            return Err(Error::protocol("offer without source peer"));
        }
        if offer.kind != SdpKind::Offer {
            return Err(Error::protocol(format!(
                "offer from {source} carried a session description of type {:?}",
                offer.kind
            )));
        }

        let session = self.registry.get_or_create(source).await;
        let mut inner = session.lock().await;
        match inner.state {
            SessionState::Open => {
                warn!(peer_id = source, "Ignoring offer for open session; renegotiation is not supported");
                return Ok(());
            }
            SessionState::OfferSent => {
                if !self.yields_to(source) {
                    info!(peer_id = source, "Offer collision; keeping our own offer");
                    return Ok(());
                }
                info!(peer_id = source, "Offer collision; answering remote offer instead");
            }
            SessionState::New | SessionState::AnswerSent | SessionState::Failed => {}
        }

        let generation = inner.reserve_generation();
        let connection = self
            .connector
            .new_connection(source, self.sink(source, generation))
            .await?;
        let answer = match self.prepare_answer(source, connection.as_ref(), offer).await {
            Ok(answer) => answer,
            Err(e) => {
                close_quietly(source, connection).await;
                return Err(e);
            }
        };
        if let Err(e) = self.signals.send(&ClientMessage::Answer {
            target: source.to_string(),
            answer,
        }) {
            close_quietly(source, connection).await;
            return Err(e);
        }

        let old = inner.install_connection(generation, connection);
        inner.remote_description_set = true;
        inner.state = SessionState::AnswerSent;
        drop(inner);
        if let Some(old) = old {
            close_quietly(source, old).await;
        }

        info!(peer_id = source, generation, "Sent answer");
        self.arm_timeout(source, generation);
        Ok(())
    }

    /// Apply an answer to our outstanding offer. Answers from peers we never
    /// offered to are ignored.
    pub async fn handle_answer(&self, source: &str, answer: SessionDescription) -> Result<()> {
        if answer.kind != SdpKind::Answer {
            return Err(Error::protocol(format!(
                "answer from {source} carried a session description of type {:?}",
                answer.kind
            )));
        }
        let Some(session) = self.registry.get(source).await else {
            info!(peer_id = source, "Ignoring answer from peer without a session");
            return Ok(());
        };

        let mut inner = session.lock().await;
        if inner.state != SessionState::OfferSent {
            info!(peer_id = source, state = %inner.state, "Ignoring answer; no offer outstanding");
            return Ok(());
        }
        let Some(connection) = inner.connection.clone() else {
            return Ok(());
        };

        connection.set_remote_description(answer).await?;
        inner.remote_description_set = true;
        let pending = inner.take_pending_candidates();
        apply_candidates(source, connection.as_ref(), pending).await;
        debug!(peer_id = source, "Applied answer");
        Ok(())
    }

    /// Apply or hold a candidate relayed from `source`.
    ///
    /// Candidates are only applied once a remote description exists. Before
    /// that they are buffered: on the session while our offer is outstanding,
    /// otherwise until an offer from `source` arrives.
    pub async fn handle_remote_candidate(&self, source: &str, candidate: IceCandidate) -> Result<()> {
        if let Some(session) = self.registry.get(source).await {
            let mut inner = session.lock().await;
            if inner.remote_description_set {
                if let Some(connection) = inner.connection.clone() {
                    connection.add_ice_candidate(candidate).await?;
                }
                return Ok(());
            }
            if inner.state == SessionState::OfferSent {
                let limit = self.registry.max_pending_candidates();
                if !inner.buffer_candidate(candidate, limit) {
                    warn!(peer_id = source, "Candidate buffer full; dropping candidate");
                }
                return Ok(());
            }
        }

        if self.registry.buffer_orphan_candidate(source, candidate).await {
            debug!(peer_id = source, "Holding candidate until an offer arrives");
        } else {
            warn!(peer_id = source, "Dropping candidate for peer without a session");
        }
        Ok(())
    }

    /// Deliver a data channel message to an open session.
    pub async fn send_message(&self, peer_id: &str, text: &str) -> Result<()> {
        let channel = match self.registry.get(peer_id).await {
            Some(session) => session.lock().await.open_channel(),
            None => None,
        };
        let Some(channel) = channel else {
            return Err(Error::NoOpenChannel(peer_id.to_string()));
        };
        channel.send_text(text).await?;
        debug!(peer_id, bytes = text.len(), "Sent data channel message");
        Ok(())
    }

    /// Apply one event from the connection layer.
    pub async fn handle_event(&self, event: PeerEvent) {
        let PeerEvent {
            peer_id,
            generation,
            kind,
        } = event;

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                if !self.is_current(&peer_id, generation).await {
                    debug!(peer_id = %peer_id, "Dropping local candidate of a replaced connection");
                    return;
                }
                let msg = ClientMessage::IceCandidate {
                    target: peer_id.clone(),
                    candidate,
                };
                if let Err(e) = self.signals.send(&msg) {
                    warn!(peer_id = %peer_id, "Failed to send ICE candidate: {}", e);
                }
            }
            PeerEventKind::ChannelOpen(channel) => {
                let label = channel.label();
                if self
                    .registry
                    .attach_data_channel(&peer_id, generation, channel)
                    .await
                {
                    info!(peer_id = %peer_id, label = %label, "Data channel open");
                    self.notify(ClientEvent::ChannelOpened { peer_id });
                } else {
                    debug!(peer_id = %peer_id, "Ignoring channel open of a replaced connection");
                }
            }
            PeerEventKind::Message(text) => {
                if self.is_current(&peer_id, generation).await {
                    self.notify(ClientEvent::MessageReceived { peer_id, text });
                }
            }
            PeerEventKind::ChannelClosed => {
                let Some(session) = self.registry.get(&peer_id).await else {
                    return;
                };
                let mut inner = session.lock().await;
                if !inner.is_current(generation) || inner.state != SessionState::Open {
                    return;
                }
                let old = inner.fail();
                drop(inner);
                info!(peer_id = %peer_id, "Data channel closed");
                if let Some(old) = old {
                    close_quietly(&peer_id, old).await;
                }
                self.notify(ClientEvent::ChannelClosed { peer_id });
            }
            PeerEventKind::Link(state) => match state {
                LinkState::Failed | LinkState::Closed => {
                    self.fail_session(&peer_id, generation, format!("connection {:?}", state).to_lowercase())
                        .await;
                }
                LinkState::Disconnected => {
                    warn!(peer_id = %peer_id, "Peer connection disconnected");
                }
                LinkState::Connecting | LinkState::Connected => {
                    debug!(peer_id = %peer_id, ?state, "Peer connection state changed");
                }
            },
            PeerEventKind::TimedOut => {
                let pending = match self.registry.get(&peer_id).await {
                    Some(session) => matches!(
                        session.state().await,
                        SessionState::OfferSent | SessionState::AnswerSent
                    ),
                    None => false,
                };
                if pending {
                    self.fail_session(&peer_id, generation, "negotiation timed out".to_string())
                        .await;
                }
            }
        }
    }

    async fn prepare_offer(&self, connection: &dyn PeerConnection) -> Result<SessionDescription> {
        connection
            .create_data_channel(&self.config.channel_label)
            .await?;
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Apply `offer` and any candidates held for `source`, then produce and
    /// commit the answer.
    async fn prepare_answer(
        &self,
        source: &str,
        connection: &dyn PeerConnection,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        connection.set_remote_description(offer).await?;
        let early = self.registry.take_orphan_candidates(source).await;
        apply_candidates(source, connection, early).await;

        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    async fn fail_session(&self, peer_id: &str, generation: u64, reason: String) {
        let Some(session) = self.registry.get(peer_id).await else {
            return;
        };
        let mut inner = session.lock().await;
        if !inner.is_current(generation) || inner.state == SessionState::Failed {
            return;
        }
        let was_open = inner.state == SessionState::Open;
        let old = inner.fail();
        drop(inner);

        warn!(peer_id, reason = %reason, "Peer session failed");
        if let Some(old) = old {
            close_quietly(peer_id, old).await;
        }
        if was_open {
            self.notify(ClientEvent::ChannelClosed {
                peer_id: peer_id.to_string(),
            });
        } else {
            self.notify(ClientEvent::PeerFailed {
                peer_id: peer_id.to_string(),
                reason,
            });
        }
    }

    async fn is_current(&self, peer_id: &str, generation: u64) -> bool {
        match self.registry.get(peer_id).await {
            Some(session) => session.lock().await.is_current(generation),
            None => false,
        }
    }

    /// On an offer collision the side with the smaller peer id answers.
    /// Without a registered id of our own we always answer.
    fn yields_to(&self, remote: &str) -> bool {
        match self.identity.get() {
            Some(local) => local.as_str() < remote,
            None => true,
        }
    }

    fn arm_timeout(&self, peer_id: &str, generation: u64) {
        let Some(timeout) = self.config.timeout else {
            return;
        };
        let sink = self.sink(peer_id, generation);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            sink.emit(PeerEventKind::TimedOut);
        });
    }

    fn sink(&self, peer_id: &str, generation: u64) -> PeerEventSink {
        PeerEventSink::new(peer_id, generation, self.events_tx.clone())
    }

    fn notify(&self, event: ClientEvent) {
        let _ = self.notices.send(event);
    }
}

async fn apply_candidates(peer_id: &str, connection: &dyn PeerConnection, candidates: Vec<IceCandidate>) {
    for candidate in candidates {
        if let Err(e) = connection.add_ice_candidate(candidate).await {
            warn!(peer_id, "Failed to apply buffered ICE candidate: {}", e);
        }
    }
}

async fn close_quietly(peer_id: &str, connection: Arc<dyn PeerConnection>) {
    if let Err(e) = connection.close().await {
        debug!(peer_id, "Error closing peer connection: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_identity_overwrites() {
        let identity = LocalIdentity::new();
        assert_eq!(identity.get(), None);
        identity.set("abc".into());
        identity.set("def".into());
        assert_eq!(identity.get().as_deref(), Some("def"));
    }
}
