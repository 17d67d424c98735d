//! Sequential dispatch of relay envelopes and connection events.
//!
//! Everything that advances a session in response to the outside world runs
//! here, one item at a time, in arrival order.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use peerlink_common::{RelayMessage, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::negotiation::Negotiator;
use crate::peer::PeerEvent;

pub struct Dispatcher {
    negotiator: Arc<Negotiator>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl Dispatcher {
    pub fn new(negotiator: Arc<Negotiator>, events: mpsc::UnboundedReceiver<PeerEvent>) -> Self {
        Self { negotiator, events }
    }

    /// Process relay envelopes and connection events until the relay stream
    /// ends.
    pub async fn run<S>(&mut self, mut inbound: S)
    where
        S: Stream<Item = Result<RelayMessage>> + Unpin,
    {
        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(msg)) => self.dispatch(msg).await,
                    Some(Err(e)) => warn!("Dropping relay envelope: {}", e),
                    None => break,
                },
                Some(event) = self.events.recv() => self.negotiator.handle_event(event).await,
            }
        }
        info!("Relay stream closed; dispatcher stopped reading envelopes");
    }

    /// Keep handling connection events after the relay is gone, so open
    /// channels stay usable.
    pub async fn drain_events(&mut self) {
        while let Some(event) = self.events.recv().await {
            self.negotiator.handle_event(event).await;
        }
    }

    pub async fn dispatch(&self, msg: RelayMessage) {
        let kind = msg.kind();
        debug!(kind, "Received envelope");
        let (source, result) = match msg {
            RelayMessage::Registered { peer_id } => {
                self.negotiator.handle_registered(peer_id);
                return;
            }
            RelayMessage::Offer { source, offer } => {
                let result = self.negotiator.handle_offer(&source, offer).await;
                (source, result)
            }
            RelayMessage::Answer { source, answer } => {
                let result = self.negotiator.handle_answer(&source, answer).await;
                (source, result)
            }
            RelayMessage::IceCandidate { source, candidate } => {
                let result = self
                    .negotiator
                    .handle_remote_candidate(&source, candidate)
                    .await;
                (source, result)
            }
        };
        if let Err(e) = result {
            warn!(peer_id = %source, kind, "Failed to handle envelope: {}", e);
        }
    }
}
