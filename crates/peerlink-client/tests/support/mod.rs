//! Shared fixtures: an in-memory peer connection layer and a negotiator
//! harness that exposes every channel the engine writes to.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use peerlink_client::{
    ClientEvent, DataChannel, NegotiationConfig, Negotiator, PeerConnection, PeerConnector,
    PeerEvent, PeerEventSink, SessionState, SignalSender,
};
use peerlink_common::{ClientMessage, Error, IceCandidate, Result, SessionDescription};
use tokio::sync::mpsc;

#[derive(Default)]
pub struct FakeConnector {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    pub fail_offers: AtomicBool,
    pub fail_connections: AtomicBool,
    pub fail_remote_descriptions: AtomicBool,
}

impl FakeConnector {
    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        self.connections().last().cloned().expect("no connection created")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn new_connection(
        &self,
        peer_id: &str,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        if self.fail_connections.load(Ordering::SeqCst) {
            return Err(Error::negotiation("no connection for you"));
        }
        let connection = Arc::new(FakeConnection {
            peer_id: peer_id.to_string(),
            sink: events,
            calls: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            channel: Arc::new(FakeChannel::default()),
            closed: AtomicBool::new(false),
            fail_offers: self.fail_offers.load(Ordering::SeqCst),
            fail_remote_descriptions: self.fail_remote_descriptions.load(Ordering::SeqCst),
        });
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection as Arc<dyn PeerConnection>)
    }
}

pub struct FakeConnection {
    pub peer_id: String,
    pub sink: PeerEventSink,
    calls: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
    pub channel: Arc<FakeChannel>,
    closed: AtomicBool,
    fail_offers: bool,
    fail_remote_descriptions: bool,
}

impl FakeConnection {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Report the data channel as open, the way the real layer does once ICE
    /// and DTLS complete.
    pub fn open_channel(&self) {
        self.sink.channel_open(Arc::clone(&self.channel) as Arc<dyn DataChannel>);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_data_channel(&self, label: &str) -> Result<()> {
        self.record(format!("create_data_channel:{label}"));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        if self.fail_offers {
            return Err(Error::negotiation("offer refused"));
        }
        Ok(SessionDescription::offer(format!(
            "v=0 offer to {} gen {}",
            self.peer_id,
            self.sink.generation()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        Ok(SessionDescription::answer(format!(
            "v=0 answer to {} gen {}",
            self.peer_id,
            self.sink.generation()
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set_local_description:{:?}", desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set_remote_description:{:?}", desc.kind));
        if self.fail_remote_descriptions {
            return Err(Error::negotiation("remote description rejected"));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record("add_ice_candidate");
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<String>>,
    sends: AtomicUsize,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataChannel for FakeChannel {
    fn label(&self) -> String {
        "data".to_string()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub negotiator: Arc<Negotiator>,
    pub connector: Arc<FakeConnector>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub notices: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Harness {
    /// Harness without a negotiation timeout so no timer events interfere.
    pub fn new() -> Self {
        Self::with_config(NegotiationConfig {
            timeout: None,
            ..Default::default()
        })
    }

    pub fn with_config(config: NegotiationConfig) -> Self {
        let connector = Arc::new(FakeConnector::default());
        let (signals, outbound) = SignalSender::channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let (negotiator, events) = Negotiator::new(
            config,
            Arc::clone(&connector) as Arc<dyn PeerConnector>,
            signals,
            notice_tx,
        );
        Self {
            negotiator,
            connector,
            events,
            outbound,
            notices,
        }
    }

    /// Everything queued for the relay since the last call, decoded.
    pub fn sent(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            out.push(serde_json::from_str(&text).expect("outbound envelope is valid JSON"));
        }
        out
    }

    pub fn notices(&mut self) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.notices.try_recv() {
            out.push(event);
        }
        out
    }

    /// Apply every queued connection event, as the dispatcher would.
    pub async fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.negotiator.handle_event(event).await;
        }
    }

    /// Wait for the next connection event and apply it.
    pub async fn pump_next(&mut self, wait: Duration) {
        let event = tokio::time::timeout(wait, self.events.recv())
            .await
            .expect("timed out waiting for a connection event")
            .expect("event channel closed");
        self.negotiator.handle_event(event).await;
    }

    pub async fn state(&self, peer_id: &str) -> Option<SessionState> {
        match self.negotiator.registry().get(peer_id).await {
            Some(session) => Some(session.state().await),
            None => None,
        }
    }

    /// Drive an initiator session with `peer_id` all the way to an open
    /// channel and return its connection.
    pub async fn open_as_initiator(&mut self, peer_id: &str) -> Arc<FakeConnection> {
        self.negotiator.connect(peer_id).await.unwrap();
        self.negotiator
            .handle_answer(peer_id, SessionDescription::answer("v=0 remote answer"))
            .await
            .unwrap();
        let connection = self.connector.last();
        connection.open_channel();
        self.pump().await;
        connection
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}
