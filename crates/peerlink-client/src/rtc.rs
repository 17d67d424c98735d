//! `webrtc` crate backed implementation of the peer connection seam.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use peerlink_common::{Error, IceCandidate, Result, SdpKind, SessionDescription};
use tracing::{debug, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::peer::{DataChannel, LinkState, PeerConnection, PeerConnector, PeerEventSink};

pub struct RtcConnector {
    api: API,
    config: RTCConfiguration,
}

impl RtcConnector {
    pub fn new(ice_servers: &[String]) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(Error::negotiation)?;
        let api = APIBuilder::new().with_media_engine(media).build();

        let ice_servers = if ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        Ok(Self { api, config })
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn new_connection(
        &self,
        peer_id: &str,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(self.config.clone())
            .await
            .map_err(|e| Error::negotiation(format!("creating peer connection: {e}")))?;
        let pc = Arc::new(pc);
        wire_connection(&pc, &events);
        debug!(peer_id, generation = events.generation(), "Created peer connection");
        Ok(Arc::new(RtcPeerConnection { pc, events }))
    }
}

struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    events: PeerEventSink,
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_data_channel(&self, label: &str) -> Result<()> {
        let channel = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| Error::negotiation(format!("creating data channel: {e}")))?;
        wire_channel(&channel, self.events.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::negotiation(format!("creating offer: {e}")))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::negotiation(format!("creating answer: {e}")))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| Error::negotiation(format!("setting local description: {e}")))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| Error::negotiation(format!("setting remote description: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| Error::negotiation(format!("adding ICE candidate: {e}")))
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(Error::negotiation)
    }
}

struct RtcDataChannel {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        self.channel.label().to_string()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| Error::negotiation(format!("sending on data channel: {e}")))
    }
}

fn wire_connection(pc: &Arc<RTCPeerConnection>, events: &PeerEventSink) {
    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.local_candidate(from_rtc_candidate(init)),
                Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
            }
        })
    }));

    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        if let Some(state) = link_state(state) {
            sink.link_state(state);
        }
        Box::pin(async {})
    }));

    // Responder side: the remote opens the channel.
    let sink = events.clone();
    pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        let sink = sink.clone();
        Box::pin(async move {
            debug!(label = channel.label(), "Inbound data channel");
            wire_channel(&channel, sink);
        })
    }));
}

fn wire_channel(channel: &Arc<RTCDataChannel>, sink: PeerEventSink) {
    let open_sink = sink.clone();
    let weak: Weak<RTCDataChannel> = Arc::downgrade(channel);
    channel.on_open(Box::new(move || {
        let sink = open_sink.clone();
        let weak = weak.clone();
        Box::pin(async move {
            if let Some(channel) = weak.upgrade() {
                sink.channel_open(Arc::new(RtcDataChannel { channel }));
            }
        })
    }));

    let message_sink = sink.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        message_sink.message(String::from_utf8_lossy(&msg.data).into_owned());
        Box::pin(async {})
    }));

    channel.on_close(Box::new(move || {
        sink.channel_closed();
        Box::pin(async {})
    }));
}

fn link_state(state: RTCPeerConnectionState) -> Option<LinkState> {
    match state {
        RTCPeerConnectionState::Connecting => Some(LinkState::Connecting),
        RTCPeerConnectionState::Connected => Some(LinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(LinkState::Failed),
        RTCPeerConnectionState::Closed => Some(LinkState::Closed),
        _ => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| Error::negotiation(format!("invalid session description: {e}")))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::negotiation(format!(
            "unsupported session description type {other}"
        ))),
    }
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
