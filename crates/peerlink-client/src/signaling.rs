//! WebSocket connection to the signaling relay.

use futures::stream::{self, BoxStream, SplitStream};
use futures::{SinkExt, StreamExt};
use peerlink_common::{ClientMessage, Error, RelayMessage, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Inbound envelopes in arrival order. `Err` items are per-frame decode
/// failures; the stream ends when the relay connection closes.
pub type EnvelopeStream = BoxStream<'static, Result<RelayMessage>>;

/// Outbound half of the relay connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<String>,
}

impl SignalSender {
    /// Sender paired with the receiving end of its queue. The relay writer
    /// task drains the receiver; tests read it directly.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, msg: &ClientMessage) -> Result<()> {
        let text = msg.encode()?;
        debug!(kind = msg.kind(), "queueing envelope for relay");
        self.tx
            .send(text)
            .map_err(|_| Error::transport("relay connection is closed"))
    }
}

/// The relay connection once split into its two directions.
pub struct RelayLink {
    pub sender: SignalSender,
    pub inbound: EnvelopeStream,
    pub writer: JoinHandle<()>,
}

pub struct SignalingClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::transport(format!("failed to connect to relay {url}: {e}")))?;
        info!("Connected to signaling relay: {}", url);
        Ok(Self { ws })
    }

    pub fn split(self) -> RelayLink {
        split_socket(self.ws)
    }
}

/// Split a WebSocket into a queued sender and a decoded inbound stream.
pub fn split_socket<S>(ws: WebSocketStream<S>) -> RelayLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, read) = ws.split();
    let (sender, mut rx) = SignalSender::channel();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                error!("Failed to send envelope to relay: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    RelayLink {
        sender,
        inbound: inbound_stream(read),
        writer,
    }
}

fn inbound_stream<S>(read: SplitStream<WebSocketStream<S>>) -> EnvelopeStream
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    stream::unfold(read, |mut read| async move {
        loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => match decode_frame(text.as_str()) {
                    Ok(Some(msg)) => return Some((Ok(msg), read)),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), read)),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    log_close(frame.as_ref());
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    log_read_error(&e);
                    return None;
                }
                None => {
                    info!("Relay stream ended");
                    return None;
                }
            }
        }
    })
    .boxed()
}

/// Decode one text frame. Unknown envelope kinds yield `Ok(None)`.
pub fn decode_frame(text: &str) -> Result<Option<RelayMessage>> {
    let decoded = RelayMessage::decode(text)?;
    if decoded.is_none() {
        debug!(frame = text, "ignoring envelope of unknown kind");
    }
    Ok(decoded)
}

fn log_close(frame: Option<&CloseFrame>) {
    match frame {
        None => info!("Relay closed the connection"),
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
            info!(reason = frame.reason.as_str(), "Relay closed the connection")
        }
        Some(frame) => warn!(
            code = ?frame.code,
            reason = frame.reason.as_str(),
            "Relay connection closed unexpectedly"
        ),
    }
}

fn log_read_error(err: &tungstenite::Error) {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            info!("Relay connection closed")
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            warn!("Relay connection closed unexpectedly: {}", err)
        }
        _ => warn!("Error reading from relay: {}", err),
    }
}
