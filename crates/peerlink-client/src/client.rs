use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::commands::run_repl;
use crate::dispatcher::Dispatcher;
use crate::negotiation::Negotiator;
use crate::peer::PeerConnector;
use crate::rtc::RtcConnector;
use crate::signaling::{RelayLink, SignalingClient};
use crate::types::{ClientConfig, ClientEvent, NegotiationConfig};

const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Connect to the relay and run the interactive client on stdin/stdout until
/// the operator exits.
pub async fn run_client(config: ClientConfig) -> Result<()> {
    config.validate()?;

    let link = SignalingClient::connect(&config.relay_url).await?.split();
    let connector: Arc<dyn PeerConnector> = Arc::new(RtcConnector::new(&config.ice_servers)?);

    let input = BufReader::new(tokio::io::stdin());
    run_session(
        config.negotiation,
        connector,
        link,
        input,
        tokio::io::stdout(),
    )
    .await
}

/// Drive one client session over an already established relay link.
///
/// The dispatcher runs on its own task; the command loop runs on the
/// caller's and also writes operator notices to `output` as they are raised.
pub async fn run_session<R, W>(
    negotiation: NegotiationConfig,
    connector: Arc<dyn PeerConnector>,
    link: RelayLink,
    input: R,
    output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let RelayLink {
        sender,
        inbound,
        writer,
    } = link;

    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let (negotiator, events) = Negotiator::new(negotiation, connector, sender, notice_tx.clone());

    let mut dispatcher = Dispatcher::new(Arc::clone(&negotiator), events);
    let dispatch_task = tokio::spawn(async move {
        dispatcher.run(inbound).await;
        let _ = notice_tx.send(ClientEvent::RelayClosed);
        dispatcher.drain_events().await;
    });

    let result = tokio::select! {
        result = run_repl(&negotiator, input, output, notice_rx) => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };
    info!("Shutting down");

    // The writer stops once every sender is gone; let it flush and close.
    dispatch_task.abort();
    let _ = dispatch_task.await;
    drop(negotiator);
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        warn!("Relay writer did not finish in time");
    }
    result?;
    Ok(())
}
