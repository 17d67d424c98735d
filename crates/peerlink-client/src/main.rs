#![forbid(unsafe_code)]

use std::time::Duration;

use clap::Parser;
use peerlink_client::types::{
    DEFAULT_CHANNEL_LABEL, DEFAULT_ICE_SERVER, DEFAULT_MAX_PENDING_CANDIDATES,
    DEFAULT_NEGOTIATION_TIMEOUT_SECS, DEFAULT_RELAY_URL,
};
use peerlink_client::{run_client, ClientConfig, NegotiationConfig};

#[derive(Parser, Debug)]
#[command(name = "peerlink")]
#[command(about = "Open WebRTC data channels to peers through a signaling relay")]
struct Args {
    /// WebSocket URL of the signaling relay
    #[arg(long, env = "PEERLINK_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// STUN/TURN server URL (repeatable, or comma separated in the env var)
    #[arg(
        long = "ice-server",
        env = "PEERLINK_ICE_SERVERS",
        value_delimiter = ',',
        default_value = DEFAULT_ICE_SERVER
    )]
    ice_servers: Vec<String>,

    /// Label of the data channel we open when connecting
    #[arg(long, default_value = DEFAULT_CHANNEL_LABEL)]
    channel_label: String,

    /// Seconds before an unfinished negotiation is marked failed (0 disables)
    #[arg(long, default_value_t = DEFAULT_NEGOTIATION_TIMEOUT_SECS)]
    negotiation_timeout_secs: u64,

    /// Maximum ICE candidates held per peer before a remote description exists
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING_CANDIDATES)]
    max_pending_candidates: usize,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        let timeout = match self.negotiation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        ClientConfig {
            relay_url: self.relay_url,
            ice_servers: self
                .ice_servers
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            negotiation: NegotiationConfig {
                channel_label: self.channel_label,
                timeout,
                max_pending_candidates: self.max_pending_candidates,
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    peerlink_common::init_tracing_with_default(&args.log_level);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_client(args.into_config()))
}
