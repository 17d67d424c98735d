//! Line-oriented operator commands.

use peerlink_common::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::negotiation::Negotiator;
use crate::types::ClientEvent;

pub const COMMAND_LIST: &str =
    "Available commands: register, connect <peerId>, send <peerId> <message>, peers, whoami, help, exit";

const PROMPT: &[u8] = b"> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register,
    Connect(String),
    Send { peer_id: String, message: String },
    Peers,
    Whoami,
    Help,
    Exit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let mut parts = line.splitn(3, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let command = match name {
            "register" => Self::Register,
            "connect" => match parts.next().map(str::trim) {
                Some(peer_id) if !peer_id.is_empty() => {
                    if parts.next().is_some_and(|rest| !rest.trim().is_empty()) {
                        return Err(Error::input("Usage: connect <peerId>"));
                    }
                    Self::Connect(peer_id.to_string())
                }
                _ => return Err(Error::input("Usage: connect <peerId>")),
            },
            "send" => {
                let peer_id = parts.next().unwrap_or_default();
                let message = parts.next().map(str::trim_start).unwrap_or_default();
                if peer_id.is_empty() || message.is_empty() {
                    return Err(Error::input("Usage: send <peerId> <message>"));
                }
                Self::Send {
                    peer_id: peer_id.to_string(),
                    message: message.to_string(),
                }
            }
            "peers" => Self::Peers,
            "whoami" => Self::Whoami,
            "help" => Self::Help,
            "exit" | "quit" => Self::Exit,
            _ => return Err(Error::input(format!("Unknown command. {COMMAND_LIST}"))),
        };
        Ok(Some(command))
    }
}

/// Read commands from `reader` until `exit` or end of input. Notices are
/// written to `writer` between commands, followed by a fresh prompt.
pub async fn run_repl<R, W>(
    negotiator: &Negotiator,
    reader: R,
    mut writer: W,
    mut notices: mpsc::UnboundedReceiver<ClientEvent>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        writer.write_all(PROMPT).await?;
        writer.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(event) = notices.recv() => {
                writer.write_all(format!("\n{event}\n").as_bytes()).await?;
                continue;
            }
        };
        let Some(line) = line else {
            debug!("Command input closed");
            break;
        };

        let output = match Command::parse(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Exit)) => break,
            Ok(Some(command)) => execute(negotiator, command).await,
            Err(e) => e.to_string(),
        };
        writer.write_all(output.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    while let Ok(event) = notices.try_recv() {
        writer.write_all(format!("{event}\n").as_bytes()).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Run one command and return the text to show the operator.
pub async fn execute(negotiator: &Negotiator, command: Command) -> String {
    match command {
        Command::Register => match negotiator.register() {
            Ok(()) => "Registration requested".to_string(),
            Err(e) => format!("Error registering: {e}"),
        },
        Command::Connect(peer_id) => match negotiator.connect(&peer_id).await {
            Ok(()) => format!("Offer sent to {peer_id}"),
            Err(e) => {
                warn!(peer_id = %peer_id, "Connect failed: {}", e);
                format!("Error connecting to peer: {e}")
            }
        },
        Command::Send { peer_id, message } => {
            match negotiator.send_message(&peer_id, &message).await {
                Ok(()) => format!("Message sent to {peer_id}: {message}"),
                Err(Error::NoOpenChannel(_)) => format!("No open data channel to peer {peer_id}"),
                Err(e) => format!("Error sending message: {e}"),
            }
        }
        Command::Peers => {
            let sessions = negotiator.registry().snapshot().await;
            if sessions.is_empty() {
                return "No peers".to_string();
            }
            sessions
                .iter()
                .map(|(peer_id, state)| format!("{peer_id}\t{state}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Command::Whoami => match negotiator.local_peer_id() {
            Some(peer_id) => peer_id,
            None => "Not registered".to_string(),
        },
        Command::Help => COMMAND_LIST.to_string(),
        Command::Exit => String::new(),
    }
}
