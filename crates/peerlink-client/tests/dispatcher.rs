//! Dispatcher ordering and error isolation.

mod support;

use futures::stream;
use peerlink_client::{Dispatcher, SessionState};
use peerlink_common::{ClientMessage, Error, RelayMessage, SessionDescription};

use support::{candidate, Harness};

#[tokio::test]
async fn test_malformed_envelope_does_not_stop_dispatch() {
    let mut h = Harness::new();
    let events = std::mem::replace(&mut h.events, tokio::sync::mpsc::unbounded_channel().1);
    let mut dispatcher = Dispatcher::new(h.negotiator.clone(), events);

    let inbound = stream::iter(vec![
        Err(Error::protocol("invalid envelope")),
        Ok(RelayMessage::Registered {
            peer_id: "abc".into(),
        }),
    ]);
    dispatcher.run(inbound).await;

    assert_eq!(h.negotiator.local_peer_id().as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_envelopes_are_handled_in_arrival_order() {
    let mut h = Harness::new();
    let events = std::mem::replace(&mut h.events, tokio::sync::mpsc::unbounded_channel().1);
    let mut dispatcher = Dispatcher::new(h.negotiator.clone(), events);

    let inbound = stream::iter(vec![
        Ok(RelayMessage::IceCandidate {
            source: "p1".into(),
            candidate: candidate(1),
        }),
        Ok(RelayMessage::Offer {
            source: "p1".into(),
            offer: SessionDescription::offer("v=0 from p1"),
        }),
        Ok(RelayMessage::Answer {
            source: "ghost".into(),
            answer: SessionDescription::answer("v=0 from ghost"),
        }),
        Ok(RelayMessage::Offer {
            source: "p2".into(),
            offer: SessionDescription::offer("v=0 from p2"),
        }),
    ]);
    dispatcher.run(inbound).await;

    let targets: Vec<String> = h
        .sent()
        .into_iter()
        .filter_map(|msg| match msg {
            ClientMessage::Answer { target, .. } => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(targets, ["p1", "p2"]);

    // The candidate that arrived before the offer was applied to p1.
    let connections = h.connector.connections();
    assert_eq!(connections[0].peer_id, "p1");
    assert_eq!(connections[0].candidates(), vec![candidate(1)]);

    assert_eq!(h.state("p1").await, Some(SessionState::AnswerSent));
    assert_eq!(h.state("ghost").await, None);
}

#[tokio::test]
async fn test_handler_error_is_logged_and_skipped() {
    let mut h = Harness::new();
    let events = std::mem::replace(&mut h.events, tokio::sync::mpsc::unbounded_channel().1);
    let mut dispatcher = Dispatcher::new(h.negotiator.clone(), events);

    // An offer carrying an answer description is rejected by the engine.
    let inbound = stream::iter(vec![
        Ok(RelayMessage::Offer {
            source: "p1".into(),
            offer: SessionDescription::answer("v=0 wrong type"),
        }),
        Ok(RelayMessage::Offer {
            source: "p2".into(),
            offer: SessionDescription::offer("v=0 from p2"),
        }),
    ]);
    dispatcher.run(inbound).await;

    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.state("p2").await, Some(SessionState::AnswerSent));
}

#[tokio::test]
async fn test_connection_events_are_drained_after_relay_closes() {
    let mut h = Harness::new();
    h.negotiator.connect("xyz").await.unwrap();
    h.negotiator
        .handle_answer("xyz", SessionDescription::answer("v=0 answer"))
        .await
        .unwrap();
    let connection = h.connector.last();
    connection.open_channel();

    let events = std::mem::replace(&mut h.events, tokio::sync::mpsc::unbounded_channel().1);
    let mut dispatcher = Dispatcher::new(h.negotiator.clone(), events);
    dispatcher
        .run(stream::empty::<peerlink_common::Result<RelayMessage>>())
        .await;

    let negotiator = h.negotiator.clone();
    let drain = tokio::spawn(async move { dispatcher.drain_events().await });

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while h.state("xyz").await != Some(SessionState::Open) {
        assert!(tokio::time::Instant::now() < deadline, "channel never opened");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    negotiator.send_message("xyz", "still here").await.unwrap();
    assert_eq!(connection.channel.sent(), vec!["still here"]);
    drain.abort();
}
