//! Integration test: presence and typing indicators across two live
//! clients.
//!
//! Verifies:
//! 1. A peer connecting/disconnecting flips the online set, recording
//!    `last_seen` on the offline transition only.
//! 2. Repeated offline transitions keep the most recent `last_seen`.
//! 3. Typing indicators show only for the conversation in focus and
//!    clear on the stop signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use parley::api::HttpApiClient;
use parley::link::ws::WsConnector;
use parley::session::{SessionEvent, SessionOptions, SyncSession};
use parley_proto::message::UserId;
use parley_server::server::{self, ServerState};

type LiveSession = SyncSession<WsConnector, HttpApiClient>;

async fn start_server() -> std::net::SocketAddr {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start test server");
    addr
}

async fn connected_session(
    addr: std::net::SocketAddr,
    user: &str,
) -> (LiveSession, mpsc::Receiver<SessionEvent>) {
    let (session, mut events) = SyncSession::new(
        UserId::new(user),
        WsConnector::new(format!("ws://{addr}/ws")),
        HttpApiClient::new(format!("http://{addr}")),
        SessionOptions::default(),
    );
    session.connect();
    wait_for(&mut events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: true }
    })
    .await;
    (session, events)
}

async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn peer_connect_and_disconnect_update_presence() {
    let addr = start_server().await;
    let (alice, mut alice_events) = connected_session(addr, "alice").await;
    let bob_id = UserId::new("bob");

    let (bob, _bob_events) = connected_session(addr, "bob").await;

    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceUpdated).await;
    assert!(alice.peer_presence(&bob_id).is_online);
    assert_eq!(alice.peer_presence(&bob_id).last_seen, None);

    bob.disconnect();

    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceUpdated).await;
    let presence = alice.peer_presence(&bob_id);
    assert!(!presence.is_online);
    assert!(presence.last_seen.is_some(), "offline transition records last_seen");
}

#[tokio::test]
async fn last_seen_tracks_the_latest_offline_transition() {
    let addr = start_server().await;
    let (alice, mut alice_events) = connected_session(addr, "alice").await;
    let bob_id = UserId::new("bob");

    // First online/offline cycle.
    let (bob, _bob_events) = connected_session(addr, "bob").await;
    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceUpdated).await;
    bob.disconnect();
    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceUpdated).await;
    let first_seen = alice
        .peer_presence(&bob_id)
        .last_seen
        .expect("first offline transition recorded");

    tokio::time::sleep(Duration::from_millis(20)).await;

    // Second cycle: last_seen must move forward, not stay at the first.
    let (bob, _bob_events) = connected_session(addr, "bob").await;
    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceUpdated).await;
    // Coming online keeps the stale entry.
    assert_eq!(alice.peer_presence(&bob_id).last_seen, Some(first_seen));

    bob.disconnect();
    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceUpdated).await;
    let second_seen = alice
        .peer_presence(&bob_id)
        .last_seen
        .expect("second offline transition recorded");
    assert!(
        second_seen > first_seen,
        "last_seen should advance to the most recent offline transition"
    );
}

#[tokio::test]
async fn typing_shows_only_for_the_focused_conversation() {
    let addr = start_server().await;
    let (alice, mut alice_events) = connected_session(addr, "alice").await;
    let (bob, _bob_events) = connected_session(addr, "bob").await;
    let alice_id = UserId::new("alice");
    let bob_id = UserId::new("bob");

    // Alice is not looking at bob's conversation yet: no indicator.
    bob.notify_typing(&alice_id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.typing_peer(), None);

    // Focus the conversation, then type again.
    alice.open_conversation(&bob_id, 0).await;
    bob.notify_typing(&alice_id).await;
    wait_for(&mut alice_events, |e| *e == SessionEvent::TypingUpdated).await;
    assert_eq!(alice.typing_peer(), Some(bob_id.clone()));

    // Stop signal clears it.
    bob.notify_stopped_typing(&alice_id).await;
    wait_for(&mut alice_events, |e| *e == SessionEvent::TypingUpdated).await;
    assert_eq!(alice.typing_peer(), None);
}

#[tokio::test]
async fn sending_a_message_stops_the_typing_indicator() {
    let addr = start_server().await;
    let (alice, mut alice_events) = connected_session(addr, "alice").await;
    let (bob, _bob_events) = connected_session(addr, "bob").await;
    let alice_id = UserId::new("alice");
    let bob_id = UserId::new("bob");

    alice.open_conversation(&bob_id, 0).await;
    bob.notify_typing(&alice_id).await;
    wait_for(&mut alice_events, |e| *e == SessionEvent::TypingUpdated).await;
    assert_eq!(alice.typing_peer(), Some(bob_id.clone()));

    // Bob sends — the engine emits stop-typing along with the message.
    bob.send_text(&alice_id, "done typing".into(), None)
        .await
        .expect("send should validate");

    wait_for(&mut alice_events, |e| *e == SessionEvent::TypingUpdated).await;
    assert_eq!(alice.typing_peer(), None);
}
