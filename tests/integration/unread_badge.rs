//! Integration test: the global unread badge against a live server.
//!
//! Verifies that arriving messages in unfocused conversations bump the
//! badge through an authoritative refetch, that opening a conversation
//! optimistically drops the badge and marks messages read server-side,
//! and that the follow-up sync agrees.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use parley::api::HttpApiClient;
use parley::link::ws::WsConnector;
use parley::session::{SessionEvent, SessionOptions, SyncSession};
use parley_proto::message::{MessageBody, UserId};
use parley_server::server::{self, ServerState};

type LiveSession = SyncSession<WsConnector, HttpApiClient>;

async fn start_server() -> (std::net::SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, state)
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
async fn connect_syncs_preexisting_unread() {
    let (addr, state) = start_server().await;
    for i in 0..3 {
        state
            .store
            .append(
                UserId::new("bob"),
                UserId::new("alice"),
                MessageBody::Text(format!("while away {i}")),
                None,
            )
            .await;
    }

    let (alice, mut events) = connected_session(addr, "alice").await;
    wait_for(&mut events, |e| {
        *e == SessionEvent::UnreadChanged { total: 3 }
    })
    .await;
    assert_eq!(alice.unread_total(), 3);
}

#[tokio::test]
async fn arriving_message_in_unfocused_conversation_bumps_badge() {
    let (addr, _state) = start_server().await;
    let (alice, mut alice_events) = connected_session(addr, "alice").await;
    let (bob, _bob_events) = connected_session(addr, "bob").await;

    bob.send_text(&UserId::new("alice"), "ping".into(), None)
        .await
        .expect("send should validate");

    wait_for(&mut alice_events, |e| {
        *e == SessionEvent::UnreadChanged { total: 1 }
    })
    .await;
    assert_eq!(alice.unread_total(), 1);
}

#[tokio::test]
async fn opening_the_conversation_clears_the_badge() {
    let (addr, state) = start_server().await;
    for i in 0..3 {
        state
            .store
            .append(
                UserId::new("bob"),
                UserId::new("alice"),
                MessageBody::Text(format!("unread {i}")),
                None,
            )
            .await;
    }

    let (alice, mut events) = connected_session(addr, "alice").await;
    wait_for(&mut events, |e| {
        *e == SessionEvent::UnreadChanged { total: 3 }
    })
    .await;

    // Opening drops the known amount optimistically and marks the
    // messages read on the server. The mark-read intent and the
    // authoritative sync travel on different connections, so poll
    // through the public surface until they agree on zero.
    alice.open_conversation(&UserId::new("bob"), 3).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while alice.unread_total() != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "badge never settled at zero (stuck at {})",
            alice.unread_total()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Another authoritative refresh.
        alice.refresh_sessions().await.expect("refresh should succeed");
    }

    // The server agrees: everything from bob is read.
    let api = HttpApiClient::new(format!("http://{addr}"));
    let count = parley::api::ApiClient::unread_count(&api, &UserId::new("alice"))
        .await
        .expect("unread query should succeed");
    assert_eq!(count.total_unread, 0);
}

#[tokio::test]
async fn focused_conversation_does_not_bump_badge() {
    let (addr, _state) = start_server().await;
    let (alice, mut alice_events) = connected_session(addr, "alice").await;
    let (bob, _bob_events) = connected_session(addr, "bob").await;
    let bob_id = UserId::new("bob");

    alice.open_conversation(&bob_id, 0).await;

    bob.send_text(&UserId::new("alice"), "direct".into(), None)
        .await
        .expect("send should validate");

    // The message lands in the cache of the focused conversation.
    wait_for(&mut alice_events, |e| {
        matches!(e, SessionEvent::ConversationUpdated { peer } if *peer == bob_id)
    })
    .await;
    // It is read immediately, so the badge stays at zero.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.unread_total(), 0);
}
