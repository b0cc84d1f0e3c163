//! Integration test: connection loss, automatic reconnection, and
//! post-reconnect resynchronization.
//!
//! The server drops every connection; the engine must notice, retry
//! with backoff, announce itself again, and refetch the unread badge —
//! events missed while disconnected are not replayed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use parley::api::HttpApiClient;
use parley::connection::RetryPolicy;
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

fn fast_options() -> SessionOptions {
    SessionOptions {
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(100),
        },
        ..Default::default()
    }
}

async fn connected_session(
    addr: std::net::SocketAddr,
    user: &str,
) -> (LiveSession, mpsc::Receiver<SessionEvent>) {
    let (session, mut events) = SyncSession::new(
        UserId::new(user),
        WsConnector::new(format!("ws://{addr}/ws")),
        HttpApiClient::new(format!("http://{addr}")),
        fast_options(),
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
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn reconnects_and_resyncs_after_connection_drop() {
    let (addr, state) = start_server().await;
    let (alice, mut events) = connected_session(addr, "alice").await;

    // Sever every connection from the server side.
    state.close_all_connections().await;
    wait_for(&mut events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: false }
    })
    .await;

    // While alice is offline, messages pile up unseen.
    for i in 0..2 {
        state
            .store
            .append(
                UserId::new("bob"),
                UserId::new("alice"),
                MessageBody::Text(format!("missed {i}")),
                None,
            )
            .await;
    }

    // The supervisor reconnects on its own and refetches the badge.
    wait_for(&mut events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: true }
    })
    .await;
    wait_for(&mut events, |e| {
        *e == SessionEvent::UnreadChanged { total: 2 }
    })
    .await;
    assert_eq!(alice.unread_total(), 2);
    assert!(alice.is_connected());
}

#[tokio::test]
async fn presence_is_reannounced_after_reconnect() {
    let (addr, state) = start_server().await;
    let (_alice, mut alice_events) = connected_session(addr, "alice").await;
    let (_bob, mut bob_events) = connected_session(addr, "bob").await;

    wait_for(&mut alice_events, |e| *e == SessionEvent::PresenceUpdated).await;

    // Drop everyone; both clients reconnect and re-announce, so each
    // sees the other come back online.
    state.close_all_connections().await;
    wait_for(&mut alice_events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: false }
    })
    .await;
    wait_for(&mut bob_events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: false }
    })
    .await;

    wait_for(&mut alice_events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: true }
    })
    .await;
    wait_for(&mut bob_events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: true }
    })
    .await;
}

#[tokio::test]
async fn send_during_outage_flushes_after_reconnect() {
    let (addr, state) = start_server().await;
    let (alice, mut alice_events) = connected_session(addr, "alice").await;
    let (bob, mut bob_events) = connected_session(addr, "bob").await;
    let alice_id = UserId::new("alice");
    let bob_id = UserId::new("bob");

    // Cut only alice off, then have her send while the link is down.
    state.close_connection(&alice_id).await;
    wait_for(&mut alice_events, |e| {
        *e == SessionEvent::ConnectionChanged { connected: false }
    })
    .await;

    alice
        .send_text(&bob_id, "sent while offline".into(), None)
        .await
        .expect("send should validate");
    assert!(
        alice.conversation(&bob_id)[0].is_optimistic(),
        "visible immediately with a pending marker"
    );

    // After alice reconnects the queued intent flushes; bob (still
    // connected) receives the message and alice gets her confirmation.
    wait_for(&mut bob_events, |e| {
        matches!(e, SessionEvent::ConversationUpdated { peer } if *peer == alice_id)
    })
    .await;
    assert_eq!(
        bob.conversation(&alice_id)[0].body,
        MessageBody::Text("sent while offline".into())
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let conversation = alice.conversation(&bob_id);
        if conversation.len() == 1 && !conversation[0].is_optimistic() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "offline send was never confirmed after reconnect"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
