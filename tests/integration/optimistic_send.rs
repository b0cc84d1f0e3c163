//! Integration test: optimistic sends through a live server.
//!
//! A sent message appears locally before any round trip, and the
//! server's confirmation replaces it in place — exactly one entry with
//! the server id, none with the temp id. Image sends release their
//! local preview resource exactly once, at confirmation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use parley::api::HttpApiClient;
use parley::link::ws::WsConnector;
use parley::outbox::PreviewGuard;
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

/// Drain session events until one matches, or time out.
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
async fn text_send_is_optimistic_then_confirmed() {
    let (addr, _state) = start_server().await;
    let (alice, mut events) = connected_session(addr, "alice").await;
    let bob = UserId::new("bob");

    let temp_id = alice
        .send_text(&bob, "hello".into(), None)
        .await
        .expect("send should validate");

    // Visible immediately, before the server answers.
    let conversation = alice.conversation(&bob);
    assert_eq!(conversation.len(), 1);
    assert!(conversation[0].is_optimistic());
    assert_eq!(conversation[0].temp_id, Some(temp_id));

    // Wait for the confirmation to land.
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::ConversationUpdated { peer } if *peer == bob)
    })
    .await;
    let confirmed = loop {
        let conversation = alice.conversation(&bob);
        if !conversation[0].is_optimistic() {
            break conversation;
        }
        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ConversationUpdated { .. })
        })
        .await;
    };

    assert_eq!(confirmed.len(), 1);
    assert!(confirmed[0].id.is_some());
    assert!(confirmed[0].temp_id.is_none());
    assert_eq!(confirmed[0].body, MessageBody::Text("hello".into()));
}

#[tokio::test]
async fn image_send_releases_preview_on_confirmation() {
    let (addr, _state) = start_server().await;
    let (alice, mut events) = connected_session(addr, "alice").await;
    let bob = UserId::new("bob");

    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    let preview = PreviewGuard::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    alice
        .send_image(&bob, "https://cdn.example/photo.jpg".into(), preview, None)
        .await
        .expect("image send should validate");
    assert_eq!(released.load(Ordering::SeqCst), 0);

    // Confirmation resolves the pending send and releases the preview.
    loop {
        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ConversationUpdated { .. })
        })
        .await;
        if !alice.conversation(&bob)[0].is_optimistic() {
            break;
        }
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_text_is_rejected_without_side_effects() {
    let (addr, _state) = start_server().await;
    let (alice, _events) = connected_session(addr, "alice").await;
    let bob = UserId::new("bob");

    assert!(alice.send_text(&bob, String::new(), None).await.is_err());
    assert!(alice.conversation(&bob).is_empty());
}
