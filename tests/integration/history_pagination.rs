//! Integration test: backward pagination against a live server.
//!
//! Verifies the 25-message walk: the first page returns the newest 20
//! and sets the cursor to the oldest returned id, the second returns
//! the remaining 5 and exhausts the history, and the third call is a
//! no-op that issues no request.

use std::sync::Arc;

use parley::api::HttpApiClient;
use parley::link::ws::WsConnector;
use parley::session::{PageOutcome, SessionOptions, SyncSession};
use parley_proto::message::{MessageBody, UserId};
use parley_server::server::{self, ServerState};

async fn start_server() -> (std::net::SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, state)
}

#[tokio::test]
async fn paginates_25_messages_in_two_pages_then_stops() {
    let (addr, state) = start_server().await;

    // 25 stored messages, oldest first.
    for i in 0..25 {
        state
            .store
            .append(
                UserId::new("bob"),
                UserId::new("alice"),
                MessageBody::Text(format!("msg {i}")),
                None,
            )
            .await;
    }

    let (session, _events) = SyncSession::new(
        UserId::new("alice"),
        WsConnector::new(format!("ws://{addr}/ws")),
        HttpApiClient::new(format!("http://{addr}")),
        SessionOptions::default(),
    );

    let bob = UserId::new("bob");

    // First page: the newest 20.
    assert_eq!(
        session.load_older(&bob).await.unwrap(),
        PageOutcome::Loaded(20)
    );
    let loaded = session.conversation(&bob);
    assert_eq!(loaded.len(), 20);
    assert_eq!(loaded[0].body, MessageBody::Text("msg 5".into()));
    assert_eq!(loaded[19].body, MessageBody::Text("msg 24".into()));

    // Second page: the remaining 5; the short page ends pagination.
    assert_eq!(
        session.load_older(&bob).await.unwrap(),
        PageOutcome::Loaded(5)
    );
    let loaded = session.conversation(&bob);
    assert_eq!(loaded.len(), 25);
    assert_eq!(loaded[0].body, MessageBody::Text("msg 0".into()));

    // Third call: suppressed, no request, nothing changes.
    assert_eq!(
        session.load_older(&bob).await.unwrap(),
        PageOutcome::Exhausted
    );
    assert_eq!(session.conversation(&bob).len(), 25);
}

#[tokio::test]
async fn empty_conversation_exhausts_on_first_page() {
    let (addr, _state) = start_server().await;

    let (session, _events) = SyncSession::new(
        UserId::new("alice"),
        WsConnector::new(format!("ws://{addr}/ws")),
        HttpApiClient::new(format!("http://{addr}")),
        SessionOptions::default(),
    );

    let bob = UserId::new("bob");
    assert_eq!(
        session.load_older(&bob).await.unwrap(),
        PageOutcome::Loaded(0)
    );
    assert_eq!(
        session.load_older(&bob).await.unwrap(),
        PageOutcome::Exhausted
    );
}

#[tokio::test]
async fn fetch_failure_leaves_pagination_retryable() {
    let (addr, state) = start_server().await;
    for i in 0..25 {
        state
            .store
            .append(
                UserId::new("bob"),
                UserId::new("alice"),
                MessageBody::Text(format!("msg {i}")),
                None,
            )
            .await;
    }

    // Point the API client at a dead port to force request failures.
    let (session, _events) = SyncSession::new(
        UserId::new("alice"),
        WsConnector::new(format!("ws://{addr}/ws")),
        HttpApiClient::new("http://127.0.0.1:1"),
        SessionOptions::default(),
    );

    let bob = UserId::new("bob");
    assert!(session.load_older(&bob).await.is_err());
    assert!(session.conversation(&bob).is_empty());

    // Nothing was merged, so a fresh session against the real endpoint
    // fetches the same first page the failed call was after.
    let (session, _events) = SyncSession::new(
        UserId::new("alice"),
        WsConnector::new(format!("ws://{addr}/ws")),
        HttpApiClient::new(format!("http://{addr}")),
        SessionOptions::default(),
    );
    assert_eq!(
        session.load_older(&bob).await.unwrap(),
        PageOutcome::Loaded(20)
    );
}
