//! Chat server core: shared state, WebSocket handler, user registry,
//! event routing, and the HTTP API.
//!
//! The server accepts WebSocket connections, registers users by their
//! announced [`UserId`], and routes chat events between them. Presence
//! is broadcast on every connect/disconnect; messages are persisted in
//! a [`ChatStore`] and served back through the paginated history
//! endpoint. Events missed while a user is offline are NOT replayed —
//! clients resynchronize through the HTTP API on reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use parley_proto::api::{ConversationSummary, UnreadCount};
use parley_proto::codec;
use parley_proto::event::{ClientIntent, ServerEvent};
use parley_proto::message::{ChatMessage, MessageId, Timestamp, UserId};

use crate::store::ChatStore;

/// Default page size for the history endpoint when the query omits `limit`.
const DEFAULT_PAGE_LIMIT: usize = 20;

/// Shared server state holding the user registry, presence, and store.
pub struct ServerState {
    /// Maps `UserId` to a channel sender for delivering WebSocket messages.
    connections: RwLock<HashMap<UserId, mpsc::UnboundedSender<Message>>>,
    /// Last-seen timestamps, written when a user disconnects.
    last_seen: RwLock<HashMap<UserId, Timestamp>>,
    /// Persistent (in-memory) message store.
    pub store: ChatStore,
    /// Page size used when a history request omits `limit`.
    default_page_limit: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates a new server state with an empty registry and store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            last_seen: RwLock::new(HashMap::new()),
            store: ChatStore::new(),
            default_page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// Creates a new server state with a custom default page limit.
    #[must_use]
    pub fn with_config(default_page_limit: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            last_seen: RwLock::new(HashMap::new()),
            store: ChatStore::new(),
            default_page_limit,
        }
    }

    /// Registers a user, storing the sender half of its message channel.
    ///
    /// If the user was already registered, the old sender is replaced and
    /// the previous writer task shuts down when it sees the closed channel.
    pub async fn register(
        &self,
        user_id: &UserId,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        let mut conns = self.connections.write().await;
        conns.insert(user_id.clone(), sender)
    }

    /// Removes a user from the registry, returning the sender if present.
    pub async fn unregister(&self, user_id: &UserId) -> Option<mpsc::UnboundedSender<Message>> {
        let mut conns = self.connections.write().await;
        conns.remove(user_id)
    }

    /// Returns a clone of the sender for the given user, if connected.
    pub async fn get_sender(&self, user_id: &UserId) -> Option<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns.get(user_id).cloned()
    }

    /// Whether the user currently has a live connection.
    pub async fn is_online(&self, user_id: &UserId) -> bool {
        let conns = self.connections.read().await;
        conns.contains_key(user_id)
    }

    /// Send a WebSocket Close frame to all connected users.
    ///
    /// Each writer task emits the close frame, which the client-side
    /// reader detects as a disconnect. Used for graceful shutdown and
    /// for exercising client reconnection in tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user_id, sender) in conns.iter() {
            tracing::info!(user = %user_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Send a WebSocket Close frame to one user, if connected.
    pub async fn close_connection(&self, user_id: &UserId) {
        if let Some(sender) = self.get_sender(user_id).await {
            tracing::info!(user = %user_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single user.
///
/// Connection lifecycle:
/// 1. Wait for an `Announce` intent (first frame, mandatory).
/// 2. Register the user and broadcast their online presence.
/// 3. Enter the intent loop, routing events to recipients.
/// 4. On disconnect, unregister, record `last_seen`, broadcast offline.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user_id) = wait_for_announce(&mut ws_receiver).await else {
        tracing::warn!("connection closed before announce");
        return;
    };

    tracing::info!(user = %user_id, "user announcing");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    if state.register(&user_id, tx).await.is_some() {
        tracing::info!(user = %user_id, "replaced existing connection (duplicate announce)");
    }

    broadcast_presence(&state, &user_id, true, None).await;

    // Writer task: forward channel messages to the WebSocket.
    let writer_user = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader task: process incoming intents from this user.
    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_frame(&reader_user, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(user = %reader_user, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Clean up: record the offline transition and tell everyone.
    state.unregister(&user_id).await;
    let went_offline_at = Timestamp::now();
    state
        .last_seen
        .write()
        .await
        .insert(user_id.clone(), went_offline_at);
    broadcast_presence(&state, &user_id, false, Some(went_offline_at)).await;
    tracing::info!(user = %user_id, "user disconnected");
}

/// Waits for the first frame, expecting an `Announce` intent.
///
/// Returns the announced identity, or `None` if the connection closes
/// or a different intent arrives first.
async fn wait_for_announce(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<UserId> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match codec::decode_intent(&data) {
                Ok(ClientIntent::Announce { user_id }) => {
                    if user_id.as_str().is_empty() {
                        tracing::warn!("received Announce with empty user id");
                        return None;
                    }
                    return Some(user_id);
                }
                Ok(other) => {
                    tracing::warn!(intent = ?other, "expected Announce, got different intent");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode announce frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-binary frames (ping/pong) during announce.
            }
        }
    }
    None
}

/// Handles a binary frame from an announced user.
async fn handle_binary_frame(user_id: &UserId, data: &[u8], state: &Arc<ServerState>) {
    let intent = match codec::decode_intent(data) {
        Ok(i) => i,
        Err(e) => {
            // Malformed frame — log and skip, never disconnect on bad data.
            tracing::warn!(user = %user_id, error = %e, "malformed frame, skipping");
            return;
        }
    };

    match intent {
        ClientIntent::SendMessage {
            temp_id,
            sender_id: _,
            receiver_id,
            body,
            reply_to,
        } => {
            // Server-side identity enforcement: the sender is whoever
            // announced on this connection, not what the frame claims.
            let message = state
                .store
                .append(user_id.clone(), receiver_id.clone(), body, reply_to)
                .await;

            tracing::debug!(
                from = %user_id,
                to = %receiver_id,
                id = ?message.id,
                "message accepted"
            );

            send_event(state, user_id, &ServerEvent::MessageConfirmed {
                temp_id,
                message: message.clone(),
            })
            .await;
            send_event(state, &receiver_id, &ServerEvent::MessageReceived(message)).await;
        }
        ClientIntent::MarkRead {
            reader_id: _,
            sender_id,
        } => {
            let flipped = state.store.mark_read(user_id, &sender_id).await;
            tracing::debug!(reader = %user_id, author = %sender_id, flipped, "marked read");
            if flipped > 0 {
                send_event(state, &sender_id, &ServerEvent::MessagesRead {
                    reader_id: user_id.clone(),
                })
                .await;
            }
        }
        ClientIntent::DeleteMessage { message_id } => {
            if let Some(removed) = state.store.delete(&message_id).await {
                let other = removed.conversation_key(user_id).clone();
                tracing::debug!(user = %user_id, id = %message_id, "message deleted");
                send_event(state, &other, &ServerEvent::MessageDeleted { message_id }).await;
            } else {
                tracing::debug!(user = %user_id, id = %message_id, "delete of unknown message");
            }
        }
        ClientIntent::Typing {
            sender_id: _,
            receiver_id,
        } => {
            send_event(state, &receiver_id, &ServerEvent::TypingStarted {
                sender_id: user_id.clone(),
            })
            .await;
        }
        ClientIntent::StopTyping {
            sender_id: _,
            receiver_id,
        } => {
            send_event(state, &receiver_id, &ServerEvent::TypingStopped {
                sender_id: user_id.clone(),
            })
            .await;
        }
        ClientIntent::Announce { user_id: new_id } => {
            tracing::warn!(
                user = %user_id,
                new_id = %new_id,
                "duplicate Announce from already-announced user"
            );
        }
    }
}

/// Broadcasts a presence change to every connected user except the subject.
async fn broadcast_presence(
    state: &Arc<ServerState>,
    user_id: &UserId,
    is_online: bool,
    last_seen: Option<Timestamp>,
) {
    let event = ServerEvent::PresenceChanged {
        user_id: user_id.clone(),
        is_online,
        last_seen,
    };
    let Ok(bytes) = codec::encode_event(&event) else {
        tracing::error!("failed to encode presence event");
        return;
    };
    let conns = state.connections.read().await;
    for (other, sender) in conns.iter() {
        if other != user_id {
            let _ = sender.send(Message::Binary(bytes.clone().into()));
        }
    }
}

/// Encodes an event and sends it to a connected user. No-op if offline —
/// missed events are recovered through the HTTP API, not replayed.
async fn send_event(state: &Arc<ServerState>, user_id: &UserId, event: &ServerEvent) {
    if let Some(sender) = state.get_sender(user_id).await
        && let Ok(bytes) = codec::encode_event(event)
    {
        let _ = sender.send(Message::Binary(bytes.into()));
    }
}

// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/history`.
#[derive(Debug, serde::Deserialize)]
struct HistoryParams {
    user: String,
    peer: String,
    cursor: Option<String>,
    limit: Option<usize>,
}

/// Query parameter for `GET /api/unread-count` and `GET /api/sessions`.
#[derive(Debug, serde::Deserialize)]
struct UserParams {
    user: String,
}

/// `GET /api/history?user&peer&cursor&limit` — one backward page,
/// oldest → newest within the page.
async fn history_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::Query(params): axum::extract::Query<HistoryParams>,
) -> axum::Json<Vec<ChatMessage>> {
    let cursor = params.cursor.map(MessageId::new);
    let limit = params.limit.unwrap_or(state.default_page_limit);
    let page = state
        .store
        .history_page(
            &UserId::new(params.user),
            &UserId::new(params.peer),
            cursor.as_ref(),
            limit,
        )
        .await;
    axum::Json(page)
}

/// `GET /api/unread-count?user` — total unread across all conversations.
async fn unread_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::Query(params): axum::extract::Query<UserParams>,
) -> axum::Json<UnreadCount> {
    let total_unread = state.store.unread_total(&UserId::new(params.user)).await;
    axum::Json(UnreadCount { total_unread })
}

/// `GET /api/sessions?user` — per-conversation summaries with presence.
async fn sessions_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::Query(params): axum::extract::Query<UserParams>,
) -> axum::Json<Vec<ConversationSummary>> {
    let user = UserId::new(params.user);
    let digests = state.store.summaries(&user).await;

    let conns = state.connections.read().await;
    let last_seen = state.last_seen.read().await;

    let summaries = digests
        .into_iter()
        .map(|d| {
            let is_online = conns.contains_key(&d.peer_id);
            ConversationSummary {
                last_seen: if is_online {
                    None
                } else {
                    last_seen.get(&d.peer_id).copied()
                },
                is_online,
                peer_id: d.peer_id,
                last_message: d.last_message,
                last_message_time: d.last_message_time,
                unread_count: d.unread_count,
            }
        })
        .collect();
    axum::Json(summaries)
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/api/history", axum::routing::get(history_handler))
        .route("/api/unread-count", axum::routing::get(unread_handler))
        .route("/api/sessions", axum::routing::get(sessions_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
