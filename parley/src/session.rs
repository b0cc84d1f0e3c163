//! The per-identity session container.
//!
//! One [`SyncSession`] exists per authenticated identity, owning the
//! connection manager, history cache, outbox, presence tracker, and
//! unread counter — constructed explicitly and torn down explicitly,
//! never hidden in module-level globals. A router task consumes the
//! connection's [`SyncEvent`] stream and dispatches each event to the
//! owning component; UI layers observe the session through a
//! [`SessionEvent`] channel plus read accessors.
//!
//! All reconciliation runs as reactions to discrete events on the
//! router's single queue: events for one conversation are processed in
//! delivery order, and the cache merge rules — not locks — are what
//! guard against duplication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use parley_proto::api::ConversationSummary;
use parley_proto::event::{ClientIntent, ServerEvent};
use parley_proto::message::{
    ChatMessage, MessageId, ReplyRef, TempId, Timestamp, UserId, ValidationError,
};

use crate::api::{ApiClient, ApiError};
use crate::connection::{ConnectionManager, RetryPolicy, SyncEvent};
use crate::history::{HistoryCache, ThreadItem};
use crate::link::Connector;
use crate::outbox::{Outbox, PreviewGuard};
use crate::presence::PresenceTracker;
use crate::unread::UnreadCounter;

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// History page size; a shorter page ends pagination.
    pub page_limit: usize,
    /// How long a typing indicator survives without a refresh.
    pub typing_timeout: Duration,
    /// Age after which an unconfirmed send is reported as stale.
    pub send_stale_after: Duration,
    /// Buffer size for the event channels.
    pub event_buffer: usize,
    /// Reconnection policy.
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            page_limit: 20,
            typing_timeout: Duration::from_secs(3),
            send_stale_after: Duration::from_secs(30),
            event_buffer: 64,
            retry: RetryPolicy::default(),
        }
    }
}

/// Notifications for UI subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection came up or went down.
    ConnectionChanged {
        /// Current connection state.
        connected: bool,
    },
    /// A reconnection attempt is in progress.
    Reconnecting {
        /// The attempt number, starting at 1.
        attempt: u32,
        /// The configured attempt bound.
        max_attempts: u32,
    },
    /// A conversation's message sequence changed.
    ConversationUpdated {
        /// The conversation's peer.
        peer: UserId,
    },
    /// Online/last-seen state changed for some peer.
    PresenceUpdated,
    /// The typing indicator appeared or cleared.
    TypingUpdated,
    /// The global unread badge changed.
    UnreadChanged {
        /// The new total.
        total: u64,
    },
    /// A history or unread fetch failed; the caches are unchanged and
    /// the operation can be retried.
    FetchFailed {
        /// What was being fetched.
        context: String,
    },
}

/// Result of a pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// A page was fetched and merged; this many messages were new.
    Loaded(usize),
    /// History is exhausted; no request was made.
    Exhausted,
}

/// An owned snapshot item of the grouped conversation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEntry {
    /// All following messages (until the next separator) are from this day.
    DaySeparator(NaiveDate),
    /// A message of the conversation.
    Message(ChatMessage),
}

/// Online/last-seen snapshot for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPresence {
    /// Whether the peer is currently online.
    pub is_online: bool,
    /// When the peer was last seen, if ever observed going offline.
    pub last_seen: Option<Timestamp>,
}

/// The injectable state container for one authenticated identity.
pub struct SyncSession<C: Connector, A: ApiClient> {
    user_id: UserId,
    options: SessionOptions,
    connection: Arc<ConnectionManager<C>>,
    api: Arc<A>,
    history: Arc<RwLock<HistoryCache>>,
    presence: Arc<RwLock<PresenceTracker>>,
    unread: Arc<RwLock<UnreadCounter>>,
    outbox: Arc<Mutex<Outbox>>,
    update_tx: mpsc::Sender<SessionEvent>,
    sync_rx: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
    router: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Connector, A: ApiClient + 'static> SyncSession<C, A> {
    /// Creates a session for the given identity.
    ///
    /// Returns the session and the receiver for its [`SessionEvent`]s.
    /// Nothing connects until [`connect`](Self::connect) is called.
    pub fn new(
        user_id: UserId,
        connector: C,
        api: A,
        options: SessionOptions,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (connection, sync_rx) = ConnectionManager::new(
            user_id.clone(),
            connector,
            options.retry.clone(),
            options.event_buffer,
        );
        let (update_tx, update_rx) = mpsc::channel(options.event_buffer);

        let session = Self {
            history: Arc::new(RwLock::new(HistoryCache::new(user_id.clone()))),
            presence: Arc::new(RwLock::new(PresenceTracker::new(options.typing_timeout))),
            unread: Arc::new(RwLock::new(UnreadCounter::new())),
            outbox: Arc::new(Mutex::new(Outbox::new(user_id.clone()))),
            connection: Arc::new(connection),
            api: Arc::new(api),
            user_id,
            options,
            update_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
            router: Mutex::new(None),
        };
        (session, update_rx)
    }

    /// Connects (or resumes a lost connection) and starts the event
    /// router. Idempotent.
    pub fn connect(&self) {
        self.connection.connect();

        let mut router_guard = self.router.lock();
        if router_guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Some(sync_rx) = self.sync_rx.lock().take() else {
            return;
        };
        let router = Router {
            user_id: self.user_id.clone(),
            connection: Arc::clone(&self.connection),
            api: Arc::clone(&self.api),
            history: Arc::clone(&self.history),
            presence: Arc::clone(&self.presence),
            unread: Arc::clone(&self.unread),
            outbox: Arc::clone(&self.outbox),
            update_tx: self.update_tx.clone(),
        };
        *router_guard = Some(tokio::spawn(router.run(sync_rx)));
    }

    /// Tears down the connection and clears all state whose lifetime is
    /// bound to it: online set, last-seen map, typing state, active
    /// conversation, unread total, and pending sends. Loaded history
    /// survives — it is a cache of server truth, not connection state.
    pub fn disconnect(&self) {
        self.connection.disconnect();
        self.presence.write().clear();
        self.unread.write().clear();
        self.outbox.lock().clear();
        self.emit(SessionEvent::ConnectionChanged { connected: false });
        self.emit(SessionEvent::UnreadChanged { total: 0 });
        tracing::info!(user = %self.user_id, "session torn down");
    }

    /// Whether the live connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Brings a conversation into focus: marks its messages read on the
    /// server, optimistically drops the known unread amount from the
    /// badge, then resynchronizes the badge authoritatively.
    pub async fn open_conversation(&self, peer: &UserId, known_unread: u64) {
        let typing_cleared = self.presence.write().set_active(Some(peer.clone()));
        if typing_cleared {
            self.emit(SessionEvent::TypingUpdated);
        }

        if known_unread > 0 {
            let total = self.unread.write().decrement(known_unread);
            self.emit(SessionEvent::UnreadChanged { total });
        }

        self.connection
            .send(&ClientIntent::MarkRead {
                reader_id: self.user_id.clone(),
                sender_id: peer.clone(),
            })
            .await;

        resync_unread(
            self.api.as_ref(),
            &self.user_id,
            &self.unread,
            &self.update_tx,
        )
        .await;
    }

    /// Takes the conversation out of focus. In-flight pagination is not
    /// cancelled — it completes and merges normally.
    pub fn close_conversation(&self) {
        let typing_cleared = self.presence.write().set_active(None);
        if typing_cleared {
            self.emit(SessionEvent::TypingUpdated);
        }
    }

    /// Sends a text message: the optimistic record appears in the cache
    /// immediately, the intent goes out through the connection (queued
    /// if offline), and a stop-typing signal follows.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the text is empty or oversized.
    pub async fn send_text(
        &self,
        peer: &UserId,
        text: String,
        reply_to: Option<ReplyRef>,
    ) -> Result<TempId, ValidationError> {
        let out = self.outbox.lock().compose_text(peer, text, reply_to)?;
        self.history.write().insert(peer, out.message);
        self.emit(SessionEvent::ConversationUpdated { peer: peer.clone() });

        self.connection.send(&out.intent).await;
        self.connection
            .send(&ClientIntent::StopTyping {
                sender_id: self.user_id.clone(),
                receiver_id: peer.clone(),
            })
            .await;
        Ok(out.temp_id)
    }

    /// Sends an image message with an already-uploaded URL. The preview
    /// guard is released exactly once, when the confirmation arrives
    /// (or on teardown).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the URL is empty.
    pub async fn send_image(
        &self,
        peer: &UserId,
        url: String,
        preview: PreviewGuard,
        reply_to: Option<ReplyRef>,
    ) -> Result<TempId, ValidationError> {
        let out = self
            .outbox
            .lock()
            .compose_image(peer, url, preview, reply_to)?;
        self.history.write().insert(peer, out.message);
        self.emit(SessionEvent::ConversationUpdated { peer: peer.clone() });

        self.connection.send(&out.intent).await;
        Ok(out.temp_id)
    }

    /// Deletes a message: removed from the cache immediately, then the
    /// deletion is propagated to the server.
    pub async fn delete_message(&self, message_id: &MessageId) {
        if let Some(peer) = self.history.write().remove(message_id) {
            self.emit(SessionEvent::ConversationUpdated { peer });
        }
        self.connection
            .send(&ClientIntent::DeleteMessage {
                message_id: message_id.clone(),
            })
            .await;
    }

    /// Fetches the next older history page for a conversation and
    /// merges it. Once a short page has exhausted the history, further
    /// calls return [`PageOutcome::Exhausted`] without a request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the fetch fails; the cache and cursor
    /// are left unchanged so the call can simply be retried.
    pub async fn load_older(&self, peer: &UserId) -> Result<PageOutcome, ApiError> {
        let request = self
            .history
            .read()
            .page_request(peer, self.options.page_limit);
        let Some(request) = request else {
            return Ok(PageOutcome::Exhausted);
        };

        let page = self
            .api
            .history_page(&self.user_id, peer, request.cursor.as_ref(), request.limit)
            .await
            .inspect_err(|e| {
                tracing::warn!(peer = %peer, err = %e, "history page fetch failed");
                self.emit(SessionEvent::FetchFailed {
                    context: "history".into(),
                });
            })?;

        let added = self.history.write().apply_page(peer, page, request.limit);
        self.emit(SessionEvent::ConversationUpdated { peer: peer.clone() });
        Ok(PageOutcome::Loaded(added))
    }

    /// Signals that the user is typing into the conversation with `peer`.
    pub async fn notify_typing(&self, peer: &UserId) {
        self.connection
            .send(&ClientIntent::Typing {
                sender_id: self.user_id.clone(),
                receiver_id: peer.clone(),
            })
            .await;
    }

    /// Signals that the user stopped typing.
    pub async fn notify_stopped_typing(&self, peer: &UserId) {
        self.connection
            .send(&ClientIntent::StopTyping {
                sender_id: self.user_id.clone(),
                receiver_id: peer.clone(),
            })
            .await;
    }

    /// Fetches the conversation list, bulk-seeds presence from its
    /// snapshot (full replace), and resynchronizes the unread badge.
    /// Returns the summaries for the list screen.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the fetch fails; presence is unchanged.
    pub async fn refresh_sessions(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let sessions = self.api.sessions(&self.user_id).await.inspect_err(|e| {
            tracing::warn!(err = %e, "session list fetch failed");
            self.emit(SessionEvent::FetchFailed {
                context: "sessions".into(),
            });
        })?;

        let mut online = Vec::new();
        let mut last_seen = HashMap::new();
        for s in &sessions {
            if s.is_online {
                online.push(s.peer_id.clone());
            } else if let Some(ts) = s.last_seen {
                last_seen.insert(s.peer_id.clone(), ts);
            }
        }
        self.presence.write().bulk_sync(online, last_seen);
        self.emit(SessionEvent::PresenceUpdated);

        resync_unread(
            self.api.as_ref(),
            &self.user_id,
            &self.unread,
            &self.update_tx,
        )
        .await;

        Ok(sessions)
    }

    /// Periodic maintenance: expires a typing indicator whose stop
    /// signal was dropped, and reports sends unconfirmed past the
    /// configured deadline (they stay pending — this is information,
    /// not a state change).
    pub fn tick(&self) -> Vec<TempId> {
        let now = Timestamp::now();
        if self.presence.write().tick(now) {
            self.emit(SessionEvent::TypingUpdated);
        }
        let stale_ms =
            u64::try_from(self.options.send_stale_after.as_millis()).unwrap_or(u64::MAX);
        self.outbox.lock().stale(now, stale_ms)
    }

    // --- read accessors ---

    /// The authenticated identity.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The global unread total.
    #[must_use]
    pub fn unread_total(&self) -> u64 {
        self.unread.read().total()
    }

    /// The peer typing into the active conversation, if any.
    #[must_use]
    pub fn typing_peer(&self) -> Option<UserId> {
        self.presence.read().typing_peer().cloned()
    }

    /// The conversation currently in focus.
    #[must_use]
    pub fn active_conversation(&self) -> Option<UserId> {
        self.presence.read().active().cloned()
    }

    /// Online/last-seen snapshot for a peer.
    #[must_use]
    pub fn peer_presence(&self, peer: &UserId) -> PeerPresence {
        let presence = self.presence.read();
        PeerPresence {
            is_online: presence.is_online(peer),
            last_seen: presence.last_seen(peer),
        }
    }

    /// Snapshot of a conversation's messages, oldest → newest.
    #[must_use]
    pub fn conversation(&self, peer: &UserId) -> Vec<ChatMessage> {
        self.history.read().flattened(peer).cloned().collect()
    }

    /// Snapshot of a conversation interleaved with day separators.
    #[must_use]
    pub fn conversation_view(&self, peer: &UserId) -> Vec<ConversationEntry> {
        self.history
            .read()
            .grouped(peer)
            .map(|item| match item {
                ThreadItem::DaySeparator(day) => ConversationEntry::DaySeparator(day),
                ThreadItem::Message(m) => ConversationEntry::Message(m.clone()),
            })
            .collect()
    }

    fn emit(&self, event: SessionEvent) {
        // Best-effort: a full UI channel drops the notification, the
        // state itself is already updated.
        let _ = self.update_tx.try_send(event);
    }
}

/// Authoritative unread refresh shared by the router and the imperative
/// operations.
async fn resync_unread<A: ApiClient>(
    api: &A,
    user_id: &UserId,
    unread: &RwLock<UnreadCounter>,
    update_tx: &mpsc::Sender<SessionEvent>,
) {
    match api.unread_count(user_id).await {
        Ok(count) => {
            let changed = unread.write().set_total(count.total_unread);
            if changed {
                let _ = update_tx.try_send(SessionEvent::UnreadChanged {
                    total: count.total_unread,
                });
            }
        }
        Err(e) => {
            tracing::warn!(err = %e, "unread resync failed");
            let _ = update_tx.try_send(SessionEvent::FetchFailed {
                context: "unread".into(),
            });
        }
    }
}

/// Dispatches the connection's event stream to the owning components.
struct Router<C: Connector, A: ApiClient> {
    user_id: UserId,
    connection: Arc<ConnectionManager<C>>,
    api: Arc<A>,
    history: Arc<RwLock<HistoryCache>>,
    presence: Arc<RwLock<PresenceTracker>>,
    unread: Arc<RwLock<UnreadCounter>>,
    outbox: Arc<Mutex<Outbox>>,
    update_tx: mpsc::Sender<SessionEvent>,
}

impl<C: Connector, A: ApiClient> Router<C, A> {
    async fn run(self, mut sync_rx: mpsc::Receiver<SyncEvent>) {
        while let Some(event) = sync_rx.recv().await {
            self.handle(event).await;
        }
        tracing::debug!("router exiting");
    }

    async fn handle(&self, event: SyncEvent) {
        match event {
            SyncEvent::Connected => {
                self.emit(SessionEvent::ConnectionChanged { connected: true });
                // Events missed while disconnected are not replayed;
                // the badge must be refetched.
                resync_unread(
                    self.api.as_ref(),
                    &self.user_id,
                    &self.unread,
                    &self.update_tx,
                )
                .await;
            }
            SyncEvent::Disconnected => {
                self.emit(SessionEvent::ConnectionChanged { connected: false });
            }
            SyncEvent::Reconnecting {
                attempt,
                max_attempts,
            } => {
                self.emit(SessionEvent::Reconnecting {
                    attempt,
                    max_attempts,
                });
            }
            SyncEvent::ReconnectFailed => {
                tracing::warn!("automatic reconnection gave up");
            }
            SyncEvent::Server(event) => self.handle_server_event(event).await,
        }
    }

    async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::MessageReceived(message) => {
                let peer = message.conversation_key(&self.user_id).clone();
                let from_peer = message.sender_id != self.user_id;
                let inserted = self.history.write().insert(&peer, message);
                if inserted {
                    self.emit(SessionEvent::ConversationUpdated { peer: peer.clone() });
                }

                if !from_peer {
                    return;
                }
                let active = self.presence.read().active().cloned();
                if active.as_ref() == Some(&peer) {
                    // Read immediately — tell the server so the peer's
                    // ticks update.
                    self.connection
                        .send(&ClientIntent::MarkRead {
                            reader_id: self.user_id.clone(),
                            sender_id: peer,
                        })
                        .await;
                } else if UnreadCounter::needs_resync(&peer, active.as_ref()) {
                    resync_unread(
                        self.api.as_ref(),
                        &self.user_id,
                        &self.unread,
                        &self.update_tx,
                    )
                    .await;
                }
            }
            ServerEvent::MessageConfirmed { temp_id, message } => {
                let peer = message.conversation_key(&self.user_id).clone();
                self.outbox.lock().resolve(temp_id);
                self.history.write().confirm(&peer, temp_id, message);
                self.emit(SessionEvent::ConversationUpdated { peer });
            }
            ServerEvent::MessageDeleted { message_id } => {
                if let Some(peer) = self.history.write().remove(&message_id) {
                    self.emit(SessionEvent::ConversationUpdated { peer });
                }
            }
            ServerEvent::MessagesRead { reader_id } => {
                let flipped = self.history.write().mark_read(&reader_id);
                if flipped > 0 {
                    self.emit(SessionEvent::ConversationUpdated { peer: reader_id });
                }
            }
            ServerEvent::PresenceChanged {
                user_id,
                is_online,
                last_seen,
            } => {
                self.presence.write().apply(&user_id, is_online, last_seen);
                self.emit(SessionEvent::PresenceUpdated);
            }
            ServerEvent::TypingStarted { sender_id } => {
                let changed = self
                    .presence
                    .write()
                    .typing_started(&sender_id, Timestamp::now());
                if changed {
                    self.emit(SessionEvent::TypingUpdated);
                }
            }
            ServerEvent::TypingStopped { .. } => {
                let changed = self.presence.write().typing_stopped();
                if changed {
                    self.emit(SessionEvent::TypingUpdated);
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.update_tx.try_send(event);
    }
}
