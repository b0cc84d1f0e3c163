//! Request/response collaborators: history pages, unread counts, and
//! the conversation list.
//!
//! Defines the [`ApiClient`] trait the session fetches through, plus
//! two implementations: [`HttpApiClient`] (reqwest + JSON against the
//! server's endpoints) and [`InMemoryApi`] (deterministic test double).
//!
//! Fetch failures are retryable: the caller is told, and the caches are
//! left untouched — no partial page is ever merged.

use parley_proto::api::{ConversationSummary, UnreadCount};
use parley_proto::message::{ChatMessage, MessageId, UserId};

/// Errors from the HTTP-style collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be performed (connect failure, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// The paginated-history, unread-count, and conversation-list
/// providers, specified as one contract.
pub trait ApiClient: Send + Sync {
    /// Fetches one backward page of the conversation between `user` and
    /// `peer`: the newest `limit` messages older than `cursor` (or the
    /// newest overall when `cursor` is `None`), ordered oldest → newest.
    fn history_page(
        &self,
        user: &UserId,
        peer: &UserId,
        cursor: Option<&MessageId>,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, ApiError>> + Send;

    /// Fetches the authoritative total unread count for `user`.
    fn unread_count(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<UnreadCount, ApiError>> + Send;

    /// Fetches the conversation list for `user`, including the presence
    /// snapshot used to bulk-seed the tracker.
    fn sessions(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationSummary>, ApiError>> + Send;
}

/// [`ApiClient`] over HTTP, matching the server's `/api/*` endpoints.
pub struct HttpApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpApiClient {
    /// Creates a client against the given base URL (no trailing slash),
    /// e.g. `http://127.0.0.1:8800`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl ApiClient for HttpApiClient {
    async fn history_page(
        &self,
        user: &UserId,
        peer: &UserId,
        cursor: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let mut query = vec![
            ("user", user.as_str().to_string()),
            ("peer", peer.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.as_str().to_string()));
        }
        self.get_json("/api/history", &query).await
    }

    async fn unread_count(&self, user: &UserId) -> Result<UnreadCount, ApiError> {
        self.get_json("/api/unread-count", &[("user", user.as_str().to_string())])
            .await
    }

    async fn sessions(&self, user: &UserId) -> Result<Vec<ConversationSummary>, ApiError> {
        self.get_json("/api/sessions", &[("user", user.as_str().to_string())])
            .await
    }
}

/// In-memory [`ApiClient`] for testing.
///
/// Seed it with fixtures, flip [`set_failing`](Self::set_failing) to
/// exercise the fetch-failure paths.
pub struct InMemoryApi {
    history: parking_lot::Mutex<std::collections::HashMap<UserId, Vec<ChatMessage>>>,
    unread: std::sync::atomic::AtomicU64,
    sessions: parking_lot::Mutex<Vec<ConversationSummary>>,
    failing: std::sync::atomic::AtomicBool,
    unread_fetches: std::sync::atomic::AtomicUsize,
}

impl Default for InMemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryApi {
    /// Creates an empty fixture API.
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: parking_lot::Mutex::new(std::collections::HashMap::new()),
            unread: std::sync::atomic::AtomicU64::new(0),
            sessions: parking_lot::Mutex::new(Vec::new()),
            failing: std::sync::atomic::AtomicBool::new(false),
            unread_fetches: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Seeds the stored conversation with `peer` (oldest → newest).
    pub fn seed_history(&self, peer: &UserId, messages: Vec<ChatMessage>) {
        self.history.lock().insert(peer.clone(), messages);
    }

    /// Sets the unread total the next fetch will report.
    pub fn set_unread(&self, total: u64) {
        self.unread.store(total, std::sync::atomic::Ordering::SeqCst);
    }

    /// Sets the conversation list fixture.
    pub fn set_sessions(&self, sessions: Vec<ConversationSummary>) {
        *self.sessions.lock() = sessions;
    }

    /// Makes every request fail until flipped back.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// How many unread-count fetches have been served.
    #[must_use]
    pub fn unread_fetches(&self) -> usize {
        self.unread_fetches
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ApiError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            Err(ApiError::Request("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl ApiClient for InMemoryApi {
    async fn history_page(
        &self,
        _user: &UserId,
        peer: &UserId,
        cursor: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        self.check()?;
        let history = self.history.lock();
        let Some(conversation) = history.get(peer) else {
            return Ok(Vec::new());
        };

        let end = match cursor {
            Some(cursor) => {
                match conversation
                    .iter()
                    .position(|m| m.id.as_ref() == Some(cursor))
                {
                    Some(pos) => pos,
                    None => return Ok(Vec::new()),
                }
            }
            None => conversation.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(conversation[start..end].to_vec())
    }

    async fn unread_count(&self, _user: &UserId) -> Result<UnreadCount, ApiError> {
        self.check()?;
        self.unread_fetches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(UnreadCount {
            total_unread: self.unread.load(std::sync::atomic::Ordering::SeqCst),
        })
    }

    async fn sessions(&self, _user: &UserId) -> Result<Vec<ConversationSummary>, ApiError> {
        self.check()?;
        Ok(self.sessions.lock().clone())
    }
}
