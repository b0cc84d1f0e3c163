//! Core message model shared by the sync engine and the server.
//!
//! A [`ChatMessage`] lives in exactly one of two lifecycle states:
//!
//! - **Optimistic** — created locally before any server round trip.
//!   Carries a client-generated [`TempId`] and no [`MessageId`].
//! - **Confirmed** — returned by the server with a stable [`MessageId`]
//!   assigned. A confirmation for an optimistic message carries both
//!   identifiers so the client can replace its local record in place.
//!
//! The transition Optimistic → Confirmed happens exactly once per
//! message; `is_read` only ever moves `false → true`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed text payload size in bytes (64 KB).
pub const MAX_TEXT_SIZE: usize = 64 * 1024;

/// Identity of a user. Conversations are 1:1 and keyed by the peer's
/// `UserId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identity from a string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned stable message identifier.
///
/// Opaque to the client; only equality and use as a pagination cursor
/// matter. The server generates these as UUID v7 strings, but nothing
/// on the client side depends on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a `MessageId` from an existing string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered identifier (UUID v7).
    ///
    /// Only the server assigns message ids; clients never call this for
    /// outgoing messages.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the string representation of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated identifier for a not-yet-confirmed message.
///
/// Unique per client session (UUID v7). Present only while the message
/// is optimistic; the confirmation event echoes it back so the local
/// record can be matched and replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a new time-ordered temporary identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TempId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Content of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Plain text content.
    Text(String),
    /// An image, referenced by URL. For optimistic messages this may be
    /// a local preview URI until the confirmation arrives.
    Image {
        /// Location of the image resource.
        url: String,
    },
}

/// Informational reference to the message being replied to.
///
/// Carries a snapshot of the quoted message so the UI can render the
/// quote without a cache lookup. Never used for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    /// Id of the message being replied to.
    pub message_id: MessageId,
    /// Text preview of the quoted message.
    pub text: String,
    /// Author of the quoted message.
    pub sender_id: UserId,
}

/// A message in a 1:1 conversation.
///
/// `id` is `None` exactly while the message is optimistic; `temp_id`
/// is `Some` only for messages this client originated and has not yet
/// seen confirmed. At least one of the two is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned identifier; absent until confirmed.
    pub id: Option<MessageId>,
    /// Client-generated identifier; present while optimistic.
    pub temp_id: Option<TempId>,
    /// Who sent this message.
    pub sender_id: UserId,
    /// Who it is addressed to.
    pub receiver_id: UserId,
    /// The message content.
    pub body: MessageBody,
    /// When the message was created.
    pub created_at: Timestamp,
    /// Whether the recipient has read this message. Monotonic:
    /// transitions `false → true` only.
    pub is_read: bool,
    /// Optional reference to the message being replied to.
    pub reply_to: Option<ReplyRef>,
}

/// Error returned when a message fails validation before sending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Text content is empty.
    #[error("message text is empty")]
    Empty,
    /// Text content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Image URL is empty.
    #[error("image url is empty")]
    EmptyImageUrl,
}

impl ChatMessage {
    /// True while this message has not been confirmed by the server.
    #[must_use]
    pub const fn is_optimistic(&self) -> bool {
        self.id.is_none()
    }

    /// Returns the conversation key for this message from the point of
    /// view of `own_id`: the other participant's identity.
    #[must_use]
    pub fn conversation_key<'a>(&'a self, own_id: &UserId) -> &'a UserId {
        if &self.sender_id == own_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Validates this message for sending.
    ///
    /// Text must be non-empty and within [`MAX_TEXT_SIZE`]; image URLs
    /// must be non-empty.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.body {
            MessageBody::Text(text) => {
                if text.is_empty() {
                    return Err(ValidationError::Empty);
                }
                if text.len() > MAX_TEXT_SIZE {
                    return Err(ValidationError::TooLarge {
                        size: text.len(),
                        max: MAX_TEXT_SIZE,
                    });
                }
            }
            MessageBody::Image { url } => {
                if url.is_empty() {
                    return Err(ValidationError::EmptyImageUrl);
                }
            }
        }
        Ok(())
    }
}
