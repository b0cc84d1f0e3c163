//! Request/response types for the HTTP API shared by the server and the
//! engine's API client.
//!
//! These are JSON-serialized (axum `Json` on the server, reqwest on the
//! client), unlike the live-connection events which use postcard.

use serde::{Deserialize, Serialize};

use crate::message::{Timestamp, UserId};

/// Response of `GET /api/unread-count`: the total number of unread
/// messages across all conversations for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    /// Total unread messages.
    pub total_unread: u64,
}

/// One entry of `GET /api/sessions`: a per-conversation summary used to
/// render the conversation list and bulk-seed presence state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The other participant.
    pub peer_id: UserId,
    /// Preview of the most recent message, if any.
    pub last_message: Option<String>,
    /// When the most recent message was created.
    pub last_message_time: Option<Timestamp>,
    /// Unread messages in this conversation.
    pub unread_count: u64,
    /// Whether the peer is currently connected.
    pub is_online: bool,
    /// When the peer was last seen, if known and currently offline.
    pub last_seen: Option<Timestamp>,
}
