//! Wire-level events exchanged over the live connection.
//!
//! [`ClientIntent`] covers everything a client may send; [`ServerEvent`]
//! covers everything the server pushes back. Both are serialized with
//! postcard via [`crate::codec`] and carried as WebSocket binary frames.
//!
//! The first frame on every connection MUST be
//! [`ClientIntent::Announce`] — it registers the identity for routing
//! and opts the user into presence broadcasting.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, MessageBody, MessageId, TempId, Timestamp, UserId};

/// Outbound intents sent from a client over the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientIntent {
    /// Announce the authenticated identity. Must be the first frame on
    /// every (re)connection; doubles as the presence opt-in.
    Announce {
        /// The connecting user.
        user_id: UserId,
    },
    /// Send a message to a peer. The `temp_id` is echoed back in the
    /// confirmation so the sender can reconcile its optimistic record.
    SendMessage {
        /// Client-generated identifier of the optimistic record.
        temp_id: TempId,
        /// The sending user (enforced server-side against the
        /// announced identity).
        sender_id: UserId,
        /// The addressee.
        receiver_id: UserId,
        /// Message content.
        body: MessageBody,
        /// Optional id of the message being replied to.
        reply_to: Option<MessageId>,
    },
    /// Mark all messages from `sender_id` to `reader_id` as read.
    MarkRead {
        /// The user who read the messages.
        reader_id: UserId,
        /// The author whose messages were read.
        sender_id: UserId,
    },
    /// Delete a message by id.
    DeleteMessage {
        /// The message to delete.
        message_id: MessageId,
    },
    /// The sender started typing into the conversation with `receiver_id`.
    Typing {
        /// Who is typing.
        sender_id: UserId,
        /// Whose conversation they are typing into.
        receiver_id: UserId,
    },
    /// The sender stopped typing.
    StopTyping {
        /// Who stopped typing.
        sender_id: UserId,
        /// Whose conversation they were typing into.
        receiver_id: UserId,
    },
}

/// Inbound events pushed from the server over the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A new message arrived for this user. May also carry the user's
    /// own message fanned back, so receivers must merge idempotently.
    MessageReceived(ChatMessage),
    /// A previously sent message was accepted and assigned a server id.
    MessageConfirmed {
        /// The client-generated id of the optimistic record.
        temp_id: TempId,
        /// The confirmed message, with `id` set and `temp_id` cleared.
        message: ChatMessage,
    },
    /// A message was deleted (by this user on another device, or by the
    /// peer).
    MessageDeleted {
        /// The deleted message.
        message_id: MessageId,
    },
    /// The peer read this user's messages.
    MessagesRead {
        /// The user who read them.
        reader_id: UserId,
    },
    /// A peer's presence changed.
    PresenceChanged {
        /// The peer whose status changed.
        user_id: UserId,
        /// Whether the peer is now online.
        is_online: bool,
        /// Set on the offline transition: when the peer was last seen.
        last_seen: Option<Timestamp>,
    },
    /// A peer started typing into a conversation with this user.
    TypingStarted {
        /// Who is typing.
        sender_id: UserId,
    },
    /// A peer stopped typing.
    TypingStopped {
        /// Who stopped typing.
        sender_id: UserId,
    },
}
