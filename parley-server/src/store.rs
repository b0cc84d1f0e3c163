//! In-memory message store backing the reference server.
//!
//! Holds every message ever accepted, in assignment order, and answers
//! the queries the HTTP API and WebSocket handlers need: backward
//! history pages, unread totals, read flips, deletes, and per-peer
//! conversation summaries.

use tokio::sync::RwLock;

use parley_proto::message::{
    ChatMessage, MessageBody, MessageId, ReplyRef, Timestamp, UserId,
};

/// Text shown in reply previews and session summaries for image messages.
const IMAGE_PREVIEW: &str = "Photo";

/// In-memory chat message store.
///
/// Thread-safe via [`RwLock`]. Messages are kept in a single assignment-
/// ordered sequence; conversation filtering happens at query time, which
/// is fine for a reference server.
pub struct ChatStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Accepts a message: assigns a server id and timestamp, resolves the
    /// reply reference, stores it, and returns the confirmed record.
    pub async fn append(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: MessageBody,
        reply_to: Option<MessageId>,
    ) -> ChatMessage {
        let mut messages = self.messages.write().await;

        let reply_ref = reply_to.and_then(|target| {
            messages
                .iter()
                .find(|m| m.id.as_ref() == Some(&target))
                .map(|quoted| ReplyRef {
                    message_id: target.clone(),
                    text: preview(&quoted.body),
                    sender_id: quoted.sender_id.clone(),
                })
        });

        let message = ChatMessage {
            id: Some(MessageId::generate()),
            temp_id: None,
            sender_id,
            receiver_id,
            body,
            created_at: Timestamp::now(),
            is_read: false,
            reply_to: reply_ref,
        };
        messages.push(message.clone());
        message
    }

    /// Returns one backward page of the conversation between `user` and
    /// `peer`.
    ///
    /// With no cursor, returns the newest `limit` messages; with a
    /// cursor, the newest `limit` messages strictly older than the
    /// cursor message. The page itself is ordered oldest → newest. An
    /// unknown cursor yields an empty page.
    pub async fn history_page(
        &self,
        user: &UserId,
        peer: &UserId,
        cursor: Option<&MessageId>,
        limit: usize,
    ) -> Vec<ChatMessage> {
        let messages = self.messages.read().await;
        let mut conversation: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| {
                (&m.sender_id == user && &m.receiver_id == peer)
                    || (&m.sender_id == peer && &m.receiver_id == user)
            })
            .collect();

        if let Some(cursor) = cursor {
            match conversation
                .iter()
                .position(|m| m.id.as_ref() == Some(cursor))
            {
                Some(pos) => conversation.truncate(pos),
                None => return Vec::new(),
            }
        }

        let start = conversation.len().saturating_sub(limit);
        conversation[start..].iter().map(|m| (*m).clone()).collect()
    }

    /// Marks every message from `sender` to `reader` as read.
    ///
    /// Returns the number of messages flipped. Already-read messages are
    /// untouched — the flag only ever moves `false → true`.
    pub async fn mark_read(&self, reader: &UserId, sender: &UserId) -> usize {
        let mut messages = self.messages.write().await;
        let mut flipped = 0;
        for m in messages.iter_mut() {
            if &m.sender_id == sender && &m.receiver_id == reader && !m.is_read {
                m.is_read = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Removes a message by id, returning it if it existed.
    pub async fn delete(&self, message_id: &MessageId) -> Option<ChatMessage> {
        let mut messages = self.messages.write().await;
        let pos = messages
            .iter()
            .position(|m| m.id.as_ref() == Some(message_id))?;
        Some(messages.remove(pos))
    }

    /// Total unread messages addressed to `user`, across all conversations.
    pub async fn unread_total(&self, user: &UserId) -> u64 {
        let messages = self.messages.read().await;
        messages
            .iter()
            .filter(|m| &m.receiver_id == user && !m.is_read)
            .count() as u64
    }

    /// Per-conversation summaries for `user`: each peer they have
    /// exchanged messages with, the last message preview and time, and
    /// the unread count. Presence fields are filled in by the caller.
    pub async fn summaries(&self, user: &UserId) -> Vec<ConversationDigest> {
        let messages = self.messages.read().await;
        let mut digests: Vec<ConversationDigest> = Vec::new();

        for m in messages.iter() {
            let peer = if &m.sender_id == user {
                &m.receiver_id
            } else if &m.receiver_id == user {
                &m.sender_id
            } else {
                continue;
            };

            let idx = match digests.iter().position(|d| &d.peer_id == peer) {
                Some(i) => i,
                None => {
                    digests.push(ConversationDigest {
                        peer_id: peer.clone(),
                        last_message: None,
                        last_message_time: None,
                        unread_count: 0,
                    });
                    digests.len() - 1
                }
            };
            let digest = &mut digests[idx];

            // Messages are in assignment order, so the last one wins.
            digest.last_message = Some(preview(&m.body));
            digest.last_message_time = Some(m.created_at);
            if &m.receiver_id == user && !m.is_read {
                digest.unread_count += 1;
            }
        }

        digests
    }
}

/// Store-side conversation summary, without presence information.
#[derive(Debug, Clone)]
pub struct ConversationDigest {
    /// The other participant.
    pub peer_id: UserId,
    /// Preview of the most recent message.
    pub last_message: Option<String>,
    /// When the most recent message was created.
    pub last_message_time: Option<Timestamp>,
    /// Unread messages in this conversation.
    pub unread_count: u64,
}

/// Short text preview of a message body.
fn preview(body: &MessageBody) -> String {
    match body {
        MessageBody::Text(text) => text.clone(),
        MessageBody::Image { .. } => IMAGE_PREVIEW.to_string(),
    }
}
