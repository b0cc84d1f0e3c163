//! Per-conversation ordered message cache with backward pagination.
//!
//! The [`HistoryCache`] is the authoritative local store for message
//! ordering and lifecycle. Three sources write through it — pages
//! fetched over HTTP, live pushed events, and optimistic local sends —
//! and the merge rules here are the only guard against duplication:
//!
//! - No two entries in a conversation share an `id` or a `temp_id`.
//! - Entries are ordered by `created_at`, ties broken by arrival order.
//! - `is_read` only ever transitions `false → true`.
//!
//! Pagination walks backward in time. The cursor is computed purely
//! from the last fetched page: a page shorter than the requested limit
//! permanently exhausts the conversation's history. Live insertions
//! never perturb the cursor — pagination and live updates touch
//! disjoint ends of the sequence.

use std::collections::HashMap;

use chrono::NaiveDate;

use parley_proto::message::{ChatMessage, MessageId, TempId, Timestamp, UserId};

/// Cursor state machine for one conversation's backward pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CursorState {
    /// Nothing fetched yet; the first request carries no cursor.
    Unfetched,
    /// The next older page ends just before this message.
    Before(MessageId),
    /// The oldest page came back short; no more history exists.
    Exhausted,
}

/// A pagination request derived from the current cursor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Cursor to fetch before, or `None` for the newest page.
    pub cursor: Option<MessageId>,
    /// Maximum number of messages to fetch.
    pub limit: usize,
}

/// One conversation's loaded messages plus pagination state.
#[derive(Debug)]
struct ConversationHistory {
    /// Flattened, ordered, duplicate-free message sequence.
    messages: Vec<ChatMessage>,
    /// Backward-pagination cursor.
    cursor: CursorState,
}

impl ConversationHistory {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            cursor: CursorState::Unfetched,
        }
    }
}

/// Outcome of a [`HistoryCache::confirm`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The optimistic entry was found and replaced in place.
    Replaced,
    /// No optimistic entry existed; the message was inserted fresh.
    Inserted,
    /// The message was already present (same id); nothing changed.
    Duplicate,
}

/// An item of the rendered conversation thread: messages interleaved
/// with day separators derived from `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadItem<'a> {
    /// All following messages (until the next separator) are from this day.
    DaySeparator(NaiveDate),
    /// A message of the conversation.
    Message(&'a ChatMessage),
}

/// The authoritative ordered store for conversations, addressable by
/// the peer's identity.
pub struct HistoryCache {
    /// The authenticated user; needed to tell own-authored messages apart.
    own_id: UserId,
    /// Per-peer conversation state.
    conversations: HashMap<UserId, ConversationHistory>,
}

impl HistoryCache {
    /// Creates an empty cache for the given authenticated identity.
    #[must_use]
    pub fn new(own_id: UserId) -> Self {
        Self {
            own_id,
            conversations: HashMap::new(),
        }
    }

    /// Returns the next pagination request for a conversation, or `None`
    /// if its history is exhausted (further requests are suppressed).
    #[must_use]
    pub fn page_request(&self, peer: &UserId, limit: usize) -> Option<PageRequest> {
        match self
            .conversations
            .get(peer)
            .map_or(&CursorState::Unfetched, |c| &c.cursor)
        {
            CursorState::Unfetched => Some(PageRequest {
                cursor: None,
                limit,
            }),
            CursorState::Before(id) => Some(PageRequest {
                cursor: Some(id.clone()),
                limit,
            }),
            CursorState::Exhausted => None,
        }
    }

    /// Merges a fetched page (ordered oldest → newest) into the front of
    /// the conversation and advances the cursor.
    ///
    /// The cursor is derived from the raw page alone: a page shorter
    /// than `limit` exhausts the conversation, otherwise the oldest
    /// returned id becomes the next cursor. Messages already present
    /// (by id) are skipped, so a page racing a live insertion cannot
    /// duplicate.
    ///
    /// Returns the number of messages actually added.
    pub fn apply_page(&mut self, peer: &UserId, page: Vec<ChatMessage>, limit: usize) -> usize {
        let conv = self
            .conversations
            .entry(peer.clone())
            .or_insert_with(ConversationHistory::new);

        conv.cursor = match page.first().and_then(|m| m.id.clone()) {
            Some(oldest) if page.len() >= limit => CursorState::Before(oldest),
            _ => CursorState::Exhausted,
        };

        let fresh: Vec<ChatMessage> = page
            .into_iter()
            .filter(|m| {
                !conv
                    .messages
                    .iter()
                    .any(|existing| existing.id.is_some() && existing.id == m.id)
            })
            .collect();
        let added = fresh.len();
        conv.messages.splice(0..0, fresh);
        added
    }

    /// Merges a message into the correct position by `created_at`, ties
    /// broken by arrival order.
    ///
    /// Idempotent: if an entry with the same `id` OR the same `temp_id`
    /// already exists, the insert is skipped. The same server event
    /// delivered twice, or a message arriving both via push and via
    /// confirmation, never duplicates.
    ///
    /// Returns `true` if the message was added.
    pub fn insert(&mut self, peer: &UserId, message: ChatMessage) -> bool {
        let conv = self
            .conversations
            .entry(peer.clone())
            .or_insert_with(ConversationHistory::new);

        if conv.messages.iter().any(|m| Self::same_identity(m, &message)) {
            tracing::debug!(peer = %peer, "duplicate message dropped");
            return false;
        }

        let idx = conv
            .messages
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map_or(0, |p| p + 1);
        conv.messages.insert(idx, message);
        true
    }

    /// Replaces the optimistic entry keyed by `temp_id` with the
    /// server-confirmed message, retaining its position in the sequence.
    ///
    /// If no optimistic entry is found (the pushed copy won the race, or
    /// the entry was removed), behaves like [`insert`](Self::insert).
    pub fn confirm(
        &mut self,
        peer: &UserId,
        temp_id: TempId,
        message: ChatMessage,
    ) -> ConfirmOutcome {
        let conv = self
            .conversations
            .entry(peer.clone())
            .or_insert_with(ConversationHistory::new);

        let id_already_present =
            message.id.is_some() && conv.messages.iter().any(|m| m.id == message.id);

        if let Some(idx) = conv
            .messages
            .iter()
            .position(|m| m.temp_id == Some(temp_id))
        {
            if id_already_present {
                // The pushed copy of this message won the race; the
                // optimistic record is now redundant.
                conv.messages.remove(idx);
                return ConfirmOutcome::Duplicate;
            }
            conv.messages[idx] = message;
            return ConfirmOutcome::Replaced;
        }

        if self.insert(peer, message) {
            ConfirmOutcome::Inserted
        } else {
            ConfirmOutcome::Duplicate
        }
    }

    /// Flips `is_read` to true for all own-authored messages in the
    /// conversation. Monotonic: never flips back.
    ///
    /// Returns the number of messages flipped.
    pub fn mark_read(&mut self, peer: &UserId) -> usize {
        let Some(conv) = self.conversations.get_mut(peer) else {
            return 0;
        };
        let mut flipped = 0;
        for m in &mut conv.messages {
            if m.sender_id == self.own_id && !m.is_read {
                m.is_read = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Deletes a message by server id from whichever conversation holds
    /// it. Silent if not present (already removed).
    ///
    /// Returns the conversation the message was removed from.
    pub fn remove(&mut self, message_id: &MessageId) -> Option<UserId> {
        for (peer, conv) in &mut self.conversations {
            if let Some(idx) = conv
                .messages
                .iter()
                .position(|m| m.id.as_ref() == Some(message_id))
            {
                conv.messages.remove(idx);
                return Some(peer.clone());
            }
        }
        None
    }

    /// The flattened ordered conversation, oldest → newest.
    pub fn flattened(&self, peer: &UserId) -> impl Iterator<Item = &ChatMessage> {
        self.conversations
            .get(peer)
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
            .iter()
    }

    /// A lazy, restartable view of the conversation interleaving day
    /// separators with messages. Derived purely from `created_at` and
    /// recomputed on every call — nothing is stored.
    pub fn grouped(&self, peer: &UserId) -> Grouped<'_> {
        Grouped {
            remaining: self
                .conversations
                .get(peer)
                .map(|c| c.messages.as_slice())
                .unwrap_or_default()
                .iter(),
            last_day: None,
            pending: None,
        }
    }

    /// True if both refer to the same logical message by server id or
    /// by optimistic temp id.
    fn same_identity(a: &ChatMessage, b: &ChatMessage) -> bool {
        (a.id.is_some() && a.id == b.id) || (a.temp_id.is_some() && a.temp_id == b.temp_id)
    }
}

/// Iterator returned by [`HistoryCache::grouped`].
pub struct Grouped<'a> {
    remaining: std::slice::Iter<'a, ChatMessage>,
    last_day: Option<NaiveDate>,
    pending: Option<&'a ChatMessage>,
}

impl<'a> Iterator for Grouped<'a> {
    type Item = ThreadItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(msg) = self.pending.take() {
            return Some(ThreadItem::Message(msg));
        }
        let msg = self.remaining.next()?;
        let day = day_of(msg.created_at);
        if self.last_day == Some(day) {
            Some(ThreadItem::Message(msg))
        } else {
            self.last_day = Some(day);
            self.pending = Some(msg);
            Some(ThreadItem::DaySeparator(day))
        }
    }
}

/// UTC calendar day of a timestamp.
fn day_of(ts: Timestamp) -> NaiveDate {
    i64::try_from(ts.as_millis())
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or(NaiveDate::MIN, |dt| dt.date_naive())
}
