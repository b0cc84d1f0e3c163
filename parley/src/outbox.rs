//! Optimistic send tracking: temp ids, pending state, and scoped
//! preview resources.
//!
//! The outbox bridges local user intent and eventual server truth. It
//! synthesizes optimistic messages (fresh [`TempId`], no server id) and
//! the matching wire intents, then tracks each send until the
//! confirmation arrives. For image sends it also owns the local preview
//! resource, which must be released exactly once — at confirmation or
//! removal — never left to leak across repeated sends.

use std::collections::HashMap;

use parley_proto::event::ClientIntent;
use parley_proto::message::{
    ChatMessage, MessageBody, ReplyRef, TempId, Timestamp, UserId, ValidationError,
};

/// A scoped client-local resource tied to one optimistic message (for
/// example a temporary local image preview).
///
/// The release callback runs exactly once: explicitly via
/// [`release`](Self::release), or on drop when the outbox discards the
/// pending entry.
pub struct PreviewGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PreviewGuard {
    /// Creates a guard that runs `release` when released or dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Releases the resource now.
    pub fn release(mut self) {
        if let Some(f) = self.release.take() {
            f();
        }
    }
}

impl Drop for PreviewGuard {
    fn drop(&mut self) {
        if let Some(f) = self.release.take() {
            f();
        }
    }
}

impl std::fmt::Debug for PreviewGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewGuard")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

/// An optimistic message paired with the wire intent that carries it.
#[derive(Debug)]
pub struct OutgoingMessage {
    /// The client-generated identifier tracking this send.
    pub temp_id: TempId,
    /// The optimistic record to insert into the history cache.
    pub message: ChatMessage,
    /// The intent to emit through the connection manager.
    pub intent: ClientIntent,
}

/// One send awaiting confirmation.
struct PendingSend {
    /// When the optimistic record was created.
    sent_at: Timestamp,
    /// Local resource to release once the send resolves.
    preview: Option<PreviewGuard>,
}

/// Tracks optimistic sends from creation to confirmation.
pub struct Outbox {
    /// The sending identity.
    own_id: UserId,
    /// Sends not yet confirmed, keyed by temp id.
    pending: HashMap<TempId, PendingSend>,
}

impl Outbox {
    /// Creates an empty outbox for the given identity.
    #[must_use]
    pub fn new(own_id: UserId) -> Self {
        Self {
            own_id,
            pending: HashMap::new(),
        }
    }

    /// Synthesizes an optimistic text message and the matching wire
    /// intent, and registers the send as pending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the text is empty or oversized;
    /// nothing is registered in that case.
    pub fn compose_text(
        &mut self,
        peer: &UserId,
        text: String,
        reply_to: Option<ReplyRef>,
    ) -> Result<OutgoingMessage, ValidationError> {
        self.compose(peer, MessageBody::Text(text), reply_to, None)
    }

    /// Synthesizes an optimistic image message carrying an already
    /// uploaded URL, taking ownership of the local preview resource.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the URL is empty; the preview is
    /// dropped (released) in that case.
    pub fn compose_image(
        &mut self,
        peer: &UserId,
        url: String,
        preview: PreviewGuard,
        reply_to: Option<ReplyRef>,
    ) -> Result<OutgoingMessage, ValidationError> {
        self.compose(peer, MessageBody::Image { url }, reply_to, Some(preview))
    }

    fn compose(
        &mut self,
        peer: &UserId,
        body: MessageBody,
        reply_to: Option<ReplyRef>,
        preview: Option<PreviewGuard>,
    ) -> Result<OutgoingMessage, ValidationError> {
        let temp_id = TempId::new();
        let created_at = Timestamp::now();
        let message = ChatMessage {
            id: None,
            temp_id: Some(temp_id),
            sender_id: self.own_id.clone(),
            receiver_id: peer.clone(),
            body: body.clone(),
            created_at,
            is_read: false,
            reply_to: reply_to.clone(),
        };
        message.validate()?;

        let intent = ClientIntent::SendMessage {
            temp_id,
            sender_id: self.own_id.clone(),
            receiver_id: peer.clone(),
            body,
            reply_to: reply_to.map(|r| r.message_id),
        };

        self.pending.insert(temp_id, PendingSend {
            sent_at: created_at,
            preview,
        });

        Ok(OutgoingMessage {
            temp_id,
            message,
            intent,
        })
    }

    /// Resolves a pending send: drops its entry and releases the
    /// preview resource.
    ///
    /// Returns `true` if the temp id was pending. Unknown temp ids are
    /// silently ignored — the confirmation may repeat or refer to a
    /// send discarded earlier.
    pub fn resolve(&mut self, temp_id: TempId) -> bool {
        match self.pending.remove(&temp_id) {
            Some(entry) => {
                if let Some(preview) = entry.preview {
                    preview.release();
                }
                true
            }
            None => false,
        }
    }

    /// Whether a send is still awaiting confirmation.
    #[must_use]
    pub fn is_pending(&self, temp_id: TempId) -> bool {
        self.pending.contains_key(&temp_id)
    }

    /// Number of sends awaiting confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends that have been pending longer than `max_age_ms`.
    ///
    /// The engine never times a send out on its own — an unconfirmed
    /// message stays visually pending. This only reports which sends
    /// are overdue so a UI can distinguish "still pending" from
    /// "probably lost".
    #[must_use]
    pub fn stale(&self, now: Timestamp, max_age_ms: u64) -> Vec<TempId> {
        self.pending
            .iter()
            .filter(|(_, p)| now.as_millis().saturating_sub(p.sent_at.as_millis()) >= max_age_ms)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Discards all pending sends, releasing their resources.
    pub fn clear(&mut self) {
        for (_, entry) in self.pending.drain() {
            if let Some(preview) = entry.preview {
                preview.release();
            }
        }
    }
}
