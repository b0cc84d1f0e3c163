//! Presence, last-seen, and typing-indicator tracking.
//!
//! Per-peer state machine: `Unknown → Online → Offline ⇄ Online`.
//! Online/offline are only ever asserted by explicit server events — a
//! peer is never inferred online from local activity. The last-seen map
//! is written on the offline transition and deliberately NOT cleared
//! when the peer comes back online: the stale entry stays informative
//! until the next offline transition overwrites it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parley_proto::message::{Timestamp, UserId};

/// Tracks which peers are online, when offline peers were last seen,
/// and who is typing into the active conversation.
pub struct PresenceTracker {
    /// Peers currently online (server-asserted).
    online: HashSet<UserId>,
    /// Last-seen timestamps, written on offline transitions.
    last_seen: HashMap<UserId, Timestamp>,
    /// The peer typing into the active conversation, if any.
    typing_peer: Option<UserId>,
    /// When the typing indicator was last refreshed.
    typing_since: Option<Timestamp>,
    /// The conversation currently in focus.
    active_conversation: Option<UserId>,
    /// How long a typing indicator survives without a refresh before
    /// [`tick`](Self::tick) expires it.
    typing_timeout_ms: u64,
}

impl PresenceTracker {
    /// Creates an empty tracker with the given typing-indicator timeout.
    #[must_use]
    pub fn new(typing_timeout: Duration) -> Self {
        Self {
            online: HashSet::new(),
            last_seen: HashMap::new(),
            typing_peer: None,
            typing_since: None,
            active_conversation: None,
            typing_timeout_ms: u64::try_from(typing_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Applies a single presence-change event.
    ///
    /// On the offline transition the event's `last_seen` is recorded; on
    /// the online transition the stale last-seen entry is kept.
    pub fn apply(&mut self, peer: &UserId, is_online: bool, last_seen: Option<Timestamp>) {
        if is_online {
            self.online.insert(peer.clone());
        } else {
            self.online.remove(peer);
            if let Some(ts) = last_seen {
                self.last_seen.insert(peer.clone(), ts);
            }
        }
    }

    /// Replaces the entire online set and last-seen map from a server
    /// snapshot. A full replace, not a merge: the snapshot is
    /// authoritative for exactly the peers it names.
    pub fn bulk_sync(
        &mut self,
        online: impl IntoIterator<Item = UserId>,
        last_seen: HashMap<UserId, Timestamp>,
    ) {
        self.online = online.into_iter().collect();
        self.last_seen = last_seen;
    }

    /// Updates the active-conversation pointer. Changing focus clears
    /// the typing indicator; setting the same value is a no-op.
    ///
    /// Returns `true` if a visible typing indicator was cleared.
    pub fn set_active(&mut self, peer: Option<UserId>) -> bool {
        if self.active_conversation == peer {
            return false;
        }
        self.active_conversation = peer;
        self.clear_typing()
    }

    /// The conversation currently in focus.
    #[must_use]
    pub fn active(&self) -> Option<&UserId> {
        self.active_conversation.as_ref()
    }

    /// Handles a typing signal. Accepted only if the sender is the peer
    /// of the conversation currently in focus; signals from any other
    /// peer are ignored.
    ///
    /// Returns `true` if the visible typing state changed.
    pub fn typing_started(&mut self, sender: &UserId, now: Timestamp) -> bool {
        if self.active_conversation.as_ref() != Some(sender) {
            return false;
        }
        let changed = self.typing_peer.as_ref() != Some(sender);
        self.typing_peer = Some(sender.clone());
        self.typing_since = Some(now);
        changed
    }

    /// Handles a stop-typing signal: clears unconditionally.
    ///
    /// Returns `true` if a visible typing indicator was cleared.
    pub fn typing_stopped(&mut self) -> bool {
        self.clear_typing()
    }

    /// Expires a typing indicator whose stop signal was dropped: clears
    /// it once `typing_timeout` has elapsed without a refresh.
    ///
    /// Returns `true` if the indicator was cleared.
    pub fn tick(&mut self, now: Timestamp) -> bool {
        let Some(since) = self.typing_since else {
            return false;
        };
        if now.as_millis().saturating_sub(since.as_millis()) >= self.typing_timeout_ms {
            self.clear_typing()
        } else {
            false
        }
    }

    /// The peer typing into the active conversation, if any.
    #[must_use]
    pub fn typing_peer(&self) -> Option<&UserId> {
        self.typing_peer.as_ref()
    }

    /// Whether the peer is currently online.
    #[must_use]
    pub fn is_online(&self, peer: &UserId) -> bool {
        self.online.contains(peer)
    }

    /// When the peer was last seen, if ever observed going offline.
    #[must_use]
    pub fn last_seen(&self, peer: &UserId) -> Option<Timestamp> {
        self.last_seen.get(peer).copied()
    }

    /// Resets everything to the empty state. Called when the connection
    /// is torn down — this state's lifetime is bound to the connection,
    /// not to any screen.
    pub fn clear(&mut self) {
        self.online.clear();
        self.last_seen.clear();
        self.typing_peer = None;
        self.typing_since = None;
        self.active_conversation = None;
    }

    fn clear_typing(&mut self) -> bool {
        self.typing_since = None;
        self.typing_peer.take().is_some()
    }
}
