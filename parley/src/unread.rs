//! The cross-conversation unread badge.
//!
//! A single non-negative counter, decoupled from any one conversation
//! screen. The authoritative value always comes from a server query;
//! local mutations are optimistic adjustments that a later sync
//! reconciles. Whether the server had *more* or *fewer* unread than
//! locally believed, the synced value simply wins.

use parley_proto::message::UserId;

/// Process-wide unread total for the authenticated identity.
///
/// Single writer (the session router), many readers.
#[derive(Debug, Default)]
pub struct UnreadCounter {
    total: u64,
}

impl UnreadCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current total.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Replaces the counter with an authoritative server value.
    ///
    /// Returns `true` if the value changed.
    pub fn set_total(&mut self, total: u64) -> bool {
        let changed = self.total != total;
        self.total = total;
        changed
    }

    /// Optimistically subtracts `amount`, clamped so the total never
    /// goes negative. Applied the instant a conversation with a known
    /// unread count is opened; a background sync reconciles any drift.
    ///
    /// Returns the new total.
    pub fn decrement(&mut self, amount: u64) -> u64 {
        self.total = self.total.saturating_sub(amount);
        self.total
    }

    /// Resets to zero. Called when the connection is torn down.
    pub fn clear(&mut self) {
        self.total = 0;
    }

    /// Whether a newly arrived message should trigger an authoritative
    /// resync: it landed in a conversation that is not in focus. A
    /// refetch is used instead of a local increment because the server
    /// is the source of truth and a local increment could drift.
    #[must_use]
    pub fn needs_resync(conversation: &UserId, active: Option<&UserId>) -> bool {
        active != Some(conversation)
    }
}
