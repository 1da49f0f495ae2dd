//! Typing indicators
//!
//! Short-TTL ephemeral signal per (conversation, identity). Readers treat a
//! stored `true` as expired once it is older than [`TYPING_TTL_MS`], so no
//! guaranteed "stopped typing" write is ever required — a crashed client
//! simply decays to not-typing.

use crate::clock::SharedClock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Effective-state TTL: a `true` older than this reads as `false`
pub const TYPING_TTL_MS: i64 = 5_000;
/// Debounce window for repeated `true` writes
pub const TYPING_DEBOUNCE_MS: i64 = 1_000;
/// Idle time after the last keystroke before an automatic `false`
pub const TYPING_IDLE_MS: i64 = 1_500;

/// Capacity of the typing broadcast channel
const TYPING_CHANNEL_CAPACITY: usize = 64;

/// A typing state change, as broadcast to push-mode subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    /// Conversation the signal belongs to
    pub conversation_id: String,
    /// Identity that is (or stopped) typing
    pub identity_id: String,
    /// The written value
    pub typing: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct TypingRecord {
    typing: bool,
    updated_at: i64,
    last_true_write: i64,
}

/// Tracks typing signals for all (conversation, identity) pairs
///
/// Single-writer discipline: an identity writes only its own signal and
/// reads only others'. Writes are fire-and-forget on the send path.
pub struct TypingTracker {
    records: Mutex<HashMap<(String, String), TypingRecord>>,
    events: broadcast::Sender<TypingEvent>,
    clock: SharedClock,
}

impl TypingTracker {
    /// Create a tracker using the given clock
    pub fn new(clock: SharedClock) -> Self {
        let (events, _) = broadcast::channel(TYPING_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(HashMap::new()),
            events,
            clock,
        }
    }

    /// Write a typing signal, applying the debounce rule
    ///
    /// A `true` write is suppressed when the stored state is already `true`
    /// and less than [`TYPING_DEBOUNCE_MS`] has passed since the last
    /// accepted `true` write. A `false` write is always significant.
    /// Returns whether the write was applied.
    pub fn set_typing(&self, conversation_id: &str, identity_id: &str, typing: bool) -> bool {
        if conversation_id.is_empty() || identity_id.is_empty() {
            return false;
        }
        let now = self.clock.now_ms();
        let key = (conversation_id.to_string(), identity_id.to_string());
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let record = records.entry(key).or_default();

        if typing && record.typing && now - record.last_true_write < TYPING_DEBOUNCE_MS {
            return false;
        }

        record.typing = typing;
        record.updated_at = now;
        if typing {
            record.last_true_write = now;
        }
        drop(records);

        // Nobody listening is fine; poll mode reads the map directly.
        let _ = self.events.send(TypingEvent {
            conversation_id: conversation_id.to_string(),
            identity_id: identity_id.to_string(),
            typing,
        });
        true
    }

    /// Effective typing state: stored value gated by the TTL
    pub fn is_typing(&self, conversation_id: &str, identity_id: &str) -> bool {
        let key = (conversation_id.to_string(), identity_id.to_string());
        let records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match records.get(&key) {
            Some(record) => {
                record.typing && self.clock.now_ms() - record.updated_at < TYPING_TTL_MS
            }
            None => false,
        }
    }

    /// Subscribe to typing state changes (push mode)
    pub fn subscribe(&self) -> broadcast::Receiver<TypingEvent> {
        self.events.subscribe()
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

/// Composer-side typing publisher for one open conversation
///
/// Turns keystrokes into debounced `true` writes and arms an idle deadline
/// that emits `false` after [`TYPING_IDLE_MS`] of silence. Sending a
/// message or leaving the conversation forces `false` synchronously.
pub struct TypingPublisher {
    tracker: Arc<TypingTracker>,
    conversation_id: String,
    identity_id: String,
    idle_deadline: Option<i64>,
}

impl TypingPublisher {
    /// Create a publisher for one (conversation, identity) pair
    pub fn new(
        tracker: Arc<TypingTracker>,
        conversation_id: impl Into<String>,
        identity_id: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            conversation_id: conversation_id.into(),
            identity_id: identity_id.into(),
            idle_deadline: None,
        }
    }

    /// Handle a keystroke: emit a (debounced) `true` and re-arm the idle timer
    pub fn keystroke(&mut self) {
        self.tracker
            .set_typing(&self.conversation_id, &self.identity_id, true);
        self.idle_deadline = Some(self.tracker.clock().now_ms() + TYPING_IDLE_MS);
    }

    /// Handle the input being cleared: emit `false` immediately
    pub fn clear_input(&mut self) {
        self.stop();
    }

    /// Called right before sending a message: force `false` synchronously
    pub fn message_sent(&mut self) {
        self.stop();
    }

    /// Called when leaving the conversation: force `false` synchronously
    pub fn leave(&mut self) {
        self.stop();
    }

    /// Fire the idle timer if its deadline has passed
    ///
    /// Returns `true` when an idle `false` was emitted. The sync session
    /// calls this from its timer loop.
    pub fn poll_idle(&mut self) -> bool {
        match self.idle_deadline {
            Some(deadline) if self.tracker.clock().now_ms() >= deadline => {
                self.stop();
                true
            }
            _ => false,
        }
    }

    /// The pending idle deadline (Unix ms), if armed
    pub fn idle_deadline(&self) -> Option<i64> {
        self.idle_deadline
    }

    fn stop(&mut self) {
        self.idle_deadline = None;
        self.tracker
            .set_typing(&self.conversation_id, &self.identity_id, false);
    }
}
