//! Presence tracking
//!
//! Per-identity online flag plus last-seen timestamp. An identity writes
//! only its own record and reads only others', so the map has a single
//! writer per key. Presence writes are best-effort and must never block
//! the send/receive paths; callers log failures and move on.

use crate::clock::SharedClock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Milliseconds in one minute
const MINUTE_MS: i64 = 60_000;
/// Milliseconds in one hour
const HOUR_MS: i64 = 60 * MINUTE_MS;
/// Milliseconds in one day
const DAY_MS: i64 = 24 * HOUR_MS;

/// Snapshot of one identity's presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Whether the identity is currently online
    pub online: bool,
    /// When the identity last went offline (Unix ms); `None` if never seen
    pub last_seen: Option<i64>,
}

/// Tracks online/last-seen state for all known identities
pub struct PresenceTracker {
    records: Mutex<HashMap<String, PresenceSnapshot>>,
    clock: SharedClock,
}

impl PresenceTracker {
    /// Create a tracker using the given clock
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Update an identity's presence
    ///
    /// Going online leaves `last_seen` untouched (it keeps the previous
    /// offline moment); going offline stamps `last_seen` with now.
    /// Triggered on app start, visibility change and logout/unload.
    pub fn set_presence(&self, id: &str, online: bool) {
        if id.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let record = records.entry(id.to_string()).or_default();
        record.online = online;
        if !online {
            record.last_seen = Some(now);
        }
        tracing::debug!("Presence updated: {} online={}", id, online);
    }

    /// Read an identity's presence; unknown identities read as offline
    pub fn get_presence(&self, id: &str) -> PresenceSnapshot {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    /// Human-readable "last seen" label for an identity
    pub fn last_seen_label(&self, id: &str) -> String {
        let snapshot = self.get_presence(id);
        if snapshot.online {
            return "online".to_string();
        }
        match snapshot.last_seen {
            Some(last_seen) => format_last_seen(self.clock.now_ms(), last_seen),
            None => "offline".to_string(),
        }
    }
}

/// Bucket a last-seen timestamp for display
///
/// <1 min "just now", <60 min "Nm", <24 h "Nh", otherwise the calendar date.
pub fn format_last_seen(now_ms: i64, last_seen_ms: i64) -> String {
    let elapsed = (now_ms - last_seen_ms).max(0);
    if elapsed < MINUTE_MS {
        "just now".to_string()
    } else if elapsed < HOUR_MS {
        format!("{}m", elapsed / MINUTE_MS)
    } else if elapsed < DAY_MS {
        format!("{}h", elapsed / HOUR_MS)
    } else {
        chrono::DateTime::from_timestamp_millis(last_seen_ms)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "offline".to_string())
    }
}
