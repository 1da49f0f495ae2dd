//! Clock boundary
//!
//! All timestamps inside the crate are integer Unix milliseconds (`i64`).
//! Backends and platforms carry heterogeneous time representations; this
//! module is the single place where they are normalized. Components that
//! need the current time take a [`Clock`] so tests can drive time manually.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

/// Source of the current time in Unix milliseconds
pub trait Clock: Send + Sync {
    /// Current time as Unix milliseconds
    fn now_ms(&self) -> i64;
}

/// Wall-clock time via chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a manual clock starting at the given time
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shared clock handle used by trackers and the store
pub type SharedClock = Arc<dyn Clock>;

/// Default shared clock (wall time)
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
