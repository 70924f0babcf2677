//! Monotonic time source, injectable so scenario tests can run in virtual time.
//!
//! The state machine never reads the wall clock directly — all dwell and
//! observation-window arithmetic goes through a [`Clock`] handed in at
//! construction time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time source, in seconds since some arbitrary epoch.
pub trait Clock: Send + Sync {
    /// Current time, monotonic within a single process run.
    fn now(&self) -> Duration;
}

/// Wraps [`std::time::Instant`] for production use.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// A manually-advanced clock for scenario tests.
///
/// Cloning shares the underlying counter, so a test can hold one handle to
/// advance time and pass another into the component under test.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    millis: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        VirtualClock {
            millis: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move time forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.millis
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump directly to an absolute offset from start.
    pub fn set(&self, t: Duration) {
        self.millis.store(t.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}
