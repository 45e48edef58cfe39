//! Wall-clock sources and the shared seconds clock.
//!
//! The scheduler never calls `SystemTime` directly: it reads time through a
//! [`WallClock`], so tests and simulations can substitute a [`ManualClock`]
//! and drive clock jumps deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time.
pub trait WallClock: Send + Sync {
    /// Time elapsed since the UNIX epoch.
    fn now(&self) -> Duration;

    /// Whole seconds since the UNIX epoch.
    fn now_secs(&self) -> u64 {
        self.now().as_secs()
    }
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Manually driven wall clock with whole-second resolution.
///
/// # Example
///
/// ```rust
/// use openracing_timer::{ManualClock, WallClock};
///
/// let clock = ManualClock::new(1000);
/// clock.advance(7);
/// assert_eq!(clock.now_secs(), 1007);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `secs` seconds since the epoch.
    #[must_use]
    pub const fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    /// Set the clock to an absolute value (may move backwards).
    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::Release);
    }

    /// Move the clock forward by `secs` seconds.
    pub fn advance(&self, secs: u64) {
        // fetch_update never fails with a closure that always returns Some.
        let _previous = self
            .secs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(secs))
            });
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_secs(self.secs.load(Ordering::Acquire))
    }
}

/// Process-scoped seconds clock.
///
/// Written only by the scheduler loop (while it holds the tick lock) and
/// read lock-free by everyone else. Readers may observe a value one tick
/// stale; they never observe a torn one.
#[derive(Debug, Default)]
pub struct SharedClock {
    secs: AtomicU64,
}

impl SharedClock {
    /// Create a shared clock holding `secs`.
    #[must_use]
    pub const fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    /// Current value in seconds since the epoch.
    #[inline]
    pub fn load(&self) -> u64 {
        self.secs.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn store(&self, secs: u64) {
        self.secs.store(secs, Ordering::Release);
    }
}
