//! Lock-free counters describing what the tick loop has done.
//!
//! All counters use `Ordering::Relaxed`: they are independent monotonic
//! tallies and never synchronize other memory.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter snapshot returned by [`TickCounters::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickCountersSnapshot {
    /// Iterations that advanced the clock or were explicitly woken.
    pub ticks: u64,
    /// Ticks classified as clock jumps.
    pub clock_jumps: u64,
    /// Ticks where the wall clock moved backwards.
    pub clock_rewinds: u64,
    /// Iterations that observed no elapsed time and backed off.
    pub stalls: u64,
    /// Calls to `wake`.
    pub wakes: u64,
    /// Timer callbacks invoked.
    pub timers_fired: u64,
    /// Exception notification rounds.
    pub exception_notifications: u64,
    /// Callback panics caught while isolation was enabled.
    pub callback_panics: u64,
}

/// Atomic counters updated by the tick loop.
#[derive(Debug, Default)]
pub struct TickCounters {
    ticks: AtomicU64,
    clock_jumps: AtomicU64,
    clock_rewinds: AtomicU64,
    stalls: AtomicU64,
    wakes: AtomicU64,
    timers_fired: AtomicU64,
    exception_notifications: AtomicU64,
    callback_panics: AtomicU64,
}

impl TickCounters {
    /// Create counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            clock_jumps: AtomicU64::new(0),
            clock_rewinds: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
            wakes: AtomicU64::new(0),
            timers_fired: AtomicU64::new(0),
            exception_notifications: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn inc_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn inc_clock_jump(&self) {
        self.clock_jumps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn inc_clock_rewind(&self) {
        self.clock_rewinds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn inc_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn inc_wake(&self) {
        self.wakes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_timers_fired(&self, count: u64) {
        self.timers_fired.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn inc_exception_notification(&self) {
        self.exception_notifications.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_callback_panics(&self, count: u64) {
        self.callback_panics.fetch_add(count, Ordering::Relaxed);
    }

    /// Read every counter.
    ///
    /// Counters are read one at a time, so a snapshot taken while the loop is
    /// running may mix values from adjacent ticks.
    #[must_use]
    pub fn snapshot(&self) -> TickCountersSnapshot {
        TickCountersSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            clock_jumps: self.clock_jumps.load(Ordering::Relaxed),
            clock_rewinds: self.clock_rewinds.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            wakes: self.wakes.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            exception_notifications: self.exception_notifications.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}
