//! Registry of periodic timers.
//!
//! Entries are never removed. Registration may happen from any thread,
//! including from inside a timer callback while the loop is walking the
//! registry; see [`crate::list`] for the publication rules that make this
//! safe without the loop taking a lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::callback::{self, Callback, InvokeReport};
use crate::list::AppendOnlyList;

/// Due time of an entry that has never run; due on the first evaluation.
pub const NEVER_RUN: u64 = 0;

/// One periodic job.
pub struct TimerEntry {
    callback: Callback,
    interval_secs: u64,
    // Written only by the loop thread; atomic so other threads can inspect it.
    next_due: AtomicU64,
    runs: AtomicU64,
}

impl TimerEntry {
    fn new(interval_secs: u64, callback: Callback) -> Self {
        Self {
            callback,
            interval_secs,
            next_due: AtomicU64::new(NEVER_RUN),
            runs: AtomicU64::new(0),
        }
    }

    /// Seconds between runs.
    #[must_use]
    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Absolute clock value at or after which the entry fires next.
    #[must_use]
    pub fn next_due(&self) -> u64 {
        self.next_due.load(Ordering::Acquire)
    }

    /// Number of times the callback has been started.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    fn is_due(&self, now: u64) -> bool {
        self.next_due() <= now
    }
}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("interval_secs", &self.interval_secs)
            .field("next_due", &self.next_due())
            .field("runs", &self.runs())
            .finish_non_exhaustive()
    }
}

/// Append-only collection of [`TimerEntry`] values.
#[derive(Default)]
pub struct TimerRegistry {
    entries: AppendOnlyList<TimerEntry>,
}

impl TimerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run every `interval_secs` seconds.
    ///
    /// The entry is due immediately and fires on the first evaluation that
    /// reaches it. An interval of zero fires on every evaluation.
    pub fn register<F>(&self, interval_secs: u64, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.entries
            .push(TimerEntry::new(interval_secs, Box::new(callback)));
        tracing::trace!(interval_secs, "Timer registered");
    }

    /// Fire every entry whose due time is at or before `now`.
    ///
    /// The due time of each entry is advanced to `now + interval` before its
    /// callback runs, so a slow or re-entrant callback never causes the same
    /// entry to fire twice for one clock value. Entries registered while this
    /// call is running are picked up by the next evaluation.
    ///
    /// Must only be called from one thread at a time (the loop thread).
    pub fn fire_due(&self, now: u64, isolate: bool) -> InvokeReport {
        let mut report = InvokeReport::default();
        for entry in self.entries.iter() {
            if !entry.is_due(now) {
                continue;
            }
            entry
                .next_due
                .store(now.saturating_add(entry.interval_secs), Ordering::Release);
            entry.runs.fetch_add(1, Ordering::Relaxed);
            report.record(callback::invoke(&*entry.callback, isolate, "timer"));
        }
        report
    }

    /// Number of registered timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest due time across all entries, if any are registered.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.entries.iter().map(|entry| entry.next_due()).min()
    }
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("len", &self.len())
            .finish()
    }
}
