//! Tick classification and the tick gate shared by the loop and waiters.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::clock::SharedClock;

/// How the elapsed time between two consecutive clock readings is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// The clock advanced by less than the jump threshold.
    Normal {
        /// Seconds since the previous reading.
        elapsed: u64,
    },
    /// The clock advanced by at least the jump threshold (suspend/resume,
    /// manual clock change).
    ClockJump {
        /// Seconds since the previous reading.
        elapsed: u64,
    },
    /// No time passed since the previous reading.
    Stall,
    /// The clock moved backwards. Handled like a normal tick.
    Rewind {
        /// Seconds the clock moved back by.
        by: u64,
    },
}

impl TickKind {
    /// Whether due timers are evaluated for this tick without an explicit
    /// wake. A stall only evaluates them when the loop was woken.
    #[must_use]
    pub fn fires_timers(self) -> bool {
        !matches!(self, TickKind::Stall)
    }
}

/// Classify the interval between `last` and `current`.
///
/// `jump_threshold_secs` is the smallest forward step treated as a clock jump.
#[must_use]
pub fn classify(last: u64, current: u64, jump_threshold_secs: u64) -> TickKind {
    match current.checked_sub(last) {
        Some(0) => TickKind::Stall,
        Some(elapsed) if elapsed >= jump_threshold_secs => TickKind::ClockJump { elapsed },
        Some(elapsed) => TickKind::Normal { elapsed },
        None => TickKind::Rewind {
            by: last.saturating_sub(current),
        },
    }
}

#[derive(Debug, Default)]
pub(crate) struct GateState {
    /// Threads blocked in a tick wait.
    pub(crate) waiters: u32,
    /// A `wake` arrived that the loop has not consumed yet.
    pub(crate) wake_pending: bool,
    /// Clock value at the most recent release; every tick up to it has
    /// finished firing its timers.
    pub(crate) released: u64,
}

/// The loop's lock plus its two condition variables.
///
/// `tick_cond` wakes the loop; `waiter_cond` wakes threads waiting for the
/// next tick. The shared clock is written only while `state` is held, so a
/// waiter comparing the clock under the lock sees a consistent value.
#[derive(Debug, Default)]
pub(crate) struct TickGate {
    state: Mutex<GateState>,
    tick_cond: Condvar,
    waiter_cond: Condvar,
}

impl TickGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock()
    }

    /// Record `clock` as fully processed and release every blocked waiter.
    pub(crate) fn release_waiters(&self, state: &mut GateState, clock: u64) {
        state.released = clock;
        if state.waiters > 0 {
            self.waiter_cond.notify_all();
        }
    }

    /// Block the loop until `deadline` unless a wake is already pending.
    ///
    /// Returns whether the loop was explicitly woken, consuming the wake.
    pub(crate) fn wait_tick(
        &self,
        state: &mut MutexGuard<'_, GateState>,
        deadline: Instant,
    ) -> bool {
        if !state.wake_pending {
            let _timed_out = self.tick_cond.wait_until(state, deadline);
        }
        std::mem::take(&mut state.wake_pending)
    }

    /// Back off after a stall; returns early on `wake`.
    pub(crate) fn backoff(&self, duration: Duration) {
        let mut state = self.state.lock();
        if !state.wake_pending {
            let _timed_out = self.tick_cond.wait_for(&mut state, duration);
        }
    }

    /// Request a prompt evaluation from the loop.
    pub(crate) fn wake(&self) {
        let mut state = self.state.lock();
        state.wake_pending = true;
        self.tick_cond.notify_one();
    }

    /// Block until `clock` differs from `observed`, waiting at least once.
    pub(crate) fn wait_changed(&self, clock: &SharedClock) {
        let mut state = self.state.lock();
        let observed = clock.load();
        loop {
            state.waiters = state.waiters.saturating_add(1);
            self.waiter_cond.wait(&mut state);
            state.waiters = state.waiters.saturating_sub(1);
            if clock.load() != observed {
                return;
            }
        }
    }

    /// Block until a tick with a clock strictly past `observed` has been
    /// released, which happens only after that tick's timers have run.
    ///
    /// Returns immediately if one already has.
    pub(crate) fn wait_past(&self, observed: u64) {
        let mut state = self.state.lock();
        while state.released <= observed {
            state.waiters = state.waiters.saturating_add(1);
            self.waiter_cond.wait(&mut state);
            state.waiters = state.waiters.saturating_sub(1);
        }
    }

    /// Like [`TickGate::wait_changed`] with an overall deadline.
    ///
    /// Returns `false` if the deadline passed before the clock changed.
    pub(crate) fn wait_changed_until(&self, clock: &SharedClock, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        let observed = clock.load();
        loop {
            state.waiters = state.waiters.saturating_add(1);
            let result = self.waiter_cond.wait_until(&mut state, deadline);
            state.waiters = state.waiters.saturating_sub(1);
            if clock.load() != observed {
                return true;
            }
            if result.timed_out() {
                return false;
            }
        }
    }

    pub(crate) fn waiters(&self) -> u32 {
        self.state.lock().waiters
    }
}
