//! The tick scheduler: one worker thread advancing a shared seconds clock.
//!
//! Each iteration the loop:
//! 1. computes an absolute deadline half a second into wall-clock second
//!    `last + 1` (see [`SchedulerConfig::tick_phase`]),
//! 2. takes the tick lock and releases threads waiting for the next tick,
//! 3. waits for the deadline or an explicit [`Scheduler::wake`],
//! 4. re-reads the wall clock into the shared clock and drops the lock,
//! 5. classifies the elapsed time (normal, clock jump, stall, rewind),
//! 6. notifies exception handlers on a clock jump, then fires due timers.
//!
//! Waiting on an absolute deadline instead of sleeping a relative second
//! keeps ticks anchored to wall-clock seconds however long callbacks take.
//!
//! # Callback faults
//!
//! Timer and exception callbacks run on the worker thread. Unless
//! [`SchedulerConfig::isolate_callbacks`] is set, a panicking callback
//! terminates the worker (and, under `panic = "abort"`, the process).

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::callback::InvokeReport;
use crate::clock::{SharedClock, SystemWallClock, WallClock};
use crate::config::SchedulerConfig;
use crate::error::{TimerError, TimerResult};
use crate::exceptions::ExceptionRegistry;
use crate::stats::{TickCounters, TickCountersSnapshot};
use crate::tick::{TickGate, TickKind, classify};
use crate::timers::TimerRegistry;

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    /// Constructed, worker not spawned yet.
    Idle = 0,
    /// Worker is ticking.
    Running = 1,
    /// Shutdown requested; the worker exits at its next evaluation.
    Stopping = 2,
    /// Worker has exited.
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

struct Inner {
    config: SchedulerConfig,
    wall_clock: Arc<dyn WallClock>,
    clock: SharedClock,
    gate: TickGate,
    timers: TimerRegistry,
    exceptions: ExceptionRegistry,
    counters: TickCounters,
    state: AtomicU8,
    running: AtomicBool,
    external_run_flag: Option<Arc<AtomicBool>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: OnceLock<ThreadId>,
}

impl Inner {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Owned by `start`/`stop`; an external run flag is only ever read.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self
                .external_run_flag
                .as_ref()
                .is_none_or(|flag| flag.load(Ordering::Acquire))
    }

    /// Move `Running` to `Stopping` once the loop sees it should exit.
    fn begin_stopping(&self) {
        let moved = self.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if moved.is_ok() {
            info!("Run flag cleared; timer loop stopping");
        }
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_thread.get() == Some(&thread::current().id())
    }

    /// Monotonic instant matching wall-clock second `last + 1` plus the phase.
    ///
    /// The wait is capped at one tick so a clock moved backwards is noticed
    /// on the next evaluation instead of after the lost time is made up.
    fn deadline_after(&self, last: u64) -> Instant {
        let target =
            Duration::from_secs(last.saturating_add(1)).saturating_add(self.config.tick_phase);
        let max_wait = crate::TICK_PERIOD.saturating_add(self.config.tick_phase);
        let remaining = target.saturating_sub(self.wall_clock.now()).min(max_wait);
        let now = Instant::now();
        now.checked_add(remaining).unwrap_or(now)
    }

    fn notify_exceptions(&self) -> InvokeReport {
        let report = self.exceptions.notify(self.config.isolate_callbacks);
        self.counters.inc_exception_notification();
        self.record_panics(report);
        report
    }

    fn record_panics(&self, report: InvokeReport) {
        if report.panicked > 0 {
            self.counters.add_callback_panics(report.panicked as u64);
        }
    }

    /// One pass of the loop. Returns `false` once the loop should exit.
    fn tick_once(&self, last: &mut u64) -> bool {
        let deadline = self.deadline_after(*last);

        let (current, woken) = {
            let mut state = self.gate.lock();
            self.gate.release_waiters(&mut state, self.clock.load());
            let woken = self.gate.wait_tick(&mut state, deadline);
            let current = self.wall_clock.now_secs();
            self.clock.store(current);
            (current, woken)
        };

        let kind = classify(*last, current, self.config.clock_jump_threshold_secs);
        if !kind.fires_timers() {
            if !self.is_running() {
                self.begin_stopping();
                return false;
            }
            if !woken {
                self.counters.inc_stall();
                debug!(current, "Timer woke without time passing; backing off");
                self.gate.backoff(self.config.stall_backoff);
                return true;
            }
            debug!(current, "Explicit wake; evaluating timers at unchanged clock");
        }

        match kind {
            TickKind::ClockJump { elapsed } => {
                warn!(
                    current,
                    last = *last,
                    elapsed,
                    "Clock jump detected (system sleep or clock change)"
                );
                self.counters.inc_clock_jump();
                let report = self.notify_exceptions();
                debug!(handlers = report.invoked, "Exception handlers notified");
            }
            TickKind::Rewind { by } => {
                warn!(current, last = *last, by, "Wall clock moved backwards");
                self.counters.inc_clock_rewind();
            }
            TickKind::Normal { .. } | TickKind::Stall => {}
        }

        self.counters.inc_tick();
        *last = current;

        let report = self.timers.fire_due(current, self.config.isolate_callbacks);
        self.counters.add_timers_fired(report.invoked as u64);
        self.record_panics(report);
        true
    }

    fn run(&self) {
        let _exit = ExitGuard(self);
        if self.worker_thread.set(thread::current().id()).is_err() {
            debug!("Timer worker thread id already recorded");
        }

        let mut last = self.clock.load();
        info!(clock = last, "Timer loop running");

        while self.is_running() {
            if !self.tick_once(&mut last) {
                break;
            }
        }
        self.begin_stopping();
    }

    /// Request shutdown, wake the loop and join the worker.
    fn shutdown(&self) -> TimerResult {
        match self.state() {
            SchedulerState::Idle => return Err(TimerError::NotRunning),
            SchedulerState::Running => self.set_state(SchedulerState::Stopping),
            SchedulerState::Stopping | SchedulerState::Stopped => {}
        }

        info!("Stopping timer scheduler");
        self.running.store(false, Ordering::Release);
        self.gate.wake();

        if self.on_worker_thread() {
            return Ok(());
        }

        let handle = self.worker.lock().take();
        let joined = handle.map_or(Ok(()), JoinHandle::join);
        self.set_state(SchedulerState::Stopped);

        if joined.is_err() {
            error!("Timer thread panicked");
            return Err(TimerError::WorkerPanicked);
        }
        info!("Timer scheduler stopped");
        Ok(())
    }
}

/// Marks the scheduler stopped when the worker exits, including by panic.
struct ExitGuard<'a>(&'a Inner);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.set_state(SchedulerState::Stopped);
        if thread::panicking() {
            error!("Timer loop terminated by a panicking callback");
        } else {
            info!("Timer loop exited");
        }
    }
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    wall_clock: Arc<dyn WallClock>,
    run_flag: Option<Arc<AtomicBool>>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            config: SchedulerConfig::default(),
            wall_clock: Arc::new(SystemWallClock),
            run_flag: None,
        }
    }
}

impl SchedulerBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Read time from `clock` instead of the system clock.
    #[must_use]
    pub fn wall_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.wall_clock = clock;
        self
    }

    /// Also stop the loop when an externally owned run flag is cleared.
    ///
    /// The scheduler only reads the flag: `start` and `stop` leave it
    /// untouched. Clearing it moves the scheduler to stopping and the loop
    /// exits at its next evaluation (promptly if [`Scheduler::wake`] is
    /// called too).
    #[must_use]
    pub fn run_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.run_flag = Some(flag);
        self
    }

    /// Build the scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> TimerResult<Scheduler> {
        self.config.validate()?;
        let initial = self.wall_clock.now_secs();
        let inner = Arc::new(Inner {
            config: self.config,
            wall_clock: self.wall_clock,
            clock: SharedClock::new(initial),
            gate: TickGate::new(),
            timers: TimerRegistry::new(),
            exceptions: ExceptionRegistry::new(),
            counters: TickCounters::new(),
            state: AtomicU8::new(SchedulerState::Idle as u8),
            running: AtomicBool::new(false),
            external_run_flag: self.run_flag,
            worker: Mutex::new(None),
            worker_thread: OnceLock::new(),
        });
        Ok(Scheduler {
            stop_on_drop: Arc::new(StopOnDrop(Arc::clone(&inner))),
            inner,
        })
    }
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("external_run_flag", &self.run_flag.is_some())
            .finish_non_exhaustive()
    }
}

/// Process-scoped periodic scheduler.
///
/// Cloning yields another handle to the same scheduler, so collaborators
/// (including callbacks) can be handed a `Scheduler` to register with.
/// Dropping the last handle stops a running scheduler and joins its worker.
///
/// # Example
///
/// ```no_run
/// use openracing_timer::Scheduler;
///
/// let scheduler = Scheduler::builder().build()?;
/// scheduler.start()?;
///
/// scheduler.register_timer(60, || println!("one minute passed"));
/// scheduler.register_exception_handler(|| println!("host resumed from sleep"));
///
/// scheduler.wait_for_next_tick();
/// println!("clock is now {}", scheduler.now());
///
/// scheduler.stop()?;
/// # Ok::<(), openracing_timer::TimerError>(())
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    stop_on_drop: Arc<StopOnDrop>,
}

/// Shared by every [`Scheduler`] handle; the worker only holds `Inner`.
struct StopOnDrop(Arc<Inner>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if matches!(self.0.state(), SchedulerState::Running | SchedulerState::Stopping) {
            warn!("Scheduler dropped while still running - forcing stop");
            if let Err(e) = self.0.shutdown() {
                error!(error = %e, "Timer scheduler did not stop cleanly");
            }
        }
    }
}

impl Scheduler {
    /// Create a builder with default configuration and the system clock.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Create a scheduler with `config` reading the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> TimerResult<Self> {
        Self::builder().config(config).build()
    }

    /// Initialize the shared clock and spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyStarted`] if called more than once and
    /// [`TimerError::SpawnFailed`] if the thread cannot be created.
    pub fn start(&self) -> TimerResult {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(
                SchedulerState::Idle as u8,
                SchedulerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(TimerError::AlreadyStarted);
        }

        inner.clock.store(inner.wall_clock.now_secs());
        inner.running.store(true, Ordering::Release);

        let worker_inner = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(inner.config.thread_name.clone())
            .spawn(move || worker_inner.run());

        match spawned {
            Ok(handle) => {
                *inner.worker.lock() = Some(handle);
                info!(
                    thread = %inner.config.thread_name,
                    clock = inner.clock.load(),
                    "Timer scheduler started"
                );
                Ok(())
            }
            Err(e) => {
                inner.running.store(false, Ordering::Release);
                inner.set_state(SchedulerState::Stopped);
                error!(error = %e, "Failed to spawn timer thread");
                Err(TimerError::SpawnFailed(e))
            }
        }
    }

    /// Request shutdown, wake the loop and wait for the worker to exit.
    ///
    /// Calling `stop` from a callback on the worker thread only requests
    /// shutdown; the loop exits after the callback returns.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::NotRunning`] if the scheduler was never started
    /// and [`TimerError::WorkerPanicked`] if the worker died in a callback.
    pub fn stop(&self) -> TimerResult {
        self.inner.shutdown()
    }

    /// Current time in whole seconds since the epoch.
    ///
    /// While the scheduler runs this is the shared clock, refreshed once per
    /// tick; otherwise the wall clock is read directly.
    #[must_use]
    pub fn now(&self) -> u64 {
        match self.inner.state() {
            SchedulerState::Running | SchedulerState::Stopping => self.inner.clock.load(),
            SchedulerState::Idle | SchedulerState::Stopped => self.inner.wall_clock.now_secs(),
        }
    }

    /// Register `callback` to run every `interval_secs` seconds on the
    /// worker thread, first on the next tick.
    ///
    /// May be called from any thread, including from inside a callback.
    pub fn register_timer<F>(&self, interval_secs: u64, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.timers.register(interval_secs, callback);
    }

    /// Register `callback` to run when a clock jump is detected.
    ///
    /// The callback never runs on the registering thread.
    pub fn register_exception_handler<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.exceptions.register(callback);
    }

    /// Run every exception handler not registered by the calling thread.
    ///
    /// Returns the number of handlers invoked.
    pub fn notify_exception(&self) -> usize {
        self.inner.notify_exceptions().invoked
    }

    /// Make the loop evaluate promptly instead of waiting for its deadline.
    pub fn wake(&self) {
        self.inner.counters.inc_wake();
        self.inner.gate.wake();
        trace!("Timer wake requested");
    }

    /// Block until the shared clock changes from its current value.
    ///
    /// There is no timeout: if the scheduler is not running this blocks until
    /// it is started and ticks. Calling this on the worker thread (from a
    /// callback) would deadlock the loop, so there it returns immediately.
    pub fn wait_for_next_tick(&self) {
        if self.inner.on_worker_thread() {
            warn!("wait_for_next_tick called on the timer thread; returning immediately");
            return;
        }
        self.inner.gate.wait_changed(&self.inner.clock);
    }

    /// Like [`Scheduler::wait_for_next_tick`] but gives up after `timeout`.
    ///
    /// Returns `true` if a tick was observed.
    #[must_use]
    pub fn wait_for_next_tick_timeout(&self, timeout: Duration) -> bool {
        if self.inner.on_worker_thread() {
            return false;
        }
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now);
        self.inner.gate.wait_changed_until(&self.inner.clock, deadline)
    }

    /// Block until a tick with a clock strictly past `observed` has finished,
    /// including firing its due timers.
    ///
    /// Returns immediately if one already has. Useful when the caller read
    /// [`Scheduler::now`] before triggering the change it wants to observe.
    pub fn wait_for_tick_after(&self, observed: u64) {
        if self.inner.on_worker_thread() {
            warn!("wait_for_tick_after called on the timer thread; returning immediately");
            return;
        }
        self.inner.gate.wait_past(observed);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Counters describing loop activity.
    #[must_use]
    pub fn stats(&self) -> TickCountersSnapshot {
        self.inner.counters.snapshot()
    }

    /// Number of registered timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.inner.timers.len()
    }

    /// Number of registered exception handlers.
    #[must_use]
    pub fn exception_handler_count(&self) -> usize {
        self.inner.exceptions.len()
    }

    /// Threads currently blocked waiting for a tick.
    #[must_use]
    pub fn tick_waiters(&self) -> u32 {
        self.inner.gate.waiters()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("clock", &self.inner.clock.load())
            .field("timers", &self.inner.timers)
            .field("exceptions", &self.inner.exceptions)
            .field("handles", &Arc::strong_count(&self.stop_on_drop))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn manual_scheduler(start: u64) -> TimerResult<(Scheduler, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::new(start));
        let config = SchedulerConfig::builder()
            .stall_backoff(Duration::from_millis(20))
            .build()?;
        let scheduler = Scheduler::builder()
            .config(config)
            .wall_clock(clock.clone())
            .build()?;
        Ok((scheduler, clock))
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(SchedulerState::from_u8(0), SchedulerState::Idle);
        assert_eq!(SchedulerState::from_u8(1), SchedulerState::Running);
        assert_eq!(SchedulerState::from_u8(2), SchedulerState::Stopping);
        assert_eq!(SchedulerState::from_u8(3), SchedulerState::Stopped);
        assert_eq!(SchedulerState::from_u8(200), SchedulerState::Stopped);
    }

    #[test]
    fn test_now_falls_back_to_wall_clock_before_start() -> TestResult {
        let (scheduler, clock) = manual_scheduler(1000)?;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        clock.set(1234);
        assert_eq!(scheduler.now(), 1234);
        Ok(())
    }

    #[test]
    fn test_stop_before_start_is_rejected() -> TestResult {
        let (scheduler, _clock) = manual_scheduler(1000)?;
        assert!(matches!(scheduler.stop(), Err(TimerError::NotRunning)));
        Ok(())
    }

    #[test]
    fn test_start_twice_is_rejected() -> TestResult {
        let (scheduler, _clock) = manual_scheduler(1000)?;
        scheduler.start()?;
        assert!(matches!(scheduler.start(), Err(TimerError::AlreadyStarted)));
        scheduler.stop()?;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        Ok(())
    }

    #[test]
    fn test_deadline_is_capped_after_rewind() -> TestResult {
        let (scheduler, clock) = manual_scheduler(1000)?;
        clock.set(100);
        let before = Instant::now();
        let deadline = scheduler.inner.deadline_after(1000);
        assert!(deadline <= before + Duration::from_millis(1600));
        Ok(())
    }

    #[test]
    fn test_deadline_anchored_to_wall_clock_second() -> TestResult {
        let (scheduler, _clock) = manual_scheduler(1000)?;
        let before = Instant::now();
        let deadline = scheduler.inner.deadline_after(1000);
        // ManualClock reads exactly 1000.0, deadline is 1001.5.
        let wait = deadline.saturating_duration_since(before);
        assert!(wait >= Duration::from_millis(1500));
        assert!(wait < Duration::from_millis(1600));
        Ok(())
    }

    #[test]
    fn test_cleared_run_flag_moves_running_to_stopping() -> TestResult {
        let run_flag = Arc::new(AtomicBool::new(true));
        let scheduler = Scheduler::builder()
            .wall_clock(Arc::new(ManualClock::new(1000)))
            .run_flag(Arc::clone(&run_flag))
            .build()?;
        let inner = &scheduler.inner;
        inner.set_state(SchedulerState::Running);
        inner.running.store(true, Ordering::Release);

        run_flag.store(false, Ordering::SeqCst);
        inner.gate.wake();
        let mut last = 1000;
        assert!(!inner.tick_once(&mut last));
        assert_eq!(scheduler.state(), SchedulerState::Stopping);

        // No worker was spawned; settle the state before the handle drops.
        inner.set_state(SchedulerState::Stopped);
        Ok(())
    }

    #[test]
    fn test_wait_on_worker_thread_returns_immediately() -> TestResult {
        let (scheduler, clock) = manual_scheduler(1000)?;
        let returned = Arc::new(AtomicBool::new(false));
        {
            let handle = scheduler.clone();
            let returned = Arc::clone(&returned);
            scheduler.register_timer(1000, move || {
                handle.wait_for_next_tick();
                returned.store(true, Ordering::SeqCst);
            });
        }

        scheduler.start()?;
        let observed = scheduler.now();
        clock.advance(1);
        scheduler.wake();
        // Waiters are released at the start of the iteration after the tick,
        // so the timer has already run when this returns.
        scheduler.wait_for_tick_after(observed);
        scheduler.stop()?;

        assert!(returned.load(Ordering::SeqCst));
        Ok(())
    }
}
