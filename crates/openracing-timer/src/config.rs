//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TimerError, TimerResult};

/// Default offset into the wall-clock second at which a tick is due.
pub const DEFAULT_TICK_PHASE: Duration = Duration::from_millis(500);

/// Default elapsed-seconds threshold at which a tick counts as a clock jump.
pub const DEFAULT_CLOCK_JUMP_THRESHOLD_SECS: u64 = 5;

/// Default back-off after a tick that observed no elapsed time.
pub const DEFAULT_STALL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest stall back-off accepted by [`SchedulerConfig::validate`].
pub const MAX_STALL_BACKOFF: Duration = Duration::from_secs(60);

/// Default name of the worker thread.
pub const DEFAULT_THREAD_NAME: &str = "openracing-timer";

/// Configuration for the tick scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Offset into wall-clock second `last + 1` used as the absolute deadline.
    ///
    /// Waking mid-second keeps the re-read clock on the next whole second
    /// even when the OS timer fires slightly early or late.
    pub tick_phase: Duration,
    /// Elapsed seconds between two ticks that classify as a clock jump.
    pub clock_jump_threshold_secs: u64,
    /// How long the loop backs off after a tick that observed no elapsed time.
    pub stall_backoff: Duration,
    /// Run each callback under `catch_unwind` instead of letting a panic
    /// terminate the worker. Only effective when built with `panic = "unwind"`.
    pub isolate_callbacks: bool,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_phase: DEFAULT_TICK_PHASE,
            clock_jump_threshold_secs: DEFAULT_CLOCK_JUMP_THRESHOLD_SECS,
            stall_backoff: DEFAULT_STALL_BACKOFF,
            isolate_callbacks: false,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> TimerResult<()> {
        if self.tick_phase >= Duration::from_secs(1) {
            return Err(TimerError::invalid_configuration(
                "tick_phase must be shorter than one second",
            ));
        }
        if self.clock_jump_threshold_secs < 2 {
            return Err(TimerError::invalid_configuration(
                "clock_jump_threshold_secs must be at least 2",
            ));
        }
        if self.stall_backoff.is_zero() {
            return Err(TimerError::invalid_configuration(
                "stall_backoff must be greater than 0",
            ));
        }
        if self.stall_backoff > MAX_STALL_BACKOFF {
            return Err(TimerError::invalid_configuration(
                "stall_backoff must not exceed 60 seconds",
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(TimerError::invalid_configuration(
                "thread_name must not be empty",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

/// Builder for `SchedulerConfig`.
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Set the sub-second phase of the tick deadline.
    #[must_use]
    pub fn tick_phase(mut self, phase: Duration) -> Self {
        self.config.tick_phase = phase;
        self
    }

    /// Set the clock-jump threshold in seconds.
    #[must_use]
    pub fn clock_jump_threshold_secs(mut self, secs: u64) -> Self {
        self.config.clock_jump_threshold_secs = secs;
        self
    }

    /// Set the stall back-off.
    #[must_use]
    pub fn stall_backoff(mut self, backoff: Duration) -> Self {
        self.config.stall_backoff = backoff;
        self
    }

    /// Enable or disable callback isolation.
    #[must_use]
    pub fn isolate_callbacks(mut self, enabled: bool) -> Self {
        self.config.isolate_callbacks = enabled;
        self
    }

    /// Set the worker thread name.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> TimerResult<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
