//! Prelude module for common timer types.
//!
//! This module provides a convenient way to import the most commonly used
//! types from the timer crate.

pub use crate::clock::{ManualClock, SystemWallClock, WallClock};
pub use crate::config::{SchedulerConfig, SchedulerConfigBuilder};
pub use crate::error::{TimerError, TimerResult};
pub use crate::scheduler::{Scheduler, SchedulerBuilder, SchedulerState};
pub use crate::stats::TickCountersSnapshot;
pub use crate::tick::TickKind;
pub use crate::TICK_PERIOD;
