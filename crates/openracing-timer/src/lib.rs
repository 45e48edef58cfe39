//! Process-wide one-second tick scheduler for OpenRacing services.
//!
//! A single background worker advances a shared seconds clock once per
//! second, fires periodic timers whose due time has arrived, and detects
//! clock jumps such as a host resuming from sleep. It provides:
//!
//! - **Scheduler**: the tick loop with an absolute-deadline wait, so ticks stay
//!   anchored to wall-clock seconds regardless of callback latency
//! - **TimerRegistry**: append-only periodic timers, registered from any thread
//! - **ExceptionRegistry**: handlers notified when the clock jumps forward
//! - **Tick waiting**: block a thread until the next tick boundary
//! - **TickCounters**: lock-free counters for ticks, jumps, stalls and fires
//!
//! # Concurrency
//!
//! - The shared clock is written only by the worker and read lock-free
//! - Registries take a lock on insert and are walked without one; a node is
//!   published atomically only after it is fully built
//! - Registration is allowed from inside timer and exception callbacks
//!
//! # Example
//!
//! ```no_run
//! use openracing_timer::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! scheduler.start()?;
//!
//! scheduler.register_timer(2, || println!("every other second"));
//! scheduler.wait_for_next_tick();
//!
//! scheduler.stop()?;
//! # Ok::<(), openracing_timer::TimerError>(())
//! ```

#![deny(clippy::unwrap_used)]
#![deny(unused_must_use)]
#![deny(missing_debug_implementations)]

pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod exceptions;
mod list;
pub mod scheduler;
pub mod stats;
pub mod tick;
pub mod timers;

pub mod prelude;

pub use callback::{Callback, InvokeReport};
pub use clock::{ManualClock, SharedClock, SystemWallClock, WallClock};
pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use error::{TimerError, TimerResult};
pub use exceptions::ExceptionRegistry;
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerState};
pub use stats::{TickCounters, TickCountersSnapshot};
pub use tick::{TickKind, classify};
pub use timers::{NEVER_RUN, TimerEntry, TimerRegistry};

/// Nominal interval between ticks.
pub const TICK_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);
