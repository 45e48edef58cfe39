//! Concurrency tests for registration and tick waiting.

use openracing_timer::prelude::*;
use openracing_timer::{ExceptionRegistry, TimerRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

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
fn test_concurrent_timer_registration() {
    let registry = Arc::new(TimerRegistry::new());
    let fired = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];

    for i in 0..8u64 {
        let registry = Arc::clone(&registry);
        let fired = Arc::clone(&fired);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                let fired = Arc::clone(&fired);
                registry.register(i + 1, move || {
                    fired.fetch_add(1, Ordering::Relaxed);
                });
            }
        }));
    }

    for handle in handles {
        assert!(handle.join().is_ok(), "Thread should not panic");
    }

    assert_eq!(registry.len(), 400);
    let report = registry.fire_due(1000, false);
    assert_eq!(report.invoked, 400);
    assert_eq!(fired.load(Ordering::Relaxed), 400);
}

#[test]
fn test_registration_while_firing() {
    let registry = Arc::new(TimerRegistry::new());
    let evaluations = Arc::new(AtomicU64::new(0));

    let registrar = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for _ in 0..500 {
                registry.register(1, || {});
                thread::yield_now();
            }
        })
    };

    let firer = {
        let registry = Arc::clone(&registry);
        let evaluations = Arc::clone(&evaluations);
        thread::spawn(move || {
            for now in 1..=200u64 {
                let _report = registry.fire_due(now, false);
                evaluations.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    assert!(registrar.join().is_ok(), "Registrar should not panic");
    assert!(firer.join().is_ok(), "Firer should not panic");
    assert_eq!(registry.len(), 500);
    assert_eq!(evaluations.load(Ordering::Relaxed), 200);

    // Every entry, including late registrations, is due on the next pass.
    let report = registry.fire_due(10_000, false);
    assert_eq!(report.invoked, 500);
}

#[test]
fn test_concurrent_exception_handler_registration() {
    let registry = Arc::new(ExceptionRegistry::new());
    let calls = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];

    for _ in 0..6 {
        let registry = Arc::clone(&registry);
        let calls = Arc::clone(&calls);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                let calls = Arc::clone(&calls);
                registry.register(move || {
                    calls.fetch_add(1, Ordering::Relaxed);
                });
            }
        }));
    }

    for handle in handles {
        assert!(handle.join().is_ok(), "Thread should not panic");
    }

    // None were registered by this thread, so all run.
    let report = registry.notify(false);
    assert_eq!(report.invoked, 60);
    assert_eq!(calls.load(Ordering::Relaxed), 60);
}

#[test]
fn test_many_waiters_released_by_one_tick() -> TestResult {
    let (scheduler, clock) = manual_scheduler(50)?;
    scheduler.start()?;

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let scheduler = scheduler.clone();
            thread::spawn(move || scheduler.wait_for_next_tick_timeout(Duration::from_secs(10)))
        })
        .collect();

    while scheduler.tick_waiters() < 8 {
        thread::sleep(Duration::from_millis(1));
    }

    clock.set(51);
    scheduler.wake();

    for waiter in waiters {
        let ticked = waiter.join().map_err(|e| format!("waiter panicked: {e:?}"))?;
        assert!(ticked, "Waiter should observe the tick");
    }

    scheduler.stop()?;
    Ok(())
}

#[test]
fn test_registration_from_many_threads_while_running() -> TestResult {
    let (scheduler, clock) = manual_scheduler(1000)?;
    scheduler.start()?;

    let fired = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];
    for _ in 0..4 {
        let scheduler = scheduler.clone();
        let fired = Arc::clone(&fired);
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                let fired = Arc::clone(&fired);
                scheduler.register_timer(1, move || {
                    fired.fetch_add(1, Ordering::Relaxed);
                });
                scheduler.register_exception_handler(|| {});
            }
        }));
    }
    for handle in handles {
        assert!(handle.join().is_ok(), "Thread should not panic");
    }

    assert_eq!(scheduler.timer_count(), 100);
    assert_eq!(scheduler.exception_handler_count(), 100);

    let observed = scheduler.now();
    clock.advance(1);
    scheduler.wake();
    scheduler.wait_for_tick_after(observed);
    scheduler.stop()?;

    assert_eq!(fired.load(Ordering::Relaxed), 100);
    Ok(())
}

#[test]
fn test_concurrent_wake_and_stop() -> TestResult {
    let (scheduler, _clock) = manual_scheduler(1000)?;
    scheduler.start()?;

    let wakers: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    scheduler.wake();
                }
            })
        })
        .collect();

    for waker in wakers {
        assert!(waker.join().is_ok(), "Waker should not panic");
    }
    scheduler.stop()?;

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(scheduler.stats().wakes, 400);
    Ok(())
}
