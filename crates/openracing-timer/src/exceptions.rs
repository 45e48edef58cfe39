//! Registry of clock-anomaly handlers.
//!
//! A handler is tagged with the thread that registered it and is never run
//! on that thread: a thread that raises the anomaly itself is expected to
//! handle it inline.

use std::fmt;
use std::thread::{self, ThreadId};

use crate::callback::{self, Callback, InvokeReport};
use crate::list::AppendOnlyList;

struct ExceptionHandler {
    callback: Callback,
    owner: ThreadId,
}

/// Append-only collection of exception handlers.
#[derive(Default)]
pub struct ExceptionRegistry {
    handlers: AppendOnlyList<ExceptionHandler>,
}

impl ExceptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`, owned by the calling thread.
    pub fn register<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let owner = thread::current().id();
        self.handlers.push(ExceptionHandler {
            callback: Box::new(callback),
            owner,
        });
        tracing::trace!(?owner, "Exception handler registered");
    }

    /// Run every handler not registered by the calling thread.
    ///
    /// Handlers run synchronously on the caller. When called from the loop
    /// thread a blocking handler delays every later tick.
    pub fn notify(&self, isolate: bool) -> InvokeReport {
        let current = thread::current().id();
        let mut report = InvokeReport::default();
        for handler in self.handlers.iter().filter(|h| h.owner != current) {
            report.record(callback::invoke(&*handler.callback, isolate, "exception"));
        }
        report
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ExceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_owner_thread_is_skipped() {
        let registry = ExceptionRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&calls);
        registry.register(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let report = registry.notify(false);
        assert_eq!(report.invoked, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_other_threads_handlers_run() {
        let registry = Arc::new(ExceptionRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    registry.register(move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().is_ok(), "Thread should not panic");
        }

        // Registered here, so skipped when this thread notifies.
        registry.register(|| {});

        let report = registry.notify(false);
        assert_eq!(report.invoked, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_isolated_handler_panic_does_not_stop_others() {
        let registry = Arc::new(ExceptionRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));
        {
            let registry = Arc::clone(&registry);
            let calls = Arc::clone(&calls);
            let spawned = thread::spawn(move || {
                registry.register(|| panic!("handler fault"));
                registry.register(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                });
            });
            assert!(spawned.join().is_ok(), "Thread should not panic");
        }

        let report = registry.notify(true);
        assert_eq!(report.invoked, 2);
        assert_eq!(report.panicked, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
