//! Invocation of user callbacks on the loop thread.

use std::panic::{AssertUnwindSafe, catch_unwind};

/// Boxed callback stored by the registries.
pub type Callback = Box<dyn Fn() + Send + Sync + 'static>;

/// Outcome of invoking a batch of callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvokeReport {
    /// Callbacks invoked.
    pub invoked: usize,
    /// Callbacks that panicked (only counted when isolated).
    pub panicked: usize,
}

impl InvokeReport {
    pub(crate) fn record(&mut self, completed: bool) {
        self.invoked = self.invoked.saturating_add(1);
        if !completed {
            self.panicked = self.panicked.saturating_add(1);
        }
    }
}

/// Run `callback`, returning `false` if it panicked under isolation.
///
/// Without isolation a panic unwinds through the caller.
pub(crate) fn invoke(
    callback: &(dyn Fn() + Send + Sync),
    isolate: bool,
    kind: &'static str,
) -> bool {
    if !isolate {
        callback();
        return true;
    }

    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(kind, panic = %message, "Callback panicked; continuing");
            false
        }
    }
}
