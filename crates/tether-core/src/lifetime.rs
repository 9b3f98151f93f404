//! Termination scopes for schedulers and pending calls.
//!
//! A [`Lifetime`] is a cloneable handle to an "alive until terminated" scope.
//! Terminating it flips the liveness flag exactly once and drains every
//! registered termination callback, which is how a dispatcher's blocked
//! worker learns that it should stop waiting for work.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback invoked when a lifetime terminates.
type TerminationCallback = Box<dyn FnOnce() + Send>;

/// Shared state behind a lifetime handle.
struct LifetimeState {
    /// Cleared exactly once by the first `terminate` call
    alive: AtomicBool,

    /// Callbacks drained on termination, most recently registered first
    callbacks: Mutex<Vec<TerminationCallback>>,
}

/// Cloneable handle to an "alive until terminated" scope.
///
/// Worker loops poll liveness through this handle, and wake signals register
/// termination callbacks on it so a blocked waiter never misses the shutdown
/// edge.
#[derive(Clone)]
pub struct Lifetime {
    state: Arc<LifetimeState>,
}

/// The one lifetime that outlives everything registered on it.
static ETERNAL: Lazy<Lifetime> = Lazy::new(Lifetime::new);

impl Lifetime {
    /// Create a new, alive lifetime.
    pub fn new() -> Self {
        Self {
            state: Arc::new(LifetimeState {
                alive: AtomicBool::new(true),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The process-wide lifetime that never terminates.
    ///
    /// Callbacks registered against it are retained for the rest of the
    /// process.
    pub fn eternal() -> Self {
        ETERNAL.clone()
    }

    /// Whether this lifetime has not been terminated yet.
    pub fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::Acquire)
    }

    /// Register a callback to run on termination.
    ///
    /// When the lifetime is already terminated, `f` runs immediately on the
    /// calling thread.
    pub fn on_termination<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.state.callbacks.lock();
            if self.is_alive() {
                callbacks.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Terminate the scope and drain its callbacks, most recently registered
    /// first. Only the first call has any effect.
    pub fn terminate(&self) {
        if self
            .state
            .alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let callbacks = std::mem::take(&mut *self.state.callbacks.lock());
        for callback in callbacks.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                tracing::error!(
                    reason = crate::panic_message(&*payload),
                    "termination callback panicked"
                );
            }
        }
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}
