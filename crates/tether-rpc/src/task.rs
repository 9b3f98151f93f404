//! Pending result of a remote call.
//!
//! A [`PendingCall`] is the lazily-resolved outcome of a call in flight: it
//! starts pending and transitions exactly once into one of the terminal
//! [`CallOutcome`] states. The synchronous-call bridge pumps the owning
//! scheduler until [`PendingCall::has_value`], then takes the outcome;
//! asynchronous consumers register one-shot callbacks instead and observe
//! the very same tagged outcome.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_core::Lifetime;
use tracing::debug;

/// Failure reported by the remote side of a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CallFault {
    /// Human-readable failure description carried back to the caller
    pub message: String,
}

impl CallFault {
    /// Create a fault from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal state of a resolved call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    /// The remote side produced a value
    Success(T),

    /// The call was cancelled before producing a value
    Canceled,

    /// The remote side failed
    Faulted(CallFault),
}

/// One-shot subscriber gated on a lifetime.
type Subscriber<T> = (Lifetime, Box<dyn FnOnce(&CallOutcome<T>) + Send>);

/// Mutable interior of a pending call.
struct PendingCallState<T> {
    /// Terminal outcome; `None` while pending and again after `take`
    outcome: Option<CallOutcome<T>>,

    /// One-shot callbacks drained at resolution
    subscribers: Vec<Subscriber<T>>,
}

/// Lazily-resolved outcome of a call in flight.
///
/// `Pending -> {Success, Canceled, Faulted}`, transitioning exactly once;
/// later resolutions are ignored. Subscribers run on the resolving thread
/// while the cell is locked and must not call back into it.
pub struct PendingCall<T> {
    state: Mutex<PendingCallState<T>>,

    /// Set once a terminal outcome is observable; cheap to poll from a pump
    /// condition without taking the lock
    resolved: AtomicBool,
}

impl<T> PendingCall<T> {
    /// Create an unresolved call result.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PendingCallState {
                outcome: None,
                subscribers: Vec::new(),
            }),
            resolved: AtomicBool::new(false),
        }
    }

    /// Bridge an external "register a one-shot callback" source into the
    /// pending-result state machine.
    ///
    /// `subscribe` receives the lifetime to register against and the
    /// callback to fire with the tagged outcome. The subscription is
    /// registered against [`Lifetime::eternal`], so a call that never
    /// resolves leaves its subscription alive indefinitely.
    pub fn adapt<F>(subscribe: F) -> Arc<Self>
    where
        F: FnOnce(Lifetime, Box<dyn FnOnce(CallOutcome<T>) + Send>),
        T: Send + 'static,
    {
        let pending = Arc::new(Self::new());
        let resolver = pending.clone();
        subscribe(
            Lifetime::eternal(),
            Box::new(move |outcome| {
                resolver.resolve(outcome);
            }),
        );
        pending
    }

    /// Whether a terminal outcome has been recorded.
    pub fn has_value(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Resolve with a success value.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(CallOutcome::Success(value))
    }

    /// Resolve as cancelled.
    pub fn cancel(&self) -> bool {
        self.resolve(CallOutcome::Canceled)
    }

    /// Resolve as faulted.
    pub fn fault(&self, fault: CallFault) -> bool {
        self.resolve(CallOutcome::Faulted(fault))
    }

    /// Record the terminal outcome and fire the registered subscribers.
    ///
    /// Only the first resolution wins; later ones are ignored and reported
    /// at debug level. Subscribers whose gating lifetime has died are
    /// dropped without firing.
    pub fn resolve(&self, outcome: CallOutcome<T>) -> bool {
        let mut state = self.state.lock();
        if self.resolved.load(Ordering::Relaxed) {
            debug!("ignoring a second resolution of an already-resolved call");
            return false;
        }

        state.outcome = Some(outcome);
        self.resolved.store(true, Ordering::Release);

        let subscribers = std::mem::take(&mut state.subscribers);
        if !subscribers.is_empty() {
            let outcome = state
                .outcome
                .as_ref()
                .expect("outcome was stored just above");
            for (lifetime, subscriber) in subscribers {
                if lifetime.is_alive() {
                    subscriber(outcome);
                }
            }
        }
        true
    }

    /// Register a one-shot callback for the terminal outcome.
    ///
    /// Fires immediately when the call is already resolved. At delivery
    /// time the callback is dropped when `lifetime` is dead, and also when
    /// the outcome was already taken by a blocking waiter.
    pub fn on_resolved<F>(&self, lifetime: &Lifetime, f: F)
    where
        F: FnOnce(&CallOutcome<T>) + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(outcome) = state.outcome.as_ref() {
            if lifetime.is_alive() {
                f(outcome);
            }
            return;
        }
        if self.has_value() {
            // Resolved, but a blocking waiter already consumed the outcome
            debug!("dropping a subscriber registered after the outcome was taken");
            return;
        }
        state.subscribers.push((lifetime.clone(), Box::new(f)));
    }

    /// Extract the terminal outcome. Returns `None` while the call is still
    /// pending, and again after the outcome has been taken once.
    pub fn take(&self) -> Option<CallOutcome<T>> {
        self.state.lock().outcome.take()
    }
}

impl<T> Default for PendingCall<T> {
    fn default() -> Self {
        Self::new()
    }
}
