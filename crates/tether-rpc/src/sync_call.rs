//! Synchronous nested calls over an asynchronous dispatcher.
//!
//! [`sync_call`] blocks the calling thread on a pending call while pumping
//! the protocol scheduler's queue, so the messages that will eventually
//! resolve the call keep flowing even though their only executor is the
//! blocked thread itself.

use crate::task::{CallFault, CallOutcome, PendingCall};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::{Lifetime, PumpTimeout, Scheduler};
use tracing::{error, warn};

/// Escalating diagnostic thresholds around a blocking wait.
///
/// Purely observability: a slow call is reported at the matching severity,
/// never aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTimeouts {
    /// Elapsed wait above this logs a warning
    pub warn: Duration,

    /// Elapsed wait above this logs an error
    pub error: Duration,
}

/// Process-level default installed by [`RpcTimeouts::set_process_default`].
static PROCESS_DEFAULT: OnceCell<RpcTimeouts> = OnceCell::new();

impl RpcTimeouts {
    /// Built-in thresholds: warn after 200 ms, error after 3 s.
    pub const DEFAULT: RpcTimeouts = RpcTimeouts {
        warn: Duration::from_millis(200),
        error: Duration::from_secs(3),
    };

    /// Create a threshold pair. `warn` must not exceed `error`.
    pub fn new(warn: Duration, error: Duration) -> Self {
        debug_assert!(warn <= error, "warn threshold must not exceed error threshold");
        Self { warn, error }
    }

    /// Install the process-level default thresholds. The first caller wins;
    /// returns false when a default was already installed.
    pub fn set_process_default(timeouts: RpcTimeouts) -> bool {
        PROCESS_DEFAULT.set(timeouts).is_ok()
    }

    /// Resolve the thresholds for one call: the per-call override, else the
    /// process default, else [`RpcTimeouts::DEFAULT`].
    pub fn resolve(per_call: Option<RpcTimeouts>) -> RpcTimeouts {
        per_call
            .or_else(|| PROCESS_DEFAULT.get().copied())
            .unwrap_or(Self::DEFAULT)
    }
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A call object the surrounding framework may have bound to a live
/// protocol.
///
/// Binding and transmission stay outside this crate; the bridge only needs
/// the operations below.
pub trait RpcCall {
    /// Request payload
    type Req;

    /// Response payload
    type Res;

    /// Whether this call is bound to a live protocol.
    fn is_bound(&self) -> bool;

    /// The scheduler that owns the bound protocol's message processing.
    fn scheduler(&self) -> Arc<dyn Scheduler>;

    /// Transmit the request, returning the pending result. `lifetime`
    /// scopes the remote call itself and may cancel it independently of any
    /// local wait.
    fn start(&self, lifetime: &Lifetime, request: Self::Req) -> Arc<PendingCall<Self::Res>>;

    /// Diagnostic label, e.g. the call's location in the protocol model.
    fn location(&self) -> &str;
}

/// Failures surfaced to a synchronous caller.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The call is not bound to a live protocol, a programming error at
    /// the call site; the request was never dispatched.
    #[error("call `{0}` is not bound to a live protocol")]
    NotBound(String),

    /// The call was issued from a thread the protocol scheduler does not
    /// consider its own; the request was never dispatched.
    #[error("sync call on `{call}` must run on the `{scheduler}` scheduler thread")]
    WrongThread {
        /// Call label
        call: String,

        /// Scheduler label
        scheduler: String,
    },

    /// The protocol's scheduler cannot pump nested calls.
    #[error("scheduler `{scheduler}` cannot pump nested calls for `{call}`")]
    NotPumpable {
        /// Call label
        call: String,

        /// Scheduler label
        scheduler: String,
    },

    /// A bounded pump wait elapsed.
    #[error(transparent)]
    PumpTimeout(#[from] PumpTimeout),

    /// The call was cancelled before producing a value.
    #[error("call `{0}` was canceled")]
    Canceled(String),

    /// The remote side failed; the original fault is the source.
    #[error("call `{location}` faulted")]
    Faulted {
        /// Call label
        location: String,

        /// Failure reported by the remote side
        #[source]
        fault: CallFault,
    },
}

/// Issue `request` on `call` and block until it resolves, pumping the
/// protocol scheduler's queue the whole time.
///
/// Nested calls pump the protocol's shared queue, which is only safe from a
/// thread the scheduler considers its own: pumping from an arbitrary
/// background thread risks executing work intended for, or interleaved
/// with, the real owner. The wait itself is unbounded: the resolved
/// [`RpcTimeouts`] only pick the severity of the post-hoc duration
/// diagnostic. The terminal outcome is unwrapped exactly as an
/// asynchronous consumer of the same call would observe it.
pub fn sync_call<C: RpcCall>(
    call: &C,
    lifetime: &Lifetime,
    request: C::Req,
    timeouts: Option<RpcTimeouts>,
) -> Result<C::Res, RpcError> {
    if !call.is_bound() {
        return Err(RpcError::NotBound(call.location().to_string()));
    }

    let scheduler = call.scheduler();
    if !scheduler.is_active() {
        return Err(RpcError::WrongThread {
            call: call.location().to_string(),
            scheduler: scheduler.name().to_string(),
        });
    }
    let Some(pump) = scheduler.as_pump() else {
        return Err(RpcError::NotPumpable {
            call: call.location().to_string(),
            scheduler: scheduler.name().to_string(),
        });
    };

    let pending = call.start(lifetime, request);
    let started = Instant::now();

    // Unbounded: draining is enabled, the wait is never force-aborted
    pump.run_while(&mut || !pending.has_value(), None, false)?;

    let elapsed = started.elapsed();
    let thresholds = RpcTimeouts::resolve(timeouts);
    if elapsed > thresholds.error {
        error!(call = call.location(), ?elapsed, "sync call ran past the error threshold");
    } else if elapsed > thresholds.warn {
        warn!(call = call.location(), ?elapsed, "sync call ran past the warn threshold");
    }

    let outcome = pending
        .take()
        .expect("pending call resolved without an outcome");
    match outcome {
        CallOutcome::Success(value) => Ok(value),
        CallOutcome::Canceled => Err(RpcError::Canceled(call.location().to_string())),
        CallOutcome::Faulted(fault) => Err(RpcError::Faulted {
            location: call.location().to_string(),
            fault,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_resolution_precedence() {
        let per_call = RpcTimeouts::new(Duration::from_millis(1), Duration::from_millis(2));
        assert_eq!(RpcTimeouts::resolve(Some(per_call)), per_call);

        let process = RpcTimeouts::new(Duration::from_millis(5), Duration::from_millis(9));
        assert!(RpcTimeouts::set_process_default(process));
        assert_eq!(RpcTimeouts::resolve(None), process);
        assert_eq!(RpcTimeouts::resolve(Some(per_call)), per_call);

        // First caller wins
        assert!(!RpcTimeouts::set_process_default(RpcTimeouts::DEFAULT));
        assert_eq!(RpcTimeouts::resolve(None), process);
    }
}
