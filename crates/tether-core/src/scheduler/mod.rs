//! Scheduler capability contracts.
//!
//! A [`Scheduler`] decides where and how a unit of work executes. The
//! optional [`PumpScheduler`] extension lets a waiter drain the scheduler's
//! queue while blocked on a condition, which is what makes synchronous
//! nested calls safe on a single dispatcher thread: waiting doubles as
//! processing the messages that will eventually satisfy the wait.

mod inline;

pub use inline::InlineScheduler;

use std::time::Duration;

/// A unit of work: opaque, zero-argument, side-effecting, executed at most
/// once. Owned by the scheduler it is submitted to until it completes or is
/// abandoned.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where and how a unit of work executes.
pub trait Scheduler: Send + Sync {
    /// Queue a job for execution.
    ///
    /// Queue-based implementations enqueue in O(1) under lock and never
    /// block the submitter indefinitely; the inline scheduler runs the job
    /// synchronously before returning.
    fn submit(&self, job: Job);

    /// Whether the calling thread is currently executing inside this
    /// scheduler. Intended for assertions, not for control-flow correctness.
    fn is_active(&self) -> bool;

    /// Whether jobs submitted from a single thread, without interleaved
    /// pumping from other threads, are guaranteed to run in submission
    /// order.
    fn preserves_order(&self) -> bool;

    /// Short label used in diagnostics and precondition errors.
    fn name(&self) -> &str;

    /// The pump capability, when this scheduler can drain queued work while
    /// waiting on a condition.
    fn as_pump(&self) -> Option<&dyn PumpScheduler> {
        None
    }
}

/// Raised by [`PumpScheduler::run_while`] when the wait is bounded,
/// `fail_on_timeout` is set, and the bound elapses before the condition is
/// reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pump wait timed out after {timeout:?} (elapsed: {elapsed:?})")]
pub struct PumpTimeout {
    /// Configured bound
    pub timeout: Duration,

    /// Time actually spent pumping
    pub elapsed: Duration,
}

/// Scheduler extension: wait for a condition, optionally draining queued
/// work meanwhile.
pub trait PumpScheduler: Scheduler {
    /// Pump until `condition` returns false or `timeout` elapses.
    ///
    /// The condition is evaluated before the timeout check, so a condition
    /// that is already satisfied never reports a spurious timeout. `None`
    /// means no limit. Returns `Ok(true)` when the condition was reached,
    /// `Ok(false)` when the bound elapsed with `fail_on_timeout` unset, and
    /// [`PumpTimeout`] otherwise.
    fn run_while(
        &self,
        condition: &mut dyn FnMut() -> bool,
        timeout: Option<Duration>,
        fail_on_timeout: bool,
    ) -> Result<bool, PumpTimeout>;
}

/// Convenience methods available on every [`Scheduler`].
pub trait SchedulerExt: Scheduler {
    /// Box and submit a closure.
    fn submit_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(f));
    }
}

impl<T: Scheduler + ?Sized> SchedulerExt for T {}
