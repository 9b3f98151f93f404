//! Scheduler that executes submitted work immediately on the calling thread.

use super::{Job, PumpScheduler, PumpTimeout, Scheduler};
use std::cell::Cell;
use std::time::{Duration, Instant};

thread_local! {
    /// Per-thread count of inline execution frames currently on the stack
    static ACTIVE_FRAMES: Cell<usize> = const { Cell::new(0) };
}

/// Decrements the frame counter on every exit path, panics included.
struct FrameGuard;

impl FrameGuard {
    fn enter() -> Self {
        ACTIVE_FRAMES.with(|frames| frames.set(frames.get() + 1));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        ACTIVE_FRAMES.with(|frames| frames.set(frames.get() - 1));
    }
}

/// Scheduler that runs each job synchronously at the submission site.
///
/// Stateless apart from a thread-local reentrancy counter, so one long-lived
/// instance serves the whole process; all instances are equivalent. Nested
/// submissions are allowed and simply deepen the counter.
#[derive(Debug, Default)]
pub struct InlineScheduler;

impl InlineScheduler {
    /// Create the scheduler.
    pub fn new() -> Self {
        InlineScheduler
    }
}

impl Scheduler for InlineScheduler {
    /// Run `job` to completion before returning. A panic inside the job
    /// propagates to the submitter; the reentrancy counter is restored
    /// either way.
    fn submit(&self, job: Job) {
        let _frame = FrameGuard::enter();
        job();
    }

    fn is_active(&self) -> bool {
        ACTIVE_FRAMES.with(|frames| frames.get() > 0)
    }

    /// Execution is immediate and call-stack-ordered; there is no queue to
    /// preserve order in.
    fn preserves_order(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "inline"
    }

    fn as_pump(&self) -> Option<&dyn PumpScheduler> {
        Some(self)
    }
}

impl PumpScheduler for InlineScheduler {
    /// Submission already ran every job, so nothing is ever queued here and
    /// the wait degenerates to polling the condition. Only useful when
    /// another thread will flip the condition.
    fn run_while(
        &self,
        condition: &mut dyn FnMut() -> bool,
        timeout: Option<Duration>,
        fail_on_timeout: bool,
    ) -> Result<bool, PumpTimeout> {
        let started = Instant::now();
        while condition() {
            if let Some(timeout) = timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    if fail_on_timeout {
                        return Err(PumpTimeout { timeout, elapsed });
                    }
                    return Ok(false);
                }
            }
            std::thread::yield_now();
        }
        Ok(true)
    }
}
