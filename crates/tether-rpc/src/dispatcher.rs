//! Queue-driven dispatcher with pump-while-waiting.
//!
//! The dispatcher owns a shared FIFO work queue drained by one dedicated
//! worker thread. Any other thread can transiently become a drainer through
//! [`PumpScheduler::run_while`], which is what lets a blocked caller keep
//! the queue moving while it waits (see [`crate::sync_call`]).

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::{panic_message, Job, Lifetime, PumpScheduler, PumpTimeout, Scheduler};
use tracing::{debug, error, trace};

/// Interval a pumping drainer waits on the wake signal before re-checking
/// its condition when the queue is empty.
const PUMP_IDLE_WAIT: Duration = Duration::from_millis(5);

/// Single-slot auto-reset notification.
///
/// `set` wakes one waiter; a `set` with no waiter is latched so the next
/// `wait` returns immediately. The signal is set on every enqueue and on
/// owning-lifetime termination, so a waiter can never miss a wakeup.
struct WakeSignal {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Latch the signal and wake one waiter.
    fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Block until signaled, up to `timeout` (`None` waits indefinitely).
    /// Consumes the latch; returns false when the bound elapsed unsignaled.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signaled = self.signaled.lock();
        match timeout {
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signaled {
                    if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                        if *signaled {
                            break;
                        }
                        return false;
                    }
                }
            }
            None => {
                while !*signaled {
                    self.condvar.wait(&mut signaled);
                }
            }
        }
        *signaled = false;
        true
    }
}

/// Fatal worker-loop conditions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatcherError {
    /// The empty-queue wait exceeded the configured idle bound while the
    /// lifetime was still alive: the producing side has stalled.
    #[error("dispatcher `{id}` received no work within {idle:?}")]
    Stalled {
        /// Dispatcher label
        id: String,

        /// Configured idle bound that elapsed
        idle: Duration,
    },
}

/// Scheduler backed by a mutex-guarded FIFO queue and one worker loop.
///
/// `submit` is safe from any thread, including reentrantly from inside an
/// executing job. [`QueueDispatcher::run`] is meant to be invoked exactly
/// once by one designated thread; on top of that, any number of threads may
/// drain the same queue through [`PumpScheduler::run_while`].
pub struct QueueDispatcher {
    lifetime: Lifetime,
    id: Option<String>,
    queue: Mutex<VecDeque<Job>>,
    wake: Arc<WakeSignal>,
    message_timeout: Option<Duration>,
}

impl QueueDispatcher {
    /// Create a dispatcher owned by `lifetime`.
    ///
    /// Termination wakes the worker loop, which then exits without draining
    /// the remaining queue; abandoned jobs are dropped silently.
    pub fn new(lifetime: Lifetime) -> Self {
        let wake = Arc::new(WakeSignal::new());

        let wake_on_termination = wake.clone();
        lifetime.on_termination(move || {
            trace!("terminate dispatcher");
            wake_on_termination.set();
        });

        Self {
            lifetime,
            id: None,
            queue: Mutex::new(VecDeque::new()),
            wake,
            message_timeout: None,
        }
    }

    /// Label this dispatcher in diagnostics.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Bound the worker loop's empty-queue wait. Exceeding the bound while
    /// the lifetime is still alive is a liveness fault that stops the loop.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = Some(timeout);
        self
    }

    fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("dispatcher")
    }

    /// Pop one job under the queue lock. Each dequeue is exclusive, so
    /// concurrent drainers never deliver a job twice.
    fn try_dequeue(&self) -> Option<Job> {
        self.queue.lock().pop_front()
    }

    /// Run one job, containing any panic it raises. A failing job must not
    /// stop the loop or affect other items; submission has no failure
    /// channel, so the panic is logged and discarded.
    fn run_job(&self, job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                dispatcher = self.label(),
                reason = panic_message(&*payload),
                "job panicked during dispatch"
            );
        }
    }

    /// Drain the queue on the calling thread until the owning lifetime
    /// terminates.
    ///
    /// Intended to be invoked exactly once by one designated worker thread.
    /// Returns [`DispatcherError::Stalled`] when the empty-queue wait runs
    /// past the configured idle bound while the lifetime is still alive.
    pub fn run(&self) -> Result<(), DispatcherError> {
        while self.lifetime.is_alive() {
            if let Some(job) = self.try_dequeue() {
                trace!(dispatcher = self.label(), "processing job");
                self.run_job(job);
                continue;
            }

            if !self.lifetime.is_alive() {
                debug!(dispatcher = self.label(), "lifetime terminated, exiting");
                return Ok(());
            }

            match self.message_timeout {
                Some(bound) => {
                    if !self.wake.wait(Some(bound)) {
                        error!(
                            dispatcher = self.label(),
                            idle = ?bound,
                            "no work within the idle bound while still alive"
                        );
                        return Err(DispatcherError::Stalled {
                            id: self.label().to_string(),
                            idle: bound,
                        });
                    }
                }
                None => {
                    self.wake.wait(None);
                }
            }
            trace!(dispatcher = self.label(), "awakened");
        }
        Ok(())
    }
}

impl Scheduler for QueueDispatcher {
    fn submit(&self, job: Job) {
        trace!(dispatcher = self.label(), "queuing job");
        self.queue.lock().push_back(job);
        self.wake.set();
    }

    /// Any thread may legitimately drain this queue by pumping, so thread
    /// affinity is advisory here.
    fn is_active(&self) -> bool {
        true
    }

    /// Conservative: concurrent pumpers can interleave execution relative to
    /// strict enqueue order, even though each individual dequeue is FIFO.
    fn preserves_order(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        self.label()
    }

    fn as_pump(&self) -> Option<&dyn PumpScheduler> {
        Some(self)
    }
}

impl PumpScheduler for QueueDispatcher {
    /// Wait for `condition` while draining the shared queue from whatever
    /// thread is waiting.
    ///
    /// Callable from any thread, not only the worker. The blocked caller
    /// becomes the dispatcher until its condition resolves, which is the
    /// deadlock-avoidance mechanism: progress is made even when the real
    /// worker thread is itself the blocked caller. Never parks fully: it
    /// alternates the condition check, one exclusive dequeue-and-run, and a
    /// short bounded wait on the wake signal.
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

            if let Some(job) = self.try_dequeue() {
                trace!(dispatcher = self.label(), "processing job while pumping");
                self.run_job(job);
            } else {
                self.wake.wait(Some(PUMP_IDLE_WAIT));
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tether_core::SchedulerExt;

    #[test]
    fn test_wake_signal_latches_a_set_with_no_waiter() {
        let signal = WakeSignal::new();
        signal.set();

        assert!(signal.wait(Some(Duration::from_millis(1))));
        // Auto-reset: the latch was consumed by the first wait
        assert!(!signal.wait(Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_jobs_run_in_submission_order() {
        let lifetime = Lifetime::new();
        let dispatcher = QueueDispatcher::new(lifetime.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let order = order.clone();
            dispatcher.submit_fn(move || order.lock().push(i));
        }
        let stop = lifetime.clone();
        dispatcher.submit_fn(move || stop.terminate());

        dispatcher.run().expect("clean exit on termination");
        assert_eq!(*order.lock(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_stop_the_loop() {
        let lifetime = Lifetime::new();
        let dispatcher = QueueDispatcher::new(lifetime.clone());
        let ran = Arc::new(AtomicBool::new(false));

        dispatcher.submit_fn(|| panic!("job failure"));
        let flag = ran.clone();
        dispatcher.submit_fn(move || flag.store(true, Ordering::SeqCst));
        let stop = lifetime.clone();
        dispatcher.submit_fn(move || stop.terminate());

        dispatcher.run().expect("clean exit on termination");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_idle_bound_overrun_is_a_liveness_fault() {
        let lifetime = Lifetime::new();
        let dispatcher = QueueDispatcher::new(lifetime)
            .with_id("stalled")
            .with_message_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let err = dispatcher.run().expect_err("no producer ever submits");
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(
            err,
            DispatcherError::Stalled {
                id: "stalled".to_string(),
                idle: Duration::from_millis(50),
            }
        );
    }

    #[test]
    fn test_termination_abandons_queued_jobs() {
        let lifetime = Lifetime::new();
        let dispatcher = QueueDispatcher::new(lifetime.clone());
        let executed = Arc::new(AtomicUsize::new(0));

        let stop = lifetime.clone();
        dispatcher.submit_fn(move || stop.terminate());
        for _ in 0..8 {
            let executed = executed.clone();
            dispatcher.submit_fn(move || {
                executed.fetch_add(1, Ordering::SeqCst);
            });
        }

        dispatcher.run().expect("clean exit on termination");
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_while_drains_the_queue_on_the_calling_thread() {
        let dispatcher = QueueDispatcher::new(Lifetime::new());
        let flag = Arc::new(AtomicBool::new(false));

        let set = flag.clone();
        dispatcher.submit_fn(move || set.store(true, Ordering::SeqCst));

        let satisfied = dispatcher
            .run_while(&mut || !flag.load(Ordering::SeqCst), None, false)
            .expect("unbounded wait cannot time out");
        assert!(satisfied);
    }

    #[test]
    fn test_run_while_times_out_on_an_empty_queue() {
        let dispatcher = QueueDispatcher::new(Lifetime::new());
        let timeout = Duration::from_millis(20);

        let satisfied = dispatcher
            .run_while(&mut || true, Some(timeout), false)
            .expect("fail_on_timeout is unset");
        assert!(!satisfied);

        let err = dispatcher
            .run_while(&mut || true, Some(timeout), true)
            .expect_err("the bound must elapse");
        assert_eq!(err.timeout, timeout);
    }

    #[test]
    fn test_reentrant_submission_from_inside_a_job() {
        let lifetime = Lifetime::new();
        let dispatcher = Arc::new(QueueDispatcher::new(lifetime.clone()));
        let ran = Arc::new(AtomicBool::new(false));

        let outer = dispatcher.clone();
        let flag = ran.clone();
        let stop = lifetime.clone();
        dispatcher.submit_fn(move || {
            outer.submit_fn(move || flag.store(true, Ordering::SeqCst));
            outer.submit_fn(move || stop.terminate());
        });

        dispatcher.run().expect("clean exit on termination");
        assert!(ran.load(Ordering::SeqCst));
    }
}
