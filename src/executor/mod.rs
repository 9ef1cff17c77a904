//! Bounded multi-threaded job executor with per-job retry, back-off, pause
//! and cooperative shutdown.
//!
//! Jobs are FIFO with a per-job readiness filter: a worker takes the first
//! queued job whose `next_try` time has passed. Workers sleep on a condition
//! variable while paused or idle and poll every 50 ms when only unready jobs
//! remain. Running jobs are expected to check
//! [`RunState::is_shutting_down`] and bail out promptly.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::util::unix_epoch_ms;

/// Poll interval for unready jobs and for the shutdown re-notify loop.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Shared scheduler state observed by running jobs.
#[derive(Default)]
pub struct RunState {
    running: AtomicBool,
    destructing: AtomicBool,
    num_running_jobs: AtomicI32,
    num_running_threads: AtomicI32,
}

impl RunState {
    pub fn is_shutting_down(&self) -> bool {
        self.destructing.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }

    pub fn has_running_jobs(&self) -> bool {
        self.num_running_jobs.load(Ordering::Acquire) > 0
    }

    pub fn has_running_threads(&self) -> bool {
        self.num_running_threads.load(Ordering::Acquire) > 0
    }

    pub fn is_shutdown(&self) -> bool {
        self.destructing.load(Ordering::Acquire)
            && self.num_running_jobs.load(Ordering::Acquire) == 0
            && self.num_running_threads.load(Ordering::Acquire) == 0
    }
}

/// Outcome of one run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Success,
    Failure,
    RequeueImmediate,
    RequeueDelayed,
    RequeueBackoff,
    Cancelled,
}

/// A unit of work. Ownership moves into the scheduler on enqueue and the
/// runnable is consumed by exactly one worker thread at a time.
pub trait Runnable: Send {
    fn name(&self) -> &str {
        "Undefined"
    }

    fn run(&mut self, state: &RunState) -> RunResult;
}

/// Closure adapter for ad-hoc jobs.
pub struct FnRunnable<F> {
    name: String,
    work: F,
}

impl<F> FnRunnable<F>
where
    F: FnMut(&RunState) -> RunResult + Send,
{
    pub fn new(name: impl Into<String>, work: F) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }
}

impl<F> Runnable for FnRunnable<F>
where
    F: FnMut(&RunState) -> RunResult + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, state: &RunState) -> RunResult {
        (self.work)(state)
    }
}

/// Queue entry: the boxed runnable plus its retry bookkeeping.
struct Job {
    runnable: Box<dyn Runnable>,
    tries: i32,
    max_tries: i32,
    next_try_ms: i64,
}

impl Job {
    fn new(runnable: Box<dyn Runnable>, max_tries: i32) -> Self {
        Self {
            runnable,
            tries: 0,
            max_tries: max_tries.max(1),
            next_try_ms: 0,
        }
    }

    fn can_run(&self, now_ms: i64) -> bool {
        now_ms >= self.next_try_ms
    }

    /// Retry within a second, jittered to avoid thundering herds.
    fn reschedule(&mut self) {
        let jitter = rand::thread_rng().gen_range(500..1000);
        self.next_try_ms = unix_epoch_ms() + jitter;
    }

    /// Quadratic-and-a-half back-off: 1 s, ~5.7 s, ~15.6 s, ...
    fn backoff(&mut self) {
        self.tries += 1;
        let delay_ms = ((self.tries as f64).powf(2.5) * 1000.0).round() as i64;
        self.next_try_ms = unix_epoch_ms() + delay_ms;
    }

    fn failed(&self) -> bool {
        self.tries >= self.max_tries
    }
}

/// Back-off delay in milliseconds for a given try count, exposed for tests
/// and monitoring.
pub fn backoff_delay_ms(tries: i32) -> i64 {
    ((tries.max(0) as f64).powf(2.5) * 1000.0).round() as i64
}

struct Shared {
    name: String,
    state: RunState,
    queue: Mutex<Vec<Job>>,
    condition: Condvar,
    max_queued: i32,
    num_total_requests: AtomicI32,
    num_completed_jobs: AtomicI32,
    default_max_tries: i32,
}

impl Shared {
    /// Enqueue, rejecting when shutting down or over capacity. Wakes one
    /// worker when jobs are running.
    fn queue_job(&self, job: Job) -> bool {
        if self.state.destructing.load(Ordering::Acquire) {
            warn!(executor = %self.name, "job rejected: executor is shutting down");
            return false;
        }
        {
            let Ok(mut queue) = self.queue.lock() else {
                return false;
            };
            if self.max_queued > 0 && queue.len() >= self.max_queued as usize {
                warn!(executor = %self.name, "job rejected: queue is full");
                return false;
            }
            queue.push(job);
            self.num_total_requests.fetch_add(1, Ordering::AcqRel);
        }
        if self.state.running.load(Ordering::Acquire) {
            self.condition.notify_one();
        }
        true
    }

    fn worker_loop(&self, worker_id: usize) {
        self.state.num_running_threads.fetch_add(1, Ordering::AcqRel);
        loop {
            if self.state.destructing.load(Ordering::Acquire) {
                let Ok(queue) = self.queue.lock() else {
                    break;
                };
                if queue.is_empty() {
                    break;
                }
            }

            let mut job: Option<Job> = None;
            if !self.state.running.load(Ordering::Acquire) {
                let Ok(queue) = self.queue.lock() else {
                    break;
                };
                let _unused = self.condition.wait(queue);
            } else {
                let Ok(mut queue) = self.queue.lock() else {
                    break;
                };
                if queue.is_empty() {
                    let _unused = self.condition.wait(queue);
                } else {
                    let now = unix_epoch_ms();
                    if let Some(pos) = queue.iter().position(|job| job.can_run(now)) {
                        let taken = queue.remove(pos);
                        if taken.tries > 0 {
                            debug!(worker_id, job = %taken.runnable.name(), tries = taken.tries, "picked up requeued job");
                        }
                        job = Some(taken);
                    }
                    drop(queue);
                    if job.is_none() {
                        // Only unready jobs in the queue.
                        std::thread::sleep(IDLE_POLL);
                    }
                }
            }

            if let Some(mut job) = job {
                self.state.num_running_jobs.fetch_add(1, Ordering::AcqRel);
                // A panic escaping a runnable counts as a plain failure; the
                // running-jobs counter must come back down either way.
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    job.runnable.run(&self.state)
                }))
                .unwrap_or_else(|_| {
                    warn!(job = %job.runnable.name(), "job panicked");
                    RunResult::Failure
                });
                self.state.num_running_jobs.fetch_sub(1, Ordering::AcqRel);
                self.dispatch(job, result);
            }
        }
        self.state.num_running_threads.fetch_sub(1, Ordering::AcqRel);
    }

    fn dispatch(&self, mut job: Job, result: RunResult) {
        match result {
            RunResult::Success => {
                self.num_completed_jobs.fetch_add(1, Ordering::AcqRel);
            }
            RunResult::Failure | RunResult::Cancelled => {}
            RunResult::RequeueImmediate => {
                self.queue_job(job);
            }
            RunResult::RequeueDelayed => {
                job.reschedule();
                self.queue_job(job);
            }
            RunResult::RequeueBackoff => {
                job.backoff();
                if job.failed() {
                    warn!(job = %job.runnable.name(), tries = job.tries, "job failed after max tries");
                } else {
                    self.queue_job(job);
                }
            }
        }
    }
}

/// Fixed-size thread pool draining a bounded job queue.
pub struct ExecutorService {
    shared: Arc<Shared>,
    pool_threads: Vec<JoinHandle<()>>,
}

impl ExecutorService {
    pub const DEFAULT_MAX_QUEUED: i32 = 2000;
    pub const DEFAULT_MAX_TRIES: i32 = 10;

    /// Spawn `num_threads` workers, all initially paused.
    pub fn new(name: impl Into<String>, num_threads: usize, max_queued: i32) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            state: RunState::default(),
            queue: Mutex::new(Vec::new()),
            condition: Condvar::new(),
            max_queued,
            num_total_requests: AtomicI32::new(0),
            num_completed_jobs: AtomicI32::new(0),
            default_max_tries: Self::DEFAULT_MAX_TRIES,
        });
        let pool_threads = (0..num_threads.max(1))
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("{}-{worker_id}", shared.name))
                    .spawn(move || shared.worker_loop(worker_id))
                    .expect("failed to spawn executor worker")
            })
            .collect();
        Self {
            shared,
            pool_threads,
        }
    }

    /// Pool sized to the machine's logical CPUs.
    pub fn with_default_threads(name: impl Into<String>) -> Self {
        Self::new(name, num_cpus::get(), Self::DEFAULT_MAX_QUEUED)
    }

    pub fn run_state(&self) -> &RunState {
        &self.shared.state
    }

    pub fn num_jobs(&self) -> i32 {
        self.shared
            .queue
            .lock()
            .map(|queue| queue.len() as i32)
            .unwrap_or(0)
    }

    pub fn num_total_jobs(&self) -> i32 {
        self.shared.num_total_requests.load(Ordering::Acquire)
    }

    pub fn num_completed_jobs(&self) -> i32 {
        self.shared.num_completed_jobs.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.is_shutting_down()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.is_shutdown()
    }

    /// Let workers pick up jobs.
    pub fn start_jobs(&self) {
        debug!(executor = %self.shared.name, "start jobs");
        self.shared.state.running.store(true, Ordering::Release);
        self.shared.condition.notify_all();
    }

    /// Stop handing out new jobs. Running jobs keep running.
    pub fn pause_jobs(&self) {
        debug!(executor = %self.shared.name, "pause jobs");
        self.shared.state.running.store(false, Ordering::Release);
    }

    /// Drop all pending jobs and pause. In-flight jobs are not interrupted.
    pub fn clear_jobs(&self) {
        debug!(executor = %self.shared.name, "clear jobs");
        if let Ok(mut queue) = self.shared.queue.lock() {
            self.shared.state.running.store(false, Ordering::Release);
            queue.clear();
        }
    }

    /// Enqueue a boxed runnable. Rejected (returning `false`) while shutting
    /// down or when the queue is at capacity.
    pub fn queue_job(&self, runnable: Box<dyn Runnable>) -> bool {
        self.shared
            .queue_job(Job::new(runnable, self.shared.default_max_tries))
    }

    /// Enqueue a boxed runnable with an explicit retry budget.
    pub fn queue_job_with_max_tries(&self, runnable: Box<dyn Runnable>, max_tries: i32) -> bool {
        self.shared.queue_job(Job::new(runnable, max_tries))
    }

    /// Enqueue a closure.
    pub fn queue_fn(
        &self,
        name: impl Into<String>,
        work: impl FnMut(&RunState) -> RunResult + Send + 'static,
    ) -> bool {
        self.queue_job(Box::new(FnRunnable::new(name, work)))
    }

    /// Idempotent: mark destructing, drop pending jobs if paused, then keep
    /// notifying workers until every thread has exited, and join them.
    pub fn shutdown(&mut self) {
        if self.shared.state.destructing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(executor = %self.shared.name, "shutdown is imminent");
        if let Ok(mut queue) = self.shared.queue.lock() {
            if !self.shared.state.running.load(Ordering::Acquire) {
                // Paused workers would never drain the queue.
                queue.clear();
            }
        }
        while !self.shared.state.is_shutdown() {
            std::thread::sleep(IDLE_POLL);
            self.shared.condition.notify_all();
            if self.pool_threads.iter().all(|t| t.is_finished())
                && !self.shared.state.has_running_jobs()
            {
                break;
            }
        }
        for thread in self.pool_threads.drain(..) {
            let _unused = thread.join();
        }
        debug!(executor = %self.shared.name, "shutdown complete");
    }
}

impl Drop for ExecutorService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_idle_start_pause() {
        let mut executor = ExecutorService::new("idle", 4, 100);
        executor.start_jobs();
        executor.pause_jobs();
        executor.shutdown();
        assert!(executor.is_shutdown());
    }

    #[test]
    fn test_jobs_complete_and_counters_match() {
        let completed = Arc::new(AtomicUsize::new(0));
        let mut executor = ExecutorService::new("count", 4, 100);
        for i in 0..20 {
            let completed = Arc::clone(&completed);
            assert!(executor.queue_fn(format!("job-{i}"), move |_| {
                completed.fetch_add(1, Ordering::AcqRel);
                RunResult::Success
            }));
        }
        executor.start_jobs();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while executor.num_completed_jobs() < 20 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executor.num_completed_jobs(), 20);
        assert_eq!(executor.num_total_jobs(), 20);
        assert_eq!(completed.load(Ordering::Acquire), 20);
        executor.shutdown();
    }

    #[test]
    fn test_queue_rejects_over_capacity() {
        let executor = ExecutorService::new("full", 1, 2);
        assert!(executor.queue_fn("a", |_| RunResult::Success));
        assert!(executor.queue_fn("b", |_| RunResult::Success));
        assert!(!executor.queue_fn("c", |_| RunResult::Success));
        assert_eq!(executor.num_jobs(), 2);
    }

    #[test]
    fn test_queue_rejects_after_shutdown() {
        let mut executor = ExecutorService::new("closed", 1, 10);
        executor.shutdown();
        assert!(!executor.queue_fn("late", |_| RunResult::Success));
    }

    #[test]
    fn test_requeue_immediate_runs_again() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut executor = ExecutorService::new("requeue", 2, 10);
        let counter = Arc::clone(&runs);
        executor.queue_fn("bouncy", move |_| {
            if counter.fetch_add(1, Ordering::AcqRel) < 2 {
                RunResult::RequeueImmediate
            } else {
                RunResult::Success
            }
        });
        executor.start_jobs();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while executor.num_completed_jobs() < 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runs.load(Ordering::Acquire), 3);
        assert_eq!(executor.num_completed_jobs(), 1);
        executor.shutdown();
    }

    #[test]
    fn test_backoff_schedule_is_monotonic() {
        // round(n^2.5 * 1000): 1000, 5657, 15588, 32000 ms.
        assert_eq!(backoff_delay_ms(1), 1000);
        assert_eq!(backoff_delay_ms(2), 5657);
        assert_eq!(backoff_delay_ms(3), 15588);
        let mut last = 0;
        for tries in 1..10 {
            let delay = backoff_delay_ms(tries);
            assert!(delay > last);
            last = delay;
        }
    }

    #[test]
    fn test_backoff_drops_job_after_max_tries() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut job = Job::new(
            Box::new(FnRunnable::new("hopeless", {
                let runs = Arc::clone(&runs);
                move |_: &RunState| {
                    runs.fetch_add(1, Ordering::AcqRel);
                    RunResult::RequeueBackoff
                }
            })),
            2,
        );
        assert!(!job.failed());
        job.backoff();
        assert!(!job.failed());
        job.backoff();
        assert!(job.failed());
    }
}
