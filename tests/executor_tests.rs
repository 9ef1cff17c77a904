//! Executor service stress and shutdown behavior.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use phasor::executor::{ExecutorService, RunResult};

#[test]
fn test_executor_service_idling() {
    let mut executor = ExecutorService::new("executor service tester", 16, 2000);
    executor.start_jobs();
    executor.pause_jobs();
    executor.shutdown();
    assert!(executor.is_shutdown());
}

#[test]
fn test_executor_service_stress() {
    let completed = Arc::new(AtomicI32::new(0));
    let aborted = Arc::new(AtomicI32::new(0));
    let num_jobs = 1000;
    let inner_loops = 100_000u64;
    {
        let mut executor = ExecutorService::new("executor service tester", 16, num_jobs);
        for i in 0..num_jobs {
            let completed = Arc::clone(&completed);
            let aborted = Arc::clone(&aborted);
            let queued = executor.queue_fn(format!("Worker {i}"), move |state| {
                let mut acc = 0u64;
                for j in 0..inner_loops {
                    acc = acc.wrapping_add(std::hint::black_box(j));
                    if state.is_shutting_down() {
                        aborted.fetch_add(1, Ordering::AcqRel);
                        return RunResult::Failure;
                    }
                }
                std::hint::black_box(acc);
                completed.fetch_add(1, Ordering::AcqRel);
                RunResult::Success
            });
            assert!(queued, "job {i} rejected");
        }

        executor.start_jobs();
        executor.pause_jobs();
        std::thread::sleep(Duration::from_millis(10));
        executor.start_jobs();
        std::thread::sleep(Duration::from_millis(5));
        executor.shutdown();
    }
    let total = completed.load(Ordering::Acquire) + aborted.load(Ordering::Acquire);
    assert_eq!(total, num_jobs);
}

#[test]
fn test_executor_service_graceful_shutdown() {
    let completed = Arc::new(AtomicI32::new(0));
    let aborted = Arc::new(AtomicI32::new(0));
    let num_jobs = 5000;
    let inner_loops = 10_000u64;
    {
        let mut executor = ExecutorService::new("executor service tester", 16, num_jobs);
        for i in 0..num_jobs {
            let completed = Arc::clone(&completed);
            let aborted = Arc::clone(&aborted);
            executor.queue_fn(format!("Worker {i}"), move |state| {
                let mut acc = 0u64;
                for j in 0..inner_loops {
                    acc = acc.wrapping_add(std::hint::black_box(j));
                    if state.is_shutting_down() {
                        aborted.fetch_add(1, Ordering::AcqRel);
                        return RunResult::Failure;
                    }
                }
                std::hint::black_box(acc);
                completed.fetch_add(1, Ordering::AcqRel);
                RunResult::Success
            });
        }

        executor.start_jobs();
        std::thread::sleep(Duration::from_millis(150));
        // Dropping the executor shuts it down; queued jobs still run but see
        // the shutdown flag and abort.
    }
    let total = completed.load(Ordering::Acquire) + aborted.load(Ordering::Acquire);
    assert_eq!(total, num_jobs);
}

#[test]
fn test_pause_does_not_cancel_queued_jobs() {
    let completed = Arc::new(AtomicI32::new(0));
    let mut executor = ExecutorService::new("pause", 4, 100);
    for i in 0..10 {
        let completed = Arc::clone(&completed);
        executor.queue_fn(format!("job {i}"), move |_| {
            completed.fetch_add(1, Ordering::AcqRel);
            RunResult::Success
        });
    }
    // Never started: jobs stay queued.
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(executor.num_jobs(), 10);
    assert_eq!(executor.num_completed_jobs(), 0);

    executor.start_jobs();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while executor.num_completed_jobs() < 10 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(executor.num_completed_jobs(), 10);
    assert_eq!(executor.num_total_jobs(), 10);
    executor.shutdown();
}

#[test]
fn test_clear_jobs_drops_pending() {
    let mut executor = ExecutorService::new("clear", 2, 100);
    for i in 0..5 {
        executor.queue_fn(format!("job {i}"), |_| RunResult::Success);
    }
    assert_eq!(executor.num_jobs(), 5);
    executor.clear_jobs();
    assert_eq!(executor.num_jobs(), 0);
    executor.shutdown();
    assert_eq!(executor.num_completed_jobs(), 0);
}

#[test]
fn test_shutdown_is_idempotent() {
    let mut executor = ExecutorService::new("twice", 2, 10);
    executor.start_jobs();
    executor.shutdown();
    executor.shutdown();
    assert!(executor.is_shutdown());
    assert!(!executor.queue_fn("late", |_| RunResult::Success));
}

#[test]
fn test_panicking_job_counts_as_failure_and_pool_survives() {
    let mut executor = ExecutorService::new("panicky", 2, 10);
    executor.queue_fn("boom", |_| panic!("job blew up"));
    let completed = Arc::new(AtomicI32::new(0));
    let counter = Arc::clone(&completed);
    executor.queue_fn("fine", move |_| {
        counter.fetch_add(1, Ordering::AcqRel);
        RunResult::Success
    });
    executor.start_jobs();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while executor.num_completed_jobs() < 1 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    // The panicking job is dropped as a failure, the pool keeps working.
    assert_eq!(executor.num_completed_jobs(), 1);
    executor.shutdown();
    assert!(executor.is_shutdown());
}

#[test]
fn test_delayed_requeue_eventually_completes() {
    let attempts = Arc::new(AtomicI32::new(0));
    let mut executor = ExecutorService::new("delayed", 2, 10);
    let counter = Arc::clone(&attempts);
    executor.queue_fn("retry later", move |_| {
        if counter.fetch_add(1, Ordering::AcqRel) == 0 {
            RunResult::RequeueDelayed
        } else {
            RunResult::Success
        }
    });
    executor.start_jobs();
    // Delayed requeue lands 500..1000 ms out.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while executor.num_completed_jobs() < 1 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(executor.num_completed_jobs(), 1);
    assert_eq!(attempts.load(Ordering::Acquire), 2);
    executor.shutdown();
}
