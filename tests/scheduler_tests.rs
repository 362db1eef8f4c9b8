//! Scheduler integration tests
//!
//! Routing, stealing, back-pressure and shutdown, observed through the public
//! API only.

mod common;

use common::{block_on, scheduler, scheduler_with_capacity, Gate, WAIT};
use rand::seq::SliceRandom;
use rand::Rng;
use rust_taskflow::prelude::*;
use rust_taskflow::scheduler::BoundedQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_bounded_queue_holds_exactly_capacity() {
    let queue = BoundedQueue::new(8);
    for i in 0..8 {
        assert!(queue.push(i).is_ok());
    }
    assert_eq!(queue.push(8), Err(8));
    assert!(queue.is_full());
    assert_eq!(queue.len(), 8);

    for i in 0..8 {
        assert_eq!(queue.pop(), Some(i));
    }
    assert!(queue.is_empty());
}

#[test]
fn test_affinity_places_task_on_worker() {
    let scheduler = scheduler(4);
    for worker in 0..4 {
        let channel = scheduler
            .post(Task::new(current_worker).with_affinity(worker).pinned())
            .unwrap();
        assert_eq!(channel.get_timeout(WAIT).unwrap(), Some(worker));
    }
}

#[test]
fn test_caller_is_not_a_worker() {
    assert_eq!(current_worker(), None);
}

#[test]
fn test_idle_worker_steals_stealable_tasks() {
    let scheduler = scheduler(2);
    let (gate, _) = Gate::block(&scheduler, 0);

    let stolen: Vec<_> = (0..3)
        .map(|_| scheduler.post(Task::new(current_worker).with_affinity(0)).unwrap())
        .collect();

    // Each wake-up of worker 1 ends with one steal attempt, starting at worker 0.
    for _ in 0..3 {
        scheduler.post(Task::new(|| ()).with_affinity(1)).unwrap();
    }

    for channel in &stolen {
        assert_eq!(channel.get_timeout(WAIT).unwrap(), Some(1));
    }
    assert!(scheduler.stats().tasks_stolen >= 3);
    gate.open();
}

#[test]
fn test_pinned_tasks_stay_put() {
    let scheduler = scheduler(2);
    let (gate, _) = Gate::block(&scheduler, 0);

    let pinned = scheduler
        .post(Task::new(current_worker).with_affinity(0).pinned())
        .unwrap();
    for _ in 0..3 {
        scheduler.post(Task::new(|| ()).with_affinity(1)).unwrap();
    }

    thread::sleep(Duration::from_millis(50));
    assert_eq!(pinned.poll(), None);

    gate.open();
    assert_eq!(pinned.get_timeout(WAIT).unwrap(), Some(0));
}

#[test]
fn test_full_queue_is_rejected() {
    let scheduler = scheduler_with_capacity(1, 2);
    let (gate, _) = Gate::block(&scheduler, 0);

    let first = scheduler.post(Task::new(|| 1)).unwrap();
    let second = scheduler.post(Task::new(|| 2)).unwrap();
    let err = scheduler.post(Task::new(|| 3)).unwrap_err();
    assert_eq!(err, Error::ResourceExhausted { worker: 0, capacity: 2 });
    assert!(scheduler.workers()[0].queue().is_full());
    assert_eq!(scheduler.stats().tasks_rejected, 1);

    gate.open();
    assert_eq!(first.get_timeout(WAIT).unwrap(), 1);
    assert_eq!(second.get_timeout(WAIT).unwrap(), 2);
}

#[test]
fn test_top_priority_thread_prefers_shortest_queue() {
    let scheduler = scheduler(3);
    let (gate0, _) = Gate::block(&scheduler, 0);
    let (gate1, _) = Gate::block(&scheduler, 1);

    for _ in 0..2 {
        scheduler.post(Task::new(|| ()).with_affinity(0).pinned()).unwrap();
    }
    scheduler.post(Task::new(|| ()).with_affinity(1).pinned()).unwrap();
    assert_eq!(scheduler.top_priority_thread(), 2);

    gate0.open();
    gate1.open();
}

#[test]
fn test_panicking_task_abandons_channel() {
    let scheduler = scheduler(1);
    let channel = scheduler.post(Task::new(|| -> i32 { panic!("task failure") })).unwrap();
    assert_eq!(channel.get_timeout(WAIT).unwrap_err(), Error::Abandoned);

    // The worker survives the panic.
    let after = scheduler.post(Task::new(|| 7)).unwrap();
    assert_eq!(after.get_timeout(WAIT).unwrap(), 7);
    assert_eq!(scheduler.workers()[0].stats().panics.load(Ordering::Relaxed), 1);
}

#[test]
fn test_shutdown_abandons_queued_tasks() {
    let scheduler = scheduler(1);
    let (gate, running) = Gate::block(&scheduler, 0);
    let queued: Vec<_> = (0..3).map(|i| scheduler.post(Task::new(move || i)).unwrap()).collect();

    let stopper = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || scheduler.shutdown())
    };
    while !scheduler.is_shutting_down() {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(20));
    gate.open();
    stopper.join().unwrap().unwrap();

    // The running task completes; the queued ones never start.
    running.get_timeout(WAIT).unwrap();
    for channel in &queued {
        assert_eq!(channel.get_timeout(WAIT).unwrap_err(), Error::Abandoned);
    }
    assert_eq!(scheduler.post(Task::new(|| 0)).unwrap_err(), Error::SchedulerShutdown);
}

#[test]
fn test_posts_racing_shutdown_never_strand() {
    for _ in 0..50 {
        let scheduler = scheduler(2);
        let poster = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                let mut accepted = Vec::new();
                for i in 0..2000 {
                    match scheduler.post(Task::new(move || i)) {
                        Ok(channel) => accepted.push(channel),
                        Err(e) => {
                            assert_eq!(e, Error::SchedulerShutdown);
                            break;
                        }
                    }
                }
                accepted
            })
        };

        thread::yield_now();
        scheduler.shutdown().unwrap();
        let accepted = poster.join().unwrap();

        // Every accepted task either ran or was dropped by the drain.
        for channel in &accepted {
            assert!(channel.is_ready() || channel.is_abandoned(), "{:?}", channel);
        }
    }
}

#[test]
fn test_shared_task_result_survives_scheduler() {
    let scheduler = scheduler(2);
    let task = Arc::new(Task::new(|| "kept"));
    let channel = scheduler.post_shared(&task).unwrap();
    assert_eq!(channel.get_timeout(WAIT).unwrap(), "kept");

    drop(scheduler);
    assert_eq!(task.result_channel().poll(), Some("kept"));
}

#[test]
fn test_join_from_async_context() {
    let scheduler = scheduler(2);
    let channel = scheduler.post(Task::new(|| (1..=10).sum::<i32>())).unwrap();
    assert_eq!(block_on(channel.join()).unwrap(), 55);
}

#[test]
fn test_random_workload_runs_every_task_once() {
    let scheduler = scheduler(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rng = rand::thread_rng();

    let mut values: Vec<u64> = (0..500).collect();
    values.shuffle(&mut rng);

    let channels: Vec<_> = values
        .iter()
        .map(|&value| {
            let counter = Arc::clone(&counter);
            let mut task = Task::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
                value
            });
            // Include out-of-range affinities, which fall back to id placement.
            if rng.gen_bool(0.5) {
                task = task.with_affinity(rng.gen_range(0..6));
            }
            scheduler.post(task).unwrap()
        })
        .collect();

    let total: u64 = channels.iter().map(|c| c.get_timeout(WAIT).unwrap()).sum();
    assert_eq!(total, (0..500).sum::<u64>());
    assert_eq!(counter.load(Ordering::Relaxed), 500);
    assert_eq!(scheduler.stats().tasks_posted, 500);
}
