//! Work stealing
//!
//! A thief scans its peers round-robin, starting at the neighbour fixed when
//! it was constructed and skipping itself, and takes the front item of the
//! first queue whose front is stealable. The scan gives up once it wraps back
//! to its starting point.

use super::worker::Worker;
use crate::task::{TaskHandle, WorkerIndex};
use std::sync::Arc;

/// Victim order for a thief: `start, start + 1, ...` modulo `pool_size`, without `thief`
pub fn victims(thief: WorkerIndex, start: WorkerIndex, pool_size: usize) -> impl Iterator<Item = WorkerIndex> {
    (0..pool_size)
        .map(move |offset| (start + offset) % pool_size)
        .filter(move |&index| index != thief)
}

/// Take one stealable task from the first eligible peer of `thief`
pub fn steal_one(thief: &Worker, workers: &[Arc<Worker>]) -> Option<(WorkerIndex, TaskHandle)> {
    for victim in victims(thief.index(), thief.steal_start(), workers.len()) {
        let queue = workers[victim].queue();
        if queue.front_is_stealable() != Some(true) {
            continue;
        }
        // The front may have changed since the peek; `steal` re-checks the tag.
        if let Some(task) = queue.steal() {
            return Some((victim, task));
        }
    }
    None
}
