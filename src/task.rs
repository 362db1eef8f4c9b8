//! Single-shot tasks
//!
//! A [`Task`] binds a callable to an identity, an affinity hint and a result
//! channel. The scheduler only sees tasks through the [`Runnable`] trait, so
//! one queue can hold tasks of any return type.

use crate::channel::{channel, ResultChannel, ResultSender};
use crate::scheduler::current_worker;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Process-unique, monotonically increasing task identity
pub type TaskId = i64;

/// Index of a worker inside a scheduler
pub type WorkerIndex = usize;

const UNBOUND: usize = usize::MAX;

static NEXT_TASK_ID: AtomicI64 = AtomicI64::new(0);

type Body<T> = Box<dyn FnOnce() -> T + Send + 'static>;
type CompletionHook<T> = Box<dyn FnOnce(TaskId, &T) + Send + 'static>;

/// Type-erased view of a task used by the scheduler and its workers
pub trait Runnable: Send + Sync {
    /// Run the body if nobody has yet. Returns whether this call ran it.
    fn run(&self) -> bool;

    /// Task identity
    fn id(&self) -> TaskId;

    /// Requested worker, if any
    fn affinity(&self) -> Option<WorkerIndex>;

    /// Whether peers may steal this task from its queue
    fn is_stealable(&self) -> bool;

    /// Whether the body has already been claimed
    fn is_executed(&self) -> bool;
}

/// A unit of work producing a `T`
pub struct Task<T> {
    id: TaskId,
    affinity: AtomicUsize,
    stealable: AtomicBool,
    executed: AtomicBool,
    origin: Option<WorkerIndex>,
    body: Mutex<Option<Body<T>>>,
    sender: Mutex<Option<ResultSender<T>>>,
    on_complete: Mutex<Option<CompletionHook<T>>>,
    channel: ResultChannel<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Create a new unbound, stealable task
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, channel) = channel();

        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            affinity: AtomicUsize::new(UNBOUND),
            stealable: AtomicBool::new(true),
            executed: AtomicBool::new(false),
            origin: current_worker(),
            body: Mutex::new(Some(Box::new(work))),
            sender: Mutex::new(Some(sender)),
            on_complete: Mutex::new(None),
            channel,
        }
    }

    /// Pin the task to a worker. Out-of-range indices fall back to id-based placement.
    pub fn with_affinity(self, index: WorkerIndex) -> Self {
        self.affinity.store(index, Ordering::Release);
        self
    }

    /// Keep the task on the queue it was posted to
    pub fn pinned(self) -> Self {
        self.stealable.store(false, Ordering::Release);
        self
    }

    /// Run `hook` with the task id and value once the result channel is fulfilled
    pub fn on_complete<F>(self, hook: F) -> Self
    where
        F: FnOnce(TaskId, &T) + Send + 'static,
    {
        *self.on_complete.lock() = Some(Box::new(hook));
        self
    }
}

impl<T> Task<T> {
    /// Task identity
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Currently requested worker
    pub fn affinity_thread(&self) -> Option<WorkerIndex> {
        match self.affinity.load(Ordering::Acquire) {
            UNBOUND => None,
            index => Some(index),
        }
    }

    /// Request a different worker.
    ///
    /// Refused when `index` is outside the pool or is the worker that created
    /// the task.
    pub fn move_to_thread(&self, index: WorkerIndex, pool_size: usize) -> bool {
        if index >= pool_size {
            log::warn!("task {}: worker {} out of range for pool of {}", self.id, index, pool_size);
            return false;
        }
        if self.origin == Some(index) {
            log::warn!("task {}: refusing to move back onto origin worker {}", self.id, index);
            return false;
        }
        self.affinity.store(index, Ordering::Release);
        true
    }

    /// Worker the task was created on, if any
    pub fn dependency_thread(&self) -> Option<WorkerIndex> {
        self.origin
    }

    /// Toggle whether peers may steal this task
    pub fn set_stealable(&self, stealable: bool) {
        self.stealable.store(stealable, Ordering::Release);
    }

    /// Another observer of the task's result
    pub fn result_channel(&self) -> ResultChannel<T> {
        self.channel.clone()
    }
}

impl<T: Send + 'static> Runnable for Task<T> {
    fn run(&self) -> bool {
        if self
            .executed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let Some(work) = self.body.lock().take() else {
            return false;
        };
        let value = work();

        let hook = self.on_complete.lock().take();
        if let Some(hook) = hook {
            hook(self.id, &value);
        }
        if let Some(sender) = self.sender.lock().take() {
            if sender.fulfill(value).is_err() {
                log::warn!("task {}: result channel already fulfilled", self.id);
            }
        }
        true
    }

    fn id(&self) -> TaskId {
        self.id
    }

    fn affinity(&self) -> Option<WorkerIndex> {
        self.affinity_thread()
    }

    fn is_stealable(&self) -> bool {
        self.stealable.load(Ordering::Acquire)
    }

    fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }
}

impl<T> Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("affinity", &self.affinity_thread())
            .field("stealable", &self.stealable.load(Ordering::Relaxed))
            .field("executed", &self.executed.load(Ordering::Relaxed))
            .finish()
    }
}

/// How a queued task is owned
///
/// `Owned` tasks are dropped by the worker after they run. `Shared` tasks stay
/// alive for as long as the submitter keeps its `Arc`.
pub enum TaskHandle {
    /// Ownership was handed to the scheduler
    Owned(Box<dyn Runnable>),
    /// The submitter keeps a reference
    Shared(Arc<dyn Runnable>),
}

impl Deref for TaskHandle {
    type Target = dyn Runnable;

    fn deref(&self) -> &Self::Target {
        match self {
            TaskHandle::Owned(task) => task.as_ref(),
            TaskHandle::Shared(task) => task.as_ref(),
        }
    }
}

impl Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            TaskHandle::Owned(_) => "owned",
            TaskHandle::Shared(_) => "shared",
        };
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("kind", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_monotonic() {
        let a = Task::new(|| ());
        let b = Task::new(|| ());
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_run_twice_executes_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let task = Task::new(move || counter_clone.fetch_add(1, Ordering::SeqCst) + 1);

        assert!(task.run());
        assert!(!task.run());
        assert!(task.is_executed());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(task.result_channel().get().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_runs_execute_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let task = Arc::new(Task::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let task = Arc::clone(&task);
                std::thread::spawn(move || task.run())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ran| *ran)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_move_to_thread() {
        let task = Task::new(|| 1);
        assert_eq!(task.affinity_thread(), None);
        assert!(task.dependency_thread().is_none());

        assert!(!task.move_to_thread(4, 4));
        assert_eq!(task.affinity_thread(), None);

        assert!(task.move_to_thread(3, 4));
        assert_eq!(task.affinity_thread(), Some(3));
    }

    #[test]
    fn test_completion_hook_sees_id_and_value() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let task = Task::new(|| 5 - 7).on_complete(move |id, value| {
            *seen_clone.lock() = Some((id, *value));
        });
        let id = task.id();

        task.run();
        assert_eq!(*seen.lock(), Some((id, -2)));
    }

    #[test]
    fn test_handle_deref() {
        let task = Task::new(|| ()).pinned();
        let id = task.id();
        let handle = TaskHandle::Owned(Box::new(task));

        assert_eq!(handle.id(), id);
        assert!(!handle.is_stealable());
        assert!(handle.run());
        assert!(handle.is_executed());
    }
}
