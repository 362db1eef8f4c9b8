//! Pipeline activities and their results

use crate::task::{Task, WorkerIndex};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Type-erased activity result
#[derive(Clone)]
pub struct Value(Arc<dyn Any + Send + Sync>);

impl Value {
    /// Wrap a value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Copy the value out if it is a `T`
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.0.downcast_ref::<T>().cloned()
    }

    /// Borrow the value if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether the value is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Value(..)")
    }
}

/// One step of a pipeline
///
/// Unlike a [`Task`], an activity can be invoked any number of times: every
/// pipeline run builds a fresh single-shot task from it.
#[derive(Clone)]
pub struct Activity {
    call: Arc<dyn Fn() -> Value + Send + Sync>,
    affinity: Option<WorkerIndex>,
    stealable: bool,
}

impl Activity {
    /// Wrap a callable
    pub fn new<F, T>(work: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        Self {
            call: Arc::new(move || Value::new(work())),
            affinity: None,
            stealable: true,
        }
    }

    /// Prefer a worker when the activity is posted to the scheduler
    pub fn with_affinity(mut self, index: WorkerIndex) -> Self {
        self.affinity = Some(index);
        self
    }

    /// Keep posted tasks on the worker they are queued on
    pub fn pinned(mut self) -> Self {
        self.stealable = false;
        self
    }

    /// Requested worker, if any
    pub fn affinity(&self) -> Option<WorkerIndex> {
        self.affinity
    }

    /// Run the activity on the calling thread
    pub fn invoke(&self) -> Value {
        (self.call)()
    }

    /// Build a single-shot task running this activity
    pub fn to_task(&self) -> Task<Value> {
        let call = Arc::clone(&self.call);
        let mut task = Task::new(move || call());
        if let Some(index) = self.affinity {
            task = task.with_affinity(index);
        }
        if !self.stealable {
            task = task.pinned();
        }
        task
    }
}

impl Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("affinity", &self.affinity)
            .field("stealable", &self.stealable)
            .finish()
    }
}
