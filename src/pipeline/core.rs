//! Shared pipeline machinery
//!
//! [`Pipeline`] owns the activity and result lists and the
//! Waiting → Busy → Ready lifecycle. What one `execute()` call actually runs is
//! decided by its [`ExecutionPolicy`].
//!
//! Structural changes and the Waiting → Busy transition are made under the
//! same list lock, so a state check and the mutation it guards cannot be
//! interleaved with a concurrent `execute()`. The state itself is an atomic
//! and can be read without the lock.
//!
//! A running step holds the policy lock and may take the list lock inside it.
//! Everything else takes the list lock first and touches the policy only after
//! its state check passed. The state is Busy for as long as a step holds the
//! policy, and Waiting → Busy needs the list lock, so that order never waits
//! on a step. Policy settings live outside the policy lock.

use super::activity::{Activity, Value};
use super::{ExecuteMode, PipelineEvent, PipelineState};
use crate::channel::{channel, ResultChannel, ResultSender};
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskId, WorkerIndex};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, ReentrantMutex};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const LEAST_LOADED: usize = usize::MAX;

/// What a policy did with one `execute()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The call is finished and the pipeline moves to this state
    Done(PipelineState),
    /// Work is still in flight; the pipeline finishes it later
    Pending,
}

/// Decides which activities one `execute()` call runs
pub trait ExecutionPolicy: Default + Send + 'static {
    /// User-facing configuration, readable while a step is running
    type Settings: Default + Send + Sync + 'static;

    /// Advance the pipeline by one external `execute()` call
    fn step(&mut self, settings: &Self::Settings, ctx: &StepContext<'_>) -> Step;

    /// Forget any saved position. Called by `reset()` and `clear()`.
    fn rewind(&mut self) {}

    /// The activity at `index` was removed
    fn removed(&mut self, _settings: &Self::Settings, _index: usize) {}
}

#[derive(Default)]
struct Lists {
    activities: Vec<Activity>,
    results: Vec<Option<Value>>,
}

pub(crate) struct PipelineInner {
    scheduler: Arc<Scheduler>,
    lists: ReentrantMutex<RefCell<Lists>>,
    state: AtomicU8,
    start_index: AtomicUsize,
    affinity: AtomicUsize,
    in_flight: Mutex<HashMap<TaskId, usize>>,
    run: Mutex<Option<ResultSender<PipelineState>>>,
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
}

impl PipelineInner {
    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn emit(&self, event: PipelineEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, next: PipelineState) {
        let previous = PipelineState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if previous != next {
            log::debug!("pipeline: {:?} -> {:?}", previous, next);
            self.emit(PipelineEvent::StateChanged(next));
        }
    }

    /// Waiting → Busy, or the state that prevented it
    fn begin(&self) -> std::result::Result<(), PipelineState> {
        self.state
            .compare_exchange(
                PipelineState::Waiting as u8,
                PipelineState::Busy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| {
                log::debug!("pipeline: Waiting -> Busy");
                self.emit(PipelineEvent::StateChanged(PipelineState::Busy));
            })
            .map_err(PipelineState::from_u8)
    }

    fn finish(&self, next: PipelineState) {
        // Taken before the state leaves Busy so a new run cannot install its sender first.
        let sender = self.run.lock().take();
        self.set_state(next);
        if let Some(sender) = sender {
            let _ = sender.fulfill(next);
        }
    }

    fn len(&self) -> usize {
        self.lists.lock().borrow().activities.len()
    }

    fn runner_affinity(&self) -> WorkerIndex {
        match self.affinity.load(Ordering::Acquire) {
            LEAST_LOADED => self.scheduler.top_priority_thread(),
            index => index,
        }
    }

    fn store_result(&self, index: usize, value: Value) {
        let guard = self.lists.lock();
        {
            let mut lists = guard.borrow_mut();
            match lists.results.get_mut(index) {
                Some(slot) => *slot = Some(value.clone()),
                None => {
                    log::warn!("pipeline: dropping result for missing activity {}", index);
                    return;
                }
            }
        }
        self.emit(PipelineEvent::ActivityCompleted { index, value });
    }

    fn run_activity(&self, index: usize) -> bool {
        let activity = self.lists.lock().borrow().activities.get(index).cloned();
        let Some(activity) = activity else {
            return false;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| activity.invoke())) {
            Ok(value) => {
                self.store_result(index, value);
                true
            }
            Err(_) => {
                log::error!("pipeline: activity {} panicked", index);
                false
            }
        }
    }

    /// Post every activity from `from` onwards. Returns how many are in flight.
    fn dispatch(self: &Arc<Self>, from: usize) -> usize {
        // Completions wait on this lock, so none can be observed before every post is recorded.
        let guard = self.lists.lock();
        let activities: Vec<(usize, Activity)> = guard
            .borrow()
            .activities
            .iter()
            .enumerate()
            .skip(from)
            .map(|(index, activity)| (index, activity.clone()))
            .collect();

        for (index, activity) in activities {
            let inner = Arc::clone(self);
            let task = activity
                .to_task()
                .on_complete(move |id, value| inner.complete(id, value.clone()));
            let id = task.id();

            self.in_flight.lock().insert(id, index);
            if let Err(e) = self.scheduler.post(task) {
                self.in_flight.lock().remove(&id);
                log::error!("pipeline: failed to post activity {}: {}", index, e);
            }
        }

        let in_flight = self.in_flight.lock().len();
        drop(guard);
        in_flight
    }

    fn complete(&self, id: TaskId, value: Value) {
        let guard = self.lists.lock();
        let Some(index) = self.in_flight.lock().remove(&id) else {
            log::warn!("pipeline: completion for unknown task {}", id);
            return;
        };
        self.store_result(index, value);
        let done = self.in_flight.lock().is_empty();
        drop(guard);

        if done {
            self.finish(PipelineState::Ready);
        }
    }
}

/// What a policy may do while it holds a step
pub struct StepContext<'a> {
    inner: &'a Arc<PipelineInner>,
}

impl StepContext<'_> {
    /// Number of activities
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether there are no activities
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First activity a fresh run starts from
    pub fn start_index(&self) -> usize {
        self.inner.start_index.load(Ordering::Acquire)
    }

    /// Run activity `index` on this thread and store its result.
    /// Returns false if it does not exist or panicked.
    pub fn run_activity(&self, index: usize) -> bool {
        self.inner.run_activity(index)
    }

    /// Post every activity from `from` onwards to the scheduler. The pipeline
    /// becomes Ready once the last of them completes. Returns how many were posted.
    pub fn dispatch(&self, from: usize) -> usize {
        self.inner.dispatch(from)
    }

    /// The scheduler the pipeline runs on
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }
}

fn drive<P: ExecutionPolicy>(inner: &Arc<PipelineInner>, policy: &Mutex<P>, settings: &P::Settings) {
    let step = policy.lock().step(settings, &StepContext { inner });
    if let Step::Done(state) = step {
        inner.finish(state);
    }
}

/// An ordered sequence of activities run under policy `P`
pub struct Pipeline<P: ExecutionPolicy> {
    inner: Arc<PipelineInner>,
    policy: Arc<Mutex<P>>,
    settings: Arc<P::Settings>,
}

impl<P: ExecutionPolicy> Pipeline<P> {
    /// Create an empty pipeline in the Waiting state
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                scheduler,
                lists: ReentrantMutex::new(RefCell::new(Lists::default())),
                state: AtomicU8::new(PipelineState::Waiting as u8),
                start_index: AtomicUsize::new(0),
                affinity: AtomicUsize::new(LEAST_LOADED),
                in_flight: Mutex::new(HashMap::new()),
                run: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            policy: Arc::new(Mutex::new(P::default())),
            settings: Arc::new(P::Settings::default()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        self.inner.state()
    }

    /// Number of activities
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether there are no activities
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks posted by a concurrent run that have not completed yet
    pub fn pending_len(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// First activity a fresh run starts from
    pub fn start_index(&self) -> usize {
        self.inner.start_index.load(Ordering::Acquire)
    }

    /// Receive every state change and activity completion from now on
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Worker for the runner task of asynchronous executions.
    /// `None` picks the least loaded worker at each execution.
    pub fn set_affinity(&self, index: Option<WorkerIndex>) {
        self.inner
            .affinity
            .store(index.unwrap_or(LEAST_LOADED), Ordering::Release);
    }

    /// Append an activity. Only allowed while Waiting.
    pub fn add(&self, activity: Activity) -> bool {
        self.extend(std::iter::once(activity))
    }

    /// Append several activities. Only allowed while Waiting.
    pub fn extend<I>(&self, activities: I) -> bool
    where
        I: IntoIterator<Item = Activity>,
    {
        let guard = self.inner.lists.lock();
        if !self.expect_state("add", PipelineState::Waiting) {
            return false;
        }
        let mut lists = guard.borrow_mut();
        for activity in activities {
            lists.activities.push(activity);
            lists.results.push(None);
        }
        true
    }

    /// Remove the activity at `index` and its result slot. Only allowed while Waiting.
    pub fn remove(&self, index: usize) -> bool {
        let guard = self.inner.lists.lock();
        if !self.expect_state("remove", PipelineState::Waiting) {
            return false;
        }

        let mut lists = guard.borrow_mut();
        if index >= lists.activities.len() {
            log::warn!("pipeline: no activity at index {} to remove", index);
            return false;
        }
        lists.activities.remove(index);
        lists.results.remove(index);
        self.policy.lock().removed(&self.settings, index);
        true
    }

    /// Drop every activity and result and return to Waiting. Refused while Busy.
    pub fn clear(&self) -> bool {
        let guard = self.inner.lists.lock();
        if self.state() == PipelineState::Busy {
            log::warn!("pipeline: cannot clear while Busy");
            return false;
        }

        {
            let mut lists = guard.borrow_mut();
            lists.activities.clear();
            lists.results.clear();
        }
        self.inner.in_flight.lock().clear();
        self.policy.lock().rewind();
        self.inner.set_state(PipelineState::Waiting);
        true
    }

    /// Clear results and return to Waiting, keeping the activities. Only allowed while Ready.
    pub fn reset(&self) -> bool {
        let guard = self.inner.lists.lock();
        if !self.expect_state("reset", PipelineState::Ready) {
            return false;
        }

        guard.borrow_mut().results.iter_mut().for_each(|slot| *slot = None);
        self.inner.in_flight.lock().clear();
        self.policy.lock().rewind();
        self.inner.set_state(PipelineState::Waiting);
        true
    }

    /// Set the first activity of a fresh run. Only allowed while Waiting.
    pub fn set_start_index(&self, index: usize) -> bool {
        let _guard = self.inner.lists.lock();
        if !self.expect_state("set_start_index", PipelineState::Waiting) {
            return false;
        }
        self.inner.start_index.store(index, Ordering::Release);
        true
    }

    /// Result of activity `index`, if it has run and produced a `T`
    pub fn result<T: Any + Clone>(&self, index: usize) -> Option<T> {
        self.value(index)?.downcast::<T>()
    }

    /// Type-erased result of activity `index`
    pub fn value(&self, index: usize) -> Option<Value> {
        self.inner.lists.lock().borrow().results.get(index).cloned().flatten()
    }

    /// Run the policy's next step.
    ///
    /// `Sync` runs it on the calling thread; `Async` posts a runner task to the
    /// scheduler. The returned channel yields the state the pipeline settles in
    /// once the step completes.
    pub fn execute(&self, mode: ExecuteMode) -> Result<ResultChannel<PipelineState>> {
        let (sender, channel) = channel();
        {
            let _guard = self.inner.lists.lock();
            if let Err(state) = self.inner.begin() {
                log::warn!("pipeline: cannot execute while {:?}", state);
                return Err(Error::InvalidState {
                    operation: "execute",
                    state,
                });
            }
            *self.inner.run.lock() = Some(sender);
        }

        match mode {
            ExecuteMode::Sync => drive(&self.inner, &self.policy, &self.settings),
            ExecuteMode::Async => {
                let inner = Arc::clone(&self.inner);
                let policy = Arc::clone(&self.policy);
                let settings = Arc::clone(&self.settings);
                let runner = Task::new(move || drive(&inner, &policy, &settings))
                    .with_affinity(self.inner.runner_affinity())
                    .pinned();

                if let Err(e) = self.inner.scheduler.post(runner) {
                    log::error!("pipeline: failed to post runner: {}", e);
                    self.inner.run.lock().take();
                    self.inner.set_state(PipelineState::Waiting);
                    return Err(e);
                }
            }
        }

        Ok(channel)
    }

    /// Apply `f` to the policy and its settings. Only allowed while Waiting.
    pub(crate) fn configure<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut P, &P::Settings) -> R,
    ) -> Option<R> {
        let _guard = self.inner.lists.lock();
        if !self.expect_state(operation, PipelineState::Waiting) {
            return None;
        }
        Some(f(&mut *self.policy.lock(), &self.settings))
    }

    /// Policy settings; never waits on a running step
    pub(crate) fn settings(&self) -> &P::Settings {
        &self.settings
    }

    fn expect_state(&self, operation: &'static str, expected: PipelineState) -> bool {
        let state = self.state();
        if state != expected {
            log::warn!("pipeline: cannot {} while {:?}", operation, state);
            return false;
        }
        true
    }
}

impl<P: ExecutionPolicy> Clone for Pipeline<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            policy: Arc::clone(&self.policy),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<P: ExecutionPolicy> std::fmt::Debug for Pipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("policy", &std::any::type_name::<P>())
            .field("state", &self.state())
            .field("len", &self.len())
            .field("start_index", &self.start_index())
            .finish()
    }
}
