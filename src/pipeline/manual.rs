//! Manual chains: each `execute()` advances a saved cursor
//!
//! The cursor is the resume position between calls. It is initialised from
//! the pipeline's start index on the first step after construction, `reset()`
//! or `clear()`.

use super::core::{ExecutionPolicy, Pipeline, Step, StepContext};
use super::PipelineState;
use std::sync::atomic::{AtomicUsize, Ordering};

const NO_KEY: usize = usize::MAX;

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    next: Option<usize>,
}

impl Cursor {
    fn position(&mut self, ctx: &StepContext<'_>) -> usize {
        *self.next.get_or_insert_with(|| ctx.start_index())
    }

    fn set(&mut self, index: usize) {
        self.next = Some(index);
    }

    fn rewind(&mut self) {
        self.next = None;
    }

    fn removed(&mut self, index: usize) {
        if let Some(next) = self.next.as_mut() {
            if index < *next {
                *next -= 1;
            }
        }
    }
}

fn settle(next: usize, len: usize) -> Step {
    if next >= len {
        Step::Done(PipelineState::Ready)
    } else {
        Step::Done(PipelineState::Waiting)
    }
}

/// One activity per `execute()`
#[derive(Debug, Default)]
pub struct Manual {
    cursor: Cursor,
}

impl ExecutionPolicy for Manual {
    type Settings = ();

    fn step(&mut self, _settings: &(), ctx: &StepContext<'_>) -> Step {
        let index = self.cursor.position(ctx);
        let len = ctx.len();
        if index >= len {
            return Step::Done(PipelineState::Ready);
        }

        ctx.run_activity(index);
        self.cursor.set(index + 1);
        settle(index + 1, len)
    }

    fn rewind(&mut self) {
        self.cursor.rewind();
    }

    fn removed(&mut self, _settings: &(), index: usize) {
        self.cursor.removed(index);
    }
}

/// Batch size of a [`ManualSteps`] chain
#[derive(Debug)]
pub struct StepsSettings {
    steps: AtomicUsize,
}

impl Default for StepsSettings {
    fn default() -> Self {
        Self {
            steps: AtomicUsize::new(1),
        }
    }
}

impl StepsSettings {
    /// Activities run per `execute()`
    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::Acquire)
    }

    fn set(&self, steps: usize) {
        self.steps.store(steps.max(1), Ordering::Release);
    }
}

/// `steps` activities per `execute()`
#[derive(Debug, Default)]
pub struct ManualSteps {
    cursor: Cursor,
}

impl ExecutionPolicy for ManualSteps {
    type Settings = StepsSettings;

    fn step(&mut self, settings: &StepsSettings, ctx: &StepContext<'_>) -> Step {
        let mut index = self.cursor.position(ctx);
        let len = ctx.len();
        let end = index.saturating_add(settings.steps()).min(len);

        while index < end {
            ctx.run_activity(index);
            index += 1;
        }
        self.cursor.set(index);
        settle(index, len)
    }

    fn rewind(&mut self) {
        self.cursor.rewind();
    }

    fn removed(&mut self, _settings: &StepsSettings, index: usize) {
        self.cursor.removed(index);
    }
}

impl Pipeline<ManualSteps> {
    /// Activities run per `execute()`, at least one. Only allowed while Waiting.
    pub fn set_steps(&self, steps: usize) -> bool {
        self.configure("set_steps", |_, settings| settings.set(steps))
            .is_some()
    }

    /// Activities run per `execute()`
    pub fn steps(&self) -> usize {
        self.settings().steps()
    }
}

/// Key activity of a [`ManualKey`] chain
#[derive(Debug)]
pub struct KeySettings {
    key: AtomicUsize,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            key: AtomicUsize::new(NO_KEY),
        }
    }
}

impl KeySettings {
    /// The key activity, if one is set
    pub fn key(&self) -> Option<usize> {
        match self.key.load(Ordering::Acquire) {
            NO_KEY => None,
            key => Some(key),
        }
    }

    fn set(&self, key: Option<usize>) {
        self.key.store(key.unwrap_or(NO_KEY), Ordering::Release);
    }
}

/// One activity per `execute()`, holding at the key activity
///
/// Once the cursor reaches the key, every `execute()` re-runs the key activity
/// until [`skip_key_activity`](Pipeline::skip_key_activity) lets it move on.
#[derive(Debug, Default)]
pub struct ManualKey {
    cursor: Cursor,
    held: bool,
    skip: bool,
}

impl ExecutionPolicy for ManualKey {
    type Settings = KeySettings;

    fn step(&mut self, settings: &KeySettings, ctx: &StepContext<'_>) -> Step {
        let index = self.cursor.position(ctx);
        let len = ctx.len();
        if index >= len {
            return Step::Done(PipelineState::Ready);
        }

        ctx.run_activity(index);

        let at_key = settings.key() == Some(index);
        if at_key && !self.skip {
            self.held = true;
            return Step::Done(PipelineState::Waiting);
        }
        if at_key {
            self.skip = false;
        }
        self.held = false;
        self.cursor.set(index + 1);
        settle(index + 1, len)
    }

    fn rewind(&mut self) {
        self.cursor.rewind();
        self.held = false;
        self.skip = false;
    }

    fn removed(&mut self, settings: &KeySettings, index: usize) {
        self.cursor.removed(index);
        let key = match settings.key() {
            Some(key) if key == index => {
                self.held = false;
                None
            }
            Some(key) if index < key => Some(key - 1),
            key => key,
        };
        settings.set(key);
    }
}

impl Pipeline<ManualKey> {
    /// Designate the activity the chain holds at. Only allowed while Waiting.
    pub fn set_key_activity(&self, index: usize) -> bool {
        self.configure("set_key_activity", |policy, settings| {
            settings.set(Some(index));
            policy.held = false;
            policy.skip = false;
        })
        .is_some()
    }

    /// The key activity, if one is set
    pub fn key_activity(&self) -> Option<usize> {
        self.settings().key()
    }

    /// Let the chain move past the key activity.
    ///
    /// When the chain is holding at the key, the next `execute()` runs the
    /// activity after it. Before the key is reached, the key runs once and
    /// the chain then continues. Only allowed while Waiting.
    pub fn skip_key_activity(&self) -> bool {
        self.configure("skip_key_activity", |policy, settings| {
            if policy.held {
                if let Some(key) = settings.key() {
                    policy.cursor.set(key + 1);
                }
                policy.held = false;
            } else {
                policy.skip = true;
            }
        })
        .is_some()
    }
}
