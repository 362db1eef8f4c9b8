//! One-shot result channels
//!
//! A [`ResultSender`] is created together with a task and fulfilled once when
//! the task body returns. Any number of [`ResultChannel`] clones may observe
//! the value, either by blocking, by polling, or by awaiting [`ResultChannel::join`].

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

enum Slot<T> {
    Pending,
    Ready(T),
    Closed,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    wakers: Mutex<Vec<Waker>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn notify(&self) {
        self.ready.notify_all();
        for waker in self.wakers.lock().drain(..) {
            waker.wake();
        }
    }
}

/// Producing half of a result channel
pub struct ResultSender<T> {
    shared: Arc<Shared<T>>,
}

/// Observing half of a result channel
pub struct ResultChannel<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected sender/channel pair
pub fn channel<T>() -> (ResultSender<T>, ResultChannel<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        wakers: Mutex::new(Vec::new()),
        ready: Condvar::new(),
    });

    (
        ResultSender { shared: Arc::clone(&shared) },
        ResultChannel { shared },
    )
}

impl<T> ResultSender<T> {
    /// Store the value and wake every waiter.
    ///
    /// The slot is never overwritten: a second fulfilment fails with
    /// [`Error::AlreadyFulfilled`].
    pub fn fulfill(self, value: T) -> Result<()> {
        {
            let mut slot = self.shared.slot.lock();
            if !matches!(*slot, Slot::Pending) {
                return Err(Error::AlreadyFulfilled);
            }
            *slot = Slot::Ready(value);
        }
        self.shared.notify();
        Ok(())
    }
}

impl<T> Drop for ResultSender<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Closed;
            drop(slot);
            self.shared.notify();
        }
    }
}

impl<T: Clone> ResultChannel<T> {
    /// Block until the value is available
    pub fn get(&self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Closed => return Err(Error::Abandoned),
                Slot::Pending => self.shared.ready.wait(&mut slot),
            }
        }
    }

    /// Block for at most `timeout` waiting for the value
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Closed => return Err(Error::Abandoned),
                Slot::Pending => {
                    if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                        return match &*slot {
                            Slot::Ready(value) => Ok(value.clone()),
                            Slot::Closed => Err(Error::Abandoned),
                            Slot::Pending => Err(Error::Timeout),
                        };
                    }
                }
            }
        }
    }

    /// Non-blocking check; `None` while the value is still pending
    pub fn poll(&self) -> Option<T> {
        match &*self.shared.slot.lock() {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Wait for the value asynchronously
    pub fn join(&self) -> Join<T> {
        Join { shared: Arc::clone(&self.shared) }
    }
}

impl<T> ResultChannel<T> {
    /// Whether the value has been delivered
    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Ready(_))
    }

    /// Whether the sender was dropped without a value
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Closed)
    }
}

impl<T> Clone for ResultChannel<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> std::fmt::Debug for ResultChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.shared.slot.lock() {
            Slot::Pending => "pending",
            Slot::Ready(_) => "ready",
            Slot::Closed => "abandoned",
        };
        f.debug_struct("ResultChannel").field("state", &state).finish()
    }
}

/// Future returned by [`ResultChannel::join`]
pub struct Join<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone> Future for Join<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let slot = self.shared.slot.lock();
        match &*slot {
            Slot::Ready(value) => Poll::Ready(Ok(value.clone())),
            Slot::Closed => Poll::Ready(Err(Error::Abandoned)),
            Slot::Pending => {
                // Registered under the slot lock; a fulfil takes that lock before it notifies.
                let mut wakers = self.shared.wakers.lock();
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
