//! Bounded lock-free work queue
//!
//! Every worker owns one [`BoundedQueue`]. The owner pops from the front; the
//! scheduler pushes at the rear from any thread; peers steal from the front.
//! Slots are reserved with compare-and-swap on the `front`/`rear` indices and
//! published through a per-slot sequence stamp, so no lock is taken on push
//! or pop.
//!
//! Each slot also carries the stealable tag of its item. A thief reads the tag
//! of the front slot without touching the item itself and only then tries to
//! claim that slot.

#![allow(unsafe_code)] // Slot storage is initialised and read under the sequence protocol

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt::Debug;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Default number of entries per worker queue
pub const DEFAULT_CAPACITY: usize = 10240;

struct Slot<T> {
    /// `pos` when free for the push at `pos`, `pos + 1` once that push is published.
    seq: AtomicUsize,
    stealable: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity multi-producer multi-consumer FIFO ring
pub struct BoundedQueue<T> {
    slots: Box<[Slot<T>]>,
    capacity: usize,
    front: CachePadded<AtomicUsize>,
    rear: CachePadded<AtomicUsize>,
}

// SAFETY: a slot's value is written only by the producer that claimed it via
// `rear` and read only by the consumer that claimed it via `front`; the
// sequence stamp orders the two.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                stealable: AtomicBool::new(false),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            slots,
            capacity,
            front: CachePadded::new(AtomicUsize::new(0)),
            rear: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Push a stealable item. On a full queue the item is handed back.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.push_tagged(item, true)
    }

    /// Push an item with an explicit stealable tag
    pub fn push_tagged(&self, item: T, stealable: bool) -> Result<(), T> {
        let mut pos = self.rear.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.rear.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS on `rear` gave us exclusive write access
                        // to this slot until we publish `seq`.
                        unsafe { (*slot.value.get()).write(item) };
                        slot.stealable.store(stealable, Ordering::Relaxed);
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The slot still holds the item from one lap ago.
                return Err(item);
            } else {
                pos = self.rear.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop the front item
    pub fn pop(&self) -> Option<T> {
        self.pop_where(|_| true)
    }

    /// Pop the front item only if it was pushed as stealable
    pub fn steal(&self) -> Option<T> {
        self.pop_where(|stealable| stealable)
    }

    /// Stealable tag of the front item, `None` when empty
    pub fn front_is_stealable(&self) -> Option<bool> {
        let pos = self.front.load(Ordering::Acquire);
        let slot = &self.slots[pos % self.capacity];
        if slot.seq.load(Ordering::Acquire) == pos.wrapping_add(1) {
            Some(slot.stealable.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    fn pop_where(&self, accept: impl Fn(bool) -> bool) -> Option<T> {
        let mut pos = self.front.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;

            if diff == 0 {
                // The tag belongs to the item at `pos` as long as the CAS below succeeds.
                if !accept(slot.stealable.load(Ordering::Relaxed)) {
                    return None;
                }
                match self.front.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS on `front` gave us exclusive read access
                        // to this published slot.
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(pos.wrapping_add(self.capacity), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.front.load(Ordering::Relaxed);
            }
        }
    }

    /// Number of queued items (a snapshot under concurrency)
    pub fn len(&self) -> usize {
        // `front` first: a later `rear` can never be behind it.
        let front = self.front.load(Ordering::Acquire);
        let rear = self.rear.load(Ordering::Acquire);
        rear.wrapping_sub(front).min(self.capacity)
    }

    /// `front == rear`
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// No slot left for a push
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
