//! Fixed-capacity slot table correlating pending requests with
//! transaction ids.
//!
//! The table is the single synchronization point between caller threads
//! admitting requests and transport threads delivering completions: timed
//! blocking admission, atomic idempotent removal, and point-in-time
//! snapshots that can be iterated without holding the table lock.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner<T> {
    slots: Vec<Option<T>>,
    occupied: usize,
    disposed: bool,
}

/// Bounded pool of numbered slots.
///
/// The slot index doubles as the correlation key: occupants stay at the
/// index they were admitted to until removed. Capacity is fixed at
/// construction.
///
/// # Panics
///
/// All methods panic if the internal mutex has been poisoned.
pub struct SlotTable<T> {
    inner: Mutex<Inner<T>>,
    freed: Condvar,
    capacity: usize,
}

// Poisoned-lock panics are covered by the struct-level note.
#[allow(clippy::missing_panics_doc)]
impl<T: Clone> SlotTable<T> {
    /// Creates a table with `capacity` empty slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            inner: Mutex::new(Inner {
                slots,
                occupied: 0,
                disposed: false,
            }),
            freed: Condvar::new(),
            capacity,
        }
    }

    /// Reserves a free slot for `item`, blocking up to `timeout` for one to
    /// free up. Returns the slot index, or `None` on timeout or after
    /// [`dispose`](Self::dispose).
    pub fn try_add(&self, item: T, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.disposed {
                return None;
            }
            if let Some(index) = inner.slots.iter().position(Option::is_none) {
                inner.slots[index] = Some(item);
                inner.occupied += 1;
                return Some(index);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = self.freed.wait_timeout(inner, deadline - now).unwrap().0;
        }
    }

    /// Atomically detaches and returns the occupant of `index`, freeing the
    /// slot. Removing an empty or out-of-range slot returns `None` and is a
    /// no-op, so duplicate completions are harmless.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner.slots.get_mut(index)?.take();
        if item.is_some() {
            inner.occupied -= 1;
            drop(inner);
            self.freed.notify_one();
        }
        item
    }

    /// Returns `true` iff at least one slot is occupied.
    #[must_use]
    pub fn has_items(&self) -> bool {
        self.inner.lock().unwrap().occupied > 0
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().occupied
    }

    /// Returns `true` if no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_items()
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a point-in-time copy of the current occupants, safe to
    /// iterate while other threads mutate the table.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().filter_map(Clone::clone).collect()
    }

    /// Marks the table disposed and unblocks all threads waiting in
    /// [`try_add`](Self::try_add). Occupants are untouched and can still be
    /// removed; disposal does not wait for them to clear.
    pub fn dispose(&self) {
        self.inner.lock().unwrap().disposed = true;
        self.freed.notify_all();
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().unwrap().disposed
    }
}
