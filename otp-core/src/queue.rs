// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Fixed-capacity blocking FIFO with permanent shutdown
//!
//! The queue is a ring buffer guarded by one mutex and two condition
//! variables. `push` blocks while the ring is full and `pop` blocks while it
//! is empty. [`BoundedQueue::shutdown`] poisons the queue for the rest of its
//! lifetime: every waiter wakes up and every later call fails immediately.

use parking_lot::{Condvar, Mutex};
use std::fmt;

/// Returned by [`BoundedQueue::push`] when the queue has been shut down.
///
/// Carries the rejected item back to the caller untouched.
pub struct Stopped<T>(pub T);

impl<T> Stopped<T> {
    /// Take back the item that could not be queued
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Stopped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stopped { .. }")
    }
}

impl<T> fmt::Display for Stopped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue has been shut down")
    }
}

impl<T> std::error::Error for Stopped<T> {}

/// Blocking bounded queue shared between producer and consumer threads
///
/// # Design
///
/// - `head == tail` is ambiguous, so a `full` flag tells a full ring from an
///   empty one
/// - The `stopped` flag lives under the same lock as the ring, so a waiter
///   can never miss the shutdown notification
/// - FIFO order holds under any number of concurrent producers and consumers
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct Ring<T> {
    items: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    full: bool,
    stopped: bool,
}

impl<T> Ring<T> {
    fn count(&self) -> usize {
        let n = self.items.len();
        if self.full {
            n
        } else {
            (self.tail + n - self.head) % n
        }
    }

    fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    fn advance(&self, index: usize) -> usize {
        if index + 1 == self.items.len() {
            0
        } else {
            index + 1
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        Self {
            ring: Mutex::new(Ring {
                items: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                full: false,
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Push an item, blocking while the queue is full
    ///
    /// Fails with [`Stopped`] if the queue was shut down before or during the
    /// wait; the queue is left unmodified in that case.
    pub fn push(&self, item: T) -> Result<(), Stopped<T>> {
        {
            let mut ring = self.ring.lock();

            while ring.full && !ring.stopped {
                self.not_full.wait(&mut ring);
            }
            if ring.stopped {
                return Err(Stopped(item));
            }

            let tail = ring.tail;
            ring.items[tail] = Some(item);
            ring.tail = ring.advance(tail);
            if ring.head == ring.tail {
                ring.full = true;
            }
        }

        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the oldest item, blocking while the queue is empty
    ///
    /// Returns `None` once the queue has been shut down.
    pub fn pop(&self) -> Option<T> {
        let item = {
            let mut ring = self.ring.lock();

            while ring.is_empty() && !ring.stopped {
                self.not_empty.wait(&mut ring);
            }
            if ring.stopped {
                return None;
            }

            let head = ring.head;
            let item = ring.items[head].take();
            ring.head = ring.advance(head);
            ring.full = false;
            item
        };

        self.not_full.notify_one();
        item
    }

    /// Stop the queue and wake every blocked `push` and `pop`
    ///
    /// Idempotent. Items still queued are dropped with the queue.
    pub fn shutdown(&self) {
        {
            let mut ring = self.ring.lock();
            ring.stopped = true;
        }

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of items currently queued
    pub fn count(&self) -> usize {
        self.ring.lock().count()
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.lock().full
    }

    /// Check if [`shutdown`](Self::shutdown) has been called
    pub fn is_stopped(&self) -> bool {
        self.ring.lock().stopped
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("count", &ring.count())
            .field("stopped", &ring.stopped)
            .finish()
    }
}
