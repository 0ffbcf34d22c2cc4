// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Id-indexed reorder buffer
//!
//! Items tagged with consecutive ids can be `put` in any order and are read
//! back strictly by ascending id. The buffer is an array of capacity-1
//! [`BoundedQueue`]s addressed by `id mod N` plus a cursor that visits the
//! slots round-robin, one slot per [`ReorderBuffer::next`] call.
//!
//! Ordering holds as long as no more than N consecutive ids are in flight at
//! once. Slots must keep capacity 1: a deeper slot would let id `k + N`
//! overtake id `k`.

use crate::queue::{BoundedQueue, Stopped};
use parking_lot::Mutex;

pub struct ReorderBuffer<T> {
    nodes: Box<[BoundedQueue<T>]>,
    cursor: Mutex<usize>,
}

impl<T> ReorderBuffer<T> {
    /// Create a buffer with `capacity` single-item slots
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "reorder buffer capacity must be non-zero");

        Self {
            nodes: (0..capacity).map(|_| BoundedQueue::new(1)).collect(),
            // The first `next` moves the cursor onto slot 0
            cursor: Mutex::new(capacity - 1),
        }
    }

    /// Store `item` in slot `id mod N`, blocking while that slot is occupied
    pub fn put(&self, item: T, id: u64) -> Result<(), Stopped<T>> {
        let index = (id % self.nodes.len() as u64) as usize;
        self.nodes[index].push(item)
    }

    /// Move the cursor to the next slot and take its item
    ///
    /// Blocks until that particular slot is filled, which is what restores
    /// id order. The cursor advances even when the call returns `None`.
    pub fn next(&self) -> Option<T> {
        let mut cursor = self.cursor.lock();
        *cursor = if *cursor + 1 == self.nodes.len() { 0 } else { *cursor + 1 };
        self.nodes[*cursor].pop()
    }

    /// Shut down every slot
    pub fn shutdown(&self) {
        for node in self.nodes.iter() {
            node.shutdown();
        }
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.nodes.iter().all(|node| node.is_stopped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reverse_puts_come_out_ordered() {
        let buffer = ReorderBuffer::new(4);
        for id in (0..4u64).rev() {
            buffer.put(id, id).unwrap();
        }
        let read: Vec<u64> = (0..4).map(|_| buffer.next().unwrap()).collect();
        assert_eq!(read, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_ids_wrap_around_slots() {
        let buffer = ReorderBuffer::new(2);
        for round in 0..5u64 {
            let base = round * 2;
            buffer.put(base + 1, base + 1).unwrap();
            buffer.put(base, base).unwrap();
            assert_eq!(buffer.next(), Some(base));
            assert_eq!(buffer.next(), Some(base + 1));
        }
    }

    #[test]
    fn test_next_waits_for_missing_id() {
        let buffer = ReorderBuffer::new(3);
        buffer.put("second", 1).unwrap();
        buffer.put("third", 2).unwrap();

        thread::scope(|s| {
            let reader = s.spawn(|| buffer.next());
            thread::sleep(Duration::from_millis(20));
            assert!(!reader.is_finished());

            buffer.put("first", 0).unwrap();
            assert_eq!(reader.join().unwrap(), Some("first"));
        });

        assert_eq!(buffer.next(), Some("second"));
        assert_eq!(buffer.next(), Some("third"));
    }

    #[test]
    fn test_shutdown_releases_reader_and_writer() {
        let buffer = ReorderBuffer::new(2);
        // Slot 0 holds id 0, so a writer for id 2 blocks on it
        buffer.put(0u64, 0).unwrap();
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let buffer = &buffer;
            let writer_tx = tx.clone();
            s.spawn(move || writer_tx.send(buffer.put(2, 2).is_err()).unwrap());

            thread::sleep(Duration::from_millis(20));
            buffer.shutdown();

            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        });

        assert!(buffer.is_stopped());
        assert_eq!(buffer.next(), None);
        assert!(buffer.put(1, 1).is_err());
    }

    #[test]
    fn test_concurrent_writers_deliver_in_order() {
        let capacity = 4;
        let total = 200u64;
        let buffer = ReorderBuffer::new(capacity);
        // Window of free ids so at most `capacity` are in flight
        let tickets = BoundedQueue::new(capacity);
        for id in 0..capacity as u64 {
            tickets.push(id).unwrap();
        }

        let read = thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    while let Some(id) = tickets.pop() {
                        buffer.put(id, id).unwrap();
                    }
                });
            }

            let mut read = Vec::new();
            for expected in 0..total {
                let id = buffer.next().unwrap();
                assert_eq!(id, expected);
                read.push(id);
                let recycled = id + capacity as u64;
                if recycled < total {
                    tickets.push(recycled).unwrap();
                }
            }
            tickets.shutdown();
            read
        });

        assert_eq!(read.len(), total as usize);
    }

    proptest! {
        #[test]
        fn prop_any_put_order_reads_ascending(ids in Just((0..16u64).collect::<Vec<_>>()).prop_shuffle()) {
            let buffer = ReorderBuffer::new(ids.len());
            for id in &ids {
                buffer.put(*id, *id).unwrap();
            }
            let read: Vec<u64> = (0..ids.len()).map(|_| buffer.next().unwrap()).collect();
            prop_assert_eq!(read, (0..16u64).collect::<Vec<_>>());
        }
    }
}
