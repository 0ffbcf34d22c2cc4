// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Task manager: the fixed pool of slots circulating between roles
//!
//! ```text
//!            schedule_task                 finish_task
//! cryptor ─────────────────▶ scheduled ─────────────────▶ finished ──▶ cryptor
//!                             (FIFO)    perform_task      (by id)   process_task
//!                                       ▲ workers ▲
//! ```
//!
//! The manager borrows the backing buffer for `'a` and hands out one
//! [`Task`] per slot. Tasks only ever move, so each slot has exactly one
//! owner at a time, and the borrow checker guarantees the buffer outlives
//! every task and every role thread.

use crate::cipher::BLOCK_WORDS;
use crate::metrics::Metrics;
use crate::queue::BoundedQueue;
use crate::reorder::ReorderBuffer;
use crate::task::Task;
use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub struct TaskManager<'a> {
    scheduled: BoundedQueue<Task<'a>>,
    finished: ReorderBuffer<Task<'a>>,
    next_id: AtomicU64,
    slots: usize,
    slot_words: usize,
    metrics: Metrics,
}

impl<'a> TaskManager<'a> {
    /// Partition `buffer` into `slots` equal slots and schedule all of them
    ///
    /// Each slot is `buffer.len() / slots` words rounded down to whole
    /// keystream blocks. Trailing words that do not fit are left untouched.
    pub fn new(buffer: &'a mut [u32], slots: usize) -> Result<Self> {
        Self::with_metrics(buffer, slots, Metrics::new())
    }

    /// Same as [`new`](Self::new), recording into an existing metrics handle
    pub fn with_metrics(buffer: &'a mut [u32], slots: usize, metrics: Metrics) -> Result<Self> {
        if slots == 0 {
            return Err(Error::Config("slot count must be non-zero".to_string()));
        }

        let slot_words = (buffer.len() / slots) / BLOCK_WORDS * BLOCK_WORDS;
        if slot_words == 0 {
            return Err(Error::Config(format!(
                "buffer of {} words cannot hold {} slots of at least one block",
                buffer.len(),
                slots
            )));
        }

        let manager = Self {
            scheduled: BoundedQueue::new(slots),
            finished: ReorderBuffer::new(slots),
            next_id: AtomicU64::new(0),
            slots,
            slot_words,
            metrics,
        };

        for slot in buffer.chunks_exact_mut(slot_words).take(slots) {
            // Capacity equals the slot count, so this never blocks
            if !manager.schedule_task(Task::new(slot)) {
                return Err(Error::Internal("task queue stopped during setup".to_string()));
            }
        }

        info!(
            slots,
            slot_words,
            blocks_per_task = slot_words / BLOCK_WORDS,
            "Task manager initialized"
        );

        Ok(manager)
    }

    /// Assign the next sequence number to `task` and queue it for the workers
    ///
    /// Returns `false` once the manager has been shut down; the task is
    /// dropped in that case.
    pub fn schedule_task(&self, mut task: Task<'a>) -> bool {
        task.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id = task.id, "Scheduling task");
        self.scheduled.push(task).is_ok()
    }

    /// Take the oldest scheduled task, blocking until one is available
    pub fn perform_task(&self) -> Option<Task<'a>> {
        self.scheduled.pop()
    }

    /// Hand a computed task to the cryptor
    ///
    /// Blocks while the reorder slot for this id is still occupied.
    pub fn finish_task(&self, task: Task<'a>) -> bool {
        let id = task.id;
        let blocks = task.block_count();
        if self.finished.put(task, id).is_err() {
            return false;
        }
        debug!(id, "Task finished");
        self.metrics.record_finished(blocks);
        true
    }

    /// Take the next finished task in sequence order
    pub fn process_task(&self) -> Option<Task<'a>> {
        let task = self.finished.next()?;
        self.metrics.record_consumed();
        Some(task)
    }

    /// Stop both queues and release every blocked participant
    pub fn shutdown(&self) {
        if !self.is_shutdown() {
            debug!("Task manager shutting down");
        }
        self.scheduled.shutdown();
        self.finished.shutdown();
    }

    /// Guard that shuts the manager down when dropped
    pub fn shutdown_guard(&self) -> ShutdownGuard<'_, 'a> {
        ShutdownGuard { tasks: self }
    }

    pub fn is_shutdown(&self) -> bool {
        self.scheduled.is_stopped()
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn slot_words(&self) -> usize {
        self.slot_words
    }

    pub fn blocks_per_task(&self) -> usize {
        self.slot_words / BLOCK_WORDS
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl fmt::Debug for TaskManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("slots", &self.slots)
            .field("slot_words", &self.slot_words)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Shuts the task manager down on drop, including during unwinding
#[must_use = "the manager is shut down as soon as the guard is dropped"]
pub struct ShutdownGuard<'m, 'a> {
    tasks: &'m TaskManager<'a>,
}

impl Drop for ShutdownGuard<'_, '_> {
    fn drop(&mut self) {
        self.tasks.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_slots_are_rounded_to_whole_blocks() {
        // 100 words / 3 slots = 33 words, rounded down to 32
        let mut buffer = vec![0u32; 100];
        let tasks = TaskManager::new(&mut buffer, 3).unwrap();
        assert_eq!(tasks.slot_words(), 32);
        assert_eq!(tasks.blocks_per_task(), 2);
        assert_eq!(tasks.slots(), 3);
    }

    #[test]
    fn test_undersized_buffer_rejected() {
        let mut buffer = vec![0u32; 31];
        let err = TaskManager::new(&mut buffer, 2).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let mut buffer = vec![0u32; 64];
        assert!(TaskManager::new(&mut buffer, 0).is_err());
    }

    #[test]
    fn test_initial_tasks_scheduled_in_order() {
        let mut buffer = vec![0u32; BLOCK_WORDS * 4];
        let tasks = TaskManager::new(&mut buffer, 4).unwrap();
        let ids: Vec<u64> = (0..4).map(|_| tasks.perform_task().unwrap().id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_slots_are_disjoint() {
        let mut buffer = vec![0u32; BLOCK_WORDS * 3];
        {
            let tasks = TaskManager::new(&mut buffer, 3).unwrap();
            for _ in 0..3 {
                let mut task = tasks.perform_task().unwrap();
                let marker = task.id() as u32 + 1;
                task.words_mut().fill(marker);
            }
        }
        assert!(buffer[..16].iter().all(|w| *w == 1));
        assert!(buffer[16..32].iter().all(|w| *w == 2));
        assert!(buffer[32..].iter().all(|w| *w == 3));
    }

    #[test]
    fn test_round_trip_restores_order_and_recycles_ids() {
        let mut buffer = vec![0u32; BLOCK_WORDS * 2];
        let tasks = TaskManager::new(&mut buffer, 2).unwrap();

        let first = tasks.perform_task().unwrap();
        let second = tasks.perform_task().unwrap();
        assert!(tasks.finish_task(second));
        assert!(tasks.finish_task(first));

        let task = tasks.process_task().unwrap();
        assert_eq!(task.id(), 0);
        assert!(tasks.schedule_task(task));
        assert_eq!(tasks.process_task().unwrap().id(), 1);

        assert_eq!(tasks.perform_task().unwrap().id(), 2);
        assert_eq!(tasks.metrics().tasks_finished(), 2);
        assert_eq!(tasks.metrics().tasks_consumed(), 2);
    }

    #[test]
    fn test_shutdown_releases_all_verbs() {
        let mut buffer = vec![0u32; BLOCK_WORDS];
        let tasks = TaskManager::new(&mut buffer, 1).unwrap();
        let task = tasks.perform_task().unwrap();

        thread::scope(|s| {
            let worker = s.spawn(|| tasks.perform_task().is_none());
            let cryptor = s.spawn(|| tasks.process_task().is_none());
            thread::sleep(std::time::Duration::from_millis(20));
            tasks.shutdown();
            assert!(worker.join().unwrap());
            assert!(cryptor.join().unwrap());
        });

        assert!(tasks.is_shutdown());
        assert!(!tasks.finish_task(task));
    }

    #[test]
    fn test_guard_shuts_down_on_drop() {
        let mut buffer = vec![0u32; BLOCK_WORDS];
        let tasks = TaskManager::new(&mut buffer, 1).unwrap();
        {
            let _guard = tasks.shutdown_guard();
            assert!(!tasks.is_shutdown());
        }
        assert!(tasks.is_shutdown());
        assert!(tasks.perform_task().is_none());
    }
}
