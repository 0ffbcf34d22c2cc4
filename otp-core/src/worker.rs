// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Worker roles: fill scheduled slots with keystream
//!
//! Every worker runs the same loop: take a scheduled task, derive its
//! block counter from the task id, fill the slot, hand it to the cryptor.
//! A worker returns once the task manager is shut down. Any number of
//! workers may share one manager.

use crate::accel::Accelerator;
use crate::cipher::{self, State, BLOCK_WORDS};
use crate::keystream::{KeystreamSource, SoftwareCore};
use crate::manager::TaskManager;
use crate::queue::BoundedQueue;
use crate::task::Task;
use crate::Result;
use std::thread;
use tracing::{debug, error, info};

/// Producer side of the pipeline
pub trait Worker: Send {
    /// Process tasks until the manager shuts down
    ///
    /// On a fault the worker shuts the manager down itself and returns the
    /// error.
    fn run(&mut self, tasks: &TaskManager<'_>) -> Result<()>;
}

/// Worker backed by a [`KeystreamSource`]
pub struct KeystreamWorker<S> {
    source: S,
    state: State,
}

impl<S: KeystreamSource> KeystreamWorker<S> {
    /// `state.counter` is the counter of the first block of task 0
    pub fn new(source: S, state: State) -> Self {
        Self { source, state }
    }
}

impl KeystreamWorker<SoftwareCore> {
    pub fn software(state: State) -> Self {
        Self::new(SoftwareCore, state)
    }
}

impl<S: KeystreamSource> Worker for KeystreamWorker<S> {
    fn run(&mut self, tasks: &TaskManager<'_>) -> Result<()> {
        info!("Keystream worker started");

        while let Some(mut task) = tasks.perform_task() {
            let state = self.state.with_counter(task.counter(self.state.counter));

            if let Err(e) = self.source.fill(&state, task.words_mut()) {
                error!(id = task.id(), error = %e, "Keystream generation failed");
                tasks.metrics().record_worker_fault();
                tasks.shutdown();
                return Err(e);
            }

            if !tasks.finish_task(task) {
                break;
            }
        }

        info!("Keystream worker stopped");
        Ok(())
    }
}

/// Two-stage worker for a round-only accelerator
///
/// The calling thread drives the accelerator (rounds stage). Summation
/// threads add the input state to every permuted block (feed-forward) and
/// finish the task. The stages meet at a single-entry hand-off queue, so at
/// most one permuted task waits for summation.
pub struct AcceleratorWorker<A> {
    accelerator: A,
    state: State,
    summation_threads: usize,
}

impl<A: Accelerator> AcceleratorWorker<A> {
    /// At least one summation thread is always started
    pub fn new(accelerator: A, state: State, summation_threads: usize) -> Self {
        Self {
            accelerator,
            state,
            summation_threads: summation_threads.max(1),
        }
    }

    fn rounds_stage<'a>(&mut self, tasks: &TaskManager<'a>, handoff: &BoundedQueue<Task<'a>>) -> Result<()> {
        let _close = CloseOnDrop(handoff);

        while let Some(mut task) = tasks.perform_task() {
            let state = self.state.with_counter(task.counter(self.state.counter));

            if let Err(e) = self.accelerator.permute(&state, task.words_mut()) {
                error!(id = task.id(), error = %e, "Accelerator fault");
                tasks.metrics().record_worker_fault();
                tasks.shutdown();
                return Err(e);
            }

            debug!(id = task.id(), "Rounds stage done");
            if handoff.push(task).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn summation_stage<'a>(tasks: &TaskManager<'a>, handoff: &BoundedQueue<Task<'a>>, base: &State) {
    // Both stages only exit once the manager is going down
    let _close = CloseOnDrop(handoff);
    let _shutdown = tasks.shutdown_guard();

    while let Some(mut task) = handoff.pop() {
        let mut counter = task.counter(base.counter);
        for block in task.words_mut().chunks_exact_mut(BLOCK_WORDS) {
            cipher::feed_forward(block, &base.with_counter(counter).to_words());
            counter = counter.wrapping_add(1);
        }

        if !tasks.finish_task(task) {
            break;
        }
    }
}

impl<A: Accelerator> Worker for AcceleratorWorker<A> {
    fn run(&mut self, tasks: &TaskManager<'_>) -> Result<()> {
        info!(summation_threads = self.summation_threads, "Accelerator worker started");

        let handoff = BoundedQueue::new(1);
        let base = self.state;
        let result = thread::scope(|s| {
            for _ in 0..self.summation_threads {
                s.spawn(|| summation_stage(tasks, &handoff, &base));
            }
            self.rounds_stage(tasks, &handoff)
        });

        info!("Accelerator worker stopped");
        result
    }
}

/// Finishes tasks without generating keystream
///
/// Measures the cryptor side in isolation.
#[derive(Debug, Default)]
pub struct FakeWorker;

impl Worker for FakeWorker {
    fn run(&mut self, tasks: &TaskManager<'_>) -> Result<()> {
        info!("Fake worker started");
        while let Some(task) = tasks.perform_task() {
            if !tasks.finish_task(task) {
                break;
            }
        }
        info!("Fake worker stopped");
        Ok(())
    }
}

/// Shuts a queue down when dropped
struct CloseOnDrop<'q, T>(&'q BoundedQueue<T>);

impl<T> Drop for CloseOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
