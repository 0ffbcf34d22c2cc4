// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Pipeline runner: one cryptor, any number of workers, one task manager

use crate::accel::SoftAccelerator;
use crate::cipher::{State, BLOCK_BYTES};
use crate::config::{Engine, OtpConfig};
use crate::cryptor::{Cryptor, StreamCryptor};
use crate::manager::TaskManager;
use crate::metrics::MetricsSnapshot;
use crate::worker::{AcceleratorWorker, KeystreamWorker, Worker};
use crate::{Error, Result};
use serde::Serialize;
use std::thread;
use std::time::Instant;
use tracing::{error, info};

/// Outcome of a completed pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub bytes: u64,
    pub workers: usize,
    pub slots: usize,
    pub blocks_per_task: usize,
    pub elapsed_seconds: f64,
    pub throughput_mib_per_second: f64,
    pub metrics: MetricsSnapshot,
}

/// Run `cryptor` on the calling thread and every worker on its own thread
///
/// Returns once all roles have stopped. The manager is shut down on every
/// exit path. A worker error wins over the cryptor's [`Error::Aborted`],
/// since the abort is only its consequence.
pub fn run(
    tasks: &TaskManager<'_>,
    cryptor: &mut dyn Cryptor,
    workers: &mut [Box<dyn Worker>],
) -> Result<PipelineReport> {
    if workers.is_empty() && cryptor.target() > 0 {
        return Err(Error::Config("at least one worker is required".to_string()));
    }

    let started = Instant::now();
    info!(
        workers = workers.len(),
        slots = tasks.slots(),
        bytes = cryptor.target(),
        "Pipeline started"
    );

    let (consumed, worker_results) = thread::scope(|s| {
        let handles: Vec<_> = workers
            .iter_mut()
            .map(|worker| {
                s.spawn(move || {
                    let _shutdown = tasks.shutdown_guard();
                    worker.run(tasks)
                })
            })
            .collect();

        let consumed = {
            let _shutdown = tasks.shutdown_guard();
            cryptor.run(tasks)
        };

        let worker_results: Vec<Result<()>> = handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    tasks.metrics().record_worker_fault();
                    Err(Error::Internal("worker thread panicked".to_string()))
                })
            })
            .collect();

        (consumed, worker_results)
    });

    if let Some(e) = worker_results.into_iter().find_map(Result::err) {
        error!(error = %e, "Pipeline failed in a worker");
        return Err(e);
    }
    let bytes = consumed.map_err(|e| {
        error!(error = %e, "Pipeline failed in the cryptor");
        e
    })?;

    let elapsed = started.elapsed().as_secs_f64();
    let report = PipelineReport {
        bytes,
        workers: workers.len(),
        slots: tasks.slots(),
        blocks_per_task: tasks.blocks_per_task(),
        elapsed_seconds: elapsed,
        throughput_mib_per_second: if elapsed > 0.0 {
            bytes as f64 / elapsed / (1024.0 * 1024.0)
        } else {
            0.0
        },
        metrics: tasks.metrics().snapshot(),
    };

    info!(
        bytes = report.bytes,
        elapsed_seconds = report.elapsed_seconds,
        throughput_mib_per_second = report.throughput_mib_per_second,
        "Pipeline finished"
    );
    Ok(report)
}

/// Longest stream that never reuses a block counter
pub fn max_stream_bytes(initial_counter: u32) -> u64 {
    ((1u64 << 32) - initial_counter as u64) * BLOCK_BYTES as u64
}

/// Reject streams whose block counter would wrap around
pub fn validate_stream(bytes: u64, initial_counter: u32) -> Result<()> {
    let max = max_stream_bytes(initial_counter);
    if bytes > max {
        return Err(Error::Validation(format!(
            "stream of {} bytes exceeds the {} bytes available from counter {}",
            bytes, max, initial_counter
        )));
    }
    Ok(())
}

/// Memory the slot pool is carved from
pub struct SlotMemory {
    backing: Backing,
    words: usize,
}

enum Backing {
    Heap(Vec<u32>),
    #[cfg(unix)]
    Device(crate::accel::DeviceMapping),
}

impl SlotMemory {
    /// Zeroed heap memory of `words` words
    pub fn heap(words: usize) -> Self {
        Self {
            backing: Backing::Heap(vec![0u32; words]),
            words,
        }
    }

    /// Words handed to the task manager
    pub fn words_mut(&mut self) -> &mut [u32] {
        let words = self.words;
        match &mut self.backing {
            Backing::Heap(buffer) => buffer.as_mut_slice(),
            #[cfg(unix)]
            Backing::Device(mapping) => {
                let mapped = mapping.words_mut();
                let len = words.min(mapped.len());
                &mut mapped[..len]
            }
        }
    }
}

/// Slot memory and workers for the configured engine
///
/// The `fpga` engine opens its devices here; its slots live in the DMA
/// region the core writes into.
pub fn prepare(config: &OtpConfig) -> Result<(SlotMemory, Vec<Box<dyn Worker>>)> {
    match config.engine {
        Engine::Software | Engine::AcceleratorSim => {
            Ok((SlotMemory::heap(config.buffer_words()), build_workers(config)?))
        }
        Engine::Fpga => prepare_fpga(config),
    }
}

#[cfg(unix)]
fn prepare_fpga(config: &OtpConfig) -> Result<(SlotMemory, Vec<Box<dyn Worker>>)> {
    let state = config.state()?;
    let (core, mapping) =
        crate::accel::DevicePaths::default().open_fpga(&config.fpga_uio, &config.fpga_udmabuf)?;

    let words = config.buffer_words();
    if mapping.len_words() < words {
        return Err(Error::Config(format!(
            "{} holds {} words, the slot pool needs {}",
            config.fpga_udmabuf,
            mapping.len_words(),
            words
        )));
    }

    let workers: Vec<Box<dyn Worker>> = vec![Box::new(AcceleratorWorker::new(
        core,
        state,
        config.summation_threads,
    ))];
    let memory = SlotMemory {
        backing: Backing::Device(mapping),
        words,
    };
    Ok((memory, workers))
}

#[cfg(not(unix))]
fn prepare_fpga(_config: &OtpConfig) -> Result<(SlotMemory, Vec<Box<dyn Worker>>)> {
    Err(Error::Config("the fpga engine needs UIO and udmabuf devices".to_string()))
}

/// Build heap-backed workers for the software engines
pub fn build_workers(config: &OtpConfig) -> Result<Vec<Box<dyn Worker>>> {
    let state = config.state()?;
    (0..config.workers)
        .map(|_| worker_for(config.engine, state, config.summation_threads))
        .collect()
}

fn worker_for(engine: Engine, state: State, summation_threads: usize) -> Result<Box<dyn Worker>> {
    match engine {
        Engine::Software => Ok(Box::new(KeystreamWorker::software(state))),
        Engine::AcceleratorSim => Ok(Box::new(AcceleratorWorker::new(SoftAccelerator, state, summation_threads))),
        Engine::Fpga => Err(Error::Config(
            "the fpga engine needs its DMA memory, use pipeline::prepare".to_string(),
        )),
    }
}

/// Encrypt or decrypt `input` into `output` with the configured pipeline
pub fn crypt(config: &OtpConfig, input: &[u8], output: &mut [u8]) -> Result<PipelineReport> {
    config.validate()?;
    validate_stream(input.len() as u64, config.initial_counter)?;

    let (mut memory, mut workers) = prepare(config)?;
    let tasks = TaskManager::new(memory.words_mut(), config.slots)?;
    let mut cryptor = StreamCryptor::new(input, output)?;

    run(&tasks, &mut cryptor, &mut workers)
}
