// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Cryptor roles: consume finished keystream in order and recycle slots

use crate::cipher;
use crate::manager::TaskManager;
use crate::{Error, Result};
use tracing::{info, warn};

/// Consumer side of the pipeline
///
/// Exactly one cryptor runs per task manager. When `run` returns, by any
/// path, the manager has been shut down so the workers stop as well.
pub trait Cryptor: Send {
    /// Consume keystream until the target length is reached
    ///
    /// Returns the number of bytes consumed, or [`Error::Aborted`] if the
    /// manager was shut down first.
    fn run(&mut self, tasks: &TaskManager<'_>) -> Result<u64>;

    /// Total bytes this cryptor will consume
    fn target(&self) -> u64;
}

/// XORs an input stream with the keystream into an output stream
///
/// Byte `i` of the output is `input[i] ^ keystream[i]`, with the keystream
/// starting at the first block of task 0. Encryption and decryption are the
/// same operation.
pub struct StreamCryptor<'d> {
    input: &'d [u8],
    output: &'d mut [u8],
}

impl<'d> StreamCryptor<'d> {
    pub fn new(input: &'d [u8], output: &'d mut [u8]) -> Result<Self> {
        if input.len() != output.len() {
            return Err(Error::Validation(format!(
                "input is {} bytes but output is {} bytes",
                input.len(),
                output.len()
            )));
        }
        Ok(Self { input, output })
    }
}

impl Cryptor for StreamCryptor<'_> {
    fn run(&mut self, tasks: &TaskManager<'_>) -> Result<u64> {
        let _shutdown = tasks.shutdown_guard();
        let expected = self.input.len();
        let mut offset = 0;

        info!(bytes = expected, "Stream cryptor started");

        while offset < expected {
            let Some(task) = tasks.process_task() else {
                break;
            };

            let len = (expected - offset).min(task.byte_len());
            let range = offset..offset + len;
            cipher::xor_words(task.words(), &self.input[range.clone()], &mut self.output[range]);
            offset += len;
            tasks.metrics().record_bytes(len);

            // The last task is not recycled
            if offset < expected && !tasks.schedule_task(task) {
                break;
            }
        }

        if offset < expected {
            warn!(processed = offset, expected, "Stream cryptor interrupted");
            return Err(Error::Aborted {
                processed: offset as u64,
                expected: expected as u64,
            });
        }

        info!(bytes = offset, "Stream cryptor finished");
        Ok(offset as u64)
    }

    fn target(&self) -> u64 {
        self.input.len() as u64
    }
}

/// Consumes and discards keystream
///
/// Measures worker throughput in isolation.
#[derive(Debug, Clone, Copy)]
pub struct FakeCryptor {
    target: u64,
}

impl FakeCryptor {
    pub fn new(target: u64) -> Self {
        Self { target }
    }
}

impl Cryptor for FakeCryptor {
    fn run(&mut self, tasks: &TaskManager<'_>) -> Result<u64> {
        let _shutdown = tasks.shutdown_guard();
        let mut processed = 0u64;

        info!(bytes = self.target, "Fake cryptor started");

        while processed < self.target {
            let Some(task) = tasks.process_task() else {
                break;
            };

            let len = (self.target - processed).min(task.byte_len() as u64);
            processed += len;
            tasks.metrics().record_bytes(len as usize);

            if processed < self.target && !tasks.schedule_task(task) {
                break;
            }
        }

        if processed < self.target {
            warn!(processed, expected = self.target, "Fake cryptor interrupted");
            return Err(Error::Aborted {
                processed,
                expected: self.target,
            });
        }

        info!(bytes = processed, "Fake cryptor finished");
        Ok(processed)
    }

    fn target(&self) -> u64 {
        self.target
    }
}
