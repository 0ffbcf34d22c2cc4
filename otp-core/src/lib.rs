// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! ChaCha20 OTP Pipeline Core Library
//!
//! Encrypts a byte stream by XORing it with a ChaCha20 keystream that is
//! produced concurrently by one or more workers and consumed, strictly in
//! stream order, by a single cryptor.
//!
//! # Architecture
//!
//! A fixed pool of slots carved out of one backing buffer circulates between
//! the roles:
//!
//! - `queue`: blocking bounded FIFO with permanent shutdown
//! - `reorder`: id-indexed buffer that restores stream order
//! - `manager`: the task manager tying slots, ids and both queues together
//! - `cipher`: ChaCha20 block function (RFC 8439)
//! - `keystream` / `accel`: keystream sources, including the FpgaCha driver
//! - `worker` / `cryptor`: producer and consumer roles
//! - `pipeline`: runs the roles on scoped threads
//! - `config`, `metrics`, `error`: ambient concerns
//!
//! Memory held by the pool stays constant regardless of stream length.

pub mod accel;
pub mod cipher;
pub mod config;
pub mod cryptor;
pub mod error;
pub mod keystream;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod reorder;
pub mod task;
pub mod worker;

pub use cipher::State;
pub use config::{Engine, OtpConfig};
pub use error::{Error, Result};
pub use manager::TaskManager;
pub use pipeline::PipelineReport;
pub use task::Task;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of slots in the pool
pub const DEFAULT_SLOTS: usize = 8;

/// Default keystream blocks per slot (1 MiB)
pub const DEFAULT_SLOT_BLOCKS: usize = 16 * 1024;
