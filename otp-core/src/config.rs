// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Configuration management for the OTP pipeline

use crate::cipher::{State, BLOCK_WORDS};
use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for every setting
pub const ENV_PREFIX: &str = "OTP_";

/// Keystream engine used by the workers
///
/// Every engine produces real keystream. Fake workers, which leave the
/// slots untouched, are only reachable from benchmarks.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    /// Software ChaCha20 core
    Software,
    /// Two-stage accelerator worker on the software accelerator model
    AcceleratorSim,
    /// FpgaCha core on a UIO device, slots in a udmabuf region
    Fpga,
}

impl Default for Engine {
    fn default() -> Self {
        Self::Software
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OtpConfig {
    /// 256-bit key, hex-encoded
    pub key: String,

    /// 96-bit nonce, hex-encoded
    pub nonce: String,

    /// Block counter of the first keystream block
    #[serde(default = "default_initial_counter")]
    pub initial_counter: u32,

    /// Number of slots circulating in the pipeline
    #[serde(default = "default_slots")]
    pub slots: usize,

    /// Keystream blocks per slot
    #[serde(default = "default_slot_blocks")]
    pub slot_blocks: usize,

    #[serde(default)]
    pub engine: Engine,

    /// Worker instances sharing the task manager
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Summation threads per accelerator worker
    #[serde(default = "default_summation_threads")]
    pub summation_threads: usize,

    /// UIO device of the FpgaCha core (`fpga` engine)
    #[serde(default = "default_fpga_uio")]
    pub fpga_uio: String,

    /// udmabuf device holding the slots (`fpga` engine)
    #[serde(default = "default_fpga_udmabuf")]
    pub fpga_udmabuf: String,
}

impl OtpConfig {
    /// Load configuration from `OTP_*` environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, with `OTP_*` environment overrides
    ///
    /// The format follows the file extension (YAML, JSON, TOML). Quote hex
    /// strings in YAML so they are not read as numbers.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("OTP"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if decode_hex::<32>("key", &self.key).is_err() {
            return Err(Error::Config("key must be 64 hex characters (32 bytes)".to_string()));
        }
        if decode_hex::<12>("nonce", &self.nonce).is_err() {
            return Err(Error::Config("nonce must be 24 hex characters (12 bytes)".to_string()));
        }

        if self.slots == 0 {
            return Err(Error::Config("slots must be > 0".to_string()));
        }
        if self.slot_blocks == 0 {
            return Err(Error::Config("slot_blocks must be > 0".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be > 0".to_string()));
        }
        if self.summation_threads == 0 {
            return Err(Error::Config("summation_threads must be > 0".to_string()));
        }
        if self.engine == Engine::Fpga && self.workers != 1 {
            return Err(Error::Config("the fpga engine drives one core, workers must be 1".to_string()));
        }

        // One transfer to the accelerator counts blocks in 32 bits, and the
        // backing buffer must be addressable
        if self.slot_blocks > MAX_SLOT_BLOCKS {
            return Err(Error::Config(format!(
                "slot_blocks must be <= {}",
                MAX_SLOT_BLOCKS
            )));
        }
        self.slots
            .checked_mul(self.slot_blocks * BLOCK_WORDS)
            .ok_or_else(|| Error::Config("slots * slot_blocks overflows the buffer size".to_string()))?;

        Ok(())
    }

    /// Cipher state for block 0 of the stream
    pub fn state(&self) -> Result<State> {
        let key = decode_hex::<32>("key", &self.key)?;
        let nonce = decode_hex::<12>("nonce", &self.nonce)?;
        Ok(State::from_bytes(&key, self.initial_counter, &nonce))
    }

    /// Words in the backing buffer for all slots
    pub fn buffer_words(&self) -> usize {
        self.slots * self.slot_blocks * BLOCK_WORDS
    }
}

/// Upper bound for `slot_blocks` (4 GiB of keystream per slot)
pub const MAX_SLOT_BLOCKS: usize = 1 << 26;

/// Freshly generated key and nonce
#[derive(Debug, Clone, Serialize)]
pub struct KeyMaterial {
    pub key: String,
    pub nonce: String,
}

impl KeyMaterial {
    /// Draw a random key and nonce from the OS generator
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        let mut nonce = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut key);
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        Self {
            key: hex::encode(key),
            nonce: hex::encode(nonce),
        }
    }
}

fn decode_hex<const N: usize>(name: &str, value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value.trim())?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::Config(format!("{} must be {} bytes, got {}", name, N, bytes.len()))
    })
}

// Default value functions
fn default_initial_counter() -> u32 {
    1
}

fn default_slots() -> usize {
    crate::DEFAULT_SLOTS
}

fn default_slot_blocks() -> usize {
    crate::DEFAULT_SLOT_BLOCKS
}

fn default_workers() -> usize {
    1
}

fn default_summation_threads() -> usize {
    1
}

fn default_fpga_uio() -> String {
    "uio0".to_string()
}

fn default_fpga_udmabuf() -> String {
    "udmabuf0".to_string()
}
