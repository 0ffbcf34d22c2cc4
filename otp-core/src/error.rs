// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Error types for the OTP pipeline
//!
//! Shutdown of the task queues is not an error: queue operations report it
//! through `Option`/`bool`/[`Stopped`](crate::queue::Stopped) return values.
//! This enum covers configuration, collaborator and role failures.

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for OTP pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input data or buffer geometry validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Accelerator or one of its collaborators (registers, DMA, interrupts) failed
    #[error("Accelerator error: {0}")]
    Accelerator(String),

    /// The pipeline was shut down before the stream was fully processed
    #[error("Pipeline shut down after {processed} of {expected} bytes")]
    Aborted { processed: u64, expected: u64 },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error only reports that the pipeline was shut down early
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// Check if error was raised by an accelerator collaborator
    pub fn is_accelerator_fault(&self) -> bool {
        matches!(self, Error::Accelerator(_))
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Config(format!("Invalid hex: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let aborted = Error::Aborted { processed: 64, expected: 128 };
        assert!(aborted.is_shutdown());
        assert!(!aborted.is_accelerator_fault());

        let fault = Error::Accelerator("probe mismatch".to_string());
        assert!(fault.is_accelerator_fault());
        assert!(!fault.is_shutdown());
    }

    #[test]
    fn test_hex_error_maps_to_config() {
        let err: Error = hex::decode("zz").unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
