// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Keystream sources used by workers

use crate::cipher::{self, State, BLOCK_WORDS};
use crate::{Error, Result};

/// Fills a buffer with consecutive keystream blocks
///
/// Block `i` of `out` is the keystream block for counter
/// `state.counter + i`. Implementations must write every word of `out` or
/// return an error.
pub trait KeystreamSource: Send {
    fn fill(&mut self, state: &State, out: &mut [u32]) -> Result<()>;
}

/// Pure software ChaCha20 core
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareCore;

impl KeystreamSource for SoftwareCore {
    fn fill(&mut self, state: &State, out: &mut [u32]) -> Result<()> {
        check_whole_blocks(out)?;

        let mut counter = state.counter;
        for chunk in out.chunks_exact_mut(BLOCK_WORDS) {
            chunk.copy_from_slice(&cipher::block(&state.with_counter(counter)));
            counter = counter.wrapping_add(1);
        }
        Ok(())
    }
}

pub(crate) fn check_whole_blocks(out: &[u32]) -> Result<()> {
    if out.len() % BLOCK_WORDS != 0 {
        return Err(Error::Validation(format!(
            "keystream buffer of {} words is not a whole number of blocks",
            out.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> State {
        State::new([7; 8], 5, [1, 2, 3])
    }

    #[test]
    fn test_fill_matches_block_function() {
        let state = test_state();
        let mut out = vec![0u32; BLOCK_WORDS * 3];
        SoftwareCore.fill(&state, &mut out).unwrap();

        for (i, chunk) in out.chunks_exact(BLOCK_WORDS).enumerate() {
            let expected = cipher::block(&state.with_counter(5 + i as u32));
            assert_eq!(chunk, &expected[..]);
        }
    }

    #[test]
    fn test_partial_block_rejected() {
        let mut out = vec![0u32; BLOCK_WORDS + 1];
        let err = SoftwareCore.fill(&test_state(), &mut out).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_empty_fill_is_noop() {
        let mut out: Vec<u32> = Vec::new();
        assert!(SoftwareCore.fill(&test_state(), &mut out).is_ok());
    }
}
