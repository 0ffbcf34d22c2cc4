// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! OTP task: a sequence number plus exclusive access to one buffer slot

use crate::cipher::BLOCK_WORDS;
use std::fmt;

/// Request for, or result of, one slot's worth of keystream
///
/// The slot borrows a fixed region of the backing buffer. Moving the task
/// between threads moves the only handle to that region, so exactly one
/// thread can touch a slot at any time.
pub struct Task<'a> {
    pub(crate) id: u64,
    slot: &'a mut [u32],
}

impl<'a> Task<'a> {
    pub(crate) fn new(slot: &'a mut [u32]) -> Self {
        Self { id: 0, slot }
    }

    /// Sequence number assigned by the task manager
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Keystream words held by the slot
    pub fn words(&self) -> &[u32] {
        &*self.slot
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut *self.slot
    }

    /// Slot size in bytes
    pub fn byte_len(&self) -> usize {
        self.slot.len() * 4
    }

    /// Number of whole keystream blocks that fit the slot
    pub fn block_count(&self) -> usize {
        self.slot.len() / BLOCK_WORDS
    }

    /// Block counter of the first block in this task
    ///
    /// Derived from the id, so tasks can be computed in any order:
    /// `base + id * block_count`, wrapping like the 32-bit counter word.
    pub fn counter(&self, base: u32) -> u32 {
        let offset = self.id.wrapping_mul(self.block_count() as u64);
        base.wrapping_add(offset as u32)
    }
}

impl fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("words", &self.slot.len())
            .finish()
    }
}
