// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! ChaCha20 block function
//!
//! Implements the 20-round ChaCha permutation and keystream block function
//! from RFC 8439 over a 16-word state laid out as
//! `constants || key || counter || nonce`.

/// Words in one keystream block
pub const BLOCK_WORDS: usize = 16;

/// Bytes in one keystream block
pub const BLOCK_BYTES: usize = BLOCK_WORDS * 4;

/// "expand 32-byte k" as little-endian words
pub const DEFAULT_CONSTANTS: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// Cipher input: the full 16-word register file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub constants: [u32; 4],
    pub key: [u32; 8],
    pub counter: u32,
    pub nonce: [u32; 3],
}

impl State {
    /// Create a state with the standard constants
    pub fn new(key: [u32; 8], counter: u32, nonce: [u32; 3]) -> Self {
        Self {
            constants: DEFAULT_CONSTANTS,
            key,
            counter,
            nonce,
        }
    }

    /// Build a state from a byte key and nonce, read as little-endian words
    pub fn from_bytes(key: &[u8; 32], counter: u32, nonce: &[u8; 12]) -> Self {
        let mut key_words = [0u32; 8];
        for (word, chunk) in key_words.iter_mut().zip(key.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let mut nonce_words = [0u32; 3];
        for (word, chunk) in nonce_words.iter_mut().zip(nonce.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        Self::new(key_words, counter, nonce_words)
    }

    /// Same parameters, different block counter
    pub fn with_counter(&self, counter: u32) -> Self {
        Self { counter, ..*self }
    }

    pub fn to_words(&self) -> [u32; BLOCK_WORDS] {
        let mut words = [0u32; BLOCK_WORDS];
        words[0..4].copy_from_slice(&self.constants);
        words[4..12].copy_from_slice(&self.key);
        words[12] = self.counter;
        words[13..16].copy_from_slice(&self.nonce);
        words
    }
}

impl From<[u32; BLOCK_WORDS]> for State {
    fn from(words: [u32; BLOCK_WORDS]) -> Self {
        let mut state = State::new([0; 8], words[12], [0; 3]);
        state.constants.copy_from_slice(&words[0..4]);
        state.key.copy_from_slice(&words[4..12]);
        state.nonce.copy_from_slice(&words[13..16]);
        state
    }
}

#[inline(always)]
pub fn quarter_round(s: &mut [u32; BLOCK_WORDS], a: usize, b: usize, c: usize, d: usize) {
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(16);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(12);
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(8);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(7);
}

/// Ten double rounds: four column quarter-rounds then four diagonal ones
pub fn rounds(s: &mut [u32; BLOCK_WORDS]) {
    for _ in 0..10 {
        quarter_round(s, 0, 4, 8, 12);
        quarter_round(s, 1, 5, 9, 13);
        quarter_round(s, 2, 6, 10, 14);
        quarter_round(s, 3, 7, 11, 15);

        quarter_round(s, 0, 5, 10, 15);
        quarter_round(s, 1, 6, 11, 12);
        quarter_round(s, 2, 7, 8, 13);
        quarter_round(s, 3, 4, 9, 14);
    }
}

/// Add the input state to a permuted block, word by word mod 2^32
pub fn feed_forward(block: &mut [u32], input: &[u32; BLOCK_WORDS]) {
    for (word, original) in block.iter_mut().zip(input) {
        *word = word.wrapping_add(*original);
    }
}

/// Compute one keystream block for `state`
pub fn block(state: &State) -> [u32; BLOCK_WORDS] {
    let input = state.to_words();
    let mut output = input;
    rounds(&mut output);
    feed_forward(&mut output, &input);
    output
}

/// XOR `input` against keystream words serialised little-endian
///
/// `input` and `output` must have the same length, at most four bytes per
/// keystream word. A trailing partial word uses its low-order bytes.
pub fn xor_words(keystream: &[u32], input: &[u8], output: &mut [u8]) {
    debug_assert_eq!(input.len(), output.len());
    debug_assert!(input.len() <= keystream.len() * 4);

    for ((out, inp), word) in output
        .chunks_mut(4)
        .zip(input.chunks(4))
        .zip(keystream)
    {
        let pad = word.to_le_bytes();
        for ((o, i), p) in out.iter_mut().zip(inp).zip(pad) {
            *o = i ^ p;
        }
    }
}

/// Encrypt or decrypt `data` in place on a single thread
///
/// The keystream starts at `state.counter`. This is the reference the
/// pipeline output is checked against.
pub fn apply_keystream(state: &State, data: &mut [u8]) {
    let mut counter = state.counter;
    for chunk in data.chunks_mut(BLOCK_BYTES) {
        let keystream = block(&state.with_counter(counter));
        let input = chunk.to_vec();
        xor_words(&keystream, &input, chunk);
        counter = counter.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Key from the RFC 8439 examples (section 2.3.2)
    const RFC_KEY: [u32; 8] = [
        0x0302_0100, 0x0706_0504, 0x0b0a_0908, 0x0f0e_0d0c,
        0x1312_1110, 0x1716_1514, 0x1b1a_1918, 0x1f1e_1d1c,
    ];

    const RFC_NONCE: [u32; 3] = [0x0900_0000, 0x4a00_0000, 0x0000_0000];

    #[test]
    fn test_quarter_round_vector() {
        // RFC 8439 section 2.1.1
        let mut s = [0u32; BLOCK_WORDS];
        s[0] = 0x1111_1111;
        s[1] = 0x0102_0304;
        s[2] = 0x9b8d_6f43;
        s[3] = 0x0123_4567;
        quarter_round(&mut s, 0, 1, 2, 3);
        assert_eq!(&s[0..4], &[0xea2a_92f4, 0xcb1c_f8ce, 0x4581_472e, 0x5881_c4bb]);
    }

    #[test]
    fn test_block_vector() {
        // RFC 8439 section 2.3.2
        let state = State::new(RFC_KEY, 1, RFC_NONCE);
        let expected = [
            0xe4e7_f110, 0x1559_3bd1, 0x1fdd_0f50, 0xc471_20a3,
            0xc7f4_d1c7, 0x0368_c033, 0x9aaa_2204, 0x4e6c_d4c3,
            0x4664_82d2, 0x09aa_9f07, 0x05d7_c214, 0xa202_8bd9,
            0xd19c_12b5, 0xb94e_16de, 0xe883_d0cb, 0x4e3c_50a2,
        ];
        assert_eq!(block(&state), expected);
    }

    #[test]
    fn test_from_bytes_matches_words() {
        let key: [u8; 32] = std::array::from_fn(|i| i as u8);
        let nonce = [0, 0, 0, 0x09, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let state = State::from_bytes(&key, 1, &nonce);
        assert_eq!(state, State::new(RFC_KEY, 1, RFC_NONCE));
    }

    #[test]
    fn test_words_round_trip_layout() {
        let state = State::new(RFC_KEY, 7, RFC_NONCE);
        let words = state.to_words();
        assert_eq!(&words[0..4], &DEFAULT_CONSTANTS);
        assert_eq!(words[12], 7);
        assert_eq!(State::from(words), state);
    }

    #[test]
    fn test_sunscreen_encryption() {
        // RFC 8439 section 2.4.2
        let key: [u8; 32] = std::array::from_fn(|i| i as u8);
        let nonce = [0, 0, 0, 0, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let state = State::from_bytes(&key, 1, &nonce);

        let mut data = b"Ladies and Gentlemen of the class of '99: If I could offer you \
only one tip for the future, sunscreen would be it."
            .to_vec();
        apply_keystream(&state, &mut data);

        assert_eq!(
            &data[..16],
            &[0x6e, 0x2e, 0x35, 0x9a, 0x25, 0x68, 0xf9, 0x80, 0x41, 0xba, 0x07, 0x28, 0xdd, 0x0d, 0x69, 0x81]
        );
        assert_eq!(&data[data.len() - 2..], &[0x87, 0x4d]);
    }

    #[test]
    fn test_xor_words_partial_tail() {
        let keystream = [0x0403_0201u32, 0x0807_0605];
        let input = [0u8; 6];
        let mut output = [0u8; 6];
        xor_words(&keystream, &input, &mut output);
        assert_eq!(output, [1, 2, 3, 4, 5, 6]);
    }

    proptest! {
        #[test]
        fn prop_xor_is_self_inverse(
            message in proptest::collection::vec(any::<u8>(), 0..600),
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; 12]>(),
            counter in 0u32..1024,
        ) {
            let state = State::from_bytes(&key, counter, &nonce);
            let mut data = message.clone();
            apply_keystream(&state, &mut data);
            apply_keystream(&state, &mut data);
            prop_assert_eq!(data, message);
        }
    }
}
