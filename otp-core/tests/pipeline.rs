// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! End-to-end pipeline tests against an independent ChaCha20 implementation

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use otp_core::accel::SoftAccelerator;
use otp_core::cipher::BLOCK_WORDS;
use otp_core::cryptor::{FakeCryptor, StreamCryptor};
use otp_core::keystream::KeystreamSource;
use otp_core::pipeline;
use otp_core::worker::{AcceleratorWorker, FakeWorker, KeystreamWorker, Worker};
use otp_core::{Error, Result, State, TaskManager};
use std::thread;
use std::time::{Duration, Instant};

/// Encrypt with the RustCrypto implementation, starting at block `counter`
fn oracle(key: &[u8; 32], nonce: &[u8; 12], counter: u32, data: &[u8]) -> Vec<u8> {
    let mut cipher = ChaCha20::new(key.into(), nonce.into());
    cipher.seek(counter as u64 * 64);
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

#[test]
fn test_four_slots_four_blocks_known_ciphertext() {
    let key = [0u8; 32];
    let nonce = [0u8; 12];
    let state = State::from_bytes(&key, 0, &nonce);

    // One block per slot, four slots, four blocks of zero plaintext
    let plaintext = vec![0u8; 4 * 64];
    let mut ciphertext = vec![0u8; plaintext.len()];
    let mut buffer = vec![0u32; 4 * BLOCK_WORDS];
    let tasks = TaskManager::new(&mut buffer, 4).unwrap();
    assert_eq!(tasks.blocks_per_task(), 1);

    let mut workers: Vec<Box<dyn Worker>> = vec![Box::new(KeystreamWorker::software(state))];
    let mut cryptor = StreamCryptor::new(&plaintext, &mut ciphertext).unwrap();
    let report = pipeline::run(&tasks, &mut cryptor, &mut workers).unwrap();

    assert_eq!(report.bytes, 256);
    assert_eq!(report.metrics.tasks_consumed, 4);
    assert!(tasks.is_shutdown());

    // RFC 8439 appendix A.1, test vector #1: all-zero key, nonce and counter
    let first_block = [
        0x76, 0xb8, 0xe0, 0xad, 0xa0, 0xf1, 0x3d, 0x90, 0x40, 0x5d, 0x6a, 0xe5, 0x53, 0x86, 0xbd, 0x28,
        0xbd, 0xd2, 0x19, 0xb8, 0xa0, 0x8d, 0xed, 0x1a, 0xa8, 0x36, 0xef, 0xcc, 0x8b, 0x77, 0x0d, 0xc7,
        0xda, 0x41, 0x59, 0x7c, 0x51, 0x57, 0x48, 0x8d, 0x77, 0x24, 0xe0, 0x3f, 0xb8, 0xd8, 0x4a, 0x37,
        0x6a, 0x43, 0xb8, 0xf4, 0x15, 0x18, 0xa1, 0x1c, 0xc3, 0x87, 0xb6, 0x69, 0xb2, 0xee, 0x65, 0x86,
    ];
    assert_eq!(&ciphertext[..64], &first_block[..]);
    assert_eq!(ciphertext, oracle(&key, &nonce, 0, &plaintext));
}

#[test]
fn test_multiple_software_workers_match_oracle() {
    let key: [u8; 32] = std::array::from_fn(|i| (i * 3) as u8);
    let nonce = [0x42u8; 12];
    let state = State::from_bytes(&key, 1, &nonce);

    // Not a multiple of the slot size, the block size or the word size
    let input = sample_data(100_003);
    let mut output = vec![0u8; input.len()];
    let mut buffer = vec![0u32; 6 * 8 * BLOCK_WORDS];
    let tasks = TaskManager::new(&mut buffer, 6).unwrap();

    let mut workers: Vec<Box<dyn Worker>> = (0..4)
        .map(|_| Box::new(KeystreamWorker::software(state)) as Box<dyn Worker>)
        .collect();
    let mut cryptor = StreamCryptor::new(&input, &mut output).unwrap();
    pipeline::run(&tasks, &mut cryptor, &mut workers).unwrap();

    assert_eq!(output, oracle(&key, &nonce, 1, &input));
}

#[test]
fn test_accelerator_workers_match_oracle() {
    let key = [0x5au8; 32];
    let nonce: [u8; 12] = std::array::from_fn(|i| i as u8);
    let state = State::from_bytes(&key, 7, &nonce);

    let input = sample_data(50_000);
    let mut output = vec![0u8; input.len()];
    let mut buffer = vec![0u32; 5 * 3 * BLOCK_WORDS];
    let tasks = TaskManager::new(&mut buffer, 5).unwrap();

    let mut workers: Vec<Box<dyn Worker>> = vec![
        Box::new(AcceleratorWorker::new(SoftAccelerator, state, 3)),
        Box::new(AcceleratorWorker::new(SoftAccelerator, state, 1)),
    ];
    let mut cryptor = StreamCryptor::new(&input, &mut output).unwrap();
    pipeline::run(&tasks, &mut cryptor, &mut workers).unwrap();

    assert_eq!(output, oracle(&key, &nonce, 7, &input));
}

#[test]
fn test_decrypt_restores_plaintext() {
    let config = otp_core::OtpConfig {
        key: "7f".repeat(32),
        nonce: "01".repeat(12),
        initial_counter: 1,
        slots: 4,
        slot_blocks: 2,
        engine: otp_core::Engine::Software,
        workers: 3,
        summation_threads: 1,
        fpga_uio: "uio0".to_string(),
        fpga_udmabuf: "udmabuf0".to_string(),
    };
    let plaintext = sample_data(9_999);
    let mut ciphertext = vec![0u8; plaintext.len()];
    let mut decrypted = vec![0u8; plaintext.len()];

    pipeline::crypt(&config, &plaintext, &mut ciphertext).unwrap();
    assert_ne!(ciphertext, plaintext);
    pipeline::crypt(&config, &ciphertext, &mut decrypted).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn test_fake_roles_complete() {
    let mut buffer = vec![0u32; 3 * BLOCK_WORDS];
    let tasks = TaskManager::new(&mut buffer, 3).unwrap();
    let mut workers: Vec<Box<dyn Worker>> = vec![Box::new(FakeWorker), Box::new(FakeWorker)];

    let report = pipeline::run(&tasks, &mut FakeCryptor::new(64 * 1000), &mut workers).unwrap();
    assert_eq!(report.bytes, 64_000);
    assert_eq!(report.metrics.tasks_consumed, 1000);
}

#[test]
fn test_external_shutdown_aborts_within_bounded_time() {
    let state = State::new([0; 8], 0, [0; 3]);
    let mut buffer = vec![0u32; 4 * BLOCK_WORDS];
    let tasks = TaskManager::new(&mut buffer, 4).unwrap();
    let mut workers: Vec<Box<dyn Worker>> = vec![Box::new(KeystreamWorker::software(state))];

    let started = Instant::now();
    let result = thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            tasks.shutdown();
        });
        pipeline::run(&tasks, &mut FakeCryptor::new(u64::MAX), &mut workers)
    });

    let err = result.unwrap_err();
    assert!(err.is_shutdown());
    assert!(started.elapsed() < Duration::from_secs(10));
}

struct BrokenSource;

impl KeystreamSource for BrokenSource {
    fn fill(&mut self, _state: &State, _out: &mut [u32]) -> Result<()> {
        Err(Error::Accelerator("DMA transfer failed".to_string()))
    }
}

#[test]
fn test_worker_fault_reported_over_abort() {
    let state = State::new([0; 8], 0, [0; 3]);
    let mut buffer = vec![0u32; 4 * BLOCK_WORDS];
    let tasks = TaskManager::new(&mut buffer, 4).unwrap();
    let mut workers: Vec<Box<dyn Worker>> = vec![
        Box::new(KeystreamWorker::software(state)),
        Box::new(KeystreamWorker::new(BrokenSource, state)),
    ];

    let input = sample_data(1 << 20);
    let mut output = vec![0u8; input.len()];
    let mut cryptor = StreamCryptor::new(&input, &mut output).unwrap();
    let err = pipeline::run(&tasks, &mut cryptor, &mut workers).unwrap_err();

    assert!(err.is_accelerator_fault());
    assert_eq!(tasks.metrics().worker_faults(), 1);
}
