// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Pipeline metrics collection and reporting

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared pipeline counters
///
/// Cloning is cheap; all clones update the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Producer side
    tasks_finished: AtomicU64,
    blocks_generated: AtomicU64,
    worker_faults: AtomicU64,

    // Consumer side
    tasks_consumed: AtomicU64,
    bytes_processed: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub tasks_finished: u64,
    pub blocks_generated: u64,
    pub worker_faults: u64,
    pub tasks_consumed: u64,
    pub bytes_processed: u64,
    pub uptime_seconds: f64,
    pub bytes_per_second: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                tasks_finished: AtomicU64::new(0),
                blocks_generated: AtomicU64::new(0),
                worker_faults: AtomicU64::new(0),
                tasks_consumed: AtomicU64::new(0),
                bytes_processed: AtomicU64::new(0),
            }),
        }
    }

    // Producer metrics
    pub fn record_finished(&self, blocks: usize) {
        self.inner.tasks_finished.fetch_add(1, Ordering::Relaxed);
        self.inner.blocks_generated.fetch_add(blocks as u64, Ordering::Relaxed);
    }

    pub fn record_worker_fault(&self) {
        self.inner.worker_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_finished(&self) -> u64 {
        self.inner.tasks_finished.load(Ordering::Relaxed)
    }

    pub fn blocks_generated(&self) -> u64 {
        self.inner.blocks_generated.load(Ordering::Relaxed)
    }

    pub fn worker_faults(&self) -> u64 {
        self.inner.worker_faults.load(Ordering::Relaxed)
    }

    // Consumer metrics
    pub fn record_consumed(&self) {
        self.inner.tasks_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: usize) {
        self.inner.bytes_processed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn tasks_consumed(&self) -> u64 {
        self.inner.tasks_consumed.load(Ordering::Relaxed)
    }

    pub fn bytes_processed(&self) -> u64 {
        self.inner.bytes_processed.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn uptime_seconds(&self) -> f64 {
        self.inner.start_time.elapsed().as_secs_f64()
    }

    pub fn bytes_per_second(&self) -> f64 {
        let uptime = self.uptime_seconds();
        if uptime > 0.0 {
            self.bytes_processed() as f64 / uptime
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_finished: self.tasks_finished(),
            blocks_generated: self.blocks_generated(),
            worker_faults: self.worker_faults(),
            tasks_consumed: self.tasks_consumed(),
            bytes_processed: self.bytes_processed(),
            uptime_seconds: self.uptime_seconds(),
            bytes_per_second: self.bytes_per_second(),
        }
    }

    /// Generate Prometheus-compatible metrics output
    pub fn prometheus_format(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP otp_tasks_finished_total Tasks completed by workers\n");
        output.push_str("# TYPE otp_tasks_finished_total counter\n");
        output.push_str(&format!("otp_tasks_finished_total {}\n", self.tasks_finished()));

        output.push_str("# HELP otp_blocks_generated_total Keystream blocks generated\n");
        output.push_str("# TYPE otp_blocks_generated_total counter\n");
        output.push_str(&format!("otp_blocks_generated_total {}\n", self.blocks_generated()));

        output.push_str("# HELP otp_worker_faults_total Workers that stopped on an error\n");
        output.push_str("# TYPE otp_worker_faults_total counter\n");
        output.push_str(&format!("otp_worker_faults_total {}\n", self.worker_faults()));

        output.push_str("# HELP otp_tasks_consumed_total Tasks consumed by the cryptor\n");
        output.push_str("# TYPE otp_tasks_consumed_total counter\n");
        output.push_str(&format!("otp_tasks_consumed_total {}\n", self.tasks_consumed()));

        output.push_str("# HELP otp_bytes_processed_total Data bytes XORed with keystream\n");
        output.push_str("# TYPE otp_bytes_processed_total counter\n");
        output.push_str(&format!("otp_bytes_processed_total {}\n", self.bytes_processed()));

        output.push_str("# HELP otp_uptime_seconds Pipeline uptime in seconds\n");
        output.push_str("# TYPE otp_uptime_seconds gauge\n");
        output.push_str(&format!("otp_uptime_seconds {:.3}\n", self.uptime_seconds()));

        output
    }
}
