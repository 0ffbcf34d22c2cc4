// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! otp-crypt - ChaCha20 stream encryption through the OTP pipeline
//!
//! Encrypts or decrypts a file by XORing it with a ChaCha20 keystream that
//! a pool of workers generates ahead of the cryptor.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   scheduled ───>│   Workers    │─── finished (by id) ───┐
//!       ▲         │ (keystream)  │                        ▼
//!       │         └──────────────┘                 ┌──────────────┐
//!       └──────────── recycle slot ────────────────│   Cryptor    │── output
//!                                                  │    (XOR)     │
//!                                                  └──────────────┘
//! ```
//!
//! Configuration comes from `--config <file>` or `OTP_*` environment
//! variables. SIGINT/SIGTERM shut the pipeline down while it runs and
//! terminate the process after that.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use otp_core::config::KeyMaterial;
use otp_core::cryptor::{Cryptor, FakeCryptor, StreamCryptor};
use otp_core::worker::{FakeWorker, Worker};
use otp_core::pipeline::SlotMemory;
use otp_core::{pipeline, OtpConfig, PipelineReport, TaskManager};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "otp-crypt")]
#[command(about = "ChaCha20 OTP pipeline - concurrent keystream generation and XOR", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (YAML, JSON or TOML); environment is used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt or decrypt a file (the operation is its own inverse)
    Crypt { input: PathBuf, output: PathBuf },

    /// Measure pipeline throughput without touching files
    Bench {
        /// Keystream bytes to consume
        #[arg(long)]
        bytes: u64,

        /// Replace the workers with fake ones to measure the cryptor side
        #[arg(long)]
        fake_worker: bool,
    },

    /// Print a random key and nonce
    Keygen,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    info!("otp-crypt v{}", otp_core::VERSION);

    if let Command::Keygen = args.command {
        println!("{}", serde_json::to_string_pretty(&KeyMaterial::generate())?);
        return Ok(());
    }

    let config = load_config(&args)?;
    info!(
        engine = ?config.engine,
        workers = config.workers,
        slots = config.slots,
        slot_blocks = config.slot_blocks,
        "Configuration loaded"
    );

    match args.command {
        Command::Crypt { input, output } => crypt(&config, &input, &output),
        Command::Bench { bytes, fake_worker } => bench(&config, bytes, fake_worker),
        Command::Keygen => Ok(()),
    }
}

fn load_config(args: &Args) -> Result<OtpConfig> {
    match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            OtpConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => {
            info!("Loading configuration from environment variables");
            OtpConfig::from_env().context("Failed to load configuration from environment")
        }
    }
}

fn crypt(config: &OtpConfig, input_path: &Path, output_path: &Path) -> Result<()> {
    let input = fs::read(input_path).with_context(|| format!("Failed to read {}", input_path.display()))?;
    pipeline::validate_stream(input.len() as u64, config.initial_counter)?;

    let mut output = vec![0u8; input.len()];
    let (mut memory, mut workers) = pipeline::prepare(config)?;
    let mut cryptor = StreamCryptor::new(&input, &mut output)?;
    let report = run_pipeline(config, &mut memory, &mut cryptor, &mut workers)?;

    fs::write(output_path, &output).with_context(|| format!("Failed to write {}", output_path.display()))?;
    info!(
        bytes = report.bytes,
        output = %output_path.display(),
        "Output written"
    );
    Ok(())
}

fn bench(config: &OtpConfig, bytes: u64, fake_worker: bool) -> Result<()> {
    pipeline::validate_stream(bytes, config.initial_counter)?;

    let (mut memory, mut workers) = if fake_worker {
        let workers: Vec<Box<dyn Worker>> = (0..config.workers)
            .map(|_| Box::new(FakeWorker) as Box<dyn Worker>)
            .collect();
        (SlotMemory::heap(config.buffer_words()), workers)
    } else {
        pipeline::prepare(config)?
    };
    let mut cryptor = FakeCryptor::new(bytes);
    let report = run_pipeline(config, &mut memory, &mut cryptor, &mut workers)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the pipeline over `memory`, shutting it down on signals
fn run_pipeline(
    config: &OtpConfig,
    memory: &mut SlotMemory,
    cryptor: &mut dyn Cryptor,
    workers: &mut [Box<dyn Worker>],
) -> Result<PipelineReport> {
    let tasks = TaskManager::new(memory.words_mut(), config.slots)?;

    thread::scope(|s| {
        let _signals = watch_signals(s, &tasks)?;
        let report = pipeline::run(&tasks, cryptor, workers)?;
        Ok(report)
    })
}

/// Stops the signal thread when dropped
///
/// From then on SIGINT/SIGTERM exit the process, so a signal during the
/// output write is not lost.
struct SignalWatcher {
    released: Arc<AtomicBool>,
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        #[cfg(unix)]
        self.handle.close();
    }
}

/// Shut the pipeline down on SIGINT or SIGTERM
#[cfg(unix)]
fn watch_signals<'scope, 'a>(
    s: &'scope thread::Scope<'scope, '_>,
    tasks: &'scope TaskManager<'a>,
) -> Result<SignalWatcher> {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let released = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 128 + signal, Arc::clone(&released))
            .context("Failed to register signal handlers")?;
    }

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    let handle = signals.handle();

    s.spawn(move || {
        for signal in signals.forever() {
            tracing::warn!(signal, "Received signal, shutting down pipeline");
            tasks.shutdown();
        }
    });

    Ok(SignalWatcher { released, handle })
}

#[cfg(not(unix))]
fn watch_signals<'scope, 'a>(
    _s: &'scope thread::Scope<'scope, '_>,
    _tasks: &'scope TaskManager<'a>,
) -> Result<SignalWatcher> {
    Ok(SignalWatcher {
        released: Arc::new(AtomicBool::new(false)),
    })
}
