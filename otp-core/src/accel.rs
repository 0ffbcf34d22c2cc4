// SPDX-License-Identifier: MIT
//
// ChaCha20 OTP Pipeline: Concurrent Keystream Generation and Bulk XOR
// Copyright (c) 2025 ChaCha OTP Pipeline Contributors
//
// https://github.com/yourusername/chacha-otp

//! Keystream accelerator interfaces and the FpgaCha driver
//!
//! The FpgaCha IP core computes the ChaCha20 rounds in hardware and streams
//! the permuted blocks into memory through a stream-to-memory (S2M) DMA
//! adapter. It does not perform the final feed-forward addition; the
//! accelerator worker does that in software.
//!
//! The driver is written against three small collaborator traits so it can
//! run on a UIO mapping, a simulator or a recording mock:
//!
//! - [`RegisterBus`]: 32-bit register access at byte offsets
//! - [`InterruptLine`]: arm and wait for the completion interrupt
//! - [`DmaRegion`]: physical address translation and cache maintenance
//!
//! On Linux the core is reached through a UIO device for the registers and
//! interrupt and a udmabuf device for the slot memory; see [`DevicePaths`].

use crate::cipher::{self, State, BLOCK_WORDS};
use crate::keystream::check_whole_blocks;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(unix)]
use std::{io, os::unix::io::AsRawFd, ptr, ptr::NonNull, slice};

/// Register map, byte offsets from the start of the device window
pub mod regs {
    /// Cipher core window
    pub const CHACHA20_BASE: u32 = 0x000;
    /// 16 state words at 0x00..0x3C
    pub const STATE: u32 = CHACHA20_BASE;
    pub const PAD_COUNT: u32 = CHACHA20_BASE + 0x40;
    pub const ROUND_COUNT: u32 = CHACHA20_BASE + 0x44;
    pub const PROBE: u32 = CHACHA20_BASE + 0x48;

    /// Stream-to-memory adapter window
    pub const S2M_BASE: u32 = 0x100;
    pub const S2M_LENGTH: u32 = S2M_BASE;
    pub const S2M_ADDRESS: u32 = S2M_BASE + 0x04;
    pub const S2M_IRQ: u32 = S2M_BASE + 0x08;

    /// Bytes a register mapping must cover
    pub const WINDOW_BYTES: u32 = S2M_IRQ + 0x04;

    /// Value the probe register reads back on a healthy core
    pub const PROBE_MAGIC: u32 = 0xfb7e_03d9;
}

/// 32-bit device register access
///
/// Accesses must reach the device in call order.
pub trait RegisterBus: Send {
    fn write_register(&mut self, offset: u32, value: u32);
    fn read_register(&mut self, offset: u32) -> u32;
}

/// Completion interrupt of the S2M adapter
pub trait InterruptLine: Send {
    /// Arm the interrupt for the next completion
    fn enable(&mut self) -> Result<()>;

    /// Block until the interrupt fires
    fn wait(&mut self) -> Result<()>;
}

/// DMA-capable memory the slots live in
pub trait DmaRegion: Send {
    /// Bus address of the first word of `words`
    fn to_physical(&self, words: &[u32]) -> Result<u32>;

    /// Hand `words` to the device before it writes them
    fn sync_for_device(&self, words: &[u32]) -> Result<()>;

    /// Take `words` back from the device before the CPU reads them
    fn sync_for_cpu(&self, words: &[u32]) -> Result<()>;
}

/// Computes the ChaCha20 permutation for consecutive counters
pub trait Accelerator: Send {
    /// Write the 20-round output for `out.len() / 16` blocks starting at
    /// `state.counter`, without the feed-forward addition
    ///
    /// Blocks until the whole buffer has been written.
    fn permute(&mut self, state: &State, out: &mut [u32]) -> Result<()>;
}

/// Diagnostic view of the cipher core registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreStatus {
    pub probe: u32,
    pub pad_count: u32,
    pub round_count: u32,
}

impl CoreStatus {
    pub fn probe_ok(&self) -> bool {
        self.probe == regs::PROBE_MAGIC
    }
}

/// Driver for the FpgaCha IP core
pub struct FpgaCha<B, I, D> {
    bus: B,
    irq: I,
    dma: D,
}

impl<B: RegisterBus, I: InterruptLine, D: DmaRegion> FpgaCha<B, I, D> {
    pub fn new(bus: B, irq: I, dma: D) -> Self {
        Self { bus, irq, dma }
    }

    /// Check that a FpgaCha core answers on the bus
    pub fn probe(&mut self) -> Result<()> {
        let status = self.status();
        if !status.probe_ok() {
            return Err(Error::Accelerator(format!(
                "probe register reads {:#010x}, expected {:#010x}",
                status.probe,
                regs::PROBE_MAGIC
            )));
        }
        info!(
            pad_count = status.pad_count,
            round_count = status.round_count,
            "FpgaCha core detected"
        );
        Ok(())
    }

    pub fn status(&mut self) -> CoreStatus {
        CoreStatus {
            probe: self.bus.read_register(regs::PROBE),
            pad_count: self.bus.read_register(regs::PAD_COUNT),
            round_count: self.bus.read_register(regs::ROUND_COUNT),
        }
    }

    fn write_state(&mut self, state: &State) {
        for (i, word) in state.to_words().iter().enumerate() {
            self.bus.write_register(regs::STATE + 4 * i as u32, *word);
        }
    }
}

impl<B: RegisterBus, I: InterruptLine, D: DmaRegion> Accelerator for FpgaCha<B, I, D> {
    fn permute(&mut self, state: &State, out: &mut [u32]) -> Result<()> {
        check_whole_blocks(out)?;
        let blocks = u32::try_from(out.len() / BLOCK_WORDS)
            .map_err(|_| Error::Validation("too many blocks for one transfer".to_string()))?;
        if blocks == 0 {
            return Ok(());
        }
        // The adapter moves 256-bit beats, two per block
        let beats = blocks
            .checked_mul(2)
            .ok_or_else(|| Error::Validation("too many blocks for one transfer".to_string()))?;

        self.dma.sync_for_device(out)?;
        let physical = self.dma.to_physical(out)?;

        self.write_state(state);
        self.bus.write_register(regs::S2M_IRQ, 0);
        self.bus.write_register(regs::PAD_COUNT, blocks);
        self.irq.enable()?;
        // Writing the length starts the transfer
        self.bus.write_register(regs::S2M_ADDRESS, physical);
        self.bus.write_register(regs::S2M_LENGTH, beats);

        self.irq.wait()?;
        self.dma.sync_for_cpu(out)?;

        debug!(counter = state.counter, blocks, physical, "FpgaCha transfer complete");
        Ok(())
    }
}

/// Software stand-in for the FpgaCha core
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftAccelerator;

impl Accelerator for SoftAccelerator {
    fn permute(&mut self, state: &State, out: &mut [u32]) -> Result<()> {
        check_whole_blocks(out)?;

        let mut counter = state.counter;
        for chunk in out.chunks_exact_mut(BLOCK_WORDS) {
            let mut words = state.with_counter(counter).to_words();
            cipher::rounds(&mut words);
            chunk.copy_from_slice(&words);
            counter = counter.wrapping_add(1);
        }
        Ok(())
    }
}

/// UIO interrupt line: writing 1 arms it, a 4-byte read blocks until it fires
pub struct UioInterrupt {
    device: File,
    name: String,
}

impl UioInterrupt {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let device = File::options().read(true).write(true).open(path)?;
        Ok(Self {
            device,
            name: path.display().to_string(),
        })
    }
}

impl InterruptLine for UioInterrupt {
    fn enable(&mut self) -> Result<()> {
        self.device
            .write_all(&1u32.to_ne_bytes())
            .map_err(|e| Error::Accelerator(format!("enabling interrupts for '{}': {}", self.name, e)))
    }

    fn wait(&mut self) -> Result<()> {
        let mut count = [0u8; 4];
        self.device
            .read_exact(&mut count)
            .map_err(|e| Error::Accelerator(format!("waiting for interrupt from '{}': {}", self.name, e)))
    }
}

/// Cache sync direction written to the udmabuf sysfs attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncDirection {
    ForCpu = 1,
    ForDevice = 2,
}

/// udmabuf-backed DMA region
///
/// `base` is the address of the first word of the mapping the slots were
/// carved from; slot addresses are translated relative to it.
pub struct Udmabuf {
    sysfs_dir: PathBuf,
    physical: u32,
    base: usize,
    len_words: usize,
}

impl Udmabuf {
    /// Open the region described by `sysfs_dir` (e.g. `/sys/class/udmabuf/udmabuf0`)
    pub fn open(sysfs_dir: impl Into<PathBuf>, mapping: &[u32]) -> Result<Self> {
        let sysfs_dir = sysfs_dir.into();
        let physical = read_property(&sysfs_dir.join("phys_addr"))?;
        Ok(Self {
            sysfs_dir,
            physical,
            base: mapping.as_ptr() as usize,
            len_words: mapping.len(),
        })
    }

    fn offset_bytes(&self, words: &[u32]) -> Result<u32> {
        let start = words.as_ptr() as usize;
        let end = start + words.len() * 4;
        if start < self.base || end > self.base + self.len_words * 4 {
            return Err(Error::Accelerator("buffer lies outside the DMA region".to_string()));
        }
        u32::try_from(start - self.base)
            .map_err(|_| Error::Accelerator("DMA offset exceeds 32 bits".to_string()))
    }

    fn sync(&self, words: &[u32], direction: SyncDirection) -> Result<()> {
        let offset = self.offset_bytes(words)?;
        let command = sync_command(offset, (words.len() * 4) as u32, direction);
        let attribute = match direction {
            SyncDirection::ForCpu => "sync_for_cpu",
            SyncDirection::ForDevice => "sync_for_device",
        };
        let path = self.sysfs_dir.join(attribute);
        fs::write(&path, command)
            .map_err(|e| Error::Accelerator(format!("writing '{}': {}", path.display(), e)))
    }
}

impl DmaRegion for Udmabuf {
    fn to_physical(&self, words: &[u32]) -> Result<u32> {
        let offset = self.offset_bytes(words)?;
        self.physical
            .checked_add(offset)
            .ok_or_else(|| Error::Accelerator("physical address overflow".to_string()))
    }

    fn sync_for_device(&self, words: &[u32]) -> Result<()> {
        self.sync(words, SyncDirection::ForDevice)
    }

    fn sync_for_cpu(&self, words: &[u32]) -> Result<()> {
        self.sync(words, SyncDirection::ForCpu)
    }
}

/// `0x<offset:8><flags:8>`: size rounded down to 16 bytes, direction, enable bit
fn sync_command(offset: u32, size: u32, direction: SyncDirection) -> String {
    let flags = (size & 0xFFFF_FFF0) | ((direction as u32) << 2) | 1;
    format!("0x{:08x}{:08x}", offset, flags)
}

/// Read a decimal or `0x` hex number from a sysfs attribute
fn read_property(path: &Path) -> Result<u32> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Accelerator(format!("reading '{}': {}", path.display(), e)))?;
    let value = content.trim();
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| Error::Accelerator(format!("unexpected content '{}' in '{}'", value, path.display())))
}

/// Shared read/write mapping of a device file such as `/dev/uio0`
#[cfg(unix)]
pub struct DeviceMapping {
    ptr: NonNull<u32>,
    words: usize,
    name: String,
}

// The mapping is owned by exactly one value and only touched through it
#[cfg(unix)]
unsafe impl Send for DeviceMapping {}

#[cfg(unix)]
impl DeviceMapping {
    /// Map the first `bytes` bytes of `path`, rounded down to whole words
    pub fn open(path: impl AsRef<Path>, bytes: usize) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let words = bytes / 4;
        if words == 0 {
            return Err(Error::Accelerator(format!("'{}' has nothing to map", name)));
        }

        let device = File::options()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Accelerator(format!("opening '{}': {}", name, e)))?;

        // SAFETY: a fresh shared mapping of an open descriptor; the mapping
        // stays valid after the descriptor is closed
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                words * 4,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                device.as_raw_fd(),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(Error::Accelerator(format!(
                "mapping '{}': {}",
                name,
                io::Error::last_os_error()
            )));
        }
        let ptr = NonNull::new(raw.cast::<u32>())
            .ok_or_else(|| Error::Accelerator(format!("mapping '{}' returned null", name)))?;

        debug!(device = %name, bytes = words * 4, "Device mapped");
        Ok(Self { ptr, words, name })
    }

    pub fn len_words(&self) -> usize {
        self.words
    }

    pub fn words(&self) -> &[u32] {
        // SAFETY: `words` words were mapped readable and live until drop
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.words) }
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        // SAFETY: as above, and `&mut self` makes the borrow exclusive
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.words) }
    }

    fn register_index(&self, offset: u32) -> usize {
        let index = (offset / 4) as usize;
        assert!(
            index < self.words,
            "register {:#x} outside the {}-byte window of '{}'",
            offset,
            self.words * 4,
            self.name
        );
        index
    }
}

#[cfg(unix)]
impl Drop for DeviceMapping {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the range mapped in `open`
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.words * 4);
        }
    }
}

/// Register window of a UIO device, accessed with volatile loads and stores
#[cfg(unix)]
pub struct UioRegisters {
    window: DeviceMapping,
}

#[cfg(unix)]
impl UioRegisters {
    /// Wrap a mapping that covers the whole register map
    pub fn new(window: DeviceMapping) -> Result<Self> {
        if window.len_words() * 4 < regs::WINDOW_BYTES as usize {
            return Err(Error::Accelerator(format!(
                "register window of '{}' is {} bytes, need {}",
                window.name,
                window.len_words() * 4,
                regs::WINDOW_BYTES
            )));
        }
        Ok(Self { window })
    }
}

#[cfg(unix)]
impl RegisterBus for UioRegisters {
    fn write_register(&mut self, offset: u32, value: u32) {
        let index = self.window.register_index(offset);
        // SAFETY: `index` is inside the mapping
        unsafe { ptr::write_volatile(self.window.ptr.as_ptr().add(index), value) }
    }

    fn read_register(&mut self, offset: u32) -> u32 {
        let index = self.window.register_index(offset);
        // SAFETY: `index` is inside the mapping
        unsafe { ptr::read_volatile(self.window.ptr.as_ptr().add(index)) }
    }
}

/// FpgaCha reached through UIO and udmabuf
#[cfg(unix)]
pub type UioFpgaCha = FpgaCha<UioRegisters, UioInterrupt, Udmabuf>;

/// Where the Linux device nodes and their sysfs attributes live
#[derive(Debug, Clone)]
pub struct DevicePaths {
    pub dev: PathBuf,
    pub uio_class: PathBuf,
    pub udmabuf_class: PathBuf,
}

impl Default for DevicePaths {
    fn default() -> Self {
        Self {
            dev: PathBuf::from("/dev"),
            uio_class: PathBuf::from("/sys/class/uio"),
            udmabuf_class: PathBuf::from("/sys/class/udmabuf"),
        }
    }
}

#[cfg(unix)]
impl DevicePaths {
    /// Open the core on UIO device `uio`, probe it, and map udmabuf `udmabuf`
    ///
    /// Returns the driver together with the DMA memory the slots must be
    /// carved from.
    pub fn open_fpga(&self, uio: &str, udmabuf: &str) -> Result<(UioFpgaCha, DeviceMapping)> {
        let window_bytes = read_property(&self.uio_class.join(uio).join("maps/map0/size"))?;
        let bus = UioRegisters::new(DeviceMapping::open(self.dev.join(uio), window_bytes as usize)?)?;
        let irq = UioInterrupt::open(self.dev.join(uio))?;

        let sysfs_dir = self.udmabuf_class.join(udmabuf);
        let buffer_bytes = read_property(&sysfs_dir.join("size"))?;
        let memory = DeviceMapping::open(self.dev.join(udmabuf), buffer_bytes as usize)?;
        let dma = Udmabuf::open(sysfs_dir, memory.words())?;

        let mut core = FpgaCha::new(bus, irq, dma);
        core.probe()?;
        info!(uio, udmabuf, buffer_bytes, "FpgaCha opened");
        Ok((core, memory))
    }
}
