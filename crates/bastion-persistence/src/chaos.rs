//! Fault injection for exercising failure paths.
//!
//! Compiled for unit tests and with the `chaos` feature. Every fault stays
//! armed until cleared, so a test can assert on several operations in a row.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::compression::HEADER_LEN;
use crate::error::{PersistenceError, Result};
use crate::io::StagedFile;

const NO_TRUNCATION: usize = usize::MAX;

/// Switchable faults consulted by the orchestrator's write and read paths.
#[derive(Debug)]
pub struct FaultInjector {
    corrupt_bytes: AtomicUsize,
    truncate_to: AtomicUsize,
    fail_before_rename: AtomicBool,
    disk_full: AtomicBool,
    latency_ms: AtomicU64,
    triggered: AtomicU64,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self {
            corrupt_bytes: AtomicUsize::new(0),
            truncate_to: AtomicUsize::new(NO_TRUNCATION),
            fail_before_rename: AtomicBool::new(false),
            disk_full: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            triggered: AtomicU64::new(0),
        }
    }
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip `count` bytes of every written frame, spread over the payload.
    pub fn corrupt_bytes(&self, count: usize) {
        self.corrupt_bytes.store(count, Ordering::SeqCst);
    }

    /// Cut every written frame down to `len` bytes.
    pub fn truncate_to(&self, len: usize) {
        self.truncate_to.store(len, Ordering::SeqCst);
    }

    /// Fail after the temp file is synced and before it is renamed.
    pub fn fail_before_rename(&self, enabled: bool) {
        self.fail_before_rename.store(enabled, Ordering::SeqCst);
    }

    /// Report the device as full on the next writes.
    pub fn simulate_disk_full(&self, enabled: bool) {
        self.disk_full.store(enabled, Ordering::SeqCst);
    }

    /// Sleep this long at each I/O stage.
    pub fn add_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Disarm every fault.
    pub fn clear(&self) {
        self.corrupt_bytes(0);
        self.truncate_to.store(NO_TRUNCATION, Ordering::SeqCst);
        self.fail_before_rename(false);
        self.simulate_disk_full(false);
        self.latency_ms.store(0, Ordering::SeqCst);
    }

    /// How many times a fault actually fired.
    pub fn faults_triggered(&self) -> u64 {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn apply_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }

    /// Damage an outgoing buffer according to the armed faults.
    pub(crate) fn mangle(&self, bytes: &mut Vec<u8>) {
        let flips = self.corrupt_bytes.load(Ordering::SeqCst);
        if flips > 0 && !bytes.is_empty() {
            let start = if bytes.len() > HEADER_LEN { HEADER_LEN } else { 0 };
            let span = bytes.len() - start;
            let step = (span / flips).max(1);
            for i in 0..flips.min(span) {
                bytes[start + i * step] ^= 0xA5;
            }
            self.fire("corrupt bytes");
        }

        let len = self.truncate_to.load(Ordering::SeqCst);
        if len != NO_TRUNCATION && len < bytes.len() {
            bytes.truncate(len);
            self.fire("truncate");
        }
    }

    pub(crate) fn check_disk_full(&self, path: &Path) -> Result<()> {
        if self.disk_full.load(Ordering::SeqCst) {
            self.fire("disk full");
            return Err(PersistenceError::InsufficientSpace {
                path: path.to_path_buf(),
                source: Some(io::Error::from(io::ErrorKind::StorageFull)),
            });
        }
        Ok(())
    }

    pub(crate) fn check_before_rename(&self, staged: &StagedFile) -> Result<()> {
        if self.fail_before_rename.load(Ordering::SeqCst) {
            self.fire("fail before rename");
            return Err(PersistenceError::AtomicWriteFailed {
                temp_path: staged.temp_path().to_path_buf(),
                target_path: staged.target_path().to_path_buf(),
                source: io::Error::other("injected failure before rename"),
            });
        }
        Ok(())
    }

    fn fire(&self, fault: &'static str) {
        self.triggered.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(fault, "injected fault");
    }
}

/// XOR one byte of a file on disk.
pub fn corrupt_file_byte(path: &Path, offset: usize) -> io::Result<()> {
    let mut bytes = fs::read(path)?;
    if let Some(byte) = bytes.get_mut(offset) {
        *byte ^= 0xFF;
    }
    fs::write(path, bytes)
}

/// Cut a file on disk down to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) -> io::Result<()> {
    fs::OpenOptions::new().write(true).open(path)?.set_len(len)
}
