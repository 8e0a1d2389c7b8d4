//! Synthetic resource consumption
//!
//! `burn_cpu` deliberately blocks its thread for the whole duration; it
//! never yields to the async scheduler. Callers on the request path rely
//! on that to starve the single-threaded runtime.

use rand::Rng;
use std::hint::black_box;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Fill byte for allocated regions, so every page is actually touched
const FILL_BYTE: u8 = 1;

#[derive(Debug, Error)]
pub enum StressError {
    #[error("cannot allocate {megabytes} MB: out of memory")]
    OutOfMemory { megabytes: usize },
}

/// Busy-spin on floating-point work until `duration` of wall-clock time elapses
///
/// Returns the number of iterations performed.
pub fn burn_cpu(duration: Duration) -> u64 {
    let deadline = Instant::now() + duration;
    let mut rng = rand::rng();
    let mut acc = 0.0_f64;
    let mut iterations = 0_u64;

    while Instant::now() < deadline {
        // Batch the clock read so most cycles go to arithmetic.
        for _ in 0..1_000 {
            let a: f64 = rng.random();
            let b: f64 = rng.random();
            acc += black_box((a * b * 1e6).sqrt());
        }
        iterations += 1_000;
    }

    black_box(acc);
    iterations
}

/// Allocate a contiguous, filled region of `megabytes` MB
pub fn allocate(megabytes: usize) -> Result<Vec<u8>, StressError> {
    let size = megabytes
        .checked_mul(BYTES_PER_MB)
        .ok_or(StressError::OutOfMemory { megabytes })?;

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| StressError::OutOfMemory { megabytes })?;
    buffer.resize(size, FILL_BYTE);
    Ok(buffer)
}

/// Append-only set of buffers kept alive to simulate a leak
///
/// Never shrinks for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct RetainedBuffers {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RetainedBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain `buffer` permanently; returns (count, total bytes) after the push
    pub fn retain(&self, buffer: Vec<u8>) -> (usize, usize) {
        let mut buffers = self.lock();
        buffers.push(buffer);
        (buffers.len(), buffers.iter().map(Vec::len).sum())
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        // A panic while holding this lock cannot leave the Vec half-pushed.
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
