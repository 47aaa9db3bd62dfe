//! Process-wide configuration.
//!
//! The only knob the runtime core owns is the stream block size. It can be
//! set programmatically before any stream is opened; otherwise the first
//! reader resolves it from the environment and the value is cached for the
//! rest of the process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default stream block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 2 * 1024 * 1024;

/// Environment variable overriding the block size (decimal bytes).
pub const BLOCK_SIZE_ENV: &str = "EMPIPE_BLOCK_SIZE";

// 0 means "not resolved yet"; a block size of zero is never valid.
static BLOCK_SIZE: AtomicU64 = AtomicU64::new(0);

/// The stream block size in bytes.
///
/// Resolution order: programmatic [`set_block_size`], then [`BLOCK_SIZE_ENV`],
/// then [`DEFAULT_BLOCK_SIZE`]. The first read caches the value process-wide.
pub fn block_size() -> u64 {
    let cached = BLOCK_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let resolved = std::env::var(BLOCK_SIZE_ENV)
        .ok()
        .and_then(|s| parse_block_size(&s))
        .unwrap_or(DEFAULT_BLOCK_SIZE);
    match BLOCK_SIZE.compare_exchange(0, resolved, Ordering::Relaxed, Ordering::Relaxed) {
        Ok(_) => resolved,
        Err(existing) => existing,
    }
}

/// Override the block size. Writes are not synchronized with readers and
/// should happen before any part of the process calls [`block_size`].
pub fn set_block_size(bytes: u64) {
    BLOCK_SIZE.store(bytes, Ordering::Relaxed);
}

fn parse_block_size(s: &str) -> Option<u64> {
    s.trim().parse::<u64>().ok().filter(|v| *v > 0)
}
