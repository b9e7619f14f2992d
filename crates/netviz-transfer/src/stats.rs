//! Transfer statistics, shared between the engine threads and the caller.
//! All fields are atomic so progress can be read while a transfer runs.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct TransferStats {
    /// Total file size in bytes.
    pub total_bytes: AtomicU64,
    /// Total number of chunks, including the one embedded in METADATA.
    pub total_chunks: AtomicU64,
    /// Distinct payload bytes sent or received so far.
    pub bytes_transferred: AtomicU64,
    /// Distinct chunks sent or received so far.
    pub chunks_transferred: AtomicU64,
    /// Packets sent again after a timeout.
    pub retransmits: AtomicU64,
    /// Timeouts observed.
    pub timeouts: AtomicU64,
    /// Datagrams dropped as malformed or corrupted.
    pub dropped: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, bytes: u64, chunks: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
        self.total_chunks.store(chunks, Ordering::Relaxed);
    }

    /// Receiver side: only the byte count is known, from METADATA.
    pub fn set_total_bytes(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        self.chunks_transferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmit(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retransmit_count(&self) -> u64 {
        self.retransmits.load(Ordering::Relaxed)
    }

    /// Progress as a fraction 0.0 - 1.0.
    pub fn progress(&self) -> f64 {
        let total = self.total_bytes.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let done = self.bytes_transferred.load(Ordering::Relaxed);
        (done as f64 / total as f64).min(1.0)
    }
}
