//! Per-socket counters, exposed as a flat snapshot struct.
//!
//! Grounded on a plain atomic-counters struct with a `snapshot()` method
//! rather than a histogram/exporter — this crate has no metrics-export
//! surface of its own; the counters exist
//! so an embedding application can wire its own.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    pub data_bytes_sent: AtomicU64,
    pub data_bytes_received: AtomicU64,
    pub data_packets_sent: AtomicU64,
    pub data_packets_received: AtomicU64,
    pub nak_packets_sent: AtomicU64,
    pub nak_packets_received: AtomicU64,
    pub ncf_packets_sent: AtomicU64,
    pub rdata_packets_sent: AtomicU64,
    pub spm_packets_sent: AtomicU64,
    pub cumulative_losses: AtomicU64,
    pub malformed_packets: AtomicU64,
    pub checksum_errors: AtomicU64,
    pub parity_packets_sent: AtomicU64,
    pub parity_packets_received: AtomicU64,
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            data_bytes_sent: self.data_bytes_sent.load(Ordering::Relaxed),
            data_bytes_received: self.data_bytes_received.load(Ordering::Relaxed),
            data_packets_sent: self.data_packets_sent.load(Ordering::Relaxed),
            data_packets_received: self.data_packets_received.load(Ordering::Relaxed),
            nak_packets_sent: self.nak_packets_sent.load(Ordering::Relaxed),
            nak_packets_received: self.nak_packets_received.load(Ordering::Relaxed),
            ncf_packets_sent: self.ncf_packets_sent.load(Ordering::Relaxed),
            rdata_packets_sent: self.rdata_packets_sent.load(Ordering::Relaxed),
            spm_packets_sent: self.spm_packets_sent.load(Ordering::Relaxed),
            cumulative_losses: self.cumulative_losses.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            parity_packets_sent: self.parity_packets_sent.load(Ordering::Relaxed),
            parity_packets_received: self.parity_packets_received.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Stats`], safe to hand to application code.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub data_bytes_sent: u64,
    pub data_bytes_received: u64,
    pub data_packets_sent: u64,
    pub data_packets_received: u64,
    pub nak_packets_sent: u64,
    pub nak_packets_received: u64,
    pub ncf_packets_sent: u64,
    pub rdata_packets_sent: u64,
    pub spm_packets_sent: u64,
    pub cumulative_losses: u64,
    pub malformed_packets: u64,
    pub checksum_errors: u64,
    pub parity_packets_sent: u64,
    pub parity_packets_received: u64,
}
