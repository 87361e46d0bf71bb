//! Running counters, a simplified replacement for the original's per-tag
//! timing histogram (`mthvac_timer.h`). Enough to answer "how much traffic
//! did this rank see" without reintroducing the original's timing DSL —
//! structured `tracing` spans cover the latency-debugging use case instead.

use std::sync::atomic::{AtomicU64, Ordering};

use hvac_wire::StatsOut;

#[derive(Default)]
pub struct Stats {
    pub opens: AtomicU64,
    pub reads: AtomicU64,
    pub preads: AtomicU64,
    pub seeks: AtomicU64,
    pub closes: AtomicU64,
    pub bytes_served: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_pread(&self, bytes: u64) {
        self.preads.fetch_add(1, Ordering::Relaxed);
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_seek(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Prints the current counters (mirrors the original's
    /// `print_all_stats()`, invoked server-side from the stats RPC handler)
    /// and returns the status the wire response carries back.
    pub fn print_and_status(&self) -> StatsOut {
        let opens = self.opens.load(Ordering::Relaxed);
        let reads = self.reads.load(Ordering::Relaxed);
        let preads = self.preads.load(Ordering::Relaxed);
        let seeks = self.seeks.load(Ordering::Relaxed);
        let closes = self.closes.load(Ordering::Relaxed);
        let bytes_served = self.bytes_served.load(Ordering::Relaxed);
        tracing::info!(opens, reads, preads, seeks, closes, bytes_served, "hvac stats");
        StatsOut { status: 0 }
    }
}
