//! Indexer metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters covering the sync pipeline.
#[derive(Debug, Default)]
pub struct IndexerMetrics {
    /// Blocks fully synced.
    pub blocks_synced: AtomicU64,
    /// Raw logs fetched from the provider.
    pub logs_fetched: AtomicU64,
    /// Domain events persisted.
    pub events_persisted: AtomicU64,
    /// Replayed facts skipped by conflict-ignore.
    pub events_duplicated: AtomicU64,
    /// Logs dropped by handlers.
    pub logs_skipped: AtomicU64,
    /// Reorgs detected and corrected.
    pub reorgs_detected: AtomicU64,
    /// Backfill batches completed.
    pub backfill_batches: AtomicU64,
    /// Jobs re-enqueued for retry.
    pub jobs_retried: AtomicU64,
    /// Jobs parked on a dead-letter list.
    pub jobs_dead_lettered: AtomicU64,
}

impl IndexerMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to a counter.
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Reads a counter.
    #[must_use]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = IndexerMetrics::new();
        assert_eq!(IndexerMetrics::get(&metrics.blocks_synced), 0);
        assert_eq!(IndexerMetrics::get(&metrics.reorgs_detected), 0);
    }

    #[test]
    fn test_incr_and_add() {
        let metrics = IndexerMetrics::new();
        IndexerMetrics::incr(&metrics.blocks_synced);
        IndexerMetrics::add(&metrics.logs_fetched, 40);
        assert_eq!(IndexerMetrics::get(&metrics.blocks_synced), 1);
        assert_eq!(IndexerMetrics::get(&metrics.logs_fetched), 40);
    }
}
