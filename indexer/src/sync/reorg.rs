//! Reorg detection and correction.
//!
//! A processed block is re-checked against the canonical chain after a
//! delay. When the hash we synced under is no longer canonical, every
//! fact derived from it is deleted by (number, stale hash) and the
//! block is re-enqueued for a fresh realtime sync. There is no state
//! rollback: replay-safe persistence re-derives everything from the
//! canonical facts.

use tracing::{info, warn};

use super::orchestrator::Syncer;
use crate::error::IndexerError;
use crate::metrics::IndexerMetrics;
use crate::queue::{EnqueueOptions, Job, JobPayload, QueueName};

impl Syncer {
    /// Checks a processed block against the canonical chain, deleting
    /// stale facts and re-enqueuing a sync when it was reorged.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider, store or queue fails.
    pub async fn check_block(&self, number: u64) -> Result<(), IndexerError> {
        let canonical = self.provider.get_block(number).await?;
        let records = self.store.blocks_at(number).await?;

        let mut reorged = false;
        for record in records {
            if record.hash == canonical.hash {
                continue;
            }

            warn!(
                block = number,
                stale_hash = %record.hash,
                canonical_hash = %canonical.hash,
                "reorged block detected, deleting stale facts"
            );
            let deleted = self.store.delete_block_facts(number, record.hash).await?;
            IndexerMetrics::incr(&self.metrics.reorgs_detected);
            info!(block = number, deleted, "stale facts removed");
            reorged = true;
        }

        if reorged {
            self.queue
                .enqueue(
                    QueueName::Realtime,
                    Job::new(JobPayload::SyncRealtime { block: number }),
                    EnqueueOptions::deduped(self.realtime_dedupe_key(number)),
                )
                .await?;
        }
        Ok(())
    }
}
