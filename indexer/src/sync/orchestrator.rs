//! Sync orchestration.
//!
//! Realtime sync processes one block per job, detects gaps against the
//! cursor, and schedules delayed reorg checks for every processed
//! block. Backfill walks a historic range in fixed-size batches,
//! highest first, through the same persistence path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::cursor::CursorStore;
use crate::attribution::AttributionResolver;
use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::events::handlers::{handle_log, HandlerContext, LogOutcome};
use crate::events::types::{DomainEvent, RawLog};
use crate::events::EventRegistry;
use crate::lock::DistributedLock;
use crate::metrics::IndexerMetrics;
use crate::prices::PriceOracle;
use crate::queue::{EnqueueOptions, Job, JobHandler, JobPayload, JobQueue, QueueName};
use crate::rpc::{BlockData, ChainProvider, LogFilter};
use crate::storage::{BlockRecord, EventStore, PersistOutcome};

/// Lease length for the backfill scheduling lock.
const BACKFILL_LOCK_TTL: Duration = Duration::from_secs(60);

/// Orchestrates realtime and backfill sync.
pub struct Syncer {
    pub(super) config: IndexerConfig,
    pub(super) provider: Arc<dyn ChainProvider>,
    pub(super) registry: EventRegistry,
    pub(super) store: Arc<dyn EventStore>,
    pub(super) queue: Arc<dyn JobQueue>,
    pub(super) cursor: Arc<dyn CursorStore>,
    pub(super) lock: Arc<dyn DistributedLock>,
    pub(super) attribution: Arc<AttributionResolver>,
    pub(super) prices: Arc<dyn PriceOracle>,
    pub(super) metrics: Arc<IndexerMetrics>,
}

impl Syncer {
    /// Creates a syncer over the given services.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: IndexerConfig,
        provider: Arc<dyn ChainProvider>,
        registry: EventRegistry,
        store: Arc<dyn EventStore>,
        queue: Arc<dyn JobQueue>,
        cursor: Arc<dyn CursorStore>,
        lock: Arc<dyn DistributedLock>,
        attribution: Arc<AttributionResolver>,
        prices: Arc<dyn PriceOracle>,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            config,
            provider,
            registry,
            store,
            queue,
            cursor,
            lock,
            attribution,
            prices,
            metrics,
        }
    }

    pub(super) fn realtime_dedupe_key(&self, block: u64) -> String {
        format!("realtime:{}:{block}", self.config.chain_id)
    }

    /// Syncs a single block in realtime mode.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider, store or queue fails; the
    /// job is then retried. A block the provider has not seen yet
    /// surfaces as a block-not-found error.
    pub async fn sync_block(&self, number: u64) -> Result<(), IndexerError> {
        self.fill_gap(number).await?;

        let block = self.provider.get_block(number).await?;
        let logs = self
            .provider
            .get_logs(&LogFilter {
                from_block: number,
                to_block: number,
                topics: self.registry.topics(),
                address: None,
            })
            .await?;
        IndexerMetrics::add(&self.metrics.logs_fetched, logs.len() as u64);

        // Logs from another chain view are left to the scheduled reorg
        // checks.
        let logs: Vec<RawLog> = logs
            .into_iter()
            .filter(|log| log.block_hash == block.hash)
            .collect();

        let events = self.derive_events(&logs, block.timestamp).await;
        let outcome = self.store.persist_events(&events).await?;
        self.store
            .save_block(&BlockRecord {
                number: block.number,
                hash: block.hash,
                timestamp: block.timestamp,
            })
            .await?;

        IndexerMetrics::add(&self.metrics.events_persisted, outcome.inserted as u64);
        IndexerMetrics::add(&self.metrics.events_duplicated, outcome.duplicates as u64);

        self.schedule_block_checks(number).await?;
        self.notify_downstream(&outcome).await;
        self.cursor.advance(self.config.chain_id, number).await?;
        IndexerMetrics::incr(&self.metrics.blocks_synced);

        info!(
            block = number,
            logs = logs.len(),
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "block synced"
        );
        Ok(())
    }

    /// Syncs an inclusive block range in backfill mode.
    ///
    /// Backfill skips gap detection, reorg scheduling and the cursor;
    /// it only writes facts and block records.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider or store fails.
    pub async fn sync_range(&self, from: u64, to: u64) -> Result<(), IndexerError> {
        let logs = self
            .provider
            .get_logs(&LogFilter {
                from_block: from,
                to_block: to,
                topics: self.registry.topics(),
                address: None,
            })
            .await?;
        IndexerMetrics::add(&self.metrics.logs_fetched, logs.len() as u64);

        // One header fetch per distinct block with logs.
        let mut numbers: Vec<u64> = logs.iter().map(|log| log.block_number).collect();
        numbers.sort_unstable();
        numbers.dedup();
        let headers = future::try_join_all(
            numbers.iter().map(|number| self.provider.get_block(*number)),
        )
        .await?;
        let blocks: HashMap<u64, BlockData> = headers
            .into_iter()
            .map(|block| (block.number, block))
            .collect();

        let mut events = Vec::new();
        for log in &logs {
            let Some(block) = blocks.get(&log.block_number) else {
                continue;
            };
            if log.block_hash != block.hash {
                continue;
            }
            events.extend(self.derive_events(std::slice::from_ref(log), block.timestamp).await);
        }

        let outcome = self.store.persist_events(&events).await?;
        for block in blocks.values() {
            self.store
                .save_block(&BlockRecord {
                    number: block.number,
                    hash: block.hash,
                    timestamp: block.timestamp,
                })
                .await?;
        }

        IndexerMetrics::add(&self.metrics.events_persisted, outcome.inserted as u64);
        IndexerMetrics::add(&self.metrics.events_duplicated, outcome.duplicates as u64);
        IndexerMetrics::incr(&self.metrics.backfill_batches);

        info!(
            from,
            to,
            logs = logs.len(),
            inserted = outcome.inserted,
            "backfill batch synced"
        );
        Ok(())
    }

    /// Splits a historic range into fixed-size batches and enqueues
    /// them, highest range first so recent history lands soonest.
    ///
    /// Scheduling runs under a distributed lock so concurrent processes
    /// do not fan out the same range twice.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock or queue fails.
    pub async fn backfill(&self, from: u64, to: u64) -> Result<(), IndexerError> {
        let lock_name = format!("backfill:{}", self.config.chain_id);
        let Some(lease) = self.lock.acquire(&lock_name, BACKFILL_LOCK_TTL).await? else {
            info!(from, to, "backfill scheduling already in progress elsewhere");
            return Ok(());
        };

        let batch_size = self.config.backfill_batch_size;
        let mut batch_end = to;
        loop {
            let batch_start = batch_end.saturating_sub(batch_size - 1).max(from);
            self.queue
                .enqueue(
                    QueueName::Backfill,
                    Job::new(JobPayload::SyncBackfill {
                        from_block: batch_start,
                        to_block: batch_end,
                    }),
                    EnqueueOptions::deduped(format!(
                        "backfill:{}:{batch_start}:{batch_end}",
                        self.config.chain_id
                    )),
                )
                .await?;
            if batch_start == from {
                break;
            }
            batch_end = batch_start - 1;
        }

        self.lock.release(&lease).await?;
        Ok(())
    }

    /// Enqueues realtime jobs for blocks between the cursor and the
    /// one being synced, oldest first.
    async fn fill_gap(&self, number: u64) -> Result<(), IndexerError> {
        let Some(last) = self.cursor.last_synced(self.config.chain_id).await? else {
            // First block ever seen: seed the cursor from here instead
            // of backfilling an unbounded history.
            return Ok(());
        };
        if number <= last + 1 {
            return Ok(());
        }

        warn!(
            from = last + 1,
            to = number - 1,
            "gap detected, enqueuing missed blocks"
        );
        for missed in (last + 1)..number {
            self.queue
                .enqueue(
                    QueueName::Realtime,
                    Job::new(JobPayload::SyncRealtime { block: missed }),
                    EnqueueOptions::deduped(self.realtime_dedupe_key(missed)),
                )
                .await?;
        }
        Ok(())
    }

    /// Runs every classified log through its handler in chain order.
    async fn derive_events(&self, logs: &[RawLog], timestamp: i64) -> Vec<DomainEvent> {
        let ctx = HandlerContext {
            attribution: &self.attribution,
            prices: &*self.prices,
        };

        let mut ordered: Vec<&RawLog> = logs.iter().collect();
        ordered.sort_by_key(|log| (log.block_number, log.tx_index, log.log_index));

        let mut events = Vec::new();
        for log in ordered {
            let Some(descriptor) = self.registry.classify(log) else {
                continue;
            };
            match handle_log(&ctx, descriptor.kind, log, timestamp).await {
                Ok(LogOutcome::Handled(derived)) => events.extend(derived),
                Ok(LogOutcome::Skipped { reason }) => {
                    debug!(
                        kind = descriptor.kind.as_str(),
                        tx_hash = %log.tx_hash,
                        log_index = log.log_index,
                        reason,
                        "log skipped"
                    );
                    IndexerMetrics::incr(&self.metrics.logs_skipped);
                }
                Err(error) => {
                    warn!(
                        kind = descriptor.kind.as_str(),
                        tx_hash = %log.tx_hash,
                        log_index = log.log_index,
                        %error,
                        "log failed to decode"
                    );
                    IndexerMetrics::incr(&self.metrics.logs_skipped);
                }
            }
        }
        events
    }

    /// Schedules the delayed canonical-chain checks for a processed
    /// block.
    async fn schedule_block_checks(&self, number: u64) -> Result<(), IndexerError> {
        for delay_secs in &self.config.reorg_check_delays_secs {
            self.queue
                .enqueue(
                    QueueName::BlockCheck,
                    Job::new(JobPayload::BlockCheck { block: number }),
                    EnqueueOptions::deduped(format!(
                        "block-check:{}:{number}:{delay_secs}",
                        self.config.chain_id
                    ))
                    .with_delay(Duration::from_secs(*delay_secs)),
                )
                .await?;
        }
        Ok(())
    }

    /// Notifies downstream consumers of changed orders and tokens.
    /// Best effort; the facts are already committed.
    async fn notify_downstream(&self, outcome: &PersistOutcome) {
        for order_id in &outcome.updated_orders {
            let result = self
                .queue
                .enqueue(
                    QueueName::OrderUpdates,
                    Job::new(JobPayload::OrderUpdated {
                        order_id: *order_id,
                    }),
                    EnqueueOptions::default(),
                )
                .await;
            if let Err(error) = result {
                warn!(%order_id, %error, "order update notification failed");
            }
        }
        for (contract, token_id) in &outcome.touched_tokens {
            let result = self
                .queue
                .enqueue(
                    QueueName::TokenFloor,
                    Job::new(JobPayload::TokenFloorChanged {
                        contract: *contract,
                        token_id: *token_id,
                    }),
                    EnqueueOptions::default(),
                )
                .await;
            if let Err(error) = result {
                warn!(%contract, %token_id, %error, "token floor notification failed");
            }
        }
    }
}

/// Routes sync jobs to the syncer.
pub struct SyncJobHandler {
    syncer: Arc<Syncer>,
}

impl SyncJobHandler {
    /// Creates a handler over the given syncer.
    #[must_use]
    pub const fn new(syncer: Arc<Syncer>) -> Self {
        Self { syncer }
    }
}

#[async_trait]
impl JobHandler for SyncJobHandler {
    async fn handle(&self, job: &Job) -> Result<(), IndexerError> {
        match &job.payload {
            JobPayload::SyncRealtime { block } => self.syncer.sync_block(*block).await,
            JobPayload::SyncBackfill {
                from_block,
                to_block,
            } => self.syncer.sync_range(*from_block, *to_block).await,
            JobPayload::BlockCheck { block } => self.syncer.check_block(*block).await,
            // Downstream notifications are consumed elsewhere.
            JobPayload::OrderUpdated { .. } | JobPayload::TokenFloorChanged { .. } => Ok(()),
        }
    }
}
