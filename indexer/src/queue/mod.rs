//! Job queue abstraction.
//!
//! Delivery is at-least-once: a handler crash between effect and
//! acknowledgement redelivers the job, so every handler effect must be
//! idempotent. Jobs that exhaust their retries land on a per-queue
//! dead-letter list for inspection.

mod memory;
mod redis;
mod worker;

pub use memory::MemoryJobQueue;
pub use redis::RedisJobQueue;
pub use worker::{JobHandler, WorkerConfig, WorkerPool};

use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis failure.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Job payload (de)serialization failure.
    #[error("job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue internals failed.
    #[error("queue error: {0}")]
    Internal(String),
}

/// Named queues, one per job class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    /// Per-block realtime sync jobs.
    Realtime,
    /// Backfill batch jobs.
    Backfill,
    /// Delayed reorg checks of processed blocks.
    BlockCheck,
    /// Downstream order update notifications.
    OrderUpdates,
    /// Downstream token floor recomputation notifications.
    TokenFloor,
}

impl QueueName {
    /// Returns the queue's wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "events-sync-realtime",
            Self::Backfill => "events-sync-backfill",
            Self::BlockCheck => "events-sync-block-check",
            Self::OrderUpdates => "order-updates",
            Self::TokenFloor => "token-floor",
        }
    }
}

/// Typed payload of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPayload {
    /// Sync a single block in realtime mode.
    SyncRealtime {
        /// Block number to sync.
        block: u64,
    },
    /// Sync a descending backfill batch.
    SyncBackfill {
        /// First block of the range, inclusive.
        from_block: u64,
        /// Last block of the range, inclusive.
        to_block: u64,
    },
    /// Re-check a processed block against the canonical chain.
    BlockCheck {
        /// Block number to check.
        block: u64,
    },
    /// An order's state changed.
    OrderUpdated {
        /// Updated order id.
        order_id: B256,
    },
    /// A token's ownership or sale history changed.
    TokenFloorChanged {
        /// Token contract.
        contract: Address,
        /// Token id.
        token_id: U256,
    },
}

/// A job envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Typed payload.
    pub payload: JobPayload,
    /// Number of delivery attempts so far.
    pub retry_count: u32,
    /// When the job was last handed to a consumer (unix millis).
    #[serde(default)]
    pub consumed_time: Option<i64>,
}

impl Job {
    /// Creates a fresh job for the given payload.
    #[must_use]
    pub const fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            retry_count: 0,
            consumed_time: None,
        }
    }

    /// Returns a copy with the retry count bumped, ready to re-enqueue.
    #[must_use]
    pub fn retried(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            retry_count: self.retry_count + 1,
            consumed_time: None,
        }
    }
}

/// Per-enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the job becomes available.
    pub delay: Option<Duration>,
    /// Deduplication key; an enqueue whose key is already pending is
    /// dropped.
    pub dedupe_key: Option<String>,
}

impl EnqueueOptions {
    /// Options with only a delay set.
    #[must_use]
    pub const fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            dedupe_key: None,
        }
    }

    /// Options with only a dedupe key set.
    #[must_use]
    pub fn deduped(key: impl Into<String>) -> Self {
        Self {
            delay: None,
            dedupe_key: Some(key.into()),
        }
    }

    /// Sets the delay.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Backoff applied between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay on every attempt.
    Fixed(Duration),
    /// Delay doubles per attempt, capped.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Upper bound on the delay.
        max: Duration,
    },
}

impl RetryPolicy {
    /// Returns the delay before the given retry (0-based).
    #[must_use]
    pub fn backoff(&self, retry_count: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry_count.min(16));
                (*base).saturating_mul(factor).min(*max)
            }
        }
    }
}

/// At-least-once job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job. Returns false when a dedupe key suppressed it.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or serialization failure.
    async fn enqueue(
        &self,
        queue: QueueName,
        job: Job,
        options: EnqueueOptions,
    ) -> Result<bool, QueueError>;

    /// Pops the next due job, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or deserialization failure.
    async fn dequeue(&self, queue: QueueName) -> Result<Option<Job>, QueueError>;

    /// Parks a job on the queue's dead-letter list.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    async fn dead_letter(&self, queue: QueueName, job: Job) -> Result<(), QueueError>;

    /// Returns the queue's dead-lettered jobs.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    async fn dead_letters(&self, queue: QueueName) -> Result<Vec<Job>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy::Fixed(Duration::from_secs(3));
        assert_eq!(policy.backoff(0), Duration::from_secs(3));
        assert_eq!(policy.backoff(10), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_job_retried_bumps_count() {
        let job = Job::new(JobPayload::SyncRealtime { block: 5 });
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.retried().retry_count, 1);
        assert_eq!(job.retried().payload, job.payload);
    }

    #[test]
    fn test_queue_names_are_distinct() {
        let names = [
            QueueName::Realtime,
            QueueName::Backfill,
            QueueName::BlockCheck,
            QueueName::OrderUpdates,
            QueueName::TokenFloor,
        ];
        let unique: std::collections::HashSet<_> =
            names.iter().map(QueueName::as_str).collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_job_payload_round_trips_through_json() {
        let job = Job::new(JobPayload::SyncBackfill {
            from_block: 10,
            to_block: 73,
        });
        let encoded = serde_json::to_string(&job).expect("encode");
        let decoded: Job = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, job);
    }
}
