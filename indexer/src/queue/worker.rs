//! Worker pool consuming job queues.
//!
//! Each registered queue gets a fixed number of worker tasks. Failed
//! jobs are retried with the queue's backoff policy until the retry
//! budget runs out, then dead-lettered. The block-not-found condition
//! is re-enqueued at a fixed delay without consuming retries, since a
//! lagging provider is routine rather than a fault.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{EnqueueOptions, Job, JobQueue, QueueError, QueueName, RetryPolicy};
use crate::error::IndexerError;
use crate::metrics::IndexerMetrics;

/// Handles jobs dequeued from one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Processes one job.
    ///
    /// # Errors
    ///
    /// Returns an error when the job should be retried or
    /// dead-lettered, depending on transience and the retry budget.
    async fn handle(&self, job: &Job) -> Result<(), IndexerError>;
}

/// Per-queue worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker tasks consuming the queue.
    pub concurrency: usize,
    /// Retries before a job is dead-lettered.
    pub max_retries: u32,
    /// Backoff between retries.
    pub retry_policy: RetryPolicy,
    /// Fixed re-enqueue delay for not-yet-available blocks.
    pub block_not_found_delay: Duration,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 5,
            retry_policy: RetryPolicy::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
            block_not_found_delay: Duration::from_secs(3),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Pool of worker tasks over a shared job queue.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    metrics: Arc<IndexerMetrics>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool over the given queue.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, metrics: Arc<IndexerMetrics>) -> Self {
        Self {
            queue,
            metrics,
            running: Arc::new(AtomicBool::new(true)),
            handles: Vec::new(),
        }
    }

    /// Spawns `config.concurrency` workers consuming the given queue
    /// with the given handler.
    pub fn spawn(
        &mut self,
        queue_name: QueueName,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) {
        for worker in 0..config.concurrency {
            let queue = Arc::clone(&self.queue);
            let metrics = Arc::clone(&self.metrics);
            let running = Arc::clone(&self.running);
            let handler = Arc::clone(&handler);
            let config = config.clone();

            self.handles.push(tokio::spawn(async move {
                info!(queue = queue_name.as_str(), worker, "worker started");
                while running.load(Ordering::Relaxed) {
                    match run_one(&*queue, queue_name, &*handler, &config, &metrics).await {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(config.poll_interval).await,
                        Err(error) => {
                            error!(queue = queue_name.as_str(), %error, "queue failure");
                            tokio::time::sleep(config.poll_interval).await;
                        }
                    }
                }
                info!(queue = queue_name.as_str(), worker, "worker stopped");
            }));
        }
    }

    /// Returns true while the pool accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stops all workers and waits for them to drain.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            if let Err(error) = handle.await {
                warn!(%error, "worker task panicked");
            }
        }
    }
}

/// Processes at most one job. Returns whether a job was dequeued.
async fn run_one(
    queue: &dyn JobQueue,
    queue_name: QueueName,
    handler: &dyn JobHandler,
    config: &WorkerConfig,
    metrics: &IndexerMetrics,
) -> Result<bool, QueueError> {
    let Some(job) = queue.dequeue(queue_name).await? else {
        return Ok(false);
    };

    match handler.handle(&job).await {
        Ok(()) => Ok(true),
        Err(error) if error.is_block_not_found() => {
            // Not a fault: retry at a fixed interval without burning
            // the budget.
            queue
                .enqueue(
                    queue_name,
                    job,
                    EnqueueOptions::delayed(config.block_not_found_delay),
                )
                .await?;
            Ok(true)
        }
        Err(error) if error.is_transient() && job.retry_count < config.max_retries => {
            let delay = config.retry_policy.backoff(job.retry_count);
            warn!(
                queue = queue_name.as_str(),
                retry_count = job.retry_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %error,
                "job failed, retrying"
            );
            IndexerMetrics::incr(&metrics.jobs_retried);
            queue
                .enqueue(queue_name, job.retried(), EnqueueOptions::delayed(delay))
                .await?;
            Ok(true)
        }
        Err(error) => {
            error!(
                queue = queue_name.as_str(),
                retry_count = job.retry_count,
                %error,
                "job failed permanently, dead-lettering"
            );
            IndexerMetrics::incr(&metrics.jobs_dead_lettered);
            queue.dead_letter(queue_name, job).await?;
            Ok(true)
        }
    }
}
