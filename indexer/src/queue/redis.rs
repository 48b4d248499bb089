//! Redis-backed job queue.
//!
//! Ready jobs live on a list per queue, delayed jobs on a sorted set
//! scored by due time, dedupe keys as NX strings with a TTL. The
//! stored envelope carries its dedupe key so consumption can release
//! it.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::{EnqueueOptions, Job, JobQueue, QueueError, QueueName};

const KEY_PREFIX: &str = "nftsync";
const DEDUPE_TTL_SECS: u64 = 600;
const PROMOTE_BATCH: isize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct StoredJob {
    job: Job,
    dedupe_key: Option<String>,
}

/// Redis implementation of [`JobQueue`].
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl RedisJobQueue {
    /// Connects to the given Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn ready_key(queue: QueueName) -> String {
        format!("{KEY_PREFIX}:queue:{}", queue.as_str())
    }

    fn delayed_key(queue: QueueName) -> String {
        format!("{KEY_PREFIX}:delayed:{}", queue.as_str())
    }

    fn dedupe_key(queue: QueueName, key: &str) -> String {
        format!("{KEY_PREFIX}:dedupe:{}:{key}", queue.as_str())
    }

    fn dead_key(queue: QueueName) -> String {
        format!("{KEY_PREFIX}:dead:{}", queue.as_str())
    }

    fn now_ms() -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }

    /// Moves due delayed jobs onto the ready list.
    async fn promote_due(&self, queue: QueueName) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let delayed = Self::delayed_key(queue);
        let ready = Self::ready_key(queue);

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&delayed)
            .arg("-inf")
            .arg(Self::now_ms())
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(&mut conn)
            .await?;

        for payload in due {
            // Only the remover of the member gets to promote it, so
            // concurrent consumers never duplicate a job.
            let removed: u64 = conn.zrem(&delayed, &payload).await?;
            if removed > 0 {
                let _: () = conn.rpush(&ready, &payload).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        job: Job,
        options: EnqueueOptions,
    ) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();

        if let Some(key) = &options.dedupe_key {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(Self::dedupe_key(queue, key))
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(DEDUPE_TTL_SECS)
                .query_async(&mut conn)
                .await?;
            if claimed.is_none() {
                return Ok(false);
            }
        }

        let payload = serde_json::to_string(&StoredJob {
            job,
            dedupe_key: options.dedupe_key,
        })?;

        match options.delay {
            Some(delay) => {
                let due = Self::now_ms().saturating_add(
                    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                );
                let _: () = conn
                    .zadd(Self::delayed_key(queue), payload, due)
                    .await?;
            }
            None => {
                let _: () = conn.lpush(Self::ready_key(queue), payload).await?;
            }
        }
        Ok(true)
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<Job>, QueueError> {
        self.promote_due(queue).await?;

        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.rpop(Self::ready_key(queue), None).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let mut stored: StoredJob = serde_json::from_str(&payload)?;
        if let Some(key) = &stored.dedupe_key {
            let _: () = conn.del(Self::dedupe_key(queue, key)).await?;
        }
        stored.job.consumed_time = Some(Utc::now().timestamp_millis());
        Ok(Some(stored.job))
    }

    async fn dead_letter(&self, queue: QueueName, job: Job) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&job)?;
        let _: () = conn.lpush(Self::dead_key(queue), payload).await?;
        Ok(())
    }

    async fn dead_letters(&self, queue: QueueName) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let payloads: Vec<String> = conn.lrange(Self::dead_key(queue), 0, -1).await?;
        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(QueueError::from))
            .collect()
    }
}
