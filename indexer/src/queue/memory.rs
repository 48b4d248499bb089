//! In-memory job queue.
//!
//! Same contract as the Redis queue, backed by a mutex. Used by tests
//! and single-process runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use super::{EnqueueOptions, Job, JobQueue, QueueError, QueueName};

#[derive(Debug)]
struct PendingJob {
    job: Job,
    dedupe_key: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<PendingJob>,
    delayed: Vec<(Instant, PendingJob)>,
    pending_keys: HashSet<String>,
    dead: Vec<Job>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut due: Vec<usize> = self
            .delayed
            .iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(i, _)| i)
            .collect();
        // Remove from the back so earlier indices stay valid.
        due.reverse();
        let mut promoted: Vec<PendingJob> = due
            .into_iter()
            .map(|i| self.delayed.swap_remove(i).1)
            .collect();
        // swap_remove reversed the order; restore enqueue order.
        promoted.reverse();
        self.ready.extend(promoted);
    }
}

/// In-memory implementation of [`JobQueue`].
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    queues: Mutex<HashMap<QueueName, QueueState>>,
}

impl MemoryJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending (ready plus delayed) jobs.
    pub fn pending(&self, queue: QueueName) -> usize {
        self.queues
            .lock()
            .map(|queues| {
                queues
                    .get(&queue)
                    .map_or(0, |state| state.ready.len() + state.delayed.len())
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        job: Job,
        options: EnqueueOptions,
    ) -> Result<bool, QueueError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| QueueError::Internal("queue state poisoned".to_string()))?;
        let state = queues.entry(queue).or_default();

        if let Some(key) = &options.dedupe_key {
            if !state.pending_keys.insert(key.clone()) {
                return Ok(false);
            }
        }

        let pending = PendingJob {
            job,
            dedupe_key: options.dedupe_key,
        };
        match options.delay {
            Some(delay) => state.delayed.push((Instant::now() + delay, pending)),
            None => state.ready.push_back(pending),
        }
        Ok(true)
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<Job>, QueueError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| QueueError::Internal("queue state poisoned".to_string()))?;
        let Some(state) = queues.get_mut(&queue) else {
            return Ok(None);
        };
        state.promote_due(Instant::now());

        let Some(mut pending) = state.ready.pop_front() else {
            return Ok(None);
        };
        if let Some(key) = &pending.dedupe_key {
            state.pending_keys.remove(key);
        }
        pending.job.consumed_time = Some(chrono::Utc::now().timestamp_millis());
        Ok(Some(pending.job))
    }

    async fn dead_letter(&self, queue: QueueName, job: Job) -> Result<(), QueueError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| QueueError::Internal("queue state poisoned".to_string()))?;
        queues.entry(queue).or_default().dead.push(job);
        Ok(())
    }

    async fn dead_letters(&self, queue: QueueName) -> Result<Vec<Job>, QueueError> {
        let queues = self
            .queues
            .lock()
            .map_err(|_| QueueError::Internal("queue state poisoned".to_string()))?;
        Ok(queues
            .get(&queue)
            .map(|state| state.dead.clone())
            .unwrap_or_default())
    }
}
