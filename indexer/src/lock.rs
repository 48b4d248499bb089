//! Distributed locking.
//!
//! Leases with a TTL guard work that must not run concurrently across
//! processes, such as backfill scheduling. A crashed holder's lease
//! expires on its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::storage::StorageError;

static LEASE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn lease_token() -> String {
    let nonce = LEASE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    format!("{now}-{nonce}")
}

/// A held lock lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    /// Lock name.
    pub name: String,
    /// Holder token; release only succeeds for the holder.
    pub token: String,
}

/// TTL-based distributed lock.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Tries to acquire the named lock for the given TTL. Returns
    /// `None` when another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>, StorageError>;

    /// Releases a held lease. A no-op when the lease already expired
    /// or was taken over.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn release(&self, lease: &LockLease) -> Result<(), StorageError>;
}

/// In-memory implementation of [`DistributedLock`].
#[derive(Debug, Default)]
pub struct MemoryLock {
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLock {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>, StorageError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StorageError::Conversion("lock state poisoned".to_string()))?;

        let now = Instant::now();
        if let Some((_, expires)) = locks.get(name) {
            if *expires > now {
                return Ok(None);
            }
        }

        let token = lease_token();
        locks.insert(name.to_string(), (token.clone(), now + ttl));
        Ok(Some(LockLease {
            name: name.to_string(),
            token,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<(), StorageError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StorageError::Conversion("lock state poisoned".to_string()))?;
        if let Some((token, _)) = locks.get(&lease.name) {
            if *token == lease.token {
                locks.remove(&lease.name);
            }
        }
        Ok(())
    }
}

/// Redis implementation of [`DistributedLock`].
#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
}

impl RedisLock {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(name: &str) -> String {
        format!("nftsync:lock:{name}")
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>, StorageError> {
        let mut conn = self.conn.clone();
        let token = lease_token();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(Self::key(name))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(claimed.map(|_| LockLease {
            name: name.to_string(),
            token,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        // Compare-and-delete so an expired lease cannot free a lock
        // someone else re-acquired.
        let script = redis::Script::new(
            "if redis.call('GET', KEYS[1]) == ARGV[1] then
                 return redis.call('DEL', KEYS[1])
             end
             return 0",
        );
        let _: i64 = script
            .key(Self::key(&lease.name))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
