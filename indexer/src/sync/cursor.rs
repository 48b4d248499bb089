//! Sync cursor.
//!
//! Tracks the highest fully processed block per chain. The cursor only
//! moves forward; a reorg correction re-syncs a block without rewinding
//! it, since fact persistence is replay-safe anyway.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::storage::StorageError;

/// Persistent per-chain sync position.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns the last fully processed block, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn last_synced(&self, chain_id: u64) -> Result<Option<u64>, StorageError>;

    /// Advances the cursor. Positions behind the current one are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn advance(&self, chain_id: u64, block: u64) -> Result<(), StorageError>;
}

/// In-memory implementation of [`CursorStore`].
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<u64, u64>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn last_synced(&self, chain_id: u64) -> Result<Option<u64>, StorageError> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|_| StorageError::Conversion("cursor state poisoned".to_string()))?;
        Ok(cursors.get(&chain_id).copied())
    }

    async fn advance(&self, chain_id: u64, block: u64) -> Result<(), StorageError> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| StorageError::Conversion("cursor state poisoned".to_string()))?;
        let entry = cursors.entry(chain_id).or_insert(block);
        *entry = (*entry).max(block);
        Ok(())
    }
}

/// Redis implementation of [`CursorStore`].
#[derive(Clone)]
pub struct RedisCursorStore {
    conn: ConnectionManager,
}

impl RedisCursorStore {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(chain_id: u64) -> String {
        format!("nftsync:cursor:{chain_id}")
    }
}

#[async_trait]
impl CursorStore for RedisCursorStore {
    async fn last_synced(&self, chain_id: u64) -> Result<Option<u64>, StorageError> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(Self::key(chain_id)).await?;
        Ok(value)
    }

    async fn advance(&self, chain_id: u64, block: u64) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        // The realtime pipeline advances from a single worker, so a
        // read-compare-write is enough to keep the cursor monotonic.
        let current: Option<u64> = conn.get(Self::key(chain_id)).await?;
        if current.is_none_or(|c| c < block) {
            let _: () = conn.set(Self::key(chain_id), block).await?;
        }
        Ok(())
    }
}
