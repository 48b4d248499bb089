//! Event persistence.
//!
//! The store holds immutable event facts plus state derived from them
//! (orders, nonces, balances, tokens). Facts are keyed by
//! (block hash, tx hash, log index, batch index) and inserted with
//! conflict-ignore semantics; derived state is only touched when the
//! fact row is actually new, which makes a whole batch safe to replay.

mod memory;
mod pg;

pub use memory::MemoryEventStore;
pub use pg::PgEventStore;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::types::{DomainEvent, OrderKind};
use crate::orders::Fillability;

/// Errors raised by the event store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis failure (cursors and locks).
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value could not be converted to its domain type.
    #[error("conversion error: {0}")]
    Conversion(String),
}

impl StorageError {
    /// Returns true if the error is expected to clear on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Redis(_))
    }
}

/// A processed block, recorded for reorg detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block number.
    pub number: u64,
    /// Block hash the facts were derived from.
    pub hash: B256,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
}

/// Stored state of an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    /// Canonical order id.
    pub id: B256,
    /// Protocol the order belongs to.
    pub kind: OrderKind,
    /// Order maker.
    pub maker: Address,
    /// Order nonce, when the protocol exposes one.
    pub nonce: Option<U256>,
    /// Current fillability status.
    pub fillability: Fillability,
    /// Timestamp of the event that produced the status.
    pub last_event_timestamp: i64,
}

/// A stored per-day USD quote for a payment currency.
#[derive(Debug, Clone, PartialEq)]
pub struct UsdPriceRecord {
    /// Payment currency; the zero address is the chain-native token.
    pub currency: Address,
    /// Start of the UTC day the quote applies to (unix seconds).
    pub day: i64,
    /// USD per whole token on that day.
    pub value: BigDecimal,
    /// Token decimals, for smallest-unit conversions.
    pub decimals: u32,
}

/// Result of persisting one batch of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Fact rows actually inserted.
    pub inserted: usize,
    /// Fact rows already present (replays).
    pub duplicates: usize,
    /// Orders whose state changed, for downstream notification.
    pub updated_orders: Vec<B256>,
    /// Tokens whose ownership or sale history changed, for downstream
    /// floor recomputation.
    pub touched_tokens: Vec<(Address, U256)>,
}

impl PersistOutcome {
    fn note_order(&mut self, id: B256) {
        if !self.updated_orders.contains(&id) {
            self.updated_orders.push(id);
        }
    }

    fn note_token(&mut self, contract: Address, token_id: U256) {
        if !self.touched_tokens.contains(&(contract, token_id)) {
            self.touched_tokens.push((contract, token_id));
        }
    }
}

/// Persistent store for event facts and state derived from them.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists a batch of events atomically.
    ///
    /// Replayed facts are counted as duplicates and do not touch
    /// derived state.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure; the whole batch should then
    /// be retried.
    async fn persist_events(&self, events: &[DomainEvent]) -> Result<PersistOutcome, StorageError>;

    /// Records a processed block.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn save_block(&self, block: &BlockRecord) -> Result<(), StorageError>;

    /// Returns all recorded blocks at the given number. More than one
    /// entry means a past reorg left stale facts behind.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn blocks_at(&self, number: u64) -> Result<Vec<BlockRecord>, StorageError>;

    /// Deletes every fact derived from the given (number, hash) block,
    /// reversing derived balance state, and drops the block record.
    /// Returns the number of facts removed.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn delete_block_facts(&self, number: u64, hash: B256) -> Result<u64, StorageError>;

    /// Looks up an order by id.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn get_order(&self, id: B256) -> Result<Option<OrderRecord>, StorageError>;

    /// Returns every stored per-day USD quote, for seeding the price
    /// oracle.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn load_usd_prices(&self) -> Result<Vec<UsdPriceRecord>, StorageError>;

    /// Returns the stored balance of a token for an owner.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn get_balance(
        &self,
        contract: Address,
        token_id: U256,
        owner: Address,
    ) -> Result<U256, StorageError>;
}
