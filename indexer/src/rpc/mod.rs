//! RPC provider interface.
//!
//! The upstream provider is the source of truth for block contents.
//! Every call is assumed to reflect one canonical chain view at call
//! time; reorgs show up as hash changes between calls.

mod http;
mod mock;

pub use http::HttpProvider;
pub use mock::MockProvider;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::types::RawLog;

/// Errors raised by the RPC provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The requested block is not (yet) known to the provider.
    ///
    /// An expected transient condition: chain nodes may lag behind the
    /// notification that triggered the request.
    #[error("block {0} not found")]
    BlockNotFound(u64),

    /// The request timed out.
    #[error("rpc request timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// The provider returned an unparseable response.
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Returns true if the error is expected to clear on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BlockNotFound(_) | Self::Timeout | Self::Transport(_)
        )
    }
}

/// A block header as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
}

/// A transaction as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient; absent for contract creations.
    pub to: Option<Address>,
    /// Calldata.
    pub data: Vec<u8>,
}

/// Filter for a log query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// First block of the range, inclusive.
    pub from_block: u64,
    /// Last block of the range, inclusive.
    pub to_block: u64,
    /// topic0 values to match; empty matches everything.
    pub topics: Vec<B256>,
    /// Restrict to a single emitting address.
    pub address: Option<Address>,
}

/// Read-only view of the chain exposed by the RPC provider.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Fetches a block header by number.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::BlockNotFound`] when the provider does not
    /// know the block yet.
    async fn get_block(&self, number: u64) -> Result<BlockData, RpcError>;

    /// Fetches all logs matching the filter, ordered by
    /// (block, tx index, log index).
    ///
    /// # Errors
    ///
    /// Returns an error on transport or provider failure.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError>;

    /// Fetches a transaction by hash.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or provider failure, or when the
    /// transaction is unknown.
    async fn get_transaction(&self, hash: B256) -> Result<TransactionData, RpcError>;
}
