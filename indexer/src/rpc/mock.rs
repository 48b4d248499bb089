//! Scriptable in-memory chain provider for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_primitives::B256;
use async_trait::async_trait;

use super::{BlockData, ChainProvider, LogFilter, RpcError, TransactionData};
use crate::events::types::RawLog;

/// In-memory provider scripted with blocks, logs and transactions.
///
/// Blocks can be replaced after the fact to simulate a reorg: later
/// calls observe the new hash while previously fetched data keeps the
/// stale one.
#[derive(Debug, Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    blocks: HashMap<u64, BlockData>,
    logs: HashMap<u64, Vec<RawLog>>,
    transactions: HashMap<B256, TransactionData>,
}

impl MockProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a block, replacing any previous block at that number.
    pub fn set_block(&self, block: BlockData) {
        if let Ok(mut state) = self.state.lock() {
            state.blocks.insert(block.number, block);
        }
    }

    /// Scripts the logs returned for a block number.
    pub fn set_logs(&self, number: u64, logs: Vec<RawLog>) {
        if let Ok(mut state) = self.state.lock() {
            state.logs.insert(number, logs);
        }
    }

    /// Scripts a transaction.
    pub fn set_transaction(&self, tx: TransactionData) {
        if let Ok(mut state) = self.state.lock() {
            state.transactions.insert(tx.hash, tx);
        }
    }

    /// Replaces a block with a different hash and drops its logs, as a
    /// reorg would.
    pub fn reorg_block(&self, number: u64, new_hash: B256, parent_hash: B256, timestamp: i64) {
        if let Ok(mut state) = self.state.lock() {
            state.blocks.insert(
                number,
                BlockData {
                    number,
                    hash: new_hash,
                    parent_hash,
                    timestamp,
                },
            );
            state.logs.remove(&number);
        }
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    async fn get_block(&self, number: u64) -> Result<BlockData, RpcError> {
        let state = self
            .state
            .lock()
            .map_err(|_| RpcError::Transport("mock state poisoned".to_string()))?;
        state
            .blocks
            .get(&number)
            .cloned()
            .ok_or(RpcError::BlockNotFound(number))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        let state = self
            .state
            .lock()
            .map_err(|_| RpcError::Transport("mock state poisoned".to_string()))?;
        let mut logs: Vec<RawLog> = (filter.from_block..=filter.to_block)
            .filter_map(|number| state.logs.get(&number))
            .flatten()
            .filter(|log| {
                (filter.topics.is_empty()
                    || log.topic0().is_some_and(|t| filter.topics.contains(&t)))
                    && filter.address.is_none_or(|a| a == log.address)
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.tx_index, log.log_index));
        Ok(logs)
    }

    async fn get_transaction(&self, hash: B256) -> Result<TransactionData, RpcError> {
        let state = self
            .state
            .lock()
            .map_err(|_| RpcError::Transport("mock state poisoned".to_string()))?;
        state
            .transactions
            .get(&hash)
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse(format!("transaction {hash} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn block(number: u64, hash_byte: u8) -> BlockData {
        BlockData {
            number,
            hash: B256::repeat_byte(hash_byte),
            parent_hash: B256::repeat_byte(hash_byte.wrapping_sub(1)),
            timestamp: 1_700_000_000 + number as i64 * 12,
        }
    }

    #[tokio::test]
    async fn test_missing_block_is_not_found() {
        let provider = MockProvider::new();
        assert_eq!(
            provider.get_block(7).await,
            Err(RpcError::BlockNotFound(7))
        );
    }

    #[tokio::test]
    async fn test_reorg_swaps_hash() {
        let provider = MockProvider::new();
        provider.set_block(block(10, 0xaa));
        let before = provider.get_block(10).await.expect("block");

        provider.reorg_block(10, B256::repeat_byte(0xbb), before.parent_hash, before.timestamp);
        let after = provider.get_block(10).await.expect("block");
        assert_ne!(before.hash, after.hash);
        assert_eq!(after.number, 10);
    }

    #[tokio::test]
    async fn test_get_logs_filters_by_topic_and_address() {
        let provider = MockProvider::new();
        provider.set_block(block(5, 0x05));
        let topic = B256::repeat_byte(0x01);
        let address = Address::repeat_byte(0x02);
        provider.set_logs(
            5,
            vec![
                RawLog {
                    address,
                    topics: vec![topic],
                    data: vec![],
                    block_number: 5,
                    block_hash: B256::repeat_byte(0x05),
                    tx_hash: B256::repeat_byte(0x06),
                    tx_index: 0,
                    log_index: 1,
                },
                RawLog {
                    address,
                    topics: vec![B256::repeat_byte(0x09)],
                    data: vec![],
                    block_number: 5,
                    block_hash: B256::repeat_byte(0x05),
                    tx_hash: B256::repeat_byte(0x06),
                    tx_index: 0,
                    log_index: 0,
                },
            ],
        );

        let logs = provider
            .get_logs(&LogFilter {
                from_block: 5,
                to_block: 5,
                topics: vec![topic],
                address: Some(address),
            })
            .await
            .expect("logs");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log_index, 1);
    }
}
