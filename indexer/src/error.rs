//! Error taxonomy for the indexer.
//!
//! Errors fall into three operational classes: transient (retried with
//! backoff by the job queue), skippable (a single log or item is
//! dropped and logged), and fatal (configuration problems surfaced at
//! startup). Persistence failures propagate so the whole batch retries.

use thiserror::Error;

use crate::config::ConfigError;
use crate::events::abi::DecodeError;
use crate::queue::QueueError;
use crate::rpc::RpcError;
use crate::storage::StorageError;

/// Top-level indexer error.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// RPC provider failure.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Storage failure; the surrounding batch must be retried.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Job queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Configuration failure; fatal at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Log decoding failure; skippable at the single-log scope.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl IndexerError {
    /// Returns true if the error is expected to clear on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rpc(e) => e.is_transient(),
            Self::Storage(e) => e.is_transient(),
            Self::Queue(_) => true,
            Self::Config(_) | Self::Decode(_) => false,
        }
    }

    /// Returns true if this is the block-not-found condition, which is
    /// retried indefinitely at a fixed interval rather than backed off.
    #[must_use]
    pub fn is_block_not_found(&self) -> bool {
        matches!(self, Self::Rpc(RpcError::BlockNotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_not_found_is_transient() {
        let err = IndexerError::from(RpcError::BlockNotFound(42));
        assert!(err.is_transient());
        assert!(err.is_block_not_found());
    }

    #[test]
    fn test_decode_error_is_not_transient() {
        let err = IndexerError::from(DecodeError::MissingTopic(1));
        assert!(!err.is_transient());
        assert!(!err.is_block_not_found());
    }

    #[test]
    fn test_config_error_is_not_transient() {
        let err = IndexerError::from(ConfigError::InvalidBackfillBatchSize);
        assert!(!err.is_transient());
    }
}
