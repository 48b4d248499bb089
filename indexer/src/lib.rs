//! On-chain event synchronization for an NFT marketplace index.
//!
//! The pipeline fetches logs from an RPC provider, classifies them
//! against a closed event registry, normalizes them into domain events
//! and persists them replay-safely, with reorg detection and
//! correction layered on top. Work is distributed through named job
//! queues consumed by a worker pool.

pub mod attribution;
pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod orders;
pub mod prices;
pub mod queue;
pub mod rpc;
pub mod storage;
pub mod sync;

pub use config::IndexerConfig;
pub use error::IndexerError;
pub use metrics::IndexerMetrics;
pub use sync::{SyncJobHandler, Syncer};
