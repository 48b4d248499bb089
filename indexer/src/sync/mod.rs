//! Block synchronization.

pub mod cursor;
mod orchestrator;
mod reorg;

pub use cursor::{CursorStore, MemoryCursorStore, RedisCursorStore};
pub use orchestrator::{SyncJobHandler, Syncer};
