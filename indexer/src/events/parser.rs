//! Raw log parsing.

use super::types::{BaseEventParams, RawLog};

/// Derives the base event parameters from a raw log and the timestamp
/// of its containing block.
///
/// The batch index starts at 0; handlers that fan a single log out into
/// multiple events bump it per item.
#[must_use]
pub fn parse_event(log: &RawLog, timestamp: i64) -> BaseEventParams {
    BaseEventParams {
        address: log.address,
        block: log.block_number,
        block_hash: log.block_hash,
        tx_hash: log.tx_hash,
        tx_index: log.tx_index,
        log_index: log.log_index,
        batch_index: 0,
        timestamp,
    }
}
