//! ERC-721 transfer handler.

use alloy_primitives::U256;

use super::LogOutcome;
use crate::events::abi::{DecodeError, LogDecoder};
use crate::events::parser::parse_event;
use crate::events::types::{ContractKind, DomainEvent, RawLog, TransferEvent};

/// Handles `Transfer(address indexed, address indexed, uint256 indexed)`.
pub(super) fn handle_transfer(log: &RawLog, timestamp: i64) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let event = TransferEvent {
        kind: ContractKind::Erc721,
        from: decoder.topic_address(1)?,
        to: decoder.topic_address(2)?,
        token_id: decoder.topic_u256(3)?,
        amount: U256::from(1u8),
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::Transfer(event)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::data::TRANSFER_TOPIC;
    use alloy_primitives::{Address, B256};

    #[test]
    fn test_transfer_decodes_indexed_fields() {
        let from = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        let log = RawLog {
            address: Address::repeat_byte(0x11),
            topics: vec![
                TRANSFER_TOPIC,
                from.into_word(),
                to.into_word(),
                B256::from(U256::from(77u64).to_be_bytes::<32>()),
            ],
            data: vec![],
            block_number: 10,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            log_index: 3,
        };

        let outcome = handle_transfer(&log, 1_700_000_000).expect("outcome");
        let events = outcome.into_events();
        assert_eq!(events.len(), 1);
        let DomainEvent::Transfer(transfer) = &events[0] else {
            panic!("expected transfer");
        };
        assert_eq!(transfer.kind, ContractKind::Erc721);
        assert_eq!(transfer.from, from);
        assert_eq!(transfer.to, to);
        assert_eq!(transfer.token_id, U256::from(77u64));
        assert_eq!(transfer.amount, U256::from(1u8));
        assert_eq!(transfer.base.batch_index, 0);
    }

    #[test]
    fn test_transfer_missing_topic_is_decode_error() {
        let log = RawLog {
            address: Address::repeat_byte(0x11),
            topics: vec![TRANSFER_TOPIC, Address::ZERO.into_word()],
            data: vec![],
            block_number: 10,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            log_index: 3,
        };
        assert!(handle_transfer(&log, 0).is_err());
    }
}
