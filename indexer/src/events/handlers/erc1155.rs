//! ERC-1155 transfer handlers.
//!
//! `TransferBatch` fans out into one domain event per item, batch
//! indexed from 0 in array order.

use super::LogOutcome;
use crate::events::abi::{DecodeError, LogDecoder};
use crate::events::parser::parse_event;
use crate::events::types::{ContractKind, DomainEvent, RawLog, TransferEvent};

/// Handles `TransferSingle(address indexed operator, address indexed
/// from, address indexed to, uint256 id, uint256 value)`.
pub(super) fn handle_transfer_single(
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let event = TransferEvent {
        kind: ContractKind::Erc1155,
        from: decoder.topic_address(2)?,
        to: decoder.topic_address(3)?,
        token_id: decoder.u256(0)?,
        amount: decoder.u256(1)?,
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::Transfer(event)]))
}

/// Handles `TransferBatch(address indexed operator, address indexed
/// from, address indexed to, uint256[] ids, uint256[] values)`.
pub(super) fn handle_transfer_batch(
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let from = decoder.topic_address(2)?;
    let to = decoder.topic_address(3)?;
    let token_ids = decoder.u256_array(0)?;
    let amounts = decoder.u256_array(1)?;

    if token_ids.is_empty() {
        return Ok(LogOutcome::Skipped {
            reason: "empty batch transfer",
        });
    }
    if token_ids.len() != amounts.len() {
        return Ok(LogOutcome::Skipped {
            reason: "mismatched batch array lengths",
        });
    }

    let base = parse_event(log, timestamp);
    let mut events = Vec::with_capacity(token_ids.len());
    for (index, (token_id, amount)) in token_ids.into_iter().zip(amounts).enumerate() {
        let batch_index = u32::try_from(index).map_err(|_| DecodeError::MalformedArray(0))?;
        events.push(DomainEvent::Transfer(TransferEvent {
            kind: ContractKind::Erc1155,
            from,
            to,
            token_id,
            amount,
            base: base.with_batch_index(batch_index),
        }));
    }

    Ok(LogOutcome::Handled(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::data::{TRANSFER_BATCH_TOPIC, TRANSFER_SINGLE_TOPIC};
    use alloy_primitives::{Address, B256, U256};

    fn word_of(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes::<32>()
    }

    fn base_topics(topic0: B256) -> Vec<B256> {
        vec![
            topic0,
            Address::repeat_byte(0x0f).into_word(),
            Address::repeat_byte(0x01).into_word(),
            Address::repeat_byte(0x02).into_word(),
        ]
    }

    fn log_with(topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0x11),
            topics,
            data,
            block_number: 10,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 1,
            log_index: 4,
        }
    }

    #[test]
    fn test_transfer_single() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_of(5));
        data.extend_from_slice(&word_of(3));

        let log = log_with(base_topics(TRANSFER_SINGLE_TOPIC), data);
        let events = handle_transfer_single(&log, 1_700_000_000)
            .expect("outcome")
            .into_events();
        assert_eq!(events.len(), 1);
        let DomainEvent::Transfer(transfer) = &events[0] else {
            panic!("expected transfer");
        };
        assert_eq!(transfer.kind, ContractKind::Erc1155);
        assert_eq!(transfer.token_id, U256::from(5u64));
        assert_eq!(transfer.amount, U256::from(3u64));
    }

    #[test]
    fn test_transfer_batch_fans_out_with_batch_indices() {
        // Layout: [ids offset=0x40] [values offset=0xa0]
        //         [ids len=2] [7] [8] [values len=2] [1] [2]
        let mut data = Vec::new();
        data.extend_from_slice(&word_of(0x40));
        data.extend_from_slice(&word_of(0xa0));
        data.extend_from_slice(&word_of(2));
        data.extend_from_slice(&word_of(7));
        data.extend_from_slice(&word_of(8));
        data.extend_from_slice(&word_of(2));
        data.extend_from_slice(&word_of(1));
        data.extend_from_slice(&word_of(2));

        let log = log_with(base_topics(TRANSFER_BATCH_TOPIC), data);
        let events = handle_transfer_batch(&log, 1_700_000_000)
            .expect("outcome")
            .into_events();
        assert_eq!(events.len(), 2);

        for (index, event) in events.iter().enumerate() {
            let DomainEvent::Transfer(transfer) = event else {
                panic!("expected transfer");
            };
            assert_eq!(transfer.base.batch_index as usize, index);
            assert_eq!(transfer.base.log_index, 4);
        }

        let DomainEvent::Transfer(second) = &events[1] else {
            panic!("expected transfer");
        };
        assert_eq!(second.token_id, U256::from(8u64));
        assert_eq!(second.amount, U256::from(2u64));
    }

    #[test]
    fn test_mismatched_batch_arrays_are_skipped() {
        // Two ids but only one value.
        let mut data = Vec::new();
        data.extend_from_slice(&word_of(0x40));
        data.extend_from_slice(&word_of(0xa0));
        data.extend_from_slice(&word_of(2));
        data.extend_from_slice(&word_of(7));
        data.extend_from_slice(&word_of(8));
        data.extend_from_slice(&word_of(1));
        data.extend_from_slice(&word_of(1));

        let log = log_with(base_topics(TRANSFER_BATCH_TOPIC), data);
        let outcome = handle_transfer_batch(&log, 1_700_000_000).expect("outcome");
        assert_eq!(
            outcome,
            LogOutcome::Skipped {
                reason: "mismatched batch array lengths"
            }
        );
    }

    #[test]
    fn test_huge_batch_length_is_decode_error() {
        // The ids length word claims 2^58 entries the data lacks; this
        // must surface as a decode error, not an allocation failure.
        let mut data = Vec::new();
        data.extend_from_slice(&word_of(0x40));
        data.extend_from_slice(&word_of(0x80));
        data.extend_from_slice(&U256::from(1u64 << 58).to_be_bytes::<32>());
        data.extend_from_slice(&word_of(0));

        let log = log_with(base_topics(TRANSFER_BATCH_TOPIC), data);
        assert!(handle_transfer_batch(&log, 0).is_err());
    }

    #[test]
    fn test_empty_batch_is_skipped() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_of(0x40));
        data.extend_from_slice(&word_of(0x60));
        data.extend_from_slice(&word_of(0));
        data.extend_from_slice(&word_of(0));

        let log = log_with(base_topics(TRANSFER_BATCH_TOPIC), data);
        let outcome = handle_transfer_batch(&log, 1_700_000_000).expect("outcome");
        assert!(matches!(outcome, LogOutcome::Skipped { .. }));
    }
}
