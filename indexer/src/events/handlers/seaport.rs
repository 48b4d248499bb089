//! Seaport-style exchange handlers.
//!
//! `OrderFulfilled` carries the spent (offer) and received
//! (consideration) item arrays. The filled side follows from the first
//! offer item: an NFT offered means the maker was selling.

use alloy_primitives::{Address, U256};

use super::{HandlerContext, LogOutcome};
use crate::events::abi::{DecodeError, LogDecoder};
use crate::events::parser::parse_event;
use crate::events::types::{
    BulkCancelEvent, CancelEvent, DomainEvent, FillEvent, OrderKind, RawLog, Side,
};

const ITEM_TYPE_NATIVE: u8 = 0;
const ITEM_TYPE_ERC20: u8 = 1;
const ITEM_TYPE_ERC721: u8 = 2;
const ITEM_TYPE_ERC1155: u8 = 3;

#[derive(Debug, Clone, Copy)]
struct SpentItem {
    item_type: u8,
    token: Address,
    identifier: U256,
    amount: U256,
}

impl SpentItem {
    const fn is_nft(&self) -> bool {
        matches!(self.item_type, ITEM_TYPE_ERC721 | ITEM_TYPE_ERC1155)
    }

    const fn is_payment(&self) -> bool {
        matches!(self.item_type, ITEM_TYPE_NATIVE | ITEM_TYPE_ERC20)
    }

    /// Payment currency, with native items normalized to the zero
    /// address.
    const fn currency(&self) -> Address {
        if self.item_type == ITEM_TYPE_NATIVE {
            Address::ZERO
        } else {
            self.token
        }
    }
}

fn item_type_of(value: U256) -> Result<u8, DecodeError> {
    u8::try_from(value).map_err(|_| DecodeError::MalformedArray(0))
}

fn decode_items(
    decoder: &LogDecoder<'_>,
    header_word: usize,
    words_per_item: usize,
) -> Result<Vec<SpentItem>, DecodeError> {
    let offset = usize::try_from(decoder.u256(header_word)?)
        .map_err(|_| DecodeError::MalformedArray(header_word))?;
    if offset % 32 != 0 {
        return Err(DecodeError::MalformedArray(header_word));
    }
    let base = offset / 32;
    let length = usize::try_from(decoder.u256(base)?)
        .map_err(|_| DecodeError::MalformedArray(header_word))?;

    // The length word is attacker-controlled; bound it by the data
    // actually present before allocating.
    let end = length
        .checked_mul(words_per_item)
        .and_then(|span| base.checked_add(1)?.checked_add(span));
    if end.is_none_or(|end| end > decoder.word_count()) {
        return Err(DecodeError::MalformedArray(header_word));
    }

    let mut items = Vec::with_capacity(length);
    for i in 0..length {
        let at = base + 1 + i * words_per_item;
        items.push(SpentItem {
            item_type: item_type_of(decoder.u256(at)?)?,
            token: decoder.address(at + 1)?,
            identifier: decoder.u256(at + 2)?,
            amount: decoder.u256(at + 3)?,
        });
    }
    Ok(items)
}

/// Handles `OrderFulfilled(bytes32 orderHash, address indexed offerer,
/// address indexed zone, address recipient, SpentItem[] offer,
/// ReceivedItem[] consideration)`.
pub(super) async fn handle_order_fulfilled(
    ctx: &HandlerContext<'_>,
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let maker = decoder.topic_address(1)?;
    let order_id = decoder.b256(0)?;
    let taker = decoder.address(1)?;
    let offer = decode_items(&decoder, 2, 4)?;
    // Received items carry a trailing recipient word the fill does not
    // need.
    let consideration = decode_items(&decoder, 3, 5)?;

    let Some(first_offer) = offer.first() else {
        return Ok(LogOutcome::Skipped {
            reason: "order fulfilled with empty offer",
        });
    };

    let (side, nft, currency, total_price) = if first_offer.is_nft() {
        // Maker sold the NFT; payment is the consideration.
        let Some(payment) = consideration.iter().find(|item| item.is_payment()) else {
            return Ok(LogOutcome::Skipped {
                reason: "order fulfilled with no payment item",
            });
        };
        let currency = payment.currency();
        let total: U256 = consideration
            .iter()
            .filter(|item| item.is_payment() && item.currency() == currency)
            .fold(U256::ZERO, |acc, item| acc.saturating_add(item.amount));
        (Side::Sell, *first_offer, currency, total)
    } else if first_offer.is_payment() {
        // Maker bought the NFT; it arrives through the consideration.
        let Some(nft) = consideration.iter().find(|item| item.is_nft()) else {
            return Ok(LogOutcome::Skipped {
                reason: "order fulfilled with no token item",
            });
        };
        (Side::Buy, *nft, first_offer.currency(), first_offer.amount)
    } else {
        return Ok(LogOutcome::Skipped {
            reason: "unsupported offer item type",
        });
    };

    if nft.amount.is_zero() {
        return Ok(LogOutcome::Skipped {
            reason: "order fulfilled with zero amount",
        });
    }
    let currency_price = total_price / nft.amount;

    let Some(conversion) = ctx.prices.convert(currency, currency_price, timestamp).await else {
        return Ok(LogOutcome::Skipped {
            reason: "no native price for fill currency",
        });
    };

    let attribution = ctx
        .attribution
        .resolve(log.tx_hash, OrderKind::Seaport, taker)
        .await;

    let event = FillEvent {
        order_id,
        order_kind: OrderKind::Seaport,
        side,
        maker,
        taker,
        contract: nft.token,
        token_id: nft.identifier,
        amount: nft.amount,
        currency,
        currency_price,
        price: conversion.native_price,
        usd_price: conversion.usd_price,
        nonce: None,
        attribution,
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::Fill(event)]))
}

/// Handles `OrderCancelled(bytes32 orderHash, address indexed offerer,
/// address indexed zone)`.
pub(super) fn handle_order_cancelled(
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let event = CancelEvent {
        order_kind: OrderKind::Seaport,
        order_id: decoder.b256(0)?,
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::Cancel(event)]))
}

/// Handles `CounterIncremented(uint256 newCounter, address indexed
/// offerer)`.
///
/// Raising the counter invalidates every order signed under a lower
/// one, so this maps to a bulk cancel.
pub(super) fn handle_counter_incremented(
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let event = BulkCancelEvent {
        order_kind: OrderKind::Seaport,
        maker: decoder.topic_address(1)?,
        min_nonce: decoder.u256(0)?,
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::BulkCancel(event)]))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::attribution::AttributionResolver;
    use crate::events::data::{
        SEAPORT_COUNTER_INCREMENTED_TOPIC, SEAPORT_ORDER_CANCELLED_TOPIC,
        SEAPORT_ORDER_FULFILLED_TOPIC,
    };
    use crate::prices::DayPriceOracle;
    use crate::rpc::MockProvider;
    use alloy_primitives::B256;
    use bigdecimal::BigDecimal;

    fn push_word(data: &mut Vec<u8>, value: U256) {
        data.extend_from_slice(&value.to_be_bytes::<32>());
    }

    fn push_address(data: &mut Vec<u8>, address: Address) {
        data.extend_from_slice(&address.into_word().0);
    }

    fn push_hash(data: &mut Vec<u8>, hash: B256) {
        data.extend_from_slice(&hash.0);
    }

    struct Item {
        item_type: u64,
        token: Address,
        identifier: u64,
        amount: u64,
        recipient: Option<Address>,
    }

    /// Encodes an `OrderFulfilled` data section.
    fn fulfilled_data(order_hash: B256, recipient: Address, offer: &[Item], cons: &[Item]) -> Vec<u8> {
        let mut data = Vec::new();
        push_hash(&mut data, order_hash);
        push_address(&mut data, recipient);
        let offer_offset = 4 * 32;
        let cons_offset = offer_offset + 32 + offer.len() * 4 * 32;
        push_word(&mut data, U256::from(offer_offset));
        push_word(&mut data, U256::from(cons_offset));

        push_word(&mut data, U256::from(offer.len()));
        for item in offer {
            push_word(&mut data, U256::from(item.item_type));
            push_address(&mut data, item.token);
            push_word(&mut data, U256::from(item.identifier));
            push_word(&mut data, U256::from(item.amount));
        }
        push_word(&mut data, U256::from(cons.len()));
        for item in cons {
            push_word(&mut data, U256::from(item.item_type));
            push_address(&mut data, item.token);
            push_word(&mut data, U256::from(item.identifier));
            push_word(&mut data, U256::from(item.amount));
            push_address(&mut data, item.recipient.unwrap_or(Address::ZERO));
        }
        data
    }

    fn fulfilled_log(maker: Address, data: Vec<u8>) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0x5e),
            topics: vec![
                SEAPORT_ORDER_FULFILLED_TOPIC,
                maker.into_word(),
                B256::ZERO,
            ],
            data,
            block_number: 10,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            log_index: 2,
        }
    }

    fn context(oracle: &DayPriceOracle) -> (AttributionResolver, &DayPriceOracle) {
        (
            AttributionResolver::new(Arc::new(MockProvider::new())),
            oracle,
        )
    }

    #[tokio::test]
    async fn test_sell_side_fill_from_offered_nft() {
        let maker = Address::repeat_byte(0x01);
        let taker = Address::repeat_byte(0x02);
        let collection = Address::repeat_byte(0x03);
        let order_hash = B256::repeat_byte(0x77);

        // One ERC-721 offered; payment split between seller and fee
        // recipient.
        let data = fulfilled_data(
            order_hash,
            taker,
            &[Item {
                item_type: 2,
                token: collection,
                identifier: 9,
                amount: 1,
                recipient: None,
            }],
            &[
                Item {
                    item_type: 0,
                    token: Address::ZERO,
                    identifier: 0,
                    amount: 950,
                    recipient: Some(maker),
                },
                Item {
                    item_type: 0,
                    token: Address::ZERO,
                    identifier: 0,
                    amount: 50,
                    recipient: Some(Address::repeat_byte(0xfe)),
                },
            ],
        );

        let oracle = DayPriceOracle::new();
        let (attribution, prices) = context(&oracle);
        let ctx = HandlerContext {
            attribution: &attribution,
            prices,
        };

        let events = handle_order_fulfilled(&ctx, &fulfilled_log(maker, data), 1_700_000_000)
            .await
            .expect("outcome")
            .into_events();
        assert_eq!(events.len(), 1);
        let DomainEvent::Fill(fill) = &events[0] else {
            panic!("expected fill");
        };
        assert_eq!(fill.order_id, order_hash);
        assert_eq!(fill.side, Side::Sell);
        assert_eq!(fill.maker, maker);
        assert_eq!(fill.taker, taker);
        assert_eq!(fill.contract, collection);
        assert_eq!(fill.token_id, U256::from(9u64));
        assert_eq!(fill.amount, U256::from(1u64));
        assert_eq!(fill.currency, Address::ZERO);
        assert_eq!(fill.currency_price, U256::from(1000u64));
        assert_eq!(fill.price, U256::from(1000u64));
        assert!(fill.nonce.is_none());
    }

    #[tokio::test]
    async fn test_buy_side_fill_divides_price_per_item() {
        let maker = Address::repeat_byte(0x01);
        let taker = Address::repeat_byte(0x02);
        let collection = Address::repeat_byte(0x03);
        let currency = Address::repeat_byte(0x04);

        // Maker bid 500 of an ERC-20 for five ERC-1155 items.
        let data = fulfilled_data(
            B256::repeat_byte(0x77),
            taker,
            &[Item {
                item_type: 1,
                token: currency,
                identifier: 0,
                amount: 500,
                recipient: None,
            }],
            &[Item {
                item_type: 3,
                token: collection,
                identifier: 12,
                amount: 5,
                recipient: Some(maker),
            }],
        );

        let mut oracle = DayPriceOracle::new();
        oracle.set_native_rate(currency, 1_700_000_000, BigDecimal::from(2));
        oracle.set_usd_rate(1_700_000_000, BigDecimal::from(0));
        let (attribution, prices) = context(&oracle);
        let ctx = HandlerContext {
            attribution: &attribution,
            prices,
        };

        let events = handle_order_fulfilled(&ctx, &fulfilled_log(maker, data), 1_700_000_000)
            .await
            .expect("outcome")
            .into_events();
        let DomainEvent::Fill(fill) = &events[0] else {
            panic!("expected fill");
        };
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.amount, U256::from(5u64));
        assert_eq!(fill.currency_price, U256::from(100u64));
        assert_eq!(fill.price, U256::from(200u64));
    }

    #[tokio::test]
    async fn test_fill_without_native_price_is_dropped() {
        let data = fulfilled_data(
            B256::repeat_byte(0x77),
            Address::repeat_byte(0x02),
            &[Item {
                item_type: 2,
                token: Address::repeat_byte(0x03),
                identifier: 1,
                amount: 1,
                recipient: None,
            }],
            &[Item {
                item_type: 1,
                token: Address::repeat_byte(0x99),
                identifier: 0,
                amount: 100,
                recipient: None,
            }],
        );

        let oracle = DayPriceOracle::new();
        let (attribution, prices) = context(&oracle);
        let ctx = HandlerContext {
            attribution: &attribution,
            prices,
        };

        let outcome =
            handle_order_fulfilled(&ctx, &fulfilled_log(Address::repeat_byte(0x01), data), 0)
                .await
                .expect("outcome");
        assert!(matches!(outcome, LogOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_huge_offer_length_is_decode_error() {
        // Well-formed header, but the offer length word claims 2^58
        // items the data does not carry.
        let mut data = Vec::new();
        push_hash(&mut data, B256::repeat_byte(0x77));
        push_address(&mut data, Address::repeat_byte(0x02));
        push_word(&mut data, U256::from(4 * 32));
        push_word(&mut data, U256::from(5 * 32));
        push_word(&mut data, U256::from(1u64 << 58));
        push_word(&mut data, U256::ZERO);

        let oracle = DayPriceOracle::new();
        let (attribution, prices) = context(&oracle);
        let ctx = HandlerContext {
            attribution: &attribution,
            prices,
        };

        let result =
            handle_order_fulfilled(&ctx, &fulfilled_log(Address::repeat_byte(0x01), data), 0)
                .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_order_cancelled() {
        let order_hash = B256::repeat_byte(0x55);
        let log = RawLog {
            address: Address::repeat_byte(0x5e),
            topics: vec![
                SEAPORT_ORDER_CANCELLED_TOPIC,
                Address::repeat_byte(0x01).into_word(),
                B256::ZERO,
            ],
            data: order_hash.0.to_vec(),
            block_number: 10,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            log_index: 2,
        };

        let events = handle_order_cancelled(&log, 1_700_000_000)
            .expect("outcome")
            .into_events();
        let DomainEvent::Cancel(cancel) = &events[0] else {
            panic!("expected cancel");
        };
        assert_eq!(cancel.order_id, order_hash);
        assert_eq!(cancel.order_kind, OrderKind::Seaport);
    }

    #[test]
    fn test_counter_incremented_is_bulk_cancel() {
        let maker = Address::repeat_byte(0x01);
        let log = RawLog {
            address: Address::repeat_byte(0x5e),
            topics: vec![SEAPORT_COUNTER_INCREMENTED_TOPIC, maker.into_word()],
            data: U256::from(7u64).to_be_bytes::<32>().to_vec(),
            block_number: 10,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            log_index: 2,
        };

        let events = handle_counter_incremented(&log, 1_700_000_000)
            .expect("outcome")
            .into_events();
        let DomainEvent::BulkCancel(cancel) = &events[0] else {
            panic!("expected bulk cancel");
        };
        assert_eq!(cancel.maker, maker);
        assert_eq!(cancel.min_nonce, U256::from(7u64));
    }
}
