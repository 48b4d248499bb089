//! LooksRare-style exchange handlers.

use super::{HandlerContext, LogOutcome};
use crate::events::abi::{DecodeError, LogDecoder};
use crate::events::parser::parse_event;
use crate::events::types::{
    BulkCancelEvent, DomainEvent, NonceCancelEvent, OrderKind, RawLog, Side,
};

/// Handles `TakerAsk`: a taker accepted a maker's bid.
pub(super) async fn handle_taker_ask(
    ctx: &HandlerContext<'_>,
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    handle_fill(ctx, log, timestamp, Side::Buy).await
}

/// Handles `TakerBid`: a taker bought into a maker's ask.
pub(super) async fn handle_taker_bid(
    ctx: &HandlerContext<'_>,
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    handle_fill(ctx, log, timestamp, Side::Sell).await
}

/// Shared layout of `TakerAsk(bytes32 orderHash, uint256 orderNonce,
/// address indexed taker, address indexed maker, address indexed
/// strategy, address currency, address collection, uint256 tokenId,
/// uint256 amount, uint256 price)` and `TakerBid`.
async fn handle_fill(
    ctx: &HandlerContext<'_>,
    log: &RawLog,
    timestamp: i64,
    side: Side,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let taker = decoder.topic_address(1)?;
    let maker = decoder.topic_address(2)?;
    let order_id = decoder.b256(0)?;
    let nonce = decoder.u256(1)?;
    let currency = decoder.address(2)?;
    let contract = decoder.address(3)?;
    let token_id = decoder.u256(4)?;
    let amount = decoder.u256(5)?;
    let price = decoder.u256(6)?;

    if amount.is_zero() {
        return Ok(LogOutcome::Skipped {
            reason: "fill with zero amount",
        });
    }
    let currency_price = price / amount;

    let Some(conversion) = ctx.prices.convert(currency, currency_price, timestamp).await else {
        return Ok(LogOutcome::Skipped {
            reason: "no native price for fill currency",
        });
    };

    let attribution = ctx
        .attribution
        .resolve(log.tx_hash, OrderKind::LooksRare, taker)
        .await;

    let event = crate::events::types::FillEvent {
        order_id,
        order_kind: OrderKind::LooksRare,
        side,
        maker,
        taker,
        contract,
        token_id,
        amount,
        currency,
        currency_price,
        price: conversion.native_price,
        usd_price: conversion.usd_price,
        nonce: Some(nonce),
        attribution,
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::Fill(event)]))
}

/// Handles `CancelAllOrders(address indexed user, uint256 newMinNonce)`.
pub(super) fn handle_cancel_all(log: &RawLog, timestamp: i64) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let event = BulkCancelEvent {
        order_kind: OrderKind::LooksRare,
        maker: decoder.topic_address(1)?,
        min_nonce: decoder.u256(0)?,
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::BulkCancel(event)]))
}

/// Handles `CancelMultipleOrders(address indexed user, uint256[]
/// orderNonces)`, fanning out one event per nonce.
pub(super) fn handle_cancel_multiple(
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let maker = decoder.topic_address(1)?;
    let nonces = decoder.u256_array(0)?;
    if nonces.is_empty() {
        return Ok(LogOutcome::Skipped {
            reason: "cancel with no nonces",
        });
    }

    let base = parse_event(log, timestamp);
    let mut events = Vec::with_capacity(nonces.len());
    for (index, nonce) in nonces.into_iter().enumerate() {
        let batch_index = u32::try_from(index).map_err(|_| DecodeError::MalformedArray(0))?;
        events.push(DomainEvent::NonceCancel(NonceCancelEvent {
            order_kind: OrderKind::LooksRare,
            maker,
            nonce,
            base: base.with_batch_index(batch_index),
        }));
    }

    Ok(LogOutcome::Handled(events))
}
