//! Event handlers.
//!
//! Each handler turns one classified raw log into zero or more domain
//! events. Dispatch over the event kind is exhaustive; adding a kind
//! without a handler is a compile error.

mod approvals;
mod erc1155;
mod erc721;
mod looksrare;
mod seaport;

use crate::attribution::AttributionResolver;
use crate::events::abi::DecodeError;
use crate::events::data::EventKind;
use crate::events::types::{DomainEvent, RawLog};
use crate::prices::PriceOracle;

/// Shared services available to handlers.
pub struct HandlerContext<'a> {
    /// Fill source attribution.
    pub attribution: &'a AttributionResolver,
    /// Price conversion.
    pub prices: &'a dyn PriceOracle,
}

/// Outcome of handling one classified log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    /// The log produced domain events.
    Handled(Vec<DomainEvent>),
    /// The log was deliberately dropped.
    Skipped {
        /// Why the log was dropped.
        reason: &'static str,
    },
}

impl LogOutcome {
    /// Returns the produced events, empty when skipped.
    #[must_use]
    pub fn into_events(self) -> Vec<DomainEvent> {
        match self {
            Self::Handled(events) => events,
            Self::Skipped { .. } => Vec::new(),
        }
    }
}

/// Handles a classified log, producing its domain events.
///
/// # Errors
///
/// Returns a decode error when the log payload does not match the
/// event's layout; callers skip the single log and continue.
pub async fn handle_log(
    ctx: &HandlerContext<'_>,
    kind: EventKind,
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    match kind {
        EventKind::Erc721Transfer => erc721::handle_transfer(log, timestamp),
        EventKind::Erc1155TransferSingle => erc1155::handle_transfer_single(log, timestamp),
        EventKind::Erc1155TransferBatch => erc1155::handle_transfer_batch(log, timestamp),
        EventKind::ApprovalForAll => approvals::handle_approval_for_all(log, timestamp),
        EventKind::SeaportOrderFulfilled => {
            seaport::handle_order_fulfilled(ctx, log, timestamp).await
        }
        EventKind::SeaportOrderCancelled => seaport::handle_order_cancelled(log, timestamp),
        EventKind::SeaportCounterIncremented => {
            seaport::handle_counter_incremented(log, timestamp)
        }
        EventKind::LooksRareTakerAsk => looksrare::handle_taker_ask(ctx, log, timestamp).await,
        EventKind::LooksRareTakerBid => looksrare::handle_taker_bid(ctx, log, timestamp).await,
        EventKind::LooksRareCancelAllOrders => looksrare::handle_cancel_all(log, timestamp),
        EventKind::LooksRareCancelMultipleOrders => {
            looksrare::handle_cancel_multiple(log, timestamp)
        }
    }
}
