//! Operator approval handler.

use super::LogOutcome;
use crate::events::abi::{DecodeError, LogDecoder};
use crate::events::parser::parse_event;
use crate::events::types::{ApprovalEvent, DomainEvent, RawLog};

/// Handles `ApprovalForAll(address indexed owner, address indexed
/// operator, bool approved)`.
pub(super) fn handle_approval_for_all(
    log: &RawLog,
    timestamp: i64,
) -> Result<LogOutcome, DecodeError> {
    let decoder = LogDecoder::new(&log.topics, &log.data);

    let event = ApprovalEvent {
        owner: decoder.topic_address(1)?,
        operator: decoder.topic_address(2)?,
        approved: decoder.bool(0)?,
        base: parse_event(log, timestamp),
    };

    Ok(LogOutcome::Handled(vec![DomainEvent::Approval(event)]))
}
