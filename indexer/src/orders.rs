//! Order fillability state.
//!
//! Order status is re-derived from events rather than rolled back, so
//! transitions must tolerate duplicate and out-of-order delivery. A
//! terminal status with a later event timestamp is never reverted by an
//! earlier-timestamped event.

use serde::{Deserialize, Serialize};

/// Fillability status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fillability {
    /// The order can be filled.
    Fillable,
    /// The order was fully filled.
    Filled,
    /// The order was cancelled.
    Cancelled,
    /// The order expired.
    Expired,
    /// The maker no longer holds the tokens backing the order.
    NoBalance,
}

impl Fillability {
    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fillable => "fillable",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::NoBalance => "no-balance",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "fillable" => Some(Self::Fillable),
            "filled" => Some(Self::Filled),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            "no-balance" => Some(Self::NoBalance),
            _ => None,
        }
    }

    /// Returns true for statuses that no later event may revert.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled)
    }
}

/// Current transition-relevant state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderState {
    /// Current fillability status.
    pub fillability: Fillability,
    /// Timestamp of the event that produced the status.
    pub last_event_timestamp: i64,
}

/// Decides whether an event with the given timestamp may transition
/// the order.
///
/// Non-terminal states always accept transitions. Terminal states only
/// accept events at or after the one that made them terminal, which
/// keeps replays and late-arriving earlier events from reverting a
/// settled order.
#[must_use]
pub const fn should_apply(current: OrderState, event_timestamp: i64) -> bool {
    !current.fillability.is_terminal() || current.last_event_timestamp <= event_timestamp
}
