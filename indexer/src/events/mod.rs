//! Event classification, decoding and handling.

pub mod abi;
pub mod data;
pub mod handlers;
pub mod parser;
pub mod types;

pub use data::{ChainContracts, EventKind, EventRegistry};
pub use handlers::{handle_log, HandlerContext, LogOutcome};
pub use types::{DomainEvent, RawLog};
