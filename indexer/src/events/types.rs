//! Core event types.
//!
//! Defines raw chain logs, the base parameters shared by every derived
//! event, and the normalized domain events produced by the handlers.

use alloy_primitives::{Address, B256, U256};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// A raw on-chain log entry as returned by the RPC provider.
///
/// Immutable once fetched; identified by (block hash, tx hash, log index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract address.
    pub address: Address,
    /// Ordered list of topics (topic0 is the event signature).
    pub topics: Vec<B256>,
    /// ABI-encoded event data.
    pub data: Vec<u8>,
    /// Block number.
    pub block_number: u64,
    /// Block hash.
    pub block_hash: B256,
    /// Transaction hash.
    pub tx_hash: B256,
    /// Transaction index within the block.
    pub tx_index: u32,
    /// Log index within the block.
    pub log_index: u32,
}

impl RawLog {
    /// Returns the event signature topic, if any.
    #[must_use]
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}

/// Parameters shared by every derived event.
///
/// The tuple (block hash, tx hash, log index, batch index) uniquely
/// identifies an event; re-processing the same tuple is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEventParams {
    /// Emitting contract address.
    pub address: Address,
    /// Block number.
    pub block: u64,
    /// Block hash.
    pub block_hash: B256,
    /// Transaction hash.
    pub tx_hash: B256,
    /// Transaction index within the block.
    pub tx_index: u32,
    /// Log index within the block.
    pub log_index: u32,
    /// Index of the item within a multi-item log, starting at 0.
    pub batch_index: u32,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
}

impl BaseEventParams {
    /// Returns a copy with the given batch index.
    #[must_use]
    pub fn with_batch_index(&self, batch_index: u32) -> Self {
        Self {
            batch_index,
            ..self.clone()
        }
    }

    /// Returns the natural uniqueness key of the event.
    #[must_use]
    pub fn event_id(&self) -> (B256, B256, u32, u32) {
        (
            self.block_hash,
            self.tx_hash,
            self.log_index,
            self.batch_index,
        )
    }
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Bid: maker is buying the token.
    Buy,
    /// Ask: maker is selling the token.
    Sell,
}

impl Side {
    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Marketplace protocol an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Seaport-style exchange.
    Seaport,
    /// LooksRare-style exchange.
    LooksRare,
}

impl OrderKind {
    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Seaport => "seaport",
            Self::LooksRare => "looks-rare",
        }
    }
}

/// Kind of token contract a transfer originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    /// ERC-721 contract.
    Erc721,
    /// ERC-1155 contract.
    Erc1155,
}

impl ContractKind {
    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Erc721 => "erc721",
            Self::Erc1155 => "erc1155",
        }
    }
}

/// Source attribution attached to a fill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillAttribution {
    /// Source the order was originally posted through.
    pub order_source: Option<String>,
    /// Source the fill was executed through.
    pub fill_source: Option<String>,
    /// Aggregator the fill was routed through, if any.
    pub aggregator_source: Option<String>,
    /// Actual taker when filling through a router contract.
    pub taker: Option<Address>,
}

/// A normalized fill of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    /// Canonical order id (protocol-specific hash).
    pub order_id: B256,
    /// Protocol the order belongs to.
    pub order_kind: OrderKind,
    /// Side of the filled order.
    pub side: Side,
    /// Order maker.
    pub maker: Address,
    /// Order taker.
    pub taker: Address,
    /// Token contract.
    pub contract: Address,
    /// Token id.
    pub token_id: U256,
    /// Number of items filled.
    pub amount: U256,
    /// Payment currency (zero address for the chain-native currency).
    pub currency: Address,
    /// Per-item price in the payment currency.
    pub currency_price: U256,
    /// Per-item price in chain-native units.
    pub price: U256,
    /// Per-item price in USD, when a conversion was available.
    pub usd_price: Option<BigDecimal>,
    /// Order nonce, when the protocol exposes one.
    pub nonce: Option<U256>,
    /// Source attribution.
    pub attribution: FillAttribution,
    /// Base event parameters.
    pub base: BaseEventParams,
}

/// A single-order cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelEvent {
    /// Protocol the order belongs to.
    pub order_kind: OrderKind,
    /// Cancelled order id.
    pub order_id: B256,
    /// Base event parameters.
    pub base: BaseEventParams,
}

/// A per-nonce cancellation (one nonce, one order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceCancelEvent {
    /// Protocol the orders belong to.
    pub order_kind: OrderKind,
    /// Order maker.
    pub maker: Address,
    /// Cancelled nonce.
    pub nonce: U256,
    /// Base event parameters.
    pub base: BaseEventParams,
}

/// A bulk cancellation raising the maker's minimum valid nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCancelEvent {
    /// Protocol the orders belong to.
    pub order_kind: OrderKind,
    /// Order maker.
    pub maker: Address,
    /// New minimum valid nonce; all orders below it are invalid.
    pub min_nonce: U256,
    /// Base event parameters.
    pub base: BaseEventParams,
}

/// A token transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Token contract kind.
    pub kind: ContractKind,
    /// Sender (zero address for mints).
    pub from: Address,
    /// Recipient (zero address for burns).
    pub to: Address,
    /// Token id.
    pub token_id: U256,
    /// Transferred amount (always 1 for ERC-721).
    pub amount: U256,
    /// Base event parameters.
    pub base: BaseEventParams,
}

impl TransferEvent {
    /// Returns true if this transfer mints the token.
    #[must_use]
    pub fn is_mint(&self) -> bool {
        self.from == Address::ZERO
    }
}

/// An operator approval for a whole collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    /// Token owner.
    pub owner: Address,
    /// Approved operator.
    pub operator: Address,
    /// Whether the operator is approved.
    pub approved: bool,
    /// Base event parameters.
    pub base: BaseEventParams,
}

/// A normalized domain event produced by an event handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An order was filled.
    Fill(FillEvent),
    /// An order was cancelled.
    Cancel(CancelEvent),
    /// A single nonce was cancelled.
    NonceCancel(NonceCancelEvent),
    /// All of a maker's nonces below a floor were cancelled.
    BulkCancel(BulkCancelEvent),
    /// A token changed hands.
    Transfer(TransferEvent),
    /// An operator approval changed.
    Approval(ApprovalEvent),
}

impl DomainEvent {
    /// Returns the base event parameters.
    #[must_use]
    pub fn base(&self) -> &BaseEventParams {
        match self {
            Self::Fill(e) => &e.base,
            Self::Cancel(e) => &e.base,
            Self::NonceCancel(e) => &e.base,
            Self::BulkCancel(e) => &e.base,
            Self::Transfer(e) => &e.base,
            Self::Approval(e) => &e.base,
        }
    }

    /// Returns true if this is a fill event.
    #[must_use]
    pub const fn is_fill(&self) -> bool {
        matches!(self, Self::Fill(_))
    }

    /// Returns true if this is a transfer event.
    #[must_use]
    pub const fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BaseEventParams {
        BaseEventParams {
            address: Address::repeat_byte(0x11),
            block: 100,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 2,
            log_index: 7,
            batch_index: 0,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_base_params_with_batch_index() {
        let params = base().with_batch_index(3);
        assert_eq!(params.batch_index, 3);
        assert_eq!(params.log_index, 7);
    }

    #[test]
    fn test_base_params_event_id() {
        let params = base();
        let (block_hash, tx_hash, log_index, batch_index) = params.event_id();
        assert_eq!(block_hash, B256::repeat_byte(0xaa));
        assert_eq!(tx_hash, B256::repeat_byte(0xbb));
        assert_eq!(log_index, 7);
        assert_eq!(batch_index, 0);
    }

    #[test]
    fn test_side_as_str() {
        assert_eq!(Side::Buy.as_str(), "buy");
        assert_eq!(Side::Sell.as_str(), "sell");
    }

    #[test]
    fn test_order_kind_as_str() {
        assert_eq!(OrderKind::Seaport.as_str(), "seaport");
        assert_eq!(OrderKind::LooksRare.as_str(), "looks-rare");
    }

    #[test]
    fn test_transfer_is_mint() {
        let mint = TransferEvent {
            kind: ContractKind::Erc721,
            from: Address::ZERO,
            to: Address::repeat_byte(0x22),
            token_id: U256::from(1),
            amount: U256::from(1),
            base: base(),
        };
        assert!(mint.is_mint());

        let transfer = TransferEvent {
            from: Address::repeat_byte(0x33),
            ..mint
        };
        assert!(!transfer.is_mint());
    }

    #[test]
    fn test_domain_event_base() {
        let event = DomainEvent::Approval(ApprovalEvent {
            owner: Address::repeat_byte(0x01),
            operator: Address::repeat_byte(0x02),
            approved: true,
            base: base(),
        });
        assert_eq!(event.base().block, 100);
        assert!(!event.is_fill());
        assert!(!event.is_transfer());
    }
}
