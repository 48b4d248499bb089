//! Event descriptor registry (log classifier).
//!
//! Every event the pipeline syncs has a descriptor mapping
//! {topic0, topic count, optional address allow-list} to a typed kind.
//! The registry is built once at startup; duplicate registrations for
//! the same (topic, topic count) pair are a configuration error.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{address, b256, Address, B256};

use crate::config::ConfigError;
use crate::events::types::RawLog;

/// ERC-721 / ERC-20 `Transfer` signature (shared topic, distinct topic counts).
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// ERC-721 / ERC-1155 `ApprovalForAll` signature.
pub const APPROVAL_FOR_ALL_TOPIC: B256 =
    b256!("17307eab39ab6107e8899845ad3d59bd9653f200f220920489ca2b5937696c31");

/// ERC-1155 `TransferSingle` signature.
pub const TRANSFER_SINGLE_TOPIC: B256 =
    b256!("c3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62");

/// ERC-1155 `TransferBatch` signature.
pub const TRANSFER_BATCH_TOPIC: B256 =
    b256!("4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb");

/// Seaport `OrderFulfilled` signature.
pub const SEAPORT_ORDER_FULFILLED_TOPIC: B256 =
    b256!("9d9af8e38d66c62e2c12f0225249fd9d721c54b83f48d9352c97c6cacdcb6f31");

/// Seaport `OrderCancelled` signature.
pub const SEAPORT_ORDER_CANCELLED_TOPIC: B256 =
    b256!("6bacc01dbe442496068f7d234edd811f1a5f833243e0aec824f86ab861f3c90d");

/// Seaport `CounterIncremented` signature.
pub const SEAPORT_COUNTER_INCREMENTED_TOPIC: B256 =
    b256!("721c20121297512b72821b97f5326877ea8ecf4bb9948fea5bfcb6453074d37f");

/// LooksRare `TakerAsk` signature.
pub const LOOKS_RARE_TAKER_ASK_TOPIC: B256 =
    b256!("68cd251d4d267c6e2034ff0088b990352b97b2002c0476587d0c4da889c11330");

/// LooksRare `TakerBid` signature.
pub const LOOKS_RARE_TAKER_BID_TOPIC: B256 =
    b256!("95fb6205e23ff6bd04b6e2d255bacb8b6680c25a9e9d6a7eab96cd8193ea33e9");

/// LooksRare `CancelAllOrders` signature.
pub const LOOKS_RARE_CANCEL_ALL_TOPIC: B256 =
    b256!("1e7178d84f0b0825c65795cd62e7972809ad3aac6917843aaec596161b2c0a97");

/// LooksRare `CancelMultipleOrders` signature.
pub const LOOKS_RARE_CANCEL_MULTIPLE_TOPIC: B256 =
    b256!("fa0ae5d80fe3763c880a3839fab0294171a6f730d1f82c4cd5392c6f67b41732");

/// Default Seaport exchange address (mainnet).
pub const SEAPORT_EXCHANGE: Address = address!("00000000006c3852cbEf3e08E8dF289169EdE581");

/// Default LooksRare exchange address (mainnet).
pub const LOOKS_RARE_EXCHANGE: Address = address!("59728544B08AB483533076417FbBB2fD0B17CE3a");

/// Closed set of events the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// ERC-721 `Transfer`.
    Erc721Transfer,
    /// ERC-1155 `TransferSingle`.
    Erc1155TransferSingle,
    /// ERC-1155 `TransferBatch`.
    Erc1155TransferBatch,
    /// ERC-721 / ERC-1155 `ApprovalForAll`.
    ApprovalForAll,
    /// Seaport `OrderFulfilled`.
    SeaportOrderFulfilled,
    /// Seaport `OrderCancelled`.
    SeaportOrderCancelled,
    /// Seaport `CounterIncremented`.
    SeaportCounterIncremented,
    /// LooksRare `TakerAsk` (bid filled).
    LooksRareTakerAsk,
    /// LooksRare `TakerBid` (ask filled).
    LooksRareTakerBid,
    /// LooksRare `CancelAllOrders`.
    LooksRareCancelAllOrders,
    /// LooksRare `CancelMultipleOrders`.
    LooksRareCancelMultipleOrders,
}

impl EventKind {
    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Erc721Transfer => "erc721-transfer",
            Self::Erc1155TransferSingle => "erc1155-transfer-single",
            Self::Erc1155TransferBatch => "erc1155-transfer-batch",
            Self::ApprovalForAll => "approval-for-all",
            Self::SeaportOrderFulfilled => "seaport-order-filled",
            Self::SeaportOrderCancelled => "seaport-order-cancelled",
            Self::SeaportCounterIncremented => "seaport-counter-incremented",
            Self::LooksRareTakerAsk => "looks-rare-taker-ask",
            Self::LooksRareTakerBid => "looks-rare-taker-bid",
            Self::LooksRareCancelAllOrders => "looks-rare-cancel-all-orders",
            Self::LooksRareCancelMultipleOrders => "looks-rare-cancel-multiple-orders",
        }
    }
}

/// Static registration of one syncable event.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    /// Typed kind the event maps to.
    pub kind: EventKind,
    /// Event signature (topic0).
    pub topic: B256,
    /// Exact number of topics the log must carry.
    pub num_topics: usize,
    /// Optional emitting-address allow-list.
    pub addresses: Option<HashSet<Address>>,
}

impl EventDescriptor {
    /// Creates an unrestricted descriptor.
    #[must_use]
    pub fn new(kind: EventKind, topic: B256, num_topics: usize) -> Self {
        Self {
            kind,
            topic,
            num_topics,
            addresses: None,
        }
    }

    /// Restricts the descriptor to the given emitting addresses.
    #[must_use]
    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.addresses = Some(addresses.into_iter().collect());
        self
    }

    /// Returns true if the descriptor matches the given log.
    #[must_use]
    pub fn matches(&self, log: &RawLog) -> bool {
        log.topic0() == Some(&self.topic)
            && log.topics.len() == self.num_topics
            && self
                .addresses
                .as_ref()
                .is_none_or(|allowed| allowed.contains(&log.address))
    }
}

/// Exchange contract addresses for the synced chain.
#[derive(Debug, Clone)]
pub struct ChainContracts {
    /// Seaport exchange address.
    pub seaport: Address,
    /// LooksRare exchange address.
    pub looks_rare: Address,
}

impl Default for ChainContracts {
    fn default() -> Self {
        Self {
            seaport: SEAPORT_EXCHANGE,
            looks_rare: LOOKS_RARE_EXCHANGE,
        }
    }
}

/// Registry of all event descriptors, built once at startup.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    by_key: HashMap<(B256, usize), EventDescriptor>,
}

impl EventRegistry {
    /// Builds a registry from the given descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateEventDescriptor`] if two
    /// descriptors share the same (topic, topic count) pair.
    pub fn new(descriptors: Vec<EventDescriptor>) -> Result<Self, ConfigError> {
        let mut by_key = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let key = (descriptor.topic, descriptor.num_topics);
            if let Some(existing) = by_key.insert(key, descriptor) {
                return Err(ConfigError::DuplicateEventDescriptor {
                    kind: existing.kind.as_str(),
                });
            }
        }
        Ok(Self { by_key })
    }

    /// Builds the standard registry for the given chain contracts.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in descriptor set is inconsistent.
    pub fn standard(contracts: &ChainContracts) -> Result<Self, ConfigError> {
        Self::new(vec![
            EventDescriptor::new(EventKind::Erc721Transfer, TRANSFER_TOPIC, 4),
            EventDescriptor::new(EventKind::Erc1155TransferSingle, TRANSFER_SINGLE_TOPIC, 4),
            EventDescriptor::new(EventKind::Erc1155TransferBatch, TRANSFER_BATCH_TOPIC, 4),
            EventDescriptor::new(EventKind::ApprovalForAll, APPROVAL_FOR_ALL_TOPIC, 3),
            EventDescriptor::new(EventKind::SeaportOrderFulfilled, SEAPORT_ORDER_FULFILLED_TOPIC, 3)
                .with_addresses([contracts.seaport]),
            EventDescriptor::new(EventKind::SeaportOrderCancelled, SEAPORT_ORDER_CANCELLED_TOPIC, 3)
                .with_addresses([contracts.seaport]),
            EventDescriptor::new(
                EventKind::SeaportCounterIncremented,
                SEAPORT_COUNTER_INCREMENTED_TOPIC,
                2,
            )
            .with_addresses([contracts.seaport]),
            EventDescriptor::new(EventKind::LooksRareTakerAsk, LOOKS_RARE_TAKER_ASK_TOPIC, 4)
                .with_addresses([contracts.looks_rare]),
            EventDescriptor::new(EventKind::LooksRareTakerBid, LOOKS_RARE_TAKER_BID_TOPIC, 4)
                .with_addresses([contracts.looks_rare]),
            EventDescriptor::new(EventKind::LooksRareCancelAllOrders, LOOKS_RARE_CANCEL_ALL_TOPIC, 2)
                .with_addresses([contracts.looks_rare]),
            EventDescriptor::new(
                EventKind::LooksRareCancelMultipleOrders,
                LOOKS_RARE_CANCEL_MULTIPLE_TOPIC,
                2,
            )
            .with_addresses([contracts.looks_rare]),
        ])
    }

    /// Classifies a raw log, returning the matching descriptor if any.
    ///
    /// Matching requires an exact topic0 match, an exact topic count
    /// match, and, when the descriptor restricts addresses, an emitting
    /// address on the allow-list.
    #[must_use]
    pub fn classify(&self, log: &RawLog) -> Option<&EventDescriptor> {
        let topic0 = log.topic0()?;
        let descriptor = self.by_key.get(&(*topic0, log.topics.len()))?;
        descriptor.matches(log).then_some(descriptor)
    }

    /// Returns the distinct topic0 values of all registered events,
    /// for use in a log filter.
    #[must_use]
    pub fn topics(&self) -> Vec<B256> {
        let unique: HashSet<B256> = self.by_key.keys().map(|(topic, _)| *topic).collect();
        unique.into_iter().collect()
    }

    /// Returns the number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns true if no descriptors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(address: Address, topics: Vec<B256>) -> RawLog {
        RawLog {
            address,
            topics,
            data: vec![],
            block_number: 1,
            block_hash: B256::repeat_byte(0xaa),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn test_standard_registry_builds() {
        let registry = EventRegistry::standard(&ChainContracts::default()).expect("registry");
        assert_eq!(registry.len(), 11);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = EventRegistry::new(vec![
            EventDescriptor::new(EventKind::Erc721Transfer, TRANSFER_TOPIC, 4),
            EventDescriptor::new(EventKind::Erc1155TransferSingle, TRANSFER_TOPIC, 4),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_same_topic_distinct_counts_allowed() {
        // ERC-20 and ERC-721 transfers share a signature but differ in
        // indexed-field count.
        let result = EventRegistry::new(vec![
            EventDescriptor::new(EventKind::Erc721Transfer, TRANSFER_TOPIC, 4),
            EventDescriptor::new(EventKind::Erc721Transfer, TRANSFER_TOPIC, 3),
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_classify_by_topic_and_count() {
        let registry = EventRegistry::standard(&ChainContracts::default()).expect("registry");

        let erc721 = log_with(
            Address::repeat_byte(0x11),
            vec![
                TRANSFER_TOPIC,
                B256::repeat_byte(0x01),
                B256::repeat_byte(0x02),
                B256::repeat_byte(0x03),
            ],
        );
        let descriptor = registry.classify(&erc721).expect("descriptor");
        assert_eq!(descriptor.kind, EventKind::Erc721Transfer);

        // Same topic with three topics is an ERC-20 transfer, which the
        // standard registry does not register.
        let erc20 = log_with(
            Address::repeat_byte(0x11),
            vec![TRANSFER_TOPIC, B256::repeat_byte(0x01), B256::repeat_byte(0x02)],
        );
        assert!(registry.classify(&erc20).is_none());
    }

    #[test]
    fn test_classify_respects_address_allow_list() {
        let registry = EventRegistry::standard(&ChainContracts::default()).expect("registry");

        let topics = vec![
            SEAPORT_ORDER_CANCELLED_TOPIC,
            B256::repeat_byte(0x01),
            B256::repeat_byte(0x02),
        ];

        let from_exchange = log_with(SEAPORT_EXCHANGE, topics.clone());
        assert!(registry.classify(&from_exchange).is_some());

        let from_elsewhere = log_with(Address::repeat_byte(0x99), topics);
        assert!(registry.classify(&from_elsewhere).is_none());
    }

    #[test]
    fn test_classify_unknown_topic() {
        let registry = EventRegistry::standard(&ChainContracts::default()).expect("registry");
        let unknown = log_with(Address::repeat_byte(0x11), vec![B256::repeat_byte(0xfe)]);
        assert!(registry.classify(&unknown).is_none());
    }

    #[test]
    fn test_topics_are_unique() {
        let registry = EventRegistry::standard(&ChainContracts::default()).expect("registry");
        let topics = registry.topics();
        let unique: HashSet<_> = topics.iter().collect();
        assert_eq!(topics.len(), unique.len());
        assert!(topics.contains(&TRANSFER_TOPIC));
    }
}
