//! Fill source attribution.
//!
//! Attributes each fill to the marketplace it was posted on and the
//! frontend or aggregator it was executed through, by inspecting the
//! fill transaction. Resolution is best effort: any failure yields an
//! unattributed fill rather than blocking the batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy_primitives::{address, Address, B256};
use tracing::debug;

use crate::events::types::{FillAttribution, OrderKind};
use crate::rpc::ChainProvider;

/// Entries kept before the resolution cache is flushed.
const CACHE_MAX_ENTRIES: usize = 4096;

/// Known aggregator router contracts (mainnet).
#[must_use]
pub fn standard_routers() -> HashMap<Address, String> {
    HashMap::from([
        (
            address!("83C8F28c26bF6aaca652Df1DbBE0e1b56F8baBa2"),
            "gem.xyz".to_string(),
        ),
        (
            address!("0a267cF51EF038fC00E71801F5a524aec06e4f07"),
            "genie.xyz".to_string(),
        ),
    ])
}

/// Resolves fill attribution from transaction calldata.
///
/// Results are cached per (transaction, protocol) since one transaction
/// commonly fills many orders.
pub struct AttributionResolver {
    provider: Arc<dyn ChainProvider>,
    /// Router address to aggregator source name.
    routers: HashMap<Address, String>,
    /// Calldata domain tag (last four bytes) to fill source name.
    domain_tags: HashMap<[u8; 4], String>,
    cache: Mutex<HashMap<(B256, OrderKind), FillAttribution>>,
}

impl AttributionResolver {
    /// Creates a resolver with the standard router table and no domain
    /// tags.
    #[must_use]
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self {
            provider,
            routers: standard_routers(),
            domain_tags: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a router contract as an aggregator source.
    pub fn add_router(&mut self, address: Address, source: impl Into<String>) {
        self.routers.insert(address, source.into());
    }

    /// Registers a calldata domain tag as a fill source.
    pub fn add_domain_tag(&mut self, tag: [u8; 4], source: impl Into<String>) {
        self.domain_tags.insert(tag, source.into());
    }

    /// Default source for orders of the given protocol.
    #[must_use]
    pub fn order_source(order_kind: OrderKind) -> &'static str {
        match order_kind {
            OrderKind::Seaport => "opensea.io",
            OrderKind::LooksRare => "looksrare.org",
        }
    }

    /// Resolves attribution for a fill in the given transaction.
    ///
    /// `taker` is the taker as reported by the exchange event; when the
    /// transaction went through a known router the real taker is the
    /// transaction sender instead.
    pub async fn resolve(
        &self,
        tx_hash: B256,
        order_kind: OrderKind,
        taker: Address,
    ) -> FillAttribution {
        let key = (tx_hash, order_kind);
        if let Ok(cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&key) {
                return cached.clone();
            }
        }

        let tx = match self.provider.get_transaction(tx_hash).await {
            Ok(tx) => tx,
            Err(error) => {
                debug!(%tx_hash, %error, "attribution lookup failed, leaving fill unattributed");
                return FillAttribution {
                    order_source: Some(Self::order_source(order_kind).to_string()),
                    ..FillAttribution::default()
                };
            }
        };

        let aggregator_source = tx.to.and_then(|to| self.routers.get(&to).cloned());

        // A router-reported taker is the router itself; the human taker
        // is whoever sent the transaction.
        let real_taker = (aggregator_source.is_some() && tx.to == Some(taker))
            .then_some(tx.from);

        let fill_source = tag_of(&tx.data)
            .and_then(|tag| self.domain_tags.get(&tag).cloned())
            .or_else(|| aggregator_source.clone())
            .or_else(|| Some(Self::order_source(order_kind).to_string()));

        let attribution = FillAttribution {
            order_source: Some(Self::order_source(order_kind).to_string()),
            fill_source,
            aggregator_source,
            taker: real_taker,
        };

        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= CACHE_MAX_ENTRIES {
                cache.clear();
            }
            cache.insert(key, attribution.clone());
        }
        attribution
    }
}

fn tag_of(calldata: &[u8]) -> Option<[u8; 4]> {
    // A domain tag only makes sense past the selector.
    if calldata.len() < 8 {
        return None;
    }
    calldata[calldata.len() - 4..].try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{MockProvider, TransactionData};

    fn resolver_with(provider: MockProvider) -> AttributionResolver {
        AttributionResolver::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn test_unattributed_on_provider_failure() {
        let resolver = resolver_with(MockProvider::new());
        let attribution = resolver
            .resolve(B256::repeat_byte(0x01), OrderKind::Seaport, Address::ZERO)
            .await;
        assert_eq!(attribution.order_source.as_deref(), Some("opensea.io"));
        assert!(attribution.fill_source.is_none());
        assert!(attribution.aggregator_source.is_none());
        assert!(attribution.taker.is_none());
    }

    #[tokio::test]
    async fn test_router_fill_overrides_taker() {
        let router = address!("83C8F28c26bF6aaca652Df1DbBE0e1b56F8baBa2");
        let sender = Address::repeat_byte(0x11);
        let tx_hash = B256::repeat_byte(0x02);

        let provider = MockProvider::new();
        provider.set_transaction(TransactionData {
            hash: tx_hash,
            from: sender,
            to: Some(router),
            data: vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x00, 0x00, 0x00],
        });

        let resolver = resolver_with(provider);
        // The exchange reports the router as the taker.
        let attribution = resolver
            .resolve(tx_hash, OrderKind::Seaport, router)
            .await;
        assert_eq!(attribution.aggregator_source.as_deref(), Some("gem.xyz"));
        assert_eq!(attribution.fill_source.as_deref(), Some("gem.xyz"));
        assert_eq!(attribution.taker, Some(sender));
    }

    #[tokio::test]
    async fn test_direct_fill_uses_protocol_source() {
        let tx_hash = B256::repeat_byte(0x03);
        let taker = Address::repeat_byte(0x22);

        let provider = MockProvider::new();
        provider.set_transaction(TransactionData {
            hash: tx_hash,
            from: taker,
            to: Some(Address::repeat_byte(0x33)),
            data: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
        });

        let resolver = resolver_with(provider);
        let attribution = resolver
            .resolve(tx_hash, OrderKind::LooksRare, taker)
            .await;
        assert_eq!(attribution.order_source.as_deref(), Some("looksrare.org"));
        assert_eq!(attribution.fill_source.as_deref(), Some("looksrare.org"));
        assert!(attribution.aggregator_source.is_none());
        assert!(attribution.taker.is_none());
    }

    #[tokio::test]
    async fn test_domain_tag_sets_fill_source() {
        let tx_hash = B256::repeat_byte(0x04);
        let provider = MockProvider::new();
        provider.set_transaction(TransactionData {
            hash: tx_hash,
            from: Address::repeat_byte(0x11),
            to: Some(Address::repeat_byte(0x33)),
            data: vec![0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb, 0xcc, 0xdd],
        });

        let mut resolver = resolver_with(provider);
        resolver.add_domain_tag([0xaa, 0xbb, 0xcc, 0xdd], "someapp.io");

        let attribution = resolver
            .resolve(tx_hash, OrderKind::Seaport, Address::repeat_byte(0x11))
            .await;
        assert_eq!(attribution.fill_source.as_deref(), Some("someapp.io"));
    }

    #[tokio::test]
    async fn test_cache_stays_bounded() {
        use alloy_primitives::U256;

        let provider = MockProvider::new();
        for i in 0..=CACHE_MAX_ENTRIES as u64 {
            provider.set_transaction(TransactionData {
                hash: B256::from(U256::from(i).to_be_bytes::<32>()),
                from: Address::repeat_byte(0x11),
                to: Some(Address::repeat_byte(0x33)),
                data: vec![],
            });
        }

        let resolver = resolver_with(provider);
        for i in 0..=CACHE_MAX_ENTRIES as u64 {
            resolver
                .resolve(
                    B256::from(U256::from(i).to_be_bytes::<32>()),
                    OrderKind::Seaport,
                    Address::repeat_byte(0x11),
                )
                .await;
        }

        let cached = resolver.cache.lock().expect("cache").len();
        assert!(cached <= CACHE_MAX_ENTRIES);
    }

    #[tokio::test]
    async fn test_resolution_is_cached_per_transaction() {
        let tx_hash = B256::repeat_byte(0x05);
        let provider = MockProvider::new();
        provider.set_transaction(TransactionData {
            hash: tx_hash,
            from: Address::repeat_byte(0x11),
            to: Some(Address::repeat_byte(0x33)),
            data: vec![],
        });

        let resolver = resolver_with(provider);
        let first = resolver
            .resolve(tx_hash, OrderKind::Seaport, Address::repeat_byte(0x11))
            .await;
        let second = resolver
            .resolve(tx_hash, OrderKind::Seaport, Address::repeat_byte(0x11))
            .await;
        assert_eq!(first, second);
    }
}
