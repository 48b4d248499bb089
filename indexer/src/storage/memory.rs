//! In-memory event store.
//!
//! Mirrors the Postgres store's semantics (conflict-ignore facts,
//! timestamp-monotonic order transitions, balance deltas) for tests of
//! the sync pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use super::{BlockRecord, EventStore, OrderRecord, PersistOutcome, StorageError, UsdPriceRecord};
use crate::events::types::{DomainEvent, OrderKind, TransferEvent};
use crate::orders::{should_apply, Fillability, OrderState};

type EventId = (B256, B256, u32, u32);
type BalanceKey = (Address, U256, Address);

#[derive(Debug, Default)]
struct MemoryState {
    seen: HashSet<EventId>,
    /// Transfer facts kept for reorg reversal, keyed by event id.
    transfers: HashMap<EventId, TransferEvent>,
    orders: HashMap<B256, OrderRecord>,
    min_nonces: HashMap<(OrderKind, Address), U256>,
    balances: HashMap<BalanceKey, U256>,
    blocks: Vec<BlockRecord>,
    usd_prices: Vec<UsdPriceRecord>,
}

/// In-memory implementation of [`EventStore`].
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    state: Mutex<MemoryState>,
}

impl MemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Conversion("store state poisoned".to_string()))
    }

    /// Stores a per-day USD quote.
    pub fn set_usd_price(&self, record: UsdPriceRecord) {
        if let Ok(mut state) = self.state.lock() {
            state
                .usd_prices
                .retain(|r| !(r.currency == record.currency && r.day == record.day));
            state.usd_prices.push(record);
        }
    }
}

fn transition(
    orders: &mut HashMap<B256, OrderRecord>,
    id: B256,
    kind: OrderKind,
    maker: Address,
    nonce: Option<U256>,
    status: Fillability,
    timestamp: i64,
) -> bool {
    match orders.get_mut(&id) {
        Some(order) => {
            let current = OrderState {
                fillability: order.fillability,
                last_event_timestamp: order.last_event_timestamp,
            };
            if !should_apply(current, timestamp) {
                return false;
            }
            order.fillability = status;
            order.last_event_timestamp = timestamp;
            true
        }
        None => {
            orders.insert(
                id,
                OrderRecord {
                    id,
                    kind,
                    maker,
                    nonce,
                    fillability: status,
                    last_event_timestamp: timestamp,
                },
            );
            true
        }
    }
}

fn apply_transfer(state: &mut MemoryState, transfer: &TransferEvent, reverse: bool) {
    let contract = transfer.base.address;
    let (debit, credit) = if reverse {
        (transfer.to, transfer.from)
    } else {
        (transfer.from, transfer.to)
    };
    if debit != Address::ZERO {
        let balance = state
            .balances
            .entry((contract, transfer.token_id, debit))
            .or_default();
        *balance = balance.saturating_sub(transfer.amount);
    }
    if credit != Address::ZERO {
        let balance = state
            .balances
            .entry((contract, transfer.token_id, credit))
            .or_default();
        *balance = balance.saturating_add(transfer.amount);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn persist_events(&self, events: &[DomainEvent]) -> Result<PersistOutcome, StorageError> {
        let mut state = self.lock()?;
        let mut outcome = PersistOutcome::default();

        for event in events {
            let id = event.base().event_id();
            if !state.seen.insert(id) {
                outcome.duplicates += 1;
                continue;
            }
            outcome.inserted += 1;

            match event {
                DomainEvent::Fill(fill) => {
                    if transition(
                        &mut state.orders,
                        fill.order_id,
                        fill.order_kind,
                        fill.maker,
                        fill.nonce,
                        Fillability::Filled,
                        fill.base.timestamp,
                    ) {
                        outcome.note_order(fill.order_id);
                    }
                    outcome.note_token(fill.contract, fill.token_id);
                }
                DomainEvent::Cancel(cancel) => {
                    if transition(
                        &mut state.orders,
                        cancel.order_id,
                        cancel.order_kind,
                        Address::ZERO,
                        None,
                        Fillability::Cancelled,
                        cancel.base.timestamp,
                    ) {
                        outcome.note_order(cancel.order_id);
                    }
                }
                DomainEvent::NonceCancel(cancel) => {
                    let matching: Vec<B256> = state
                        .orders
                        .values()
                        .filter(|order| {
                            order.kind == cancel.order_kind
                                && order.maker == cancel.maker
                                && order.nonce == Some(cancel.nonce)
                        })
                        .map(|order| order.id)
                        .collect();
                    for id in matching {
                        if transition(
                            &mut state.orders,
                            id,
                            cancel.order_kind,
                            cancel.maker,
                            Some(cancel.nonce),
                            Fillability::Cancelled,
                            cancel.base.timestamp,
                        ) {
                            outcome.note_order(id);
                        }
                    }
                }
                DomainEvent::BulkCancel(cancel) => {
                    let key = (cancel.order_kind, cancel.maker);
                    let floor = state.min_nonces.entry(key).or_default();
                    *floor = (*floor).max(cancel.min_nonce);

                    let matching: Vec<B256> = state
                        .orders
                        .values()
                        .filter(|order| {
                            order.kind == cancel.order_kind
                                && order.maker == cancel.maker
                                && order.fillability == Fillability::Fillable
                                && order.nonce.is_some_and(|n| n < cancel.min_nonce)
                        })
                        .map(|order| order.id)
                        .collect();
                    for id in matching {
                        if let Some(order) = state.orders.get_mut(&id) {
                            order.fillability = Fillability::Cancelled;
                            order.last_event_timestamp = cancel.base.timestamp;
                            outcome.note_order(id);
                        }
                    }
                }
                DomainEvent::Transfer(transfer) => {
                    apply_transfer(&mut state, transfer, false);
                    state.transfers.insert(id, transfer.clone());
                    outcome.note_token(transfer.base.address, transfer.token_id);
                }
                DomainEvent::Approval(_) => {}
            }
        }

        Ok(outcome)
    }

    async fn save_block(&self, block: &BlockRecord) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        if !state.blocks.contains(block) {
            state.blocks.push(*block);
        }
        Ok(())
    }

    async fn blocks_at(&self, number: u64) -> Result<Vec<BlockRecord>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .blocks
            .iter()
            .filter(|block| block.number == number)
            .copied()
            .collect())
    }

    async fn delete_block_facts(&self, number: u64, hash: B256) -> Result<u64, StorageError> {
        let mut state = self.lock()?;

        let stale: Vec<EventId> = state
            .seen
            .iter()
            .filter(|(block_hash, ..)| *block_hash == hash)
            .copied()
            .collect();

        let mut deleted = 0u64;
        for id in stale {
            state.seen.remove(&id);
            deleted += 1;
            if let Some(transfer) = state.transfers.remove(&id) {
                apply_transfer(&mut state, &transfer, true);
            }
        }

        state
            .blocks
            .retain(|block| !(block.number == number && block.hash == hash));
        Ok(deleted)
    }

    async fn get_order(&self, id: B256) -> Result<Option<OrderRecord>, StorageError> {
        let state = self.lock()?;
        Ok(state.orders.get(&id).cloned())
    }

    async fn load_usd_prices(&self) -> Result<Vec<UsdPriceRecord>, StorageError> {
        let state = self.lock()?;
        Ok(state.usd_prices.clone())
    }

    async fn get_balance(
        &self,
        contract: Address,
        token_id: U256,
        owner: Address,
    ) -> Result<U256, StorageError> {
        let state = self.lock()?;
        Ok(state
            .balances
            .get(&(contract, token_id, owner))
            .copied()
            .unwrap_or(U256::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{
        BaseEventParams, BulkCancelEvent, CancelEvent, ContractKind, FillAttribution, FillEvent,
        Side,
    };

    fn base(block: u64, log_index: u32, timestamp: i64) -> BaseEventParams {
        BaseEventParams {
            address: Address::repeat_byte(0x11),
            block,
            block_hash: B256::repeat_byte(u8::try_from(block).unwrap_or(0xff)),
            tx_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            log_index,
            batch_index: 0,
            timestamp,
        }
    }

    fn fill(order_id: B256, log_index: u32, timestamp: i64) -> DomainEvent {
        DomainEvent::Fill(FillEvent {
            order_id,
            order_kind: OrderKind::Seaport,
            side: Side::Sell,
            maker: Address::repeat_byte(0x01),
            taker: Address::repeat_byte(0x02),
            contract: Address::repeat_byte(0x03),
            token_id: U256::from(1u64),
            amount: U256::from(1u64),
            currency: Address::ZERO,
            currency_price: U256::from(100u64),
            price: U256::from(100u64),
            usd_price: None,
            nonce: None,
            attribution: FillAttribution::default(),
            base: base(10, log_index, timestamp),
        })
    }

    fn cancel(order_id: B256, log_index: u32, timestamp: i64) -> DomainEvent {
        DomainEvent::Cancel(CancelEvent {
            order_kind: OrderKind::Seaport,
            order_id,
            base: base(10, log_index, timestamp),
        })
    }

    fn transfer(from: Address, to: Address, amount: u64, log_index: u32) -> DomainEvent {
        DomainEvent::Transfer(TransferEvent {
            kind: ContractKind::Erc1155,
            from,
            to,
            token_id: U256::from(7u64),
            amount: U256::from(amount),
            base: base(10, log_index, 1_700_000_000),
        })
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let store = MemoryEventStore::new();
        let events = vec![fill(B256::repeat_byte(0x01), 0, 1000)];

        let first = store.persist_events(&events).await.expect("persist");
        assert_eq!(first.inserted, 1);
        assert_eq!(first.duplicates, 0);

        let second = store.persist_events(&events).await.expect("persist");
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert!(second.updated_orders.is_empty());
    }

    #[tokio::test]
    async fn test_earlier_fill_does_not_revert_cancel() {
        let store = MemoryEventStore::new();
        let order_id = B256::repeat_byte(0x01);

        store
            .persist_events(&[cancel(order_id, 0, 2000)])
            .await
            .expect("persist");
        store
            .persist_events(&[fill(order_id, 1, 1500)])
            .await
            .expect("persist");

        let order = store.get_order(order_id).await.expect("order").expect("exists");
        assert_eq!(order.fillability, Fillability::Cancelled);
        assert_eq!(order.last_event_timestamp, 2000);
    }

    #[tokio::test]
    async fn test_later_fill_supersedes_cancel() {
        let store = MemoryEventStore::new();
        let order_id = B256::repeat_byte(0x01);

        store
            .persist_events(&[cancel(order_id, 0, 1000), fill(order_id, 1, 2000)])
            .await
            .expect("persist");

        let order = store.get_order(order_id).await.expect("order").expect("exists");
        assert_eq!(order.fillability, Fillability::Filled);
    }

    #[tokio::test]
    async fn test_bulk_cancel_sweeps_lower_nonces() {
        let store = MemoryEventStore::new();
        let maker = Address::repeat_byte(0x01);

        // Two fillable orders under nonces 3 and 9.
        let mut state = store.lock().expect("lock");
        for (byte, nonce) in [(0x0au8, 3u64), (0x0b, 9)] {
            let id = B256::repeat_byte(byte);
            state.orders.insert(
                id,
                OrderRecord {
                    id,
                    kind: OrderKind::LooksRare,
                    maker,
                    nonce: Some(U256::from(nonce)),
                    fillability: Fillability::Fillable,
                    last_event_timestamp: 500,
                },
            );
        }
        drop(state);

        let event = DomainEvent::BulkCancel(BulkCancelEvent {
            order_kind: OrderKind::LooksRare,
            maker,
            min_nonce: U256::from(5u64),
            base: base(10, 0, 1000),
        });
        let outcome = store.persist_events(&[event]).await.expect("persist");
        assert_eq!(outcome.updated_orders, vec![B256::repeat_byte(0x0a)]);

        let swept = store
            .get_order(B256::repeat_byte(0x0a))
            .await
            .expect("order")
            .expect("exists");
        assert_eq!(swept.fillability, Fillability::Cancelled);

        let kept = store
            .get_order(B256::repeat_byte(0x0b))
            .await
            .expect("order")
            .expect("exists");
        assert_eq!(kept.fillability, Fillability::Fillable);
    }

    #[tokio::test]
    async fn test_transfers_move_balances() {
        let store = MemoryEventStore::new();
        let alice = Address::repeat_byte(0x01);
        let bob = Address::repeat_byte(0x02);
        let contract = Address::repeat_byte(0x11);

        store
            .persist_events(&[
                transfer(Address::ZERO, alice, 5, 0),
                transfer(alice, bob, 2, 1),
            ])
            .await
            .expect("persist");

        let token = U256::from(7u64);
        assert_eq!(
            store.get_balance(contract, token, alice).await.expect("balance"),
            U256::from(3u64)
        );
        assert_eq!(
            store.get_balance(contract, token, bob).await.expect("balance"),
            U256::from(2u64)
        );
    }

    #[tokio::test]
    async fn test_delete_block_facts_reverses_balances() {
        let store = MemoryEventStore::new();
        let alice = Address::repeat_byte(0x01);
        let contract = Address::repeat_byte(0x11);
        let token = U256::from(7u64);

        store
            .persist_events(&[transfer(Address::ZERO, alice, 5, 0)])
            .await
            .expect("persist");
        store
            .save_block(&BlockRecord {
                number: 10,
                hash: B256::repeat_byte(0x0a),
                timestamp: 1_700_000_000,
            })
            .await
            .expect("save");

        let deleted = store
            .delete_block_facts(10, B256::repeat_byte(0x0a))
            .await
            .expect("delete");
        assert_eq!(deleted, 1);
        assert_eq!(
            store.get_balance(contract, token, alice).await.expect("balance"),
            U256::ZERO
        );
        assert!(store.blocks_at(10).await.expect("blocks").is_empty());

        // Re-syncing the block re-inserts the facts.
        let outcome = store
            .persist_events(&[transfer(Address::ZERO, alice, 5, 0)])
            .await
            .expect("persist");
        assert_eq!(outcome.inserted, 1);
        assert_eq!(
            store.get_balance(contract, token, alice).await.expect("balance"),
            U256::from(5u64)
        );
    }
}
