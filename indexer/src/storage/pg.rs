//! Postgres-backed event store.
//!
//! One transaction per batch. Fact inserts use conflict-ignore on the
//! (block hash, tx hash, log index, batch index) key; derived state is
//! only written when the fact row was actually new, inside the same
//! transaction.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::postgres::{PgPool, PgQueryResult};
use sqlx::{Postgres, Row, Transaction};

use super::{BlockRecord, EventStore, OrderRecord, PersistOutcome, StorageError, UsdPriceRecord};
use crate::events::types::{
    ApprovalEvent, BulkCancelEvent, CancelEvent, DomainEvent, FillEvent, NonceCancelEvent,
    OrderKind, TransferEvent,
};
use crate::orders::Fillability;

/// Event store backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when a migration fails.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Conversion(e.to_string()))
    }
}

fn inserted(result: &PgQueryResult) -> bool {
    result.rows_affected() > 0
}

fn block_i64(number: u64) -> Result<i64, StorageError> {
    i64::try_from(number)
        .map_err(|_| StorageError::Conversion(format!("block number {number} out of range")))
}

fn u256_from_text(text: &str) -> Result<U256, StorageError> {
    // Balances can dip below zero transiently while a reorg is being
    // reversed; clamp for readers.
    if let Some(stripped) = text.strip_prefix('-') {
        U256::from_str_radix(stripped, 10)
            .map(|_| U256::ZERO)
            .map_err(|_| StorageError::Conversion(format!("bad numeric {text}")))
    } else {
        U256::from_str_radix(text, 10)
            .map_err(|_| StorageError::Conversion(format!("bad numeric {text}")))
    }
}

fn address_from_bytes(bytes: &[u8]) -> Result<Address, StorageError> {
    Address::try_from(bytes).map_err(|_| StorageError::Conversion("bad address bytes".to_string()))
}

fn b256_from_bytes(bytes: &[u8]) -> Result<B256, StorageError> {
    B256::try_from(bytes).map_err(|_| StorageError::Conversion("bad hash bytes".to_string()))
}

fn order_kind_from_text(text: &str) -> Result<OrderKind, StorageError> {
    match text {
        "seaport" => Ok(OrderKind::Seaport),
        "looks-rare" => Ok(OrderKind::LooksRare),
        other => Err(StorageError::Conversion(format!("bad order kind {other}"))),
    }
}

async fn adjust_balance(
    tx: &mut Transaction<'_, Postgres>,
    contract: Address,
    token_id: U256,
    owner: Address,
    amount: U256,
    increment: bool,
) -> Result<(), StorageError> {
    let sql = if increment {
        "INSERT INTO nft_balances (contract, token_id, owner, amount)
         VALUES ($1, $2::NUMERIC, $3, $4::NUMERIC)
         ON CONFLICT (contract, token_id, owner)
         DO UPDATE SET amount = nft_balances.amount + $4::NUMERIC"
    } else {
        "INSERT INTO nft_balances (contract, token_id, owner, amount)
         VALUES ($1, $2::NUMERIC, $3, -($4::NUMERIC))
         ON CONFLICT (contract, token_id, owner)
         DO UPDATE SET amount = nft_balances.amount - $4::NUMERIC"
    };
    sqlx::query(sql)
        .bind(contract.as_slice())
        .bind(token_id.to_string())
        .bind(owner.as_slice())
        .bind(amount.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn persist_fill(
    tx: &mut Transaction<'_, Postgres>,
    fill: &FillEvent,
    outcome: &mut PersistOutcome,
) -> Result<(), StorageError> {
    let taker = fill.attribution.taker.unwrap_or(fill.taker);
    let result = sqlx::query(
        "INSERT INTO fill_events (
             block, block_hash, tx_hash, tx_index, log_index, batch_index,
             timestamp, order_id, order_kind, side, maker, taker, contract,
             token_id, amount, currency, currency_price, price, usd_price,
             nonce, order_source, fill_source, aggregator_source
         ) VALUES (
             $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
             $14::NUMERIC, $15::NUMERIC, $16, $17::NUMERIC, $18::NUMERIC,
             $19, $20::NUMERIC, $21, $22, $23
         )
         ON CONFLICT (block_hash, tx_hash, log_index, batch_index) DO NOTHING",
    )
    .bind(block_i64(fill.base.block)?)
    .bind(fill.base.block_hash.as_slice())
    .bind(fill.base.tx_hash.as_slice())
    .bind(i64::from(fill.base.tx_index))
    .bind(i64::from(fill.base.log_index))
    .bind(i64::from(fill.base.batch_index))
    .bind(fill.base.timestamp)
    .bind(fill.order_id.as_slice())
    .bind(fill.order_kind.as_str())
    .bind(fill.side.as_str())
    .bind(fill.maker.as_slice())
    .bind(taker.as_slice())
    .bind(fill.contract.as_slice())
    .bind(fill.token_id.to_string())
    .bind(fill.amount.to_string())
    .bind(fill.currency.as_slice())
    .bind(fill.currency_price.to_string())
    .bind(fill.price.to_string())
    .bind(fill.usd_price.clone())
    .bind(fill.nonce.map(|n| n.to_string()))
    .bind(fill.attribution.order_source.as_deref())
    .bind(fill.attribution.fill_source.as_deref())
    .bind(fill.attribution.aggregator_source.as_deref())
    .execute(&mut **tx)
    .await?;

    if !inserted(&result) {
        outcome.duplicates += 1;
        return Ok(());
    }
    outcome.inserted += 1;

    sqlx::query(
        "INSERT INTO orders (id, kind, side, maker, nonce, fillability_status, last_event_timestamp)
         VALUES ($1, $2, $3, $4, $5::NUMERIC, 'filled', $6)
         ON CONFLICT (id) DO UPDATE
         SET fillability_status = 'filled',
             last_event_timestamp = EXCLUDED.last_event_timestamp
         WHERE orders.fillability_status NOT IN ('filled', 'cancelled')
            OR orders.last_event_timestamp <= EXCLUDED.last_event_timestamp",
    )
    .bind(fill.order_id.as_slice())
    .bind(fill.order_kind.as_str())
    .bind(fill.side.as_str())
    .bind(fill.maker.as_slice())
    .bind(fill.nonce.map(|n| n.to_string()))
    .bind(fill.base.timestamp)
    .execute(&mut **tx)
    .await?;

    outcome.note_order(fill.order_id);
    outcome.note_token(fill.contract, fill.token_id);
    Ok(())
}

async fn persist_cancel(
    tx: &mut Transaction<'_, Postgres>,
    cancel: &CancelEvent,
    outcome: &mut PersistOutcome,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "INSERT INTO cancel_events (
             block, block_hash, tx_hash, tx_index, log_index, batch_index,
             timestamp, order_id, order_kind
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (block_hash, tx_hash, log_index, batch_index) DO NOTHING",
    )
    .bind(block_i64(cancel.base.block)?)
    .bind(cancel.base.block_hash.as_slice())
    .bind(cancel.base.tx_hash.as_slice())
    .bind(i64::from(cancel.base.tx_index))
    .bind(i64::from(cancel.base.log_index))
    .bind(i64::from(cancel.base.batch_index))
    .bind(cancel.base.timestamp)
    .bind(cancel.order_id.as_slice())
    .bind(cancel.order_kind.as_str())
    .execute(&mut **tx)
    .await?;

    if !inserted(&result) {
        outcome.duplicates += 1;
        return Ok(());
    }
    outcome.inserted += 1;

    sqlx::query(
        "INSERT INTO orders (id, kind, fillability_status, last_event_timestamp)
         VALUES ($1, $2, 'cancelled', $3)
         ON CONFLICT (id) DO UPDATE
         SET fillability_status = 'cancelled',
             last_event_timestamp = EXCLUDED.last_event_timestamp
         WHERE orders.fillability_status NOT IN ('filled', 'cancelled')
            OR orders.last_event_timestamp <= EXCLUDED.last_event_timestamp",
    )
    .bind(cancel.order_id.as_slice())
    .bind(cancel.order_kind.as_str())
    .bind(cancel.base.timestamp)
    .execute(&mut **tx)
    .await?;

    outcome.note_order(cancel.order_id);
    Ok(())
}

async fn persist_nonce_cancel(
    tx: &mut Transaction<'_, Postgres>,
    cancel: &NonceCancelEvent,
    outcome: &mut PersistOutcome,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "INSERT INTO nonce_cancel_events (
             block, block_hash, tx_hash, tx_index, log_index, batch_index,
             timestamp, order_kind, maker, nonce
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::NUMERIC)
         ON CONFLICT (block_hash, tx_hash, log_index, batch_index) DO NOTHING",
    )
    .bind(block_i64(cancel.base.block)?)
    .bind(cancel.base.block_hash.as_slice())
    .bind(cancel.base.tx_hash.as_slice())
    .bind(i64::from(cancel.base.tx_index))
    .bind(i64::from(cancel.base.log_index))
    .bind(i64::from(cancel.base.batch_index))
    .bind(cancel.base.timestamp)
    .bind(cancel.order_kind.as_str())
    .bind(cancel.maker.as_slice())
    .bind(cancel.nonce.to_string())
    .execute(&mut **tx)
    .await?;

    if !inserted(&result) {
        outcome.duplicates += 1;
        return Ok(());
    }
    outcome.inserted += 1;

    let rows = sqlx::query(
        "UPDATE orders
         SET fillability_status = 'cancelled', last_event_timestamp = $4
         WHERE kind = $1 AND maker = $2 AND nonce = $3::NUMERIC
           AND (fillability_status NOT IN ('filled', 'cancelled')
                OR last_event_timestamp <= $4)
         RETURNING id",
    )
    .bind(cancel.order_kind.as_str())
    .bind(cancel.maker.as_slice())
    .bind(cancel.nonce.to_string())
    .bind(cancel.base.timestamp)
    .fetch_all(&mut **tx)
    .await?;

    for row in rows {
        outcome.note_order(b256_from_bytes(row.try_get::<Vec<u8>, _>("id")?.as_slice())?);
    }
    Ok(())
}

async fn persist_bulk_cancel(
    tx: &mut Transaction<'_, Postgres>,
    cancel: &BulkCancelEvent,
    outcome: &mut PersistOutcome,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "INSERT INTO bulk_cancel_events (
             block, block_hash, tx_hash, tx_index, log_index, batch_index,
             timestamp, order_kind, maker, min_nonce
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::NUMERIC)
         ON CONFLICT (block_hash, tx_hash, log_index, batch_index) DO NOTHING",
    )
    .bind(block_i64(cancel.base.block)?)
    .bind(cancel.base.block_hash.as_slice())
    .bind(cancel.base.tx_hash.as_slice())
    .bind(i64::from(cancel.base.tx_index))
    .bind(i64::from(cancel.base.log_index))
    .bind(i64::from(cancel.base.batch_index))
    .bind(cancel.base.timestamp)
    .bind(cancel.order_kind.as_str())
    .bind(cancel.maker.as_slice())
    .bind(cancel.min_nonce.to_string())
    .execute(&mut **tx)
    .await?;

    if !inserted(&result) {
        outcome.duplicates += 1;
        return Ok(());
    }
    outcome.inserted += 1;

    // The floor only moves up.
    sqlx::query(
        "INSERT INTO maker_nonces (order_kind, maker, min_nonce)
         VALUES ($1, $2, $3::NUMERIC)
         ON CONFLICT (order_kind, maker)
         DO UPDATE SET min_nonce = GREATEST(maker_nonces.min_nonce, EXCLUDED.min_nonce)",
    )
    .bind(cancel.order_kind.as_str())
    .bind(cancel.maker.as_slice())
    .bind(cancel.min_nonce.to_string())
    .execute(&mut **tx)
    .await?;

    let rows = sqlx::query(
        "UPDATE orders
         SET fillability_status = 'cancelled', last_event_timestamp = $4
         WHERE kind = $1 AND maker = $2 AND nonce < $3::NUMERIC
           AND fillability_status = 'fillable'
         RETURNING id",
    )
    .bind(cancel.order_kind.as_str())
    .bind(cancel.maker.as_slice())
    .bind(cancel.min_nonce.to_string())
    .bind(cancel.base.timestamp)
    .fetch_all(&mut **tx)
    .await?;

    for row in rows {
        outcome.note_order(b256_from_bytes(row.try_get::<Vec<u8>, _>("id")?.as_slice())?);
    }
    Ok(())
}

async fn persist_transfer(
    tx: &mut Transaction<'_, Postgres>,
    transfer: &TransferEvent,
    outcome: &mut PersistOutcome,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "INSERT INTO nft_transfer_events (
             block, block_hash, tx_hash, tx_index, log_index, batch_index,
             timestamp, contract, contract_kind, from_address, to_address,
             token_id, amount
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                   $12::NUMERIC, $13::NUMERIC)
         ON CONFLICT (block_hash, tx_hash, log_index, batch_index) DO NOTHING",
    )
    .bind(block_i64(transfer.base.block)?)
    .bind(transfer.base.block_hash.as_slice())
    .bind(transfer.base.tx_hash.as_slice())
    .bind(i64::from(transfer.base.tx_index))
    .bind(i64::from(transfer.base.log_index))
    .bind(i64::from(transfer.base.batch_index))
    .bind(transfer.base.timestamp)
    .bind(transfer.base.address.as_slice())
    .bind(transfer.kind.as_str())
    .bind(transfer.from.as_slice())
    .bind(transfer.to.as_slice())
    .bind(transfer.token_id.to_string())
    .bind(transfer.amount.to_string())
    .execute(&mut **tx)
    .await?;

    if !inserted(&result) {
        outcome.duplicates += 1;
        return Ok(());
    }
    outcome.inserted += 1;

    let contract = transfer.base.address;
    if transfer.from != Address::ZERO {
        adjust_balance(tx, contract, transfer.token_id, transfer.from, transfer.amount, false)
            .await?;
    }
    if transfer.to != Address::ZERO {
        adjust_balance(tx, contract, transfer.token_id, transfer.to, transfer.amount, true)
            .await?;
    }

    if transfer.is_mint() {
        sqlx::query(
            "INSERT INTO tokens (contract, token_id, minted_timestamp)
             VALUES ($1, $2::NUMERIC, $3)
             ON CONFLICT (contract, token_id)
             DO UPDATE SET minted_timestamp =
                 LEAST(tokens.minted_timestamp, EXCLUDED.minted_timestamp)",
        )
        .bind(contract.as_slice())
        .bind(transfer.token_id.to_string())
        .bind(transfer.base.timestamp)
        .execute(&mut **tx)
        .await?;
    }

    outcome.note_token(contract, transfer.token_id);
    Ok(())
}

async fn persist_approval(
    tx: &mut Transaction<'_, Postgres>,
    approval: &ApprovalEvent,
    outcome: &mut PersistOutcome,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "INSERT INTO nft_approval_events (
             block, block_hash, tx_hash, tx_index, log_index, batch_index,
             timestamp, contract, owner, operator, approved
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (block_hash, tx_hash, log_index, batch_index) DO NOTHING",
    )
    .bind(block_i64(approval.base.block)?)
    .bind(approval.base.block_hash.as_slice())
    .bind(approval.base.tx_hash.as_slice())
    .bind(i64::from(approval.base.tx_index))
    .bind(i64::from(approval.base.log_index))
    .bind(i64::from(approval.base.batch_index))
    .bind(approval.base.timestamp)
    .bind(approval.base.address.as_slice())
    .bind(approval.owner.as_slice())
    .bind(approval.operator.as_slice())
    .bind(approval.approved)
    .execute(&mut **tx)
    .await?;

    if inserted(&result) {
        outcome.inserted += 1;
    } else {
        outcome.duplicates += 1;
    }
    Ok(())
}

const FACT_TABLES: &[&str] = &[
    "fill_events",
    "cancel_events",
    "nonce_cancel_events",
    "bulk_cancel_events",
    "nft_transfer_events",
    "nft_approval_events",
];

#[async_trait]
impl EventStore for PgEventStore {
    async fn persist_events(&self, events: &[DomainEvent]) -> Result<PersistOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = PersistOutcome::default();

        for event in events {
            match event {
                DomainEvent::Fill(fill) => persist_fill(&mut tx, fill, &mut outcome).await?,
                DomainEvent::Cancel(cancel) => {
                    persist_cancel(&mut tx, cancel, &mut outcome).await?;
                }
                DomainEvent::NonceCancel(cancel) => {
                    persist_nonce_cancel(&mut tx, cancel, &mut outcome).await?;
                }
                DomainEvent::BulkCancel(cancel) => {
                    persist_bulk_cancel(&mut tx, cancel, &mut outcome).await?;
                }
                DomainEvent::Transfer(transfer) => {
                    persist_transfer(&mut tx, transfer, &mut outcome).await?;
                }
                DomainEvent::Approval(approval) => {
                    persist_approval(&mut tx, approval, &mut outcome).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn save_block(&self, block: &BlockRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO blocks (number, hash, timestamp) VALUES ($1, $2, $3)
             ON CONFLICT (number, hash) DO NOTHING",
        )
        .bind(block_i64(block.number)?)
        .bind(block.hash.as_slice())
        .bind(block.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn blocks_at(&self, number: u64) -> Result<Vec<BlockRecord>, StorageError> {
        let rows = sqlx::query("SELECT hash, timestamp FROM blocks WHERE number = $1")
            .bind(block_i64(number)?)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(BlockRecord {
                number,
                hash: b256_from_bytes(row.try_get::<Vec<u8>, _>("hash")?.as_slice())?,
                timestamp: row.try_get("timestamp")?,
            });
        }
        Ok(records)
    }

    async fn delete_block_facts(&self, number: u64, hash: B256) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let block = block_i64(number)?;

        // Reverse balance effects before the facts disappear.
        let transfers = sqlx::query(
            "SELECT contract, from_address, to_address, token_id::TEXT AS token_id,
                    amount::TEXT AS amount
             FROM nft_transfer_events WHERE block = $1 AND block_hash = $2",
        )
        .bind(block)
        .bind(hash.as_slice())
        .fetch_all(&mut *tx)
        .await?;

        for row in transfers {
            let contract = address_from_bytes(row.try_get::<Vec<u8>, _>("contract")?.as_slice())?;
            let from = address_from_bytes(row.try_get::<Vec<u8>, _>("from_address")?.as_slice())?;
            let to = address_from_bytes(row.try_get::<Vec<u8>, _>("to_address")?.as_slice())?;
            let token_id = u256_from_text(&row.try_get::<String, _>("token_id")?)?;
            let amount = u256_from_text(&row.try_get::<String, _>("amount")?)?;

            if from != Address::ZERO {
                adjust_balance(&mut tx, contract, token_id, from, amount, true).await?;
            }
            if to != Address::ZERO {
                adjust_balance(&mut tx, contract, token_id, to, amount, false).await?;
            }
        }

        let mut deleted = 0u64;
        for table in FACT_TABLES {
            let result =
                sqlx::query(&format!("DELETE FROM {table} WHERE block = $1 AND block_hash = $2"))
                    .bind(block)
                    .bind(hash.as_slice())
                    .execute(&mut *tx)
                    .await?;
            deleted += result.rows_affected();
        }

        sqlx::query("DELETE FROM blocks WHERE number = $1 AND hash = $2")
            .bind(block)
            .bind(hash.as_slice())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    async fn get_order(&self, id: B256) -> Result<Option<OrderRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT kind, maker, nonce::TEXT AS nonce, fillability_status,
                    last_event_timestamp
             FROM orders WHERE id = $1",
        )
        .bind(id.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("fillability_status")?;
        let fillability = Fillability::from_str_opt(&status)
            .ok_or_else(|| StorageError::Conversion(format!("bad status {status}")))?;
        let maker = row
            .try_get::<Option<Vec<u8>>, _>("maker")?
            .map(|bytes| address_from_bytes(&bytes))
            .transpose()?
            .unwrap_or(Address::ZERO);
        let nonce = row
            .try_get::<Option<String>, _>("nonce")?
            .map(|text| u256_from_text(&text))
            .transpose()?;

        Ok(Some(OrderRecord {
            id,
            kind: order_kind_from_text(&row.try_get::<String, _>("kind")?)?,
            maker,
            nonce,
            fillability,
            last_event_timestamp: row.try_get("last_event_timestamp")?,
        }))
    }

    async fn load_usd_prices(&self) -> Result<Vec<UsdPriceRecord>, StorageError> {
        let rows = sqlx::query("SELECT currency, day, value, decimals FROM usd_prices")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let decimals: i32 = row.try_get("decimals")?;
            records.push(UsdPriceRecord {
                currency: address_from_bytes(row.try_get::<Vec<u8>, _>("currency")?.as_slice())?,
                day: row.try_get("day")?,
                value: row.try_get::<BigDecimal, _>("value")?,
                decimals: u32::try_from(decimals).map_err(|_| {
                    StorageError::Conversion(format!("bad currency decimals {decimals}"))
                })?,
            });
        }
        Ok(records)
    }

    async fn get_balance(
        &self,
        contract: Address,
        token_id: U256,
        owner: Address,
    ) -> Result<U256, StorageError> {
        let row = sqlx::query(
            "SELECT amount::TEXT AS amount FROM nft_balances
             WHERE contract = $1 AND token_id = $2::NUMERIC AND owner = $3",
        )
        .bind(contract.as_slice())
        .bind(token_id.to_string())
        .bind(owner.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => u256_from_text(&row.try_get::<String, _>("amount")?),
            None => Ok(U256::ZERO),
        }
    }
}
