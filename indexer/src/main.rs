//! Nftsync indexer binary.
//!
//! Entry point for the on-chain event sync service.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nftsync_indexer::attribution::AttributionResolver;
use nftsync_indexer::events::{ChainContracts, EventRegistry};
use nftsync_indexer::lock::RedisLock;
use nftsync_indexer::prices::DayPriceOracle;
use nftsync_indexer::queue::{QueueName, RedisJobQueue, RetryPolicy, WorkerConfig, WorkerPool};
use nftsync_indexer::rpc::HttpProvider;
use nftsync_indexer::storage::{EventStore, PgEventStore};
use nftsync_indexer::sync::RedisCursorStore;
use nftsync_indexer::{IndexerConfig, IndexerMetrics, SyncJobHandler, Syncer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nftsync_indexer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = IndexerConfig::from_env()?;
    tracing::info!("Starting Nftsync Indexer");
    tracing::info!("Chain id: {}", config.chain_id);
    tracing::info!("RPC URL: {}", config.rpc_url);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgEventStore::new(pool));
    store.migrate().await?;

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let queue = Arc::new(RedisJobQueue::new(redis_conn.clone()));
    let lock = Arc::new(RedisLock::new(redis_conn.clone()));
    let cursor = Arc::new(RedisCursorStore::new(redis_conn));

    let provider = Arc::new(HttpProvider::new(
        config.rpc_url.clone(),
        Duration::from_millis(config.rpc_timeout_ms),
    )?);
    let registry = EventRegistry::standard(&ChainContracts::default())?;
    let attribution = Arc::new(AttributionResolver::new(provider.clone()));
    let usd_prices = store.load_usd_prices().await?;
    tracing::info!("Loaded {} USD price quotes", usd_prices.len());
    let prices = Arc::new(DayPriceOracle::from_records(&usd_prices));
    let metrics = Arc::new(IndexerMetrics::new());

    let syncer = Arc::new(Syncer::new(
        config.clone(),
        provider,
        registry,
        store,
        queue.clone(),
        cursor,
        lock,
        attribution,
        prices,
        metrics.clone(),
    ));
    let handler = Arc::new(SyncJobHandler::new(syncer));

    let mut pool = WorkerPool::new(queue, metrics);
    let retry_policy = RetryPolicy::Exponential {
        base: Duration::from_millis(config.retry_backoff_ms),
        max: Duration::from_secs(60),
    };
    pool.spawn(
        QueueName::Realtime,
        handler.clone(),
        WorkerConfig {
            concurrency: config.realtime_concurrency,
            max_retries: config.max_retries,
            retry_policy,
            block_not_found_delay: Duration::from_millis(config.block_not_found_delay_ms),
            ..WorkerConfig::default()
        },
    );
    pool.spawn(
        QueueName::Backfill,
        handler.clone(),
        WorkerConfig {
            concurrency: config.backfill_concurrency,
            max_retries: config.max_retries,
            retry_policy,
            ..WorkerConfig::default()
        },
    );
    pool.spawn(
        QueueName::BlockCheck,
        handler,
        WorkerConfig {
            max_retries: config.max_retries,
            retry_policy,
            ..WorkerConfig::default()
        },
    );

    tracing::info!("Indexer service started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down indexer");
    pool.stop().await;

    Ok(())
}
