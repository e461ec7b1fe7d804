mod config;
mod steps;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_core::broker::SqliteBroker;
use conveyor_core::runtime::{FlowRunner, StepRegistry};
use conveyor_core::store::sqlite::{apply_schema, connect_pool};
use conveyor_core::store::SqliteStore;
use conveyor_core::worker::WorkerPool;
use conveyor_core::Coordinator;

use config::WorkerConfig;
use steps::{HttpStep, LogStep};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_worker=debug,conveyor_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        queue = %config.queue_name,
        concurrency = config.concurrency,
        max_attempts = config.max_attempts,
        "Loaded worker configuration"
    );

    // --- Database (shared with the API server) ---
    let pool = connect_pool(&config.database_url)
        .await
        .expect("Failed to open database");
    apply_schema(&pool).await.expect("Failed to apply schema");
    tracing::info!(url = %config.database_url, "Database ready");

    // --- Coordinator over the shared store/broker ---
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let broker = Arc::new(SqliteBroker::new(pool, config.retry_policy()));
    let coordinator = Arc::new(Coordinator::new(
        store,
        broker.clone(),
        config.queue_name.clone(),
    ));

    // --- Step handlers for the default runner ---
    let mut registry = StepRegistry::new();
    registry
        .register(Arc::new(HttpStep::new()))
        .expect("register http step");
    registry
        .register(Arc::new(LogStep))
        .expect("register log step");
    let runner = Arc::new(FlowRunner::new(Arc::new(registry)));

    // --- Pool ---
    let pool = WorkerPool::spawn(config.pool_config(), broker, coordinator, runner);
    tracing::info!("Worker pool started");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, draining executors");

    pool.shutdown_and_join().await;
    tracing::info!("Worker stopped");
}
