use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_core::broker::{RetryPolicy, SqliteBroker};
use conveyor_core::store::sqlite::{apply_schema, connect_pool};
use conveyor_core::store::SqliteStore;
use conveyor_core::Coordinator;
use conveyor_server::config::ServerConfig;
use conveyor_server::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = connect_pool(&config.database_url)
        .await
        .expect("Failed to open database");
    apply_schema(&pool).await.expect("Failed to apply schema");
    tracing::info!(url = %config.database_url, "Database ready");

    // --- Coordinator ---
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let broker = Arc::new(SqliteBroker::new(pool, RetryPolicy::default()));
    let coordinator = Arc::new(Coordinator::new(store, broker, config.queue_name.clone()));

    let state = AppState { coordinator };
    let app = conveyor_server::build_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
