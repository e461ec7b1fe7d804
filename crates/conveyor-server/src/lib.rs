//! API facade for the Conveyor coordinator.
//!
//! Thin by design: handlers translate HTTP into coordinator calls and
//! back. All state tracking, dispatch, and retry logic lives in
//! `conveyor-core`.

pub mod config;
pub mod error;
pub mod response;
pub mod routes;
pub mod state;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::ServerConfig;
use state::AppState;

/// Build the full application [`Router`] with its middleware stack. Used
/// by the production binary; kept separate so tests can mount the same
/// router over an in-memory coordinator.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// CORS layer from configuration. Panics on an invalid origin: we want
/// misconfiguration to fail at startup, not per request.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}
