use std::sync::Arc;

use conveyor_core::Coordinator;

/// Shared application state available to all handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}
