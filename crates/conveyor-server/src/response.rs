//! Shared response envelope for API handlers.
//!
//! All responses use a `{ "data": ... }` envelope; use [`DataResponse`]
//! instead of ad-hoc `json!` so the shape stays consistent.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
