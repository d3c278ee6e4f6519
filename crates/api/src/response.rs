//! Shared response envelope types for API handlers.
//!
//! All API responses use a `{ "data": ... }` envelope. Paged listings add the
//! unpaged row count as `total`.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// ```ignore
/// Ok(Json(DataResponse { data: task }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// `{ "data": [T], "total": n }` envelope for paged listings.
#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub data: Vec<T>,
    pub total: i64,
}
