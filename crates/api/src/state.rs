use std::sync::Arc;

use banana_pipeline::TaskCoordinator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone: every field is a pool handle, an `Arc`, or `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: banana_db::DbPool,
    /// Server configuration (JWT secret, callback token).
    pub config: Arc<ServerConfig>,
    /// Charges, records and dispatches generation tasks.
    pub coordinator: TaskCoordinator,
}
