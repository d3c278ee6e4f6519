pub mod admin;
pub mod ai;
pub mod credits;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ai/generate                 submit a generation (POST)
/// /ai/query                    query or pick up a task (POST)
/// /ai/tasks                    caller's tasks (GET)
/// /ai/notify/{provider}        provider completion callback (POST, no auth)
///
/// /credits                     caller's ledger history (GET)
/// /credits/balance             caller's usable balance (GET)
/// /credits/free-trial          claim the one-time trial grant (POST)
///
/// /admin/credits/grant         grant credits to a user (POST, admin only)
/// /admin/ai/tasks              all tasks (GET, admin only)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/ai", ai::router())
        .nest("/credits", credits::router())
        .nest("/admin", admin::router())
}
