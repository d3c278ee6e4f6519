//! Admin-only routes. Authorization is enforced per handler by `RequireAdmin`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// POST   /credits/grant   -> grant_credits
/// GET    /ai/tasks        -> list_all_tasks
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/credits/grant", post(admin::grant_credits))
        .route("/ai/tasks", get(admin::list_all_tasks))
}
