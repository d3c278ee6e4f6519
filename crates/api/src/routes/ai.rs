use axum::routing::{get, post};
use axum::Router;

use crate::handlers::ai;
use crate::state::AppState;

/// Routes mounted at `/ai`.
///
/// ```text
/// POST   /generate            -> generate
/// POST   /query               -> query_task
/// GET    /tasks               -> list_tasks
/// POST   /notify/{provider}   -> notify
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(ai::generate))
        .route("/query", post(ai::query_task))
        .route("/tasks", get(ai::list_tasks))
        .route("/notify/{provider}", post(ai::notify))
}
