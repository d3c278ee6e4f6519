use axum::routing::{get, post};
use axum::Router;

use crate::handlers::credits;
use crate::state::AppState;

/// Routes mounted at `/credits`. All require authentication.
///
/// ```text
/// GET    /              -> list_history
/// GET    /balance       -> get_balance
/// POST   /free-trial    -> claim_free_trial
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(credits::list_history))
        .route("/balance", get(credits::get_balance))
        .route("/free-trial", post(credits::claim_free_trial))
}
