//! Handlers for the caller's own credits.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use banana_core::credits::{FREE_TRIAL_CREDITS, FREE_TRIAL_VALID_DAYS, SCENE_FREE_TRIAL};
use banana_core::types::DbId;
use banana_db::models::credit::{CreditListQuery, GrantCredits};
use banana_db::repositories::CreditRepo;
use chrono::{Duration, Utc};
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::{DataResponse, ListResponse};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: DbId,
    pub balance: i64,
}

/// GET /api/v1/credits/balance
pub async fn get_balance(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let balance = CreditRepo::remaining_balance(&state.pool, auth.user_id).await?;
    Ok(Json(DataResponse {
        data: BalanceResponse {
            user_id: auth.user_id,
            balance,
        },
    }))
}

/// GET /api/v1/credits
///
/// The caller's grants and consume records, newest first.
pub async fn list_history(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<CreditListQuery>,
) -> AppResult<impl IntoResponse> {
    let data = CreditRepo::list_by_user(&state.pool, auth.user_id, &params).await?;
    let total = CreditRepo::count_by_user(&state.pool, auth.user_id, &params).await?;
    Ok(Json(ListResponse { data, total }))
}

/// POST /api/v1/credits/free-trial
///
/// Claim the one-time free trial grant. A second claim is rejected with
/// 409 `DUPLICATE_GRANT`.
pub async fn claim_free_trial(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let input = GrantCredits {
        user_id: auth.user_id,
        credits: FREE_TRIAL_CREDITS,
        scene: SCENE_FREE_TRIAL.to_string(),
        description: Some("Free trial credits".to_string()),
        expires_at: Some(Utc::now() + Duration::days(FREE_TRIAL_VALID_DAYS)),
    };
    let credit = CreditRepo::grant(&state.pool, &input).await?;

    tracing::info!(
        credit_id = credit.id,
        user_id = auth.user_id,
        credits = credit.credits,
        "Free trial claimed",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: credit })))
}
