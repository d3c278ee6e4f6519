//! Administrative handlers. All require the `admin` role via [`RequireAdmin`].

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use banana_core::credits::validate_admin_grant_scene;
use banana_core::error::CoreError;
use banana_core::types::DbId;
use banana_db::models::ai_task::AiTaskListQuery;
use banana_db::models::credit::GrantCredits;
use banana_db::repositories::{AiTaskRepo, CreditRepo};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::{DataResponse, ListResponse};
use crate::state::AppState;

/// Body of `POST /api/v1/admin/credits/grant`.
#[derive(Debug, Deserialize)]
pub struct AdminGrantRequest {
    pub user_id: DbId,
    pub credits: i32,
    /// One of `payment`, `subscription`, `renewal`, `refund`, `gift`.
    pub scene: String,
    pub description: Option<String>,
    /// Validity window in days. Omitted means the grant never expires.
    pub valid_days: Option<i64>,
}

/// POST /api/v1/admin/credits/grant
///
/// Record the credit effect of a payment, subscription, renewal, refund or
/// gift for a user. Returns 201 with the new grant.
pub async fn grant_credits(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(input): Json<AdminGrantRequest>,
) -> AppResult<impl IntoResponse> {
    validate_admin_grant_scene(&input.scene)?;

    let expires_at = match input.valid_days {
        Some(days) if days <= 0 => {
            return Err(CoreError::Validation(format!(
                "valid_days must be positive, got {days}"
            ))
            .into());
        }
        Some(days) => Some(Utc::now() + Duration::days(days)),
        None => None,
    };

    let credit = CreditRepo::grant(
        &state.pool,
        &GrantCredits {
            user_id: input.user_id,
            credits: input.credits,
            scene: input.scene,
            description: input.description,
            expires_at,
        },
    )
    .await?;

    tracing::info!(
        credit_id = credit.id,
        user_id = credit.user_id,
        scene = %credit.transaction_scene,
        credits = credit.credits,
        admin_id = admin.user_id,
        "Credits granted by admin",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: credit })))
}

/// GET /api/v1/admin/ai/tasks
///
/// Every user's tasks, optionally filtered by `user_id`.
pub async fn list_all_tasks(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Query(params): Query<AiTaskListQuery>,
) -> AppResult<impl IntoResponse> {
    let data = AiTaskRepo::list(&state.pool, &params).await?;
    let total = AiTaskRepo::count(&state.pool, &params).await?;
    Ok(Json(ListResponse { data, total }))
}
