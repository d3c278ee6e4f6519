//! Handlers for the `/ai` resource: generation, task queries and provider
//! callbacks.
//!
//! Everything except `notify` requires authentication via [`AuthUser`].

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use banana_core::error::CoreError;
use banana_core::types::DbId;
use banana_db::models::ai_task::AiTaskListQuery;
use banana_db::repositories::AiTaskRepo;
use banana_pipeline::GenerateRequest;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::{DataResponse, ListResponse};
use crate::state::AppState;

/// Header carrying the shared secret on provider callbacks. Providers that
/// cannot set headers echo the token from the callback URL instead.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Query string of `POST /api/v1/ai/notify/{provider}`.
#[derive(Debug, Default, Deserialize)]
pub struct NotifyParams {
    pub token: Option<String>,
}

/// Body of `POST /api/v1/ai/query`.
#[derive(Debug, Deserialize)]
pub struct QueryTaskRequest {
    pub id: DbId,
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// POST /api/v1/ai/generate
///
/// Charge the caller and record a task. Returns 201 with the task, which is
/// PROCESSING or already settled when the provider was called right away,
/// or PENDING when the call is deferred to the first query.
pub async fn generate(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<GenerateRequest>,
) -> AppResult<impl IntoResponse> {
    let task = state.coordinator.submit(auth.caller(), input).await?;

    tracing::info!(
        task_id = task.id,
        user_id = auth.user_id,
        provider = %task.provider,
        status = %task.status,
        cost_credits = task.cost_credits,
        "Generation submitted",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: task })))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// POST /api/v1/ai/query
///
/// Return the current state of one of the caller's tasks, refreshing it from
/// the provider or dispatching it when it is still PENDING.
pub async fn query_task(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<QueryTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let task = state.coordinator.query(auth.caller(), input.id).await?;
    Ok(Json(DataResponse { data: task }))
}

/// GET /api/v1/ai/tasks
///
/// List the caller's own tasks, newest first. A `user_id` in the query
/// string is ignored.
pub async fn list_tasks(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(mut params): Query<AiTaskListQuery>,
) -> AppResult<impl IntoResponse> {
    params.user_id = Some(auth.user_id);

    let data = AiTaskRepo::list(&state.pool, &params).await?;
    let total = AiTaskRepo::count(&state.pool, &params).await?;
    Ok(Json(ListResponse { data, total }))
}

// ---------------------------------------------------------------------------
// Provider callback
// ---------------------------------------------------------------------------

/// POST /api/v1/ai/notify/{provider}
///
/// Completion callback from a provider. When a callback token is configured
/// the request must carry it, either in the `token` query parameter of the
/// callback URL handed to the provider or in `x-callback-token`.
pub async fn notify(
    Path(provider): Path<String>,
    Query(params): Query<NotifyParams>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<impl IntoResponse> {
    let presented = params.token.as_deref().or_else(|| {
        headers
            .get(CALLBACK_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
    });
    if !state.coordinator.config().accepts_callback_token(presented) {
        tracing::warn!(provider = %provider, "Rejected callback with bad token");
        return Err(AppError::Core(CoreError::Unauthorized(
            "Invalid callback token".into(),
        )));
    }

    let task = state
        .coordinator
        .notify(&provider, &payload)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No {provider} task matches this callback")))?;

    Ok(Json(DataResponse { data: task }))
}
