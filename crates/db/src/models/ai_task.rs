//! AI task entity model and DTOs.

use banana_core::error::CoreError;
use banana_core::media::{MediaType, TaskStatus};
use banana_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `ai_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AiTask {
    pub id: DbId,
    pub user_id: DbId,
    pub media_type: String,
    pub provider: String,
    pub model: String,
    pub prompt: Option<String>,
    pub options: Option<serde_json::Value>,
    pub scene: String,
    pub status: String,
    pub cost_credits: i32,
    /// Provider-side correlation id, or a self-assigned `local-` id until
    /// the provider has answered.
    pub task_id: String,
    pub task_info: Option<serde_json::Value>,
    pub task_result: Option<serde_json::Value>,
    /// Consume record that funded this task, if it was charged.
    pub credit_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AiTask {
    pub fn status(&self) -> Result<TaskStatus, CoreError> {
        self.status.parse()
    }

    pub fn media_type(&self) -> Result<MediaType, CoreError> {
        self.media_type.parse()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().map(TaskStatus::is_terminal).unwrap_or(false)
    }
}

/// Input for inserting a task row.
#[derive(Debug, Clone)]
pub struct CreateAiTask {
    pub user_id: DbId,
    pub media_type: MediaType,
    pub provider: String,
    pub model: String,
    pub prompt: Option<String>,
    pub options: Option<serde_json::Value>,
    pub scene: String,
    pub status: TaskStatus,
    pub cost_credits: i32,
    pub task_id: String,
    pub task_info: Option<serde_json::Value>,
    pub task_result: Option<serde_json::Value>,
    pub credit_id: Option<DbId>,
}

/// Partial update for a task. Only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct UpdateAiTask {
    pub status: Option<TaskStatus>,
    pub task_id: Option<String>,
    pub task_info: Option<serde_json::Value>,
    pub task_result: Option<serde_json::Value>,
}

/// Filters and paging for task listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiTaskListQuery {
    /// Restrict to one owner. Handlers set this from the caller for
    /// non-admin listings.
    pub user_id: Option<DbId>,
    pub status: Option<String>,
    pub media_type: Option<String>,
    pub provider: Option<String>,
    /// 1-based page number. Defaults to 1.
    pub page: Option<i64>,
    /// Page size. Defaults to 30, capped at 100.
    pub limit: Option<i64>,
}
