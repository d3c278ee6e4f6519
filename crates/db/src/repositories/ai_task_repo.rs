//! Repository for the `ai_tasks` table.
//!
//! Status writes go through [`AiTaskRepo::update`], which is also where a
//! charged task's consumption is reversed when it fails: the reversal and the
//! FAILED status commit together or not at all.

use banana_core::media::TaskStatus;
use banana_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use super::page_bounds;
use crate::error::LedgerError;
use crate::models::ai_task::{AiTask, AiTaskListQuery, CreateAiTask, UpdateAiTask};
use crate::models::credit::Reversal;
use crate::repositories::CreditRepo;

/// Column list for `ai_tasks` queries.
const COLUMNS: &str = "\
    id, user_id, media_type, provider, model, prompt, options, scene, status, \
    cost_credits, task_id, task_info, task_result, credit_id, created_at, updated_at";

/// Provides CRUD and lifecycle operations for AI tasks.
pub struct AiTaskRepo;

impl AiTaskRepo {
    /// Insert a new task row.
    pub async fn create(pool: &PgPool, input: &CreateAiTask) -> Result<AiTask, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        Self::create_in_tx(&mut conn, input).await
    }

    /// Insert a new task row on an open connection or transaction.
    pub async fn create_in_tx(
        conn: &mut PgConnection,
        input: &CreateAiTask,
    ) -> Result<AiTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO ai_tasks \
                 (user_id, media_type, provider, model, prompt, options, scene, status, \
                  cost_credits, task_id, task_info, task_result, credit_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AiTask>(&query)
            .bind(input.user_id)
            .bind(input.media_type.as_str())
            .bind(&input.provider)
            .bind(&input.model)
            .bind(&input.prompt)
            .bind(&input.options)
            .bind(&input.scene)
            .bind(input.status.as_str())
            .bind(input.cost_credits)
            .bind(&input.task_id)
            .bind(&input.task_info)
            .bind(&input.task_result)
            .bind(input.credit_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AiTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM ai_tasks WHERE id = $1");
        sqlx::query_as::<_, AiTask>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a task by the correlation id a provider knows it under.
    pub async fn find_by_provider_task_id(
        pool: &PgPool,
        provider: &str,
        task_id: &str,
    ) -> Result<Option<AiTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ai_tasks \
             WHERE provider = $1 AND task_id = $2 \
             ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, AiTask>(&query)
            .bind(provider)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Apply a partial update. Only `Some` fields in `input` are written.
    ///
    /// The row is locked for the duration of the write. Terminal tasks, and
    /// updates whose status would be an illegal transition, are left as they
    /// are and the stored row is returned. Setting FAILED on a task that
    /// carries a `credit_id` reverses that consumption in the same
    /// transaction; reversing an already reversed record is a no-op.
    ///
    /// Returns `None` if no task with `id` exists.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        input: &UpdateAiTask,
    ) -> Result<Option<AiTask>, LedgerError> {
        let mut tx = pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM ai_tasks WHERE id = $1 FOR UPDATE");
        let Some(current) = sqlx::query_as::<_, AiTask>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let current_status = current.status()?;
        if current_status.is_terminal() {
            tracing::debug!(
                task_id = id,
                status = %current_status,
                "Ignoring update of terminal task",
            );
            return Ok(Some(current));
        }
        if let Some(next) = input.status {
            if !current_status.can_transition_to(next) {
                tracing::warn!(
                    task_id = id,
                    from = %current_status,
                    to = %next,
                    "Rejected illegal task status transition",
                );
                return Ok(Some(current));
            }
        }

        if input.status == Some(TaskStatus::Failed) {
            if let Some(credit_id) = current.credit_id {
                let outcome = CreditRepo::reverse_in_tx(&mut tx, credit_id).await?;
                if let Reversal::Reversed { restored } = outcome {
                    tracing::info!(
                        task_id = id,
                        credit_id,
                        restored,
                        "Refunded credits for failed task",
                    );
                }
            }
        }

        let query = format!(
            "UPDATE ai_tasks SET \
                 status = COALESCE($2, status), \
                 task_id = COALESCE($3, task_id), \
                 task_info = COALESCE($4, task_info), \
                 task_result = COALESCE($5, task_result) \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, AiTask>(&query)
            .bind(id)
            .bind(input.status.map(TaskStatus::as_str))
            .bind(&input.task_id)
            .bind(&input.task_info)
            .bind(&input.task_result)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    /// Atomically move a PENDING task to PROCESSING.
    ///
    /// This is the mutual-exclusion gate for deferred dispatch: of many
    /// concurrent callers exactly one gets `Some`, the rest get `None`.
    pub async fn claim_pending(pool: &PgPool, id: DbId) -> Result<Option<AiTask>, sqlx::Error> {
        let query = format!(
            "UPDATE ai_tasks SET status = $2 \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AiTask>(&query)
            .bind(id)
            .bind(TaskStatus::Processing.as_str())
            .bind(TaskStatus::Pending.as_str())
            .fetch_optional(pool)
            .await
    }

    /// PROCESSING tasks whose provider id still starts with `task_id_prefix`
    /// and that have not been touched for `older_than_secs` seconds, oldest
    /// first.
    pub async fn list_stale_processing(
        pool: &PgPool,
        task_id_prefix: &str,
        older_than_secs: i64,
    ) -> Result<Vec<AiTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ai_tasks \
             WHERE status = $1 \
               AND starts_with(task_id, $2) \
               AND updated_at <= NOW() - make_interval(secs => $3) \
             ORDER BY updated_at ASC, id ASC"
        );
        sqlx::query_as::<_, AiTask>(&query)
            .bind(TaskStatus::Processing.as_str())
            .bind(task_id_prefix)
            .bind(older_than_secs as f64)
            .fetch_all(pool)
            .await
    }

    /// List tasks matching `params`, newest first.
    pub async fn list(pool: &PgPool, params: &AiTaskListQuery) -> Result<Vec<AiTask>, sqlx::Error> {
        let (limit, offset) = page_bounds(params.page, params.limit);
        let (where_clause, next_idx) = Self::list_filter(params);

        let query = format!(
            "SELECT {COLUMNS} FROM ai_tasks \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${next_idx} OFFSET ${}",
            next_idx + 1,
        );

        let mut q = sqlx::query_as::<_, AiTask>(&query);
        if let Some(user_id) = params.user_id {
            q = q.bind(user_id);
        }
        if let Some(status) = &params.status {
            q = q.bind(status);
        }
        if let Some(media_type) = &params.media_type {
            q = q.bind(media_type);
        }
        if let Some(provider) = &params.provider {
            q = q.bind(provider);
        }
        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Count tasks matching the filters of `params` (paging is ignored).
    pub async fn count(pool: &PgPool, params: &AiTaskListQuery) -> Result<i64, sqlx::Error> {
        let (where_clause, _) = Self::list_filter(params);
        let query = format!("SELECT COUNT(*) FROM ai_tasks {where_clause}");

        let mut q = sqlx::query_scalar::<_, i64>(&query);
        if let Some(user_id) = params.user_id {
            q = q.bind(user_id);
        }
        if let Some(status) = &params.status {
            q = q.bind(status);
        }
        if let Some(media_type) = &params.media_type {
            q = q.bind(media_type);
        }
        if let Some(provider) = &params.provider {
            q = q.bind(provider);
        }
        q.fetch_one(pool).await
    }

    /// Build the WHERE clause for listings and return the next bind index.
    fn list_filter(params: &AiTaskListQuery) -> (String, u32) {
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.user_id.is_some() {
            conditions.push(format!("user_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.media_type.is_some() {
            conditions.push(format!("media_type = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.provider.is_some() {
            conditions.push(format!("provider = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (where_clause, bind_idx)
    }
}
