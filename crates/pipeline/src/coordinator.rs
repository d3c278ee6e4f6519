//! The task lifecycle coordinator.
//!
//! A generation request is charged and recorded in one transaction, then
//! dispatched to its provider either right away or, for callback-only
//! providers in deferred mode, on the first query that finds it PENDING.
//! Every failure after the charge is settled by marking the task FAILED,
//! which reverses the charge through [`AiTaskRepo::update`].

use std::sync::Arc;

use banana_core::credits::{PAID_SCENES, SCENE_GENERATION};
use banana_core::error::CoreError;
use banana_core::media::{validate_scene, MediaType, TaskStatus};
use banana_core::pricing::{price, requires_paid_plan, ResolutionTier};
use banana_core::roles::is_unlimited;
use banana_core::types::DbId;
use banana_db::models::ai_task::{AiTask, CreateAiTask, UpdateAiTask};
use banana_db::models::credit::ConsumeCredits;
use banana_db::repositories::{AiTaskRepo, CreditRepo};
use banana_providers::{
    AiProvider, GenerateParams, ProviderCapability, ProviderRegistry, ProviderTask,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;

use crate::config::{CoordinatorConfig, DispatchMode};
use crate::error::PipelineError;

/// Prefix of task ids assigned before the provider has answered.
pub const LOCAL_TASK_ID_PREFIX: &str = "local-";

/// `error_code` recorded in `task_info` when a dispatch fails.
pub const GENERATION_FAILED_CODE: &str = "GENERATION_FAILED";

/// `error_message` recorded for a dispatch that never got an answer.
pub const INTERRUPTED_MESSAGE: &str = "Provider call was interrupted";

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: DbId,
    /// Unlimited callers are never charged and never refunded.
    pub unlimited: bool,
}

impl Caller {
    pub fn from_role(user_id: DbId, role: &str) -> Self {
        Self {
            user_id,
            unlimited: is_unlimited(role),
        }
    }
}

/// Body of a generation request.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub provider: String,
    pub media_type: String,
    pub model: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
    pub scene: String,
}

/// Result of running a provider call for a stored task.
enum Dispatch {
    /// The provider answered; the task holds whatever it reported.
    Answered(AiTask),
    /// The call failed; the task is FAILED and its charge reversed.
    Failed { task: AiTask, message: String },
}

/// Coordinates charging, dispatch, polling and settlement of AI tasks.
#[derive(Clone)]
pub struct TaskCoordinator {
    pool: PgPool,
    providers: Arc<ProviderRegistry>,
    config: CoordinatorConfig,
}

impl TaskCoordinator {
    pub fn new(pool: PgPool, providers: Arc<ProviderRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            pool,
            providers,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    // ---------------------------------------------------------------------
    // Submit
    // ---------------------------------------------------------------------

    /// Validate, price, charge and record a generation request, then
    /// dispatch it according to the provider's capability and the
    /// configured [`DispatchMode`].
    pub async fn submit(
        &self,
        caller: Caller,
        request: GenerateRequest,
    ) -> Result<AiTask, PipelineError> {
        let provider_name = request.provider.trim();
        let model = request.model.trim();
        if provider_name.is_empty() || model.is_empty() {
            return Err(CoreError::Validation("provider and model are required".into()).into());
        }
        let has_prompt = request.prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        let has_options = request.options.as_ref().is_some_and(|o| !o.is_null());
        if !has_prompt && !has_options {
            return Err(CoreError::Validation("prompt or options is required".into()).into());
        }

        let media_type: MediaType = request.media_type.parse()?;
        validate_scene(media_type, &request.scene)?;

        let provider = self.providers.get(provider_name).ok_or_else(|| {
            CoreError::Validation(format!("Provider '{provider_name}' is not available"))
        })?;

        let tier = ResolutionTier::from_options(request.options.as_ref())?;
        let cost = if caller.unlimited {
            0
        } else {
            price(media_type, &request.scene, tier)?
        };

        if !caller.unlimited
            && requires_paid_plan(tier, self.config.max_ungated_tier)
            && !CreditRepo::has_grant_in_scenes(&self.pool, caller.user_id, PAID_SCENES).await?
        {
            return Err(CoreError::PermissionDenied(format!(
                "{tier} output requires a paid plan"
            ))
            .into());
        }

        let dispatch_now = match provider.capability() {
            ProviderCapability::SupportsQuery(_) => true,
            ProviderCapability::CallbackOnly => {
                self.config.dispatch_mode == DispatchMode::Immediate
            }
        };

        let mut tx = self.pool.begin().await?;

        let credit_id = if cost > 0 {
            let record = CreditRepo::consume_in_tx(
                &mut tx,
                &ConsumeCredits {
                    user_id: caller.user_id,
                    amount: cost,
                    scene: SCENE_GENERATION.to_string(),
                    description: Some(format!(
                        "{media_type} {} via {provider_name}",
                        request.scene
                    )),
                },
            )
            .await?;
            Some(record.id)
        } else {
            None
        };

        let task = AiTaskRepo::create_in_tx(
            &mut tx,
            &CreateAiTask {
                user_id: caller.user_id,
                media_type,
                provider: provider_name.to_string(),
                model: model.to_string(),
                prompt: request.prompt.clone(),
                options: request.options.clone(),
                scene: request.scene.clone(),
                status: if dispatch_now {
                    TaskStatus::Processing
                } else {
                    TaskStatus::Pending
                },
                cost_credits: cost,
                task_id: local_task_id(),
                task_info: None,
                task_result: None,
                credit_id,
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            task_id = task.id,
            user_id = caller.user_id,
            provider = %task.provider,
            cost,
            dispatch_now,
            "Generation task created",
        );

        if !dispatch_now {
            return Ok(task);
        }

        match self.run_detached(task, provider).await? {
            Dispatch::Answered(task) => Ok(task),
            Dispatch::Failed { message, .. } => Err(CoreError::ProviderFailure(message).into()),
        }
    }

    // ---------------------------------------------------------------------
    // Query / pick-up
    // ---------------------------------------------------------------------

    /// Return the current state of a task, refreshing it from the provider
    /// or running its deferred dispatch when applicable.
    pub async fn query(&self, caller: Caller, id: DbId) -> Result<AiTask, PipelineError> {
        let task = AiTaskRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "AiTask",
                id,
            })?;

        if task.user_id != caller.user_id {
            return Err(CoreError::Forbidden("Task belongs to another user".into()).into());
        }
        if task.is_terminal() {
            return Ok(task);
        }

        let status = task.status()?;
        if self.is_interrupted(&task, status) {
            return self.fail_interrupted(task).await;
        }

        let provider = self.providers.get(&task.provider).ok_or_else(|| {
            CoreError::Validation(format!("Provider '{}' is not available", task.provider))
        })?;

        match provider.capability() {
            ProviderCapability::SupportsQuery(query) => {
                // Dispatch is still in flight; there is nothing to ask yet.
                if task.task_id.starts_with(LOCAL_TASK_ID_PREFIX) {
                    return Ok(task);
                }
                let reported = query.query(&task.task_id).await.map_err(|e| {
                    tracing::warn!(task_id = task.id, error = %e, "Provider query failed");
                    CoreError::ProviderFailure(e.to_string())
                })?;
                self.merge(task, reported).await
            }
            ProviderCapability::CallbackOnly if status == TaskStatus::Pending => {
                self.pick_up(task, provider.clone()).await
            }
            ProviderCapability::CallbackOnly => Ok(task),
        }
    }

    /// Claim a PENDING task and run its provider call. Concurrent callers
    /// that lose the claim get the stored row.
    async fn pick_up(
        &self,
        task: AiTask,
        provider: Arc<dyn AiProvider>,
    ) -> Result<AiTask, PipelineError> {
        let Some(claimed) = AiTaskRepo::claim_pending(&self.pool, task.id).await? else {
            tracing::debug!(task_id = task.id, "Task already picked up elsewhere");
            return self.reload(task.id).await;
        };

        tracing::info!(
            task_id = claimed.id,
            provider = %claimed.provider,
            "Picked up pending task",
        );
        match self.run_detached(claimed, provider).await? {
            Dispatch::Answered(task) | Dispatch::Failed { task, .. } => Ok(task),
        }
    }

    // ---------------------------------------------------------------------
    // Interrupted dispatch recovery
    // ---------------------------------------------------------------------

    /// Fail and refund every PROCESSING task whose provider call never
    /// answered within [`CoordinatorConfig::stale_after`], e.g. because the
    /// process stopped mid-dispatch. Returns how many tasks were settled.
    pub async fn recover_interrupted(&self) -> Result<usize, PipelineError> {
        let older_than = i64::try_from(self.config.stale_after.as_secs()).unwrap_or(i64::MAX);
        let stale =
            AiTaskRepo::list_stale_processing(&self.pool, LOCAL_TASK_ID_PREFIX, older_than).await?;

        let mut recovered = 0;
        for task in stale {
            let failed = self.fail_interrupted(task).await?;
            if failed.status == TaskStatus::Failed.as_str() {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::warn!(recovered, "Failed interrupted generation tasks");
        }
        Ok(recovered)
    }

    /// A PROCESSING task still under its local id has not heard back from
    /// its provider. Past the stale window the call can no longer be running.
    fn is_interrupted(&self, task: &AiTask, status: TaskStatus) -> bool {
        if status != TaskStatus::Processing || !task.task_id.starts_with(LOCAL_TASK_ID_PREFIX) {
            return false;
        }
        let idle = chrono::Utc::now()
            .signed_duration_since(task.updated_at)
            .to_std()
            .unwrap_or_default();
        idle >= self.config.stale_after
    }

    async fn fail_interrupted(&self, task: AiTask) -> Result<AiTask, PipelineError> {
        tracing::warn!(
            task_id = task.id,
            provider = %task.provider,
            since = %task.updated_at,
            "Dispatch never answered, failing task",
        );
        let update = UpdateAiTask {
            status: Some(TaskStatus::Failed),
            task_info: Some(json!({
                "error_message": INTERRUPTED_MESSAGE,
                "error_code": GENERATION_FAILED_CODE,
            })),
            ..Default::default()
        };
        self.apply(task.id, &update).await
    }

    // ---------------------------------------------------------------------
    // Provider callback
    // ---------------------------------------------------------------------

    /// Apply a provider's notify callback. Returns `None` when no task is
    /// known under the reported id.
    pub async fn notify(
        &self,
        provider_name: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<AiTask>, PipelineError> {
        let provider = self.providers.get(provider_name).ok_or_else(|| {
            CoreError::Validation(format!("Provider '{provider_name}' is not available"))
        })?;

        let reported = provider
            .parse_callback(payload)
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        if reported.task_id.is_empty() {
            return Err(CoreError::Validation("callback carries no task id".into()).into());
        }

        let Some(task) =
            AiTaskRepo::find_by_provider_task_id(&self.pool, provider_name, &reported.task_id)
                .await?
        else {
            tracing::warn!(
                provider = provider_name,
                provider_task_id = %reported.task_id,
                "Callback for unknown task",
            );
            return Ok(None);
        };

        if task.is_terminal() {
            return Ok(Some(task));
        }
        self.merge(task, reported).await.map(Some)
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Run [`TaskCoordinator::dispatch`] on its own Tokio task and wait for
    /// it. A caller that gives up waiting does not cancel the provider call
    /// or the write of its outcome.
    async fn run_detached(
        &self,
        task: AiTask,
        provider: Arc<dyn AiProvider>,
    ) -> Result<Dispatch, PipelineError> {
        let id = task.id;
        let coordinator = self.clone();
        let handle = tokio::spawn(async move { coordinator.dispatch(task, provider).await });
        handle.await.map_err(|e| {
            tracing::error!(task_id = id, error = %e, "Dispatch task aborted");
            PipelineError::Core(CoreError::Internal(format!("dispatch of task {id} aborted")))
        })?
    }

    /// Call the provider for a PROCESSING task and persist the outcome.
    async fn dispatch(
        &self,
        task: AiTask,
        provider: Arc<dyn AiProvider>,
    ) -> Result<Dispatch, PipelineError> {
        let params = GenerateParams {
            media_type: task.media_type()?,
            model: task.model.clone(),
            prompt: task.prompt.clone(),
            scene: task.scene.clone(),
            options: task.options.clone(),
            callback_url: self.config.callback_url(&task.provider),
        };

        let outcome = match provider.generate(&params).await {
            Ok(reported) if reported.task_id.trim().is_empty() => {
                Err("Provider did not return a task id".to_string())
            }
            Ok(reported) => Ok(reported),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(reported) => {
                let update = UpdateAiTask {
                    status: Some(settled_status(reported.status)),
                    task_id: Some(reported.task_id),
                    task_info: reported.task_info,
                    task_result: reported.task_result,
                };
                let updated = self.apply(task.id, &update).await?;
                tracing::info!(
                    task_id = updated.id,
                    provider_task_id = %updated.task_id,
                    status = %updated.status,
                    "Provider accepted task",
                );
                Ok(Dispatch::Answered(updated))
            }
            Err(message) => {
                tracing::warn!(task_id = task.id, error = %message, "Generation failed");
                let update = UpdateAiTask {
                    status: Some(TaskStatus::Failed),
                    task_info: Some(json!({
                        "error_message": message,
                        "error_code": GENERATION_FAILED_CODE,
                    })),
                    ..Default::default()
                };
                let failed = self.apply(task.id, &update).await?;
                Ok(Dispatch::Failed {
                    task: failed,
                    message,
                })
            }
        }
    }

    /// Persist what a provider reported, writing only fields that changed.
    async fn merge(&self, task: AiTask, reported: ProviderTask) -> Result<AiTask, PipelineError> {
        let current = task.status()?;
        let next = settled_status(reported.status);

        let update = UpdateAiTask {
            status: (next != current).then_some(next),
            task_id: None,
            task_info: reported.task_info.filter(|info| task.task_info.as_ref() != Some(info)),
            task_result: reported
                .task_result
                .filter(|result| task.task_result.as_ref() != Some(result)),
        };
        if update.status.is_none() && update.task_info.is_none() && update.task_result.is_none() {
            return Ok(task);
        }

        let updated = self.apply(task.id, &update).await?;
        if updated.status != task.status {
            tracing::info!(
                task_id = updated.id,
                from = %task.status,
                to = %updated.status,
                "Task status changed",
            );
        }
        Ok(updated)
    }

    async fn apply(&self, id: DbId, update: &UpdateAiTask) -> Result<AiTask, PipelineError> {
        AiTaskRepo::update(&self.pool, id, update)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "AiTask",
                    id,
                }
                .into()
            })
    }

    async fn reload(&self, id: DbId) -> Result<AiTask, PipelineError> {
        AiTaskRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "AiTask",
                    id,
                }
                .into()
            })
    }
}

/// Once a provider holds the task it is at least PROCESSING.
fn settled_status(reported: TaskStatus) -> TaskStatus {
    match reported {
        TaskStatus::Pending => TaskStatus::Processing,
        other => other,
    }
}

fn local_task_id() -> String {
    format!("{LOCAL_TASK_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_pending_settles_to_processing() {
        assert_eq!(settled_status(TaskStatus::Pending), TaskStatus::Processing);
        assert_eq!(settled_status(TaskStatus::Success), TaskStatus::Success);
        assert_eq!(settled_status(TaskStatus::Failed), TaskStatus::Failed);
    }

    #[test]
    fn local_ids_are_prefixed_and_unique() {
        let a = local_task_id();
        let b = local_task_id();
        assert!(a.starts_with(LOCAL_TASK_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn admin_role_is_unlimited() {
        assert!(Caller::from_role(1, "admin").unlimited);
        assert!(!Caller::from_role(1, "user").unlimited);
    }
}
