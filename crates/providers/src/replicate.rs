//! Replicate predictions client.
//!
//! Replicate accepts a prediction immediately and runs it asynchronously, so
//! this provider supports status queries in addition to webhook callbacks.

use async_trait::async_trait;
use banana_core::media::TaskStatus;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::{
    ensure_success, AiProvider, GenerateParams, ProviderCapability, ProviderError, ProviderTask,
    TaskQuery,
};

pub const PROVIDER_NAME: &str = "replicate";

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

/// A prediction as returned by both the create and get endpoints.
#[derive(Debug, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
}

pub struct ReplicateProvider {
    client: reqwest::Client,
    api_token: String,
    base_url: String,
}

impl ReplicateProvider {
    pub fn new(client: reqwest::Client, api_token: String, base_url: String) -> Self {
        Self {
            client,
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the `input` object: caller options with the prompt laid on top.
    fn build_input(params: &GenerateParams) -> Value {
        let mut input = match &params.options {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => json!({}),
        };
        if let Some(prompt) = &params.prompt {
            input["prompt"] = json!(prompt);
        }
        input
    }

    async fn parse_prediction(response: reqwest::Response) -> Result<Prediction, ProviderError> {
        let response = ensure_success(response).await?;
        Ok(response.json::<Prediction>().await?)
    }
}

/// Map a Replicate prediction status onto the task lifecycle.
///
/// `starting` counts as PROCESSING: once Replicate has accepted a
/// prediction the task is no longer waiting on us.
pub fn map_status(status: &str) -> Option<TaskStatus> {
    match status {
        "starting" | "processing" => Some(TaskStatus::Processing),
        "succeeded" => Some(TaskStatus::Success),
        "failed" | "canceled" => Some(TaskStatus::Failed),
        _ => None,
    }
}

/// Convert a prediction into the provider-neutral task view.
pub fn task_from_prediction(prediction: Prediction) -> Result<ProviderTask, ProviderError> {
    let status = map_status(&prediction.status).ok_or_else(|| {
        ProviderError::InvalidResponse(format!(
            "unknown prediction status '{}'",
            prediction.status
        ))
    })?;

    let mut info = json!({ "provider_status": prediction.status });
    if let Some(error) = prediction.error.filter(|e| !e.is_null()) {
        info["error_message"] = error;
    }
    if let Some(metrics) = prediction.metrics {
        info["metrics"] = metrics;
    }

    let task_result = prediction
        .output
        .filter(|o| !o.is_null())
        .map(|output| json!({ "output": output }));

    Ok(ProviderTask {
        task_id: prediction.id,
        status,
        task_info: Some(info),
        task_result,
    })
}

#[async_trait]
impl AiProvider for ReplicateProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capability(&self) -> ProviderCapability<'_> {
        ProviderCapability::SupportsQuery(self)
    }

    async fn generate(&self, params: &GenerateParams) -> Result<ProviderTask, ProviderError> {
        let body = json!({
            "input": Self::build_input(params),
            "webhook": params.callback_url,
            "webhook_events_filter": ["completed"],
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/models/{}/predictions",
                self.base_url, params.model
            ))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        let prediction = Self::parse_prediction(response).await?;
        tracing::info!(
            prediction_id = %prediction.id,
            model = %params.model,
            status = %prediction.status,
            "Replicate prediction created",
        );
        task_from_prediction(prediction)
    }

    /// Replicate webhooks post the full prediction object.
    fn parse_callback(&self, payload: &Value) -> Result<ProviderTask, ProviderError> {
        let prediction = Prediction::deserialize(payload)
            .map_err(|e| ProviderError::InvalidResponse(format!("webhook body: {e}")))?;
        task_from_prediction(prediction)
    }
}

#[async_trait]
impl TaskQuery for ReplicateProvider {
    async fn query(&self, task_id: &str) -> Result<ProviderTask, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.base_url, task_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        task_from_prediction(Self::parse_prediction(response).await?)
    }
}
