//! Kie.ai jobs client.
//!
//! Kie wraps every answer in a `{ code, msg, data }` envelope. A job is
//! accepted with `createTask`, reported back through `callBackUrl`, and can
//! also be looked up with `recordInfo`.

use async_trait::async_trait;
use banana_core::media::TaskStatus;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::{
    ensure_success, AiProvider, GenerateParams, ProviderCapability, ProviderError, ProviderTask,
    TaskQuery,
};

pub const PROVIDER_NAME: &str = "kie";

pub const DEFAULT_BASE_URL: &str = "https://api.kie.ai";

const CODE_OK: i64 = 200;

/// The envelope around every Kie answer and callback.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub task_id: String,
}

/// A job record as returned by `recordInfo` and posted to the callback.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub task_id: String,
    pub state: String,
    /// JSON document encoded as a string, e.g. `{"resultUrls":[...]}`.
    #[serde(default)]
    pub result_json: Option<String>,
    #[serde(default)]
    pub fail_code: Option<Value>,
    #[serde(default)]
    pub fail_msg: Option<String>,
    #[serde(default)]
    pub cost_time: Option<Value>,
}

pub struct KieProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl KieProvider {
    pub fn new(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_request_body(params: &GenerateParams) -> Value {
        let mut input = match &params.options {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => json!({}),
        };
        if let Some(prompt) = &params.prompt {
            input["prompt"] = json!(prompt);
        }
        json!({
            "model": params.model,
            "callBackUrl": params.callback_url,
            "input": input,
        })
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let envelope = ensure_success(response)
            .await?
            .json::<Envelope<T>>()
            .await?;
        unwrap_envelope(envelope)
    }
}

/// Turn a non-200 envelope code into [`ProviderError::Api`].
pub fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, ProviderError> {
    if envelope.code != CODE_OK {
        return Err(ProviderError::Api {
            status: u16::try_from(envelope.code).unwrap_or(0),
            body: envelope.msg.unwrap_or_default(),
        });
    }
    envelope
        .data
        .ok_or_else(|| ProviderError::InvalidResponse("envelope without data".into()))
}

/// Map a Kie job state onto the task lifecycle.
pub fn map_state(state: &str) -> Option<TaskStatus> {
    match state {
        "waiting" | "queuing" | "generating" => Some(TaskStatus::Processing),
        "success" => Some(TaskStatus::Success),
        "fail" => Some(TaskStatus::Failed),
        _ => None,
    }
}

pub fn task_from_record(record: JobRecord) -> Result<ProviderTask, ProviderError> {
    let status = map_state(&record.state).ok_or_else(|| {
        ProviderError::InvalidResponse(format!("unknown job state '{}'", record.state))
    })?;

    let mut info = json!({ "provider_status": record.state });
    if let Some(message) = record.fail_msg.filter(|m| !m.is_empty()) {
        info["error_message"] = json!(message);
    }
    if let Some(code) = record.fail_code.filter(|c| !c.is_null()) {
        info["fail_code"] = code;
    }
    if let Some(cost) = record.cost_time.filter(|c| !c.is_null()) {
        info["cost_time"] = cost;
    }

    // resultJson is usually a JSON string; keep it verbatim when it is not.
    let task_result = record
        .result_json
        .filter(|raw| !raw.is_empty())
        .map(|raw| serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)));

    Ok(ProviderTask {
        task_id: record.task_id,
        status,
        task_info: Some(info),
        task_result,
    })
}

#[async_trait]
impl AiProvider for KieProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capability(&self) -> ProviderCapability<'_> {
        ProviderCapability::SupportsQuery(self)
    }

    async fn generate(&self, params: &GenerateParams) -> Result<ProviderTask, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/v1/jobs/createTask", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::build_request_body(params))
            .send()
            .await?;

        let created: CreatedJob = Self::read_envelope(response).await?;
        tracing::info!(
            task_id = %created.task_id,
            model = %params.model,
            "Kie job created",
        );
        Ok(ProviderTask {
            task_id: created.task_id,
            status: TaskStatus::Processing,
            task_info: None,
            task_result: None,
        })
    }

    /// Kie callbacks post the same envelope `recordInfo` answers with.
    fn parse_callback(&self, payload: &Value) -> Result<ProviderTask, ProviderError> {
        let envelope = Envelope::<JobRecord>::deserialize(payload)
            .map_err(|e| ProviderError::InvalidResponse(format!("callback body: {e}")))?;
        // A failed job is still reported with its record; only trust the
        // record's own state.
        let record = envelope
            .data
            .ok_or_else(|| ProviderError::InvalidResponse("callback without data".into()))?;
        task_from_record(record)
    }
}

#[async_trait]
impl TaskQuery for KieProvider {
    async fn query(&self, task_id: &str) -> Result<ProviderTask, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/v1/jobs/recordInfo", self.base_url))
            .query(&[("taskId", task_id)])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        task_from_record(Self::read_envelope(response).await?)
    }
}

#[cfg(test)]
mod tests {
    use banana_core::media::MediaType;

    use super::*;

    fn provider() -> KieProvider {
        KieProvider::new(
            reqwest::Client::new(),
            "kie-key".into(),
            format!("{DEFAULT_BASE_URL}/"),
        )
    }

    #[test]
    fn job_states_map_onto_lifecycle() {
        assert_eq!(map_state("waiting"), Some(TaskStatus::Processing));
        assert_eq!(map_state("queuing"), Some(TaskStatus::Processing));
        assert_eq!(map_state("generating"), Some(TaskStatus::Processing));
        assert_eq!(map_state("success"), Some(TaskStatus::Success));
        assert_eq!(map_state("fail"), Some(TaskStatus::Failed));
        assert_eq!(map_state("paused"), None);
    }

    #[test]
    fn successful_record_decodes_result_json() {
        let record: JobRecord = serde_json::from_value(json!({
            "taskId": "kie-task-1",
            "state": "success",
            "resultJson": "{\"resultUrls\":[\"https://tempfile.kie.ai/a.png\"]}",
            "costTime": 8
        }))
        .unwrap();
        let task = task_from_record(record).unwrap();

        assert_eq!(task.task_id, "kie-task-1");
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(
            task.task_result.unwrap()["resultUrls"][0],
            "https://tempfile.kie.ai/a.png"
        );
        assert_eq!(task.task_info.unwrap()["cost_time"], 8);
    }

    #[test]
    fn failed_record_reports_message() {
        let record: JobRecord = serde_json::from_value(json!({
            "taskId": "kie-task-2",
            "state": "fail",
            "resultJson": "",
            "failCode": "500",
            "failMsg": "content policy violation"
        }))
        .unwrap();
        let task = task_from_record(record).unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.task_result.is_none());
        let info = task.task_info.unwrap();
        assert_eq!(info["error_message"], "content policy violation");
        assert_eq!(info["fail_code"], "500");
    }

    #[test]
    fn error_envelope_is_api_error() {
        let envelope: Envelope<CreatedJob> = serde_json::from_value(json!({
            "code": 402,
            "msg": "Insufficient credits",
            "data": null
        }))
        .unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Api { status: 402, ref body } if body == "Insufficient credits"
        ));
    }

    #[test]
    fn callback_envelope_is_parsed() {
        let task = provider()
            .parse_callback(&json!({
                "code": 200,
                "msg": "Playground task completed successfully.",
                "data": {
                    "taskId": "kie-task-3",
                    "state": "success",
                    "resultJson": "{\"resultUrls\":[\"https://tempfile.kie.ai/b.png\"]}"
                }
            }))
            .unwrap();
        assert_eq!(task.task_id, "kie-task-3");
        assert_eq!(task.status, TaskStatus::Success);
    }

    #[test]
    fn callback_without_data_is_rejected() {
        let err = provider()
            .parse_callback(&json!({ "code": 501, "msg": "failed" }))
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn request_body_carries_model_callback_and_input() {
        let params = GenerateParams {
            media_type: MediaType::Image,
            model: "google/nano-banana-edit".into(),
            prompt: Some("add sunglasses".into()),
            scene: "image-to-image".into(),
            options: Some(json!({ "image_urls": ["https://cdn.example/in.png"] })),
            callback_url: "https://app.example/api/v1/ai/notify/kie".into(),
        };
        let body = KieProvider::build_request_body(&params);
        assert_eq!(body["model"], "google/nano-banana-edit");
        assert_eq!(body["callBackUrl"], "https://app.example/api/v1/ai/notify/kie");
        assert_eq!(body["input"]["prompt"], "add sunglasses");
        assert_eq!(body["input"]["image_urls"][0], "https://cdn.example/in.png");
    }

    #[test]
    fn kie_supports_query() {
        let provider = provider();
        assert!(provider.capability().supports_query());
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }
}
