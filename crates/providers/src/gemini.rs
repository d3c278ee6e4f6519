//! Google Gemini image generation client.
//!
//! `generateContent` answers synchronously with the finished images, so the
//! provider has nothing to poll: a task is either done when `generate`
//! returns or it failed.

use async_trait::async_trait;
use banana_core::media::{MediaType, TaskStatus};
use banana_core::pricing::RESOLUTION_OPTION_KEY;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::provider::{
    ensure_success, AiProvider, GenerateParams, ProviderCapability, ProviderError, ProviderTask,
};

pub const PROVIDER_NAME: &str = "gemini";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Option key carrying input images as `[{ "mime_type", "data" }]`, base64.
pub const IMAGE_DATA_OPTION_KEY: &str = "image_data";

/// Option key for the requested aspect ratio, e.g. `"16:9"`.
pub const ASPECT_RATIO_OPTION_KEY: &str = "aspect_ratio";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_request_body(params: &GenerateParams) -> Value {
        let mut parts = Vec::new();
        if let Some(prompt) = &params.prompt {
            parts.push(json!({ "text": prompt }));
        }
        if let Some(Value::Array(images)) = params
            .options
            .as_ref()
            .and_then(|o| o.get(IMAGE_DATA_OPTION_KEY))
        {
            for image in images {
                if let (Some(mime_type), Some(data)) = (
                    image.get("mime_type").and_then(Value::as_str),
                    image.get("data").and_then(Value::as_str),
                ) {
                    parts.push(json!({
                        "inlineData": { "mimeType": mime_type, "data": data }
                    }));
                }
            }
        }

        let mut image_config = json!({});
        if let Some(ratio) = params.option_str(ASPECT_RATIO_OPTION_KEY) {
            image_config["aspectRatio"] = json!(ratio);
        }
        if let Some(tier) = params.option_str(RESOLUTION_OPTION_KEY) {
            image_config["imageSize"] = json!(tier.to_ascii_uppercase());
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": image_config,
            },
        })
    }
}

/// Convert a `generateContent` response into a finished task.
///
/// A response without any image part is a FAILED task; the model's text (or
/// finish reason) is kept as the error message.
pub fn task_from_response(response: GenerateContentResponse) -> ProviderTask {
    let mut images = Vec::new();
    let mut texts = Vec::new();
    let mut finish_reason = None;

    for candidate in response.candidates {
        finish_reason = finish_reason.or(candidate.finish_reason);
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                images.push(json!({ "mime_type": inline.mime_type, "data": inline.data }));
            }
            if let Some(text) = part.text {
                texts.push(text);
            }
        }
    }

    let response_id = response.response_id.filter(|id| !id.is_empty());
    let mut info = json!({ "finish_reason": finish_reason });
    if let Some(usage) = response.usage_metadata {
        info["usage"] = usage;
    }

    if images.is_empty() {
        let message = if texts.is_empty() {
            format!(
                "no image returned (finish reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            )
        } else {
            texts.join("\n")
        };
        info["error_message"] = json!(message);
        return ProviderTask {
            task_id: response_id.unwrap_or_default(),
            status: TaskStatus::Failed,
            task_info: Some(info),
            task_result: None,
        };
    }

    // Finished images must never be dropped for want of an upstream id.
    let task_id = response_id.unwrap_or_else(|| format!("{PROVIDER_NAME}-{}", Uuid::new_v4()));
    let mut result = json!({ "images": images });
    if !texts.is_empty() {
        result["text"] = json!(texts.join("\n"));
    }
    ProviderTask {
        task_id,
        status: TaskStatus::Success,
        task_info: Some(info),
        task_result: Some(result),
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capability(&self) -> ProviderCapability<'_> {
        ProviderCapability::CallbackOnly
    }

    async fn generate(&self, params: &GenerateParams) -> Result<ProviderTask, ProviderError> {
        if params.media_type != MediaType::Image {
            return Err(ProviderError::Unsupported(format!(
                "gemini cannot generate {}",
                params.media_type
            )));
        }

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, params.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::build_request_body(params))
            .send()
            .await?;

        let response = ensure_success(response)
            .await?
            .json::<GenerateContentResponse>()
            .await?;

        let task = task_from_response(response);
        tracing::info!(
            task_id = %task.task_id,
            model = %params.model,
            status = %task.status,
            "Gemini generation finished",
        );
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw: Value) -> GenerateContentResponse {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn image_parts_become_success() {
        let task = task_from_response(response(json!({
            "responseId": "resp-1",
            "candidates": [{
                "finishReason": "STOP",
                "content": { "parts": [
                    { "text": "Here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "iVBORw0K" } }
                ]}
            }]
        })));

        assert_eq!(task.task_id, "resp-1");
        assert_eq!(task.status, TaskStatus::Success);
        let result = task.task_result.unwrap();
        assert_eq!(result["images"][0]["mime_type"], "image/png");
        assert_eq!(result["text"], "Here you go");
    }

    #[test]
    fn text_only_answer_is_failure() {
        let task = task_from_response(response(json!({
            "responseId": "resp-2",
            "candidates": [{
                "finishReason": "SAFETY",
                "content": { "parts": [{ "text": "I can't draw that." }] }
            }]
        })));

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.task_result.is_none());
        assert_eq!(task.task_info.unwrap()["error_message"], "I can't draw that.");
    }

    #[test]
    fn failure_without_response_id_has_empty_task_id() {
        let task = task_from_response(response(json!({ "candidates": [] })));
        assert!(task.task_id.is_empty());
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn images_without_response_id_get_generated_task_id() {
        let task = task_from_response(response(json!({
            "candidates": [{
                "finishReason": "STOP",
                "content": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": "iVBORw0K" } }
                ]}
            }]
        })));

        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.task_id.starts_with("gemini-"));
        assert!(!task.task_id.starts_with("local-"));
        assert_eq!(task.task_result.unwrap()["images"][0]["data"], "iVBORw0K");
    }

    #[test]
    fn request_body_carries_prompt_images_and_size() {
        let params = GenerateParams {
            media_type: MediaType::Image,
            model: "gemini-2.5-flash-image".into(),
            prompt: Some("make it yellow".into()),
            scene: "image-to-image".into(),
            options: Some(json!({
                "resolution": "2k",
                "aspect_ratio": "1:1",
                "image_data": [{ "mime_type": "image/jpeg", "data": "/9j/4AAQ" }]
            })),
            callback_url: String::new(),
        };
        let body = GeminiProvider::build_request_body(&params);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "make it yellow");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["generationConfig"]["imageConfig"]["imageSize"], "2K");
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "1:1");
    }

    #[tokio::test]
    async fn music_is_unsupported() {
        let provider = GeminiProvider::new(
            reqwest::Client::new(),
            "key".into(),
            DEFAULT_BASE_URL.into(),
        );
        let params = GenerateParams {
            media_type: MediaType::Music,
            model: "lyria".into(),
            prompt: None,
            scene: "text-to-music".into(),
            options: None,
            callback_url: String::new(),
        };
        let err = provider.generate(&params).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
        assert!(!provider.capability().supports_query());
    }
}
