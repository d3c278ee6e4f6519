//! The provider abstraction shared by every generation backend.

use async_trait::async_trait;
use banana_core::media::{MediaType, TaskStatus};
use serde::{Deserialize, Serialize};

/// Everything a provider needs to start one generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateParams {
    pub media_type: MediaType,
    pub model: String,
    pub prompt: Option<String>,
    pub scene: String,
    /// Free-form provider options (resolution, aspect ratio, input images).
    pub options: Option<serde_json::Value>,
    /// Absolute URL the provider should call with status updates.
    pub callback_url: String,
}

impl GenerateParams {
    /// Look up a string option by key.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.as_ref()?.get(key)?.as_str()
    }
}

/// A provider's view of one task: what `generate` accepted, or what
/// `query` currently reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTask {
    /// Provider-side correlation id. Empty means the provider did not
    /// accept the task.
    pub task_id: String,
    pub status: TaskStatus,
    pub task_info: Option<serde_json::Value>,
    pub task_result: Option<serde_json::Value>,
}

/// Whether the coordinator can poll a provider for task state.
pub enum ProviderCapability<'a> {
    /// The provider answers status queries for accepted tasks.
    SupportsQuery(&'a dyn TaskQuery),
    /// The provider only reports back through the notify callback, or
    /// answers synchronously from `generate`.
    CallbackOnly,
}

impl ProviderCapability<'_> {
    pub fn supports_query(&self) -> bool {
        matches!(self, ProviderCapability::SupportsQuery(_))
    }
}

/// A generation backend.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Registry key, also the `{provider}` segment of the notify URL.
    fn name(&self) -> &str;

    fn capability(&self) -> ProviderCapability<'_>;

    /// Start (or, for synchronous backends, run) a generation.
    async fn generate(&self, params: &GenerateParams) -> Result<ProviderTask, ProviderError>;

    /// Decode a notify callback body.
    ///
    /// The default accepts the neutral shape
    /// `{ "task_id", "task_status", "task_info", "task_result" }`. Providers
    /// that post their own payload format override this.
    fn parse_callback(&self, payload: &serde_json::Value) -> Result<ProviderTask, ProviderError> {
        let callback = CallbackPayload::deserialize(payload)
            .map_err(|e| ProviderError::InvalidResponse(format!("callback body: {e}")))?;
        Ok(ProviderTask {
            task_id: callback.task_id,
            status: callback.task_status,
            task_info: callback.task_info,
            task_result: callback.task_result,
        })
    }
}

/// Provider-neutral notify callback body.
#[derive(Debug, Deserialize)]
pub struct CallbackPayload {
    pub task_id: String,
    pub task_status: TaskStatus,
    #[serde(default)]
    pub task_info: Option<serde_json::Value>,
    #[serde(default)]
    pub task_result: Option<serde_json::Value>,
}

/// Status lookup for providers that support it.
#[async_trait]
pub trait TaskQuery: Send + Sync {
    async fn query(&self, task_id: &str) -> Result<ProviderTask, ProviderError>;
}

/// Errors from provider HTTP calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The provider answered 2xx but the body was not usable.
    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    /// The provider cannot handle this kind of request.
    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

/// Ensure a response has a success status, or turn it into
/// [`ProviderError::Api`] carrying the body text.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
