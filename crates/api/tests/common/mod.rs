#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use banana_api::auth::jwt::{generate_access_token, JwtConfig};
use banana_api::config::ServerConfig;
use banana_api::router::build_app_router;
use banana_api::state::AppState;
use banana_core::media::TaskStatus;
use banana_pipeline::{CoordinatorConfig, TaskCoordinator};
use banana_providers::{
    AiProvider, GenerateParams, ProviderCapability, ProviderError, ProviderRegistry, ProviderTask,
};
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

/// Name the stub provider is registered under.
pub const STUB_PROVIDER: &str = "stub";

/// Callback-only provider that accepts every request and answers later
/// through the notify endpoint. Task ids are `stub-task-<n>`.
#[derive(Default)]
pub struct StubProvider {
    accepted: AtomicUsize,
    callback_urls: Mutex<Vec<String>>,
}

impl StubProvider {
    /// Callback URL handed over on the most recent `generate`.
    pub fn last_callback_url(&self) -> Option<String> {
        self.callback_urls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AiProvider for StubProvider {
    fn name(&self) -> &str {
        STUB_PROVIDER
    }

    fn capability(&self) -> ProviderCapability<'_> {
        ProviderCapability::CallbackOnly
    }

    async fn generate(&self, params: &GenerateParams) -> Result<ProviderTask, ProviderError> {
        self.callback_urls
            .lock()
            .unwrap()
            .push(params.callback_url.clone());
        let n = self.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderTask {
            task_id: format!("stub-task-{n}"),
            status: TaskStatus::Processing,
            task_info: None,
            task_result: None,
        })
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "banana-integration-test-secret".to_string(),
            access_token_expiry_mins: 60,
        },
    }
}

/// Build the full application router against `pool` with the stub provider
/// registered, deferred dispatch and an open notify endpoint.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_app_with(pool, CoordinatorConfig::default()).0
}

/// Same as [`build_test_app`] with a caller-supplied coordinator config.
/// Also returns the registered stub so tests can inspect what it was sent.
pub fn build_test_app_with(
    pool: PgPool,
    coordinator_config: CoordinatorConfig,
) -> (Router, Arc<StubProvider>) {
    let config = test_config();
    let stub = Arc::new(StubProvider::default());
    let registry = ProviderRegistry::new().with_provider(stub.clone());
    let coordinator = TaskCoordinator::new(pool.clone(), Arc::new(registry), coordinator_config);

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        coordinator,
    };

    (build_app_router(state, &config), stub)
}

/// Mint an access token signed with the [`test_config`] secret.
pub fn token_for(user_id: i64, role: &str) -> String {
    generate_access_token(user_id, role, &test_config().jwt).unwrap()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn get_auth(app: &Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json_auth(
    app: &Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
