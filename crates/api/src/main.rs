use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use banana_api::config::ServerConfig;
use banana_api::router::build_app_router;
use banana_api::state::AppState;
use banana_pipeline::{CoordinatorConfig, TaskCoordinator};
use banana_providers::{ProviderConfig, ProviderRegistry, PROVIDER_HTTP_TIMEOUT};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "banana_api=debug,banana_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = banana_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    banana_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    banana_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Providers ---
    let providers = ProviderRegistry::from_config(&ProviderConfig::from_env())
        .expect("Failed to build provider HTTP client");
    if providers.is_empty() {
        tracing::warn!("No generation providers configured; generate requests will be rejected");
    } else {
        tracing::info!(providers = ?providers.names(), "Generation providers registered");
    }

    // --- Coordinator ---
    let coordinator_config = CoordinatorConfig::from_env();
    tracing::info!(
        dispatch_mode = %coordinator_config.dispatch_mode,
        max_ungated_tier = coordinator_config.max_ungated_tier.as_str(),
        stale_after_secs = coordinator_config.stale_after.as_secs(),
        "Task coordinator configured",
    );
    if coordinator_config.callback_token.is_none() {
        tracing::warn!("PROVIDER_CALLBACK_TOKEN not set; notify endpoint is unauthenticated");
    }
    let coordinator = TaskCoordinator::new(pool.clone(), Arc::new(providers), coordinator_config);

    // Tasks left PROCESSING by a previous process that stopped mid-dispatch.
    match coordinator.recover_interrupted().await {
        Ok(0) => {}
        Ok(recovered) => tracing::info!(recovered, "Refunded interrupted generation tasks"),
        Err(e) => tracing::error!(error = %e, "Failed to recover interrupted generation tasks"),
    }

    // --- App state ---
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        coordinator,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    // Provider calls run on their own tasks and still hold connections while
    // they write results; closing the pool waits for them to be returned.
    // The wait covers a full provider call. Anything cut off past it is
    // refunded by `recover_interrupted` on the next start.
    let drain_timeout =
        Duration::from_secs(config.shutdown_timeout_secs).max(PROVIDER_HTTP_TIMEOUT);
    tracing::info!(
        timeout_secs = drain_timeout.as_secs(),
        "Server stopped accepting connections, draining database pool",
    );
    if tokio::time::timeout(drain_timeout, pool.close()).await.is_err() {
        tracing::warn!(
            timeout_secs = drain_timeout.as_secs(),
            "Timed out waiting for in-flight generations",
        );
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
