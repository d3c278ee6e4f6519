use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use banana_core::pricing::ResolutionTier;
use banana_providers::PROVIDER_HTTP_TIMEOUT;

/// Query parameter carrying the callback token on notify URLs.
const CALLBACK_TOKEN_PARAM: &str = "token";

/// Slack added on top of the provider HTTP timeout before an unanswered
/// dispatch is treated as interrupted.
const STALE_MARGIN: Duration = Duration::from_secs(30);

/// When a callback-only provider is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Call the provider inside the submitting request.
    Immediate,
    /// Store the task as PENDING and call the provider when it is first
    /// queried.
    Deferred,
}

impl DispatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchMode::Immediate => "immediate",
            DispatchMode::Deferred => "deferred",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(DispatchMode::Immediate),
            "deferred" => Ok(DispatchMode::Deferred),
            other => Err(format!(
                "unknown dispatch mode '{other}', expected 'immediate' or 'deferred'"
            )),
        }
    }
}

/// Coordinator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Public base URL used to build provider callback URLs.
    pub app_url: String,
    /// Dispatch timing for callback-only providers.
    pub dispatch_mode: DispatchMode,
    /// Highest resolution tier available without a paid grant.
    pub max_ungated_tier: ResolutionTier,
    /// Shared secret providers must echo back on the notify endpoint.
    /// Embedded in every callback URL when set.
    pub callback_token: Option<String>,
    /// How long a PROCESSING task may wait for its provider call before it
    /// is failed and refunded. Must exceed [`PROVIDER_HTTP_TIMEOUT`].
    pub stale_after: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            app_url: "http://localhost:3000".into(),
            dispatch_mode: DispatchMode::Deferred,
            max_ungated_tier: ResolutionTier::High,
            callback_token: None,
            stale_after: PROVIDER_HTTP_TIMEOUT + STALE_MARGIN,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                 |
    /// |-------------------------------|-------------------------|
    /// | `APP_URL`                     | `http://localhost:3000` |
    /// | `GENERATION_DISPATCH_MODE`    | `deferred`              |
    /// | `GENERATION_MAX_UNGATED_TIER` | `2k`                    |
    /// | `PROVIDER_CALLBACK_TOKEN`     | unset (notify is open)  |
    /// | `GENERATION_STALE_AFTER_SECS` | `140`                   |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let app_url = std::env::var("APP_URL").unwrap_or(defaults.app_url);

        let dispatch_mode: DispatchMode = std::env::var("GENERATION_DISPATCH_MODE")
            .unwrap_or_else(|_| DispatchMode::Deferred.as_str().into())
            .parse()
            .expect("GENERATION_DISPATCH_MODE must be 'immediate' or 'deferred'");

        let max_ungated_tier: ResolutionTier = std::env::var("GENERATION_MAX_UNGATED_TIER")
            .unwrap_or_else(|_| ResolutionTier::High.as_str().into())
            .parse()
            .expect("GENERATION_MAX_UNGATED_TIER must be one of 1k, 2k, 4k");

        let callback_token = std::env::var("PROVIDER_CALLBACK_TOKEN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(token) = &callback_token {
            assert!(
                is_url_safe_token(token),
                "PROVIDER_CALLBACK_TOKEN may only contain ASCII letters, digits, '-', '_' and '.'"
            );
        }

        let stale_after = std::env::var("GENERATION_STALE_AFTER_SECS")
            .ok()
            .map(|v| {
                v.parse::<u64>()
                    .expect("GENERATION_STALE_AFTER_SECS must be a valid u64")
            })
            .map(Duration::from_secs)
            .unwrap_or(defaults.stale_after);
        assert!(
            stale_after > PROVIDER_HTTP_TIMEOUT,
            "GENERATION_STALE_AFTER_SECS must exceed the provider HTTP timeout ({}s)",
            PROVIDER_HTTP_TIMEOUT.as_secs()
        );

        Self {
            app_url,
            dispatch_mode,
            max_ungated_tier,
            callback_token,
            stale_after,
        }
    }

    /// Notify URL a provider should call back for `provider`, carrying the
    /// callback token as a query parameter when one is configured.
    pub fn callback_url(&self, provider: &str) -> String {
        let url = format!(
            "{}/api/v1/ai/notify/{provider}",
            self.app_url.trim_end_matches('/')
        );
        match &self.callback_token {
            Some(token) => format!("{url}?{CALLBACK_TOKEN_PARAM}={token}"),
            None => url,
        }
    }

    /// Whether `presented` matches the configured callback token. Always
    /// true when no token is configured.
    pub fn accepts_callback_token(&self, presented: Option<&str>) -> bool {
        match &self.callback_token {
            Some(expected) => presented == Some(expected.as_str()),
            None => true,
        }
    }
}

/// Tokens are embedded in URLs verbatim, so they must not need escaping.
fn is_url_safe_token(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
