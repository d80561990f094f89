//! Throttle-aware JSON client.
//!
//! The client never paginates on its own: callers pass page parameters and
//! decide when to stop. What it does handle is the provider's throttling.
//! A throttled request is retried, without a retry cap, after sleeping until
//! the advertised reset time. A request that runs into the provider's hard
//! result window returns [`ApiOutcome::LimitReached`] instead of an error.
//! Once the shared cancellation token fires, pending and new requests fail
//! with [`ApiError::Cancelled`].

use crate::error::ApiError;
use reqwest::header::{HeaderMap, ACCEPT, USER_AGENT};
use reqwest::RequestBuilder;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Below this many remaining requests the client waits for the reset
/// before handing back a successful response.
const LOW_REMAINING_THRESHOLD: u64 = 5;

/// Wait used when a throttling response carries no reset information.
const DEFAULT_BACKOFF_SECS: u64 = 60;

/// How requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    /// `Authorization: Bearer <token>` (GitHub).
    Bearer(String),
    /// HTTP basic with the token as user name and an empty password (SonarQube).
    BasicToken(String),
}

/// Connection settings for one provider.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL that endpoints are appended to.
    pub base_url: String,
    /// Full URL of the GraphQL endpoint, if the provider has one.
    pub graphql_url: Option<String>,
    pub auth: Auth,
    pub accept: Option<String>,
    /// Fixed pause before every request.
    pub request_delay: Duration,
    /// Sleep through throttling (`true`) or surface [`ApiError::RateLimited`].
    pub wait_on_rate_limit: bool,
    pub timeout: Duration,
}

impl ClientConfig {
    /// GitHub REST + GraphQL settings.
    pub fn github(api_url: &str, token: Option<String>) -> Self {
        let base_url = api_url.trim_end_matches('/').to_string();
        Self {
            graphql_url: Some(format!("{}/graphql", base_url)),
            base_url,
            auth: token
                .filter(|t| !t.is_empty())
                .map(Auth::Bearer)
                .unwrap_or(Auth::None),
            accept: Some("application/vnd.github.v3+json".to_string()),
            request_delay: Duration::ZERO,
            wait_on_rate_limit: true,
            timeout: Duration::from_secs(60),
        }
    }

    /// SonarQube Web API settings.
    pub fn sonarqube(url: &str, token: &str) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            graphql_url: None,
            auth: if token.is_empty() {
                Auth::None
            } else {
                Auth::BasicToken(token.to_string())
            },
            accept: Some("application/json".to_string()),
            request_delay: Duration::ZERO,
            wait_on_rate_limit: true,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    Data(Value),
    /// The provider refuses to page any further (e.g. GitHub's 1000-result
    /// search window).
    LimitReached,
}

/// What a raw response means to the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseClass {
    Ok,
    Throttled,
    LimitReached,
    NotFound,
    Unauthorized,
    Failed,
}

fn classify(status: u16, body: &str) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Ok,
        429 => ResponseClass::Throttled,
        403 if body.to_lowercase().contains("rate limit") => ResponseClass::Throttled,
        422 if body.contains("Only the first 1000 search results") => ResponseClass::LimitReached,
        400 if body.contains("Can return only the first") => ResponseClass::LimitReached,
        401 => ResponseClass::Unauthorized,
        403 | 404 | 410 | 451 => ResponseClass::NotFound,
        _ => ResponseClass::Failed,
    }
}

/// Rate-limit headers of one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RateHeaders {
    remaining: Option<u64>,
    /// Epoch seconds.
    reset: Option<i64>,
    retry_after: Option<u64>,
}

impl RateHeaders {
    fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };

        Self {
            remaining: number("x-ratelimit-remaining").map(|v| v.max(0) as u64),
            reset: number("x-ratelimit-reset"),
            retry_after: number("retry-after").map(|v| v.max(0) as u64),
        }
    }

    /// Time to sleep before the quota is back, one second past the reset.
    fn wait_duration(&self, now_epoch: i64) -> Duration {
        if let Some(reset) = self.reset {
            let secs = (reset - now_epoch).max(0) as u64;
            Duration::from_secs(secs + 1)
        } else if let Some(after) = self.retry_after {
            Duration::from_secs(after + 1)
        } else {
            Duration::from_secs(DEFAULT_BACKOFF_SECS)
        }
    }

    fn is_low(&self) -> bool {
        matches!(self.remaining, Some(r) if r < LOW_REMAINING_THRESHOLD)
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// JSON client with throttling and hard-limit handling.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    cancel: CancellationToken,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop issuing requests once `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Absolute URL for an endpoint relative to the base URL.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url,
            endpoint.trim_start_matches('/')
        )
    }

    /// GET `endpoint` with query `params`.
    pub async fn request(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<ApiOutcome, ApiError> {
        let url = self.url_for(endpoint);
        self.execute(&url, || self.http.get(&url).query(params))
            .await
    }

    /// POST a GraphQL query and return its `data` member.
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ApiError> {
        let url = self
            .config
            .graphql_url
            .clone()
            .ok_or_else(|| ApiError::GraphQl("provider has no GraphQL endpoint".to_string()))?;
        let payload = json!({ "query": query, "variables": variables });

        let outcome = self
            .execute(&url, || self.http.post(&url).json(&payload))
            .await?;

        let body = match outcome {
            ApiOutcome::Data(body) => body,
            ApiOutcome::LimitReached => {
                return Err(ApiError::GraphQl("result window exceeded".to_string()))
            }
        };

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(ApiError::GraphQl(Value::Array(errors.clone()).to_string()));
            }
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(USER_AGENT, concat!("repoharvest/", env!("CARGO_PKG_VERSION")));
        let builder = match &self.config.accept {
            Some(accept) => builder.header(ACCEPT, accept),
            None => builder,
        };
        match &self.config.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::BasicToken(token) => builder.basic_auth(token, Some("")),
        }
    }

    async fn pause(&self, wait: Duration) -> Result<(), ApiError> {
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
        }
    }

    /// Send, sleeping through throttling until a definitive answer arrives.
    async fn execute<F>(&self, url: &str, build: F) -> Result<ApiOutcome, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            if !self.config.request_delay.is_zero() {
                self.pause(self.config.request_delay).await?;
            }

            debug!(url, "API request");
            let response = tokio::select! {
                response = self.authorize(build()).send() => response?,
                _ = self.cancel.cancelled() => return Err(ApiError::Cancelled),
            };
            let status = response.status().as_u16();
            let rate = RateHeaders::from_headers(response.headers());
            let body = response.text().await?;

            match classify(status, &body) {
                ResponseClass::Ok => {
                    if rate.is_low() {
                        let wait = rate.wait_duration(now_epoch());
                        warn!(
                            remaining = ?rate.remaining,
                            wait_secs = wait.as_secs(),
                            "Low rate limit, waiting for reset"
                        );
                        self.pause(wait).await?;
                    }
                    let value = if body.trim().is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&body)?
                    };
                    return Ok(ApiOutcome::Data(value));
                }
                ResponseClass::Throttled => {
                    let wait = rate.wait_duration(now_epoch());
                    if !self.config.wait_on_rate_limit {
                        return Err(ApiError::RateLimited {
                            wait_secs: wait.as_secs(),
                        });
                    }
                    warn!(url, wait_secs = wait.as_secs(), "Rate limit exceeded, waiting");
                    self.pause(wait).await?;
                }
                ResponseClass::LimitReached => {
                    warn!(url, "Provider result limit reached");
                    return Ok(ApiOutcome::LimitReached);
                }
                ResponseClass::NotFound => return Err(ApiError::NotFound(url.to_string())),
                ResponseClass::Unauthorized => return Err(ApiError::Unauthorized(body)),
                ResponseClass::Failed => return Err(ApiError::Server { status, body }),
            }
        }
    }
}
