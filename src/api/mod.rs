//! HTTP client for the dashboard API.
//!
//! JSON in and out, bearer auth from the [`SessionManager`], retry with
//! backoff for transient failures, and the 401 refresh-and-replay path.
//!
//! Modules:
//! - dashboard: typed dashboard endpoints and the `DashboardSource` trait
//! - refresher: `POST /auth/refresh` token refresher

pub mod dashboard;
pub mod refresher;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::ApiError;
use crate::session::SessionManager;
use crate::types::{ClientConfig, LoginRequest, LoginResponse, RetryPolicy};

pub use dashboard::DashboardSource;
pub use refresher::HttpTokenRefresher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: StatusCode) -> RetryDecision {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => RetryDecision::Retryable,
        s if s.is_server_error() => RetryDecision::Retryable,
        _ => RetryDecision::NonRetryable,
    }
}

fn retry_delay(attempt: u32, policy: &RetryPolicy, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    Duration::from_millis(base.saturating_add(rand::random_range(0..150u64)))
}

/// Send `request`, retrying 408/429/5xx responses and connect/timeout errors.
///
/// Requests whose body cannot be cloned are sent once.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, ApiError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(ApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if retry_decision_for_status(status) == RetryDecision::Retryable && attempt < attempts {
                    let delay = retry_delay(attempt, policy, response.headers().get(RETRY_AFTER));
                    log::warn!(
                        "api retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "api retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ApiError::Http(err));
            }
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// The backend answers `{"error": CODE, "message": text, "status": n}`; older
/// routes answer `{"error": text}`.
fn error_message(status: StatusCode, body: Option<&serde_json::Value>, raw: &str) -> String {
    let from_body = body.and_then(|b| {
        b.get("message")
            .and_then(|m| m.as_str())
            .or_else(|| b.get("error").and_then(|e| e.as_str()))
            .map(str::to_string)
    });
    from_body
        .or_else(|| (!raw.trim().is_empty() && body.is_none()).then(|| raw.trim().to_string()))
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()))
}

/// Convert a non-2xx response into an `ApiError`, keeping the parsed body.
pub async fn error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let raw = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<serde_json::Value>(&raw).ok();
    let message = error_message(status, body.as_ref(), &raw);

    if status == StatusCode::UNAUTHORIZED {
        ApiError::Unauthorized { message }
    } else {
        ApiError::Status {
            status: status.as_u16(),
            message,
            body,
        }
    }
}

/// Whether a request carries the session token and takes part in refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Session,
    Anonymous,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionManager>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, session: Arc<SessionManager>) -> Result<Self, ApiError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            session,
            retry: RetryPolicy::default(),
        })
    }

    /// Client with the request timeout and retry policy from `config`.
    pub fn from_config(config: &ClientConfig, session: Arc<SessionManager>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| ApiError::Config(format!("apiBaseUrl '{}': {}", config.api_base_url, e)))?;

        Ok(Self {
            http,
            base_url,
            session,
            retry: config.retry.clone(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(crate::util::join_endpoint(&self.base_url, path)?)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        self.request_json(Method::GET, url, None, Auth::Session).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let body = serde_json::to_value(body)?;
        self.request_json(Method::POST, url, Some(body), Auth::Session).await
    }

    /// Send a JSON request and decode a 2xx body.
    ///
    /// With `Auth::Session`, a 401 runs the session's single-flight refresh
    /// and replays this request once with the new token. A 401 on the replay
    /// ends the session.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        auth: Auth,
    ) -> Result<T, ApiError> {
        let token = match auth {
            Auth::Session => self.session.valid_token().await?,
            Auth::Anonymous => None,
        };

        let mut response = self.execute(&method, &url, body.as_ref(), token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED && auth == Auth::Session && token.is_some() {
            log::info!("ApiClient: 401 from {}, refreshing session", url.path());
            let fresh = self.session.refresh_after_rejection(token.as_deref()).await?;
            response = self.execute(&method, &url, body.as_ref(), Some(&fresh)).await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                log::warn!("ApiClient: {} rejected the refreshed token, ending session", url.path());
                self.session.clear_session();
            }
        }

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let raw = response.text().await?;
        if raw.trim().is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_str(&raw)?)
    }

    async fn execute(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        send_with_retry(request, &self.retry).await
    }

    /// `POST /auth/login`; stores the returned token as the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let url = self.endpoint("auth/login")?;
        let body = serde_json::to_value(LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let response: LoginResponse = self
            .request_json(Method::POST, url, Some(body), Auth::Anonymous)
            .await?;
        self.session.login(&response.token)?;
        Ok(response)
    }

    /// `POST /auth/logout`. The local session is cleared even if the server call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = self.endpoint("auth/logout")?;
        let remote = self
            .request_json::<serde_json::Value>(Method::POST, url, None, Auth::Session)
            .await;
        self.session.logout()?;
        if let Err(e) = &remote {
            log::warn!("ApiClient: server logout failed: {}", e);
        }
        remote.map(|_| ())
    }
}
