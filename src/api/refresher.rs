//! Token refresh over HTTP.
//!
//! `POST {base}/auth/refresh` with the current bearer token; the response
//! carries the replacement as `access_token` (or `token` on older builds).

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::error::{ApiError, RefreshFailure};
use crate::session::TokenRefresher;

pub struct HttpTokenRefresher {
    http: reqwest::Client,
    refresh_url: Url,
}

impl HttpTokenRefresher {
    pub fn new(base_url: &Url) -> Result<Self, ApiError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &Url) -> Result<Self, ApiError> {
        Ok(Self {
            http,
            refresh_url: crate::util::join_endpoint(base_url, "auth/refresh")?,
        })
    }

    pub fn refresh_url(&self) -> &Url {
        &self.refresh_url
    }
}

fn refresh_failure(status: u16, raw: &str) -> ApiError {
    let message = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|body| {
            body.get("message")
                .or_else(|| body.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("refresh endpoint returned {}", status));
    ApiError::RefreshFailed(RefreshFailure::new(Some(status), message))
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, current: Option<&str>) -> Result<String, ApiError> {
        let mut request = self
            .http
            .post(self.refresh_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body("{}");
        if let Some(token) = current {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(refresh_failure(status.as_u16(), &raw));
        }

        let body: serde_json::Value = serde_json::from_str(&raw)?;
        body.get("access_token")
            .or_else(|| body.get("token"))
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::RefreshFailed(RefreshFailure::new(
                    Some(status.as_u16()),
                    "refresh response carried no token",
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubResponse, StubServer};

    fn refresher_for(server: &StubServer) -> HttpTokenRefresher {
        HttpTokenRefresher::new(&Url::parse(&server.base_url).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_posts_current_token() {
        let server = StubServer::start(|_| StubResponse::json(200, r#"{"access_token": "t2"}"#)).await;
        let refresher = refresher_for(&server);

        assert_eq!(refresher.refresh(Some("t1")).await.unwrap(), "t2");

        let requests = server.requests();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/api/auth/refresh");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer t1"));
    }

    #[tokio::test]
    async fn test_refresh_accepts_legacy_token_field() {
        let server = StubServer::start(|_| StubResponse::json(200, r#"{"token": "legacy"}"#)).await;
        let refresher = refresher_for(&server);
        assert_eq!(refresher.refresh(None).await.unwrap(), "legacy");
        assert!(server.requests()[0].authorization.is_none());
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_auth_failure() {
        let server = StubServer::start(|_| {
            StubResponse::json(401, r#"{"error": "INVALID_TOKEN", "message": "Session revoked"}"#)
        })
        .await;
        let refresher = refresher_for(&server);

        match refresher.refresh(Some("t1")).await {
            Err(ApiError::RefreshFailed(failure)) => {
                assert!(failure.is_auth_failure());
                assert_eq!(failure.message, "Session revoked");
            }
            other => panic!("expected refresh failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_token_in_body() {
        let server = StubServer::start(|_| StubResponse::json(200, r#"{"status": "ok"}"#)).await;
        let refresher = refresher_for(&server);
        assert!(matches!(
            refresher.refresh(Some("t1")).await,
            Err(ApiError::RefreshFailed(ref f)) if !f.is_auth_failure()
        ));
    }
}
