//! Bearer session management.
//!
//! `SessionManager` is the single owner of the process-wide bearer token and
//! of the refresh protocol:
//! - gate: single-flight refresh with an ordered waiter queue
//! - token_store: durable storage for the token
//!
//! Every token mutation goes through this type, so the at-most-one-refresh
//! invariant holds regardless of how many requests fail at once.

pub mod gate;
pub mod token_store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{ApiError, RefreshFailure};
use gate::{Acquire, RefreshGate};
use token_store::TokenStore;

pub use gate::{PendingRequestQueue, RefreshOutcome};
pub use token_store::{FileTokenStore, MemoryTokenStore};

/// Default bound on a single refresh call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Default proactive refresh window before a JWT expires.
pub const DEFAULT_REFRESH_LEEWAY: Duration = Duration::from_secs(60);

/// Exchanges the current session for a new bearer token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, current: Option<&str>) -> Result<String, ApiError>;
}

pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    token: RwLock<Option<String>>,
    gate: RefreshGate,
    refresh_timeout: Duration,
    refresh_leeway: Duration,
    refresh_count: AtomicU64,
    /// Bumped on every login, logout and clear; written under the `token` lock.
    epoch: AtomicU64,
}

impl SessionManager {
    /// Build a session, reading any persisted token from `store`.
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        let token = match store.load() {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Session: failed to read persisted token: {}", e);
                None
            }
        };

        Self {
            store,
            refresher,
            token: RwLock::new(token),
            gate: RefreshGate::new(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            refresh_leeway: DEFAULT_REFRESH_LEEWAY,
            refresh_count: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = leeway;
        self
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Number of refresh calls actually issued.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Acquire)
    }

    pub fn is_refreshing(&self) -> bool {
        self.gate.is_refreshing()
    }

    /// Waiters currently parked behind an in-flight refresh.
    pub fn pending_waiters(&self) -> usize {
        self.gate.pending()
    }

    /// Start a session with a token obtained from login.
    pub fn login(&self, token: &str) -> Result<(), ApiError> {
        let mut slot = self.token.write();
        self.store.save(token)?;
        *slot = Some(token.to_string());
        self.epoch.fetch_add(1, Ordering::AcqRel);
        log::info!("Session: signed in");
        Ok(())
    }

    /// End the session and forget the persisted token.
    ///
    /// A refresh still in flight is discarded when it lands.
    pub fn logout(&self) -> Result<(), ApiError> {
        let mut slot = self.token.write();
        *slot = None;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.store.clear()?;
        log::info!("Session: signed out");
        Ok(())
    }

    /// Current token, refreshed first when it is a JWT inside the leeway window.
    ///
    /// Returns `Ok(None)` when there is no session; anonymous requests still go out.
    pub async fn valid_token(&self) -> Result<Option<String>, ApiError> {
        let Some(token) = self.token() else {
            return Ok(None);
        };
        if !is_token_expiring(&token, self.refresh_leeway) {
            return Ok(Some(token));
        }
        log::debug!("Session: token inside refresh window, refreshing proactively");
        match self.refresh_after_rejection(Some(&token)).await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(ApiError::RefreshFailed(failure))
                if !failure.is_auth_failure()
                    && token_expiry(&token).is_some_and(|expiry| expiry > Utc::now()) =>
            {
                // Still accepted by the server; a later 401 retries the refresh.
                log::warn!("Session: proactive refresh failed, using current token: {}", failure);
                Ok(self.token())
            }
            Err(e) => Err(e),
        }
    }

    /// Run (or join) the single-flight refresh and return the new token.
    pub async fn refresh_token(&self) -> Result<String, ApiError> {
        self.refresh_after_rejection(None).await
    }

    /// Refresh because the server rejected `rejected`.
    ///
    /// If the session already holds a different token, a refresh that settled
    /// while this request was in flight made the rejection stale, and that
    /// token is returned without issuing another refresh.
    pub async fn refresh_after_rejection(&self, rejected: Option<&str>) -> Result<String, ApiError> {
        let fresh = || {
            let rejected = rejected?;
            self.token().filter(|current| current != rejected)
        };

        let lease = match self.gate.acquire_or_wait(fresh) {
            Acquire::Fresh(token) => return Ok(token),
            Acquire::Waiter(rx) => {
                return match rx.await {
                    Ok(outcome) => outcome.map_err(ApiError::RefreshFailed),
                    Err(_) => Err(ApiError::RefreshFailed(RefreshFailure::new(
                        None,
                        "refresh leader went away",
                    ))),
                };
            }
            Acquire::Leader(lease) => lease,
        };

        self.refresh_count.fetch_add(1, Ordering::AcqRel);
        log::info!("Session: refreshing bearer token");

        let (current, epoch) = {
            let slot = self.token.read();
            (slot.clone(), self.epoch.load(Ordering::Acquire))
        };
        let result = match tokio::time::timeout(
            self.refresh_timeout,
            self.refresher.refresh(current.as_deref()),
        )
        .await
        {
            Ok(Ok(token)) => self.store_refreshed(&token, epoch).map(|()| token),
            Ok(Err(e)) => Err(RefreshFailure::from(&e)),
            Err(_) => Err(RefreshFailure::from(&ApiError::Timeout(self.refresh_timeout))),
        };

        if let Err(failure) = &result {
            if failure.is_auth_failure() {
                // Unrecoverable: the refresh endpoint rejected the session itself.
                self.clear_session();
            }
        }

        // Token is in place before any waiter wakes.
        lease.settle(result).map_err(ApiError::RefreshFailed)
    }

    /// Drop the in-memory token and the persisted copy, logging storage errors.
    pub fn clear_session(&self) {
        let mut slot = self.token.write();
        *slot = None;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.store.clear() {
            log::warn!("Session: failed to clear persisted token: {}", e);
        }
    }

    /// Install a refreshed token unless the session changed since `epoch`.
    fn store_refreshed(&self, token: &str, epoch: u64) -> Result<(), RefreshFailure> {
        let mut slot = self.token.write();
        if self.epoch.load(Ordering::Acquire) != epoch {
            log::info!("Session: discarding refreshed token, session ended during refresh");
            return Err(RefreshFailure::new(None, "session ended during token refresh"));
        }
        *slot = Some(token.to_string());
        if let Err(e) = self.store.save(token) {
            // The in-memory session stays valid; only restart survival is lost.
            log::warn!("Session: failed to persist refreshed token: {}", e);
        }
        Ok(())
    }
}

/// Expiry encoded in a JWT `exp` claim, if the token is a decodable JWT.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// True when `token` is a JWT expiring within `leeway`. Opaque tokens never expire here.
pub fn is_token_expiring(token: &str, leeway: Duration) -> bool {
    match token_expiry(token) {
        None => false,
        Some(expiry) => {
            let leeway = chrono::Duration::from_std(leeway).unwrap_or(chrono::Duration::zero());
            expiry <= Utc::now() + leeway
        }
    }
}
