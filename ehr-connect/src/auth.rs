//! OAuth2 client-credentials token lifecycle for the EHR API.
//!
//! A single [`TokenManager`] owns the cached [`TokenRecord`]. Refreshes are
//! single-flight: concurrent callers that find the cache stale queue on
//! `refresh_lock`, and everyone after the first picks up the outcome of the
//! attempt they waited on (the stored record, or the same error) instead of
//! hitting the token endpoint again.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::{EhrError, Result};

/// Cached bearer token. Replaced wholesale on every refresh.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// True while `now < expires_at - buffer`.
    pub fn is_fresh(&self, buffer: Duration) -> bool {
        Utc::now() < self.expires_at - buffer
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

pub struct TokenManager {
    http_client: reqwest::Client,
    config: AuthConfig,
    record: RwLock<Option<TokenRecord>>,
    /// Holds the error of the last failed refresh attempt.
    refresh_lock: Mutex<Option<EhrError>>,
    /// Completed refresh attempts, bumped while `refresh_lock` is held.
    attempts: AtomicU64,
}

impl TokenManager {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EhrError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(config, http_client))
    }

    pub fn with_client(config: AuthConfig, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            config,
            record: RwLock::new(None),
            refresh_lock: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    /// Return a usable bearer token, requesting a new one if the cached token
    /// is missing or inside the refresh buffer.
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let mut last_failure = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.cached_token().await {
            debug!("Using token refreshed by a concurrent caller");
            return Ok(token);
        }

        // An attempt finished while we queued and it failed: share its error.
        if self.attempts.load(Ordering::Acquire) != observed {
            if let Some(err) = last_failure.as_ref() {
                debug!("Token refresh failed for a concurrent caller, sharing the error");
                return Err(err.clone());
            }
        }

        let outcome = self.request_token().await;
        self.attempts.fetch_add(1, Ordering::Release);

        match outcome {
            Ok(record) => {
                *last_failure = None;
                let token = record.access_token.clone();
                *self.record.write().await = Some(record);
                Ok(token)
            }
            Err(err) => {
                *last_failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Drop the cached token unconditionally.
    pub async fn invalidate(&self) {
        info!("Invalidating cached access token");
        *self.record.write().await = None;
    }

    /// Drop the cached token only if it is still `stale_token`. Returns whether
    /// the cache was cleared.
    pub async fn invalidate_if_current(&self, stale_token: &str) -> bool {
        let mut record = self.record.write().await;
        match record.as_ref() {
            Some(current) if current.access_token == stale_token => {
                info!("Invalidating rejected access token");
                *record = None;
                true
            }
            _ => false,
        }
    }

    /// Expiry of the cached token, if any.
    pub async fn cached_expiry(&self) -> Option<DateTime<Utc>> {
        self.record.read().await.as_ref().map(|r| r.expires_at)
    }

    async fn cached_token(&self) -> Option<String> {
        let buffer = self.config.refresh_buffer();
        self.record
            .read()
            .await
            .as_ref()
            .filter(|record| record.is_fresh(buffer))
            .map(|record| record.access_token.clone())
    }

    async fn request_token(&self) -> Result<TokenRecord> {
        info!("Requesting access token from {}", self.config.token_url);

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", self.config.grant_type.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
                (
                    "resource_security_id",
                    self.config.resource_security_id.as_str(),
                ),
                ("agency_secret", self.config.agency_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Token endpoint returned {}", status);
            return Err(EhrError::AuthenticationFailure(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let body = response.bytes().await?;
        let token_response: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            EhrError::AuthenticationFailure(format!("invalid token response: {}", e))
        })?;

        if token_response.access_token.is_empty() {
            return Err(EhrError::AuthenticationFailure(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        let expires_at = Duration::try_seconds(token_response.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                EhrError::AuthenticationFailure(format!(
                    "token endpoint returned an unusable expires_in: {}",
                    token_response.expires_in
                ))
            })?;
        info!(%expires_at, "Access token acquired");

        Ok(TokenRecord {
            access_token: token_response.access_token,
            expires_at,
        })
    }
}
