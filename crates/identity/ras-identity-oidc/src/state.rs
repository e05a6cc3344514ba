//! Login attempt state for CSRF, replay and code interception protection.

use crate::config::MAX_STATE_TTL_SECONDS;
use crate::error::FlowStateError;
use crate::pkce::{PkceChallenge, random_token};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

/// One in-flight login, keyed by its `state`
#[derive(Clone, Serialize, Deserialize)]
pub struct FlowAttempt {
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for FlowAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowAttempt")
            .field("state", &self.state)
            .field("code_verifier", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl FlowAttempt {
    pub fn new(redirect_uri: String, ttl_seconds: u64) -> Self {
        let pkce = PkceChallenge::generate();
        let created_at = Utc::now();
        let ttl = ttl_seconds.min(MAX_STATE_TTL_SECONDS) as i64;
        let expires_at = created_at + Duration::seconds(ttl);

        Self {
            state: random_token(),
            nonce: random_token(),
            code_verifier: pkce.code_verifier,
            code_challenge: pkce.code_challenge,
            redirect_uri,
            created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Storage for in-flight login attempts.
///
/// `consume` must be atomic per state: of any number of concurrent calls with
/// the same value, at most one may succeed.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    /// Create and remember a new attempt bound to `redirect_uri`
    async fn begin(&self, redirect_uri: &str) -> FlowAttempt;

    /// Retrieve and remove an attempt by its state parameter
    async fn consume(&self, state: &str) -> Result<FlowAttempt, FlowStateError>;

    /// Drop expired attempts, returning how many were removed
    async fn sweep(&self) -> usize;
}

/// In-memory implementation of FlowStateStore
pub struct InMemoryFlowStateStore {
    attempts: Arc<RwLock<HashMap<String, FlowAttempt>>>,
    ttl_seconds: u64,
}

impl InMemoryFlowStateStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            ttl_seconds,
        }
    }

    pub async fn len(&self) -> usize {
        self.attempts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attempts.read().await.is_empty()
    }

    #[cfg(test)]
    pub(crate) async fn insert(&self, attempt: FlowAttempt) {
        let mut attempts = self.attempts.write().await;
        attempts.insert(attempt.state.clone(), attempt);
    }
}

impl Default for InMemoryFlowStateStore {
    fn default() -> Self {
        Self::new(600)
    }
}

#[async_trait]
impl FlowStateStore for InMemoryFlowStateStore {
    async fn begin(&self, redirect_uri: &str) -> FlowAttempt {
        let mut attempts = self.attempts.write().await;

        loop {
            let attempt = FlowAttempt::new(redirect_uri.to_string(), self.ttl_seconds);
            // A collision with an open attempt would let two logins share one state.
            if let Entry::Vacant(slot) = attempts.entry(attempt.state.clone()) {
                slot.insert(attempt.clone());
                debug!("Stored login attempt, {} open", attempts.len());
                return attempt;
            }
        }
    }

    async fn consume(&self, state: &str) -> Result<FlowAttempt, FlowStateError> {
        let mut attempts = self.attempts.write().await;

        let attempt = attempts
            .remove(state)
            .ok_or(FlowStateError::UnknownOrExpiredState)?;

        if attempt.is_expired() {
            return Err(FlowStateError::UnknownOrExpiredState);
        }

        Ok(attempt)
    }

    async fn sweep(&self) -> usize {
        let mut attempts = self.attempts.write().await;
        let now = Utc::now();
        let before = attempts.len();

        attempts.retain(|_, attempt| now <= attempt.expires_at);

        before - attempts.len()
    }
}

/// Periodically sweep `store` until the returned handle is aborted.
pub fn spawn_sweeper(
    store: Arc<dyn FlowStateStore>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = store.sweep().await;
            if removed > 0 {
                debug!("Swept {} expired login attempts", removed);
            }
        }
    })
}
