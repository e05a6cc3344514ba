//! Core identity records and session traits.
//!
//! These types are shared between the OpenID Connect protocol engine and the
//! session layer. The engine produces [`IdentityClaims`] and a [`TokenSet`];
//! a [`SessionManager`] turns them into a [`Session`] it owns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Validated identity of the end user, extracted from a verified identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable identifier of the user at the issuer (`sub`).
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Provider specific claims such as `name`, `email` or `picture`.
    #[serde(default)]
    pub profile: HashMap<String, serde_json::Value>,
}

impl IdentityClaims {
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.profile.get(name).and_then(|v| v.as_str())
    }

    pub fn email(&self) -> Option<&str> {
        self.claim_str("email")
    }

    pub fn name(&self) -> Option<&str> {
        self.claim_str("name")
    }

    /// Best human readable label: `name`, then `preferred_username`, then `email`,
    /// falling back to the subject.
    pub fn display_name(&self) -> &str {
        self.name()
            .or_else(|| self.claim_str("preferred_username"))
            .or_else(|| self.email())
            .unwrap_or(&self.subject)
    }
}

/// Tokens returned by the token endpoint for one completed login.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Authenticated state handed to the rest of the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub claims: IdentityClaims,
    pub tokens: TokenSet,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Owner of all sessions. Callers only ever hold the opaque `session_id`.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Materialize a new session from validated claims and the received tokens.
    async fn create(&self, claims: IdentityClaims, tokens: TokenSet) -> IdentityResult<Session>;

    /// Find a live session. Expired sessions are never returned.
    async fn lookup(&self, session_id: &str) -> Option<Session>;

    /// Remove a session, returning it if it existed.
    async fn invalidate(&self, session_id: &str) -> Option<Session>;
}
