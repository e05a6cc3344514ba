//! Session storage for completed logins, with signed session cookies.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use ras_identity_core::{IdentityClaims, IdentityResult, Session, SessionManager, TokenSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid session")]
    InvalidSession,
}

/// Payload of the session cookie. Only a reference to server-side state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieClaims {
    pub sub: String,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_secret: String,
    pub ttl: Duration,
    /// Never let a session outlive the access token it was created with
    pub bind_to_token_expiry: bool,
    pub algorithm: Algorithm,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_secret: "change-me-in-production".to_string(),
            ttl: Duration::hours(1),
            bind_to_token_expiry: false,
            algorithm: Algorithm::HS256,
        }
    }
}

impl SessionConfig {
    pub fn with_cookie_secret(mut self, secret: impl Into<String>) -> Self {
        self.cookie_secret = secret.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_token_expiry_binding(mut self, enabled: bool) -> Self {
        self.bind_to_token_expiry = enabled;
        self
    }
}

pub struct SessionService {
    config: SessionConfig,
    active_sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl Default for SessionService {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionService {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            active_sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.active_sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.active_sessions.read().await.is_empty()
    }

    /// Drop expired sessions, returning how many were removed
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.active_sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        before - sessions.len()
    }

    /// Signed cookie value referencing `session`
    pub fn issue_cookie(&self, session: &Session) -> Result<String, SessionError> {
        let claims = CookieClaims {
            sub: session.claims.subject.clone(),
            sid: session.session_id.clone(),
            iat: session.created_at.timestamp(),
            exp: session.expires_at.timestamp(),
        };

        Ok(encode(
            &Header::new(self.config.algorithm),
            &claims,
            &EncodingKey::from_secret(self.config.cookie_secret.as_bytes()),
        )?)
    }

    /// Verify a cookie issued by [`issue_cookie`](Self::issue_cookie) and
    /// return the live session it refers to.
    pub async fn resolve_cookie(&self, cookie: &str) -> Result<Session, SessionError> {
        let token_data = decode::<CookieClaims>(
            cookie,
            &DecodingKey::from_secret(self.config.cookie_secret.as_bytes()),
            &Validation::new(self.config.algorithm),
        )?;
        let claims = token_data.claims;

        let session = self
            .lookup(&claims.sid)
            .await
            .ok_or(SessionError::SessionNotFound)?;

        if session.claims.subject != claims.sub {
            return Err(SessionError::InvalidSession);
        }
        Ok(session)
    }

    fn expiry_for(&self, tokens: &TokenSet) -> Duration {
        match tokens.expires_in {
            Some(expires_in) if self.config.bind_to_token_expiry => i64::try_from(expires_in)
                .ok()
                .and_then(Duration::try_seconds)
                .map_or(self.config.ttl, |token_ttl| self.config.ttl.min(token_ttl)),
            _ => self.config.ttl,
        }
    }
}

#[async_trait]
impl SessionManager for SessionService {
    async fn create(&self, claims: IdentityClaims, tokens: TokenSet) -> IdentityResult<Session> {
        let created_at = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            expires_at: created_at + self.expiry_for(&tokens),
            created_at,
            claims,
            tokens,
        };

        let mut sessions = self.active_sessions.write().await;
        sessions.insert(session.session_id.clone(), session.clone());
        debug!("Created session, {} active", sessions.len());

        Ok(session)
    }

    async fn lookup(&self, session_id: &str) -> Option<Session> {
        {
            let sessions = self.active_sessions.read().await;
            match sessions.get(session_id) {
                Some(session) if !session.is_expired() => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut sessions = self.active_sessions.write().await;
        if sessions
            .get(session_id)
            .is_some_and(|session| session.is_expired())
        {
            sessions.remove(session_id);
            debug!("Evicted expired session");
        }
        None
    }

    async fn invalidate(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.active_sessions.write().await;
        sessions.remove(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn claims() -> IdentityClaims {
        let now = Utc::now();
        let mut profile = HashMap::new();
        profile.insert("email".to_string(), serde_json::json!("test@example.com"));
        IdentityClaims {
            subject: "user-123".to_string(),
            issuer: "https://idp.example.com".to_string(),
            audience: vec!["test-client".to_string()],
            nonce: "nonce".to_string(),
            issued_at: now,
            expires_at: now + Duration::hours(1),
            profile,
        }
    }

    fn tokens(expires_in: Option<u64>) -> TokenSet {
        TokenSet {
            access_token: "access".to_string(),
            id_token: "id".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_in,
            scope: None,
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let service = SessionService::default();

        let session = service.create(claims(), tokens(None)).await.unwrap();
        assert!(Uuid::parse_str(&session.session_id).is_ok());
        assert_eq!(session.expires_at - session.created_at, Duration::hours(1));

        let found = service.lookup(&session.session_id).await.unwrap();
        assert_eq!(found.claims.email(), Some("test@example.com"));

        assert!(service.invalidate(&session.session_id).await.is_some());
        assert!(service.lookup(&session.session_id).await.is_none());
        assert!(service.invalidate(&session.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_evicted_on_lookup() {
        let service = SessionService::new(SessionConfig::default().with_ttl(Duration::zero()));

        let session = service.create(claims(), tokens(None)).await.unwrap();
        assert_eq!(service.len().await, 1);

        assert!(service.lookup(&session.session_id).await.is_none());
        assert!(service.is_empty().await);
    }

    #[tokio::test]
    async fn test_token_expiry_binding() {
        let bound = SessionService::new(SessionConfig::default().with_token_expiry_binding(true));
        let session = bound.create(claims(), tokens(Some(300))).await.unwrap();
        assert_eq!(session.expires_at - session.created_at, Duration::seconds(300));

        let session = bound.create(claims(), tokens(Some(86400))).await.unwrap();
        assert_eq!(session.expires_at - session.created_at, Duration::hours(1));

        // Lifetimes too large for a duration fall back to the configured ttl
        let session = bound
            .create(claims(), tokens(Some(10_000_000_000_000_000)))
            .await
            .unwrap();
        assert_eq!(session.expires_at - session.created_at, Duration::hours(1));
        assert!(bound.lookup(&session.session_id).await.is_some());

        let session = bound.create(claims(), tokens(Some(u64::MAX))).await.unwrap();
        assert_eq!(session.expires_at - session.created_at, Duration::hours(1));

        let unbound = SessionService::default();
        let session = unbound.create(claims(), tokens(Some(300))).await.unwrap();
        assert_eq!(session.expires_at - session.created_at, Duration::hours(1));
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let service = SessionService::new(SessionConfig::default().with_ttl(Duration::zero()));
        service.create(claims(), tokens(None)).await.unwrap();
        service.create(claims(), tokens(None)).await.unwrap();

        assert_eq!(service.sweep_expired().await, 2);
        assert!(service.is_empty().await);
    }

    #[tokio::test]
    async fn test_cookie_round_trip() {
        let service = SessionService::new(SessionConfig::default().with_cookie_secret("s3cret"));
        let session = service.create(claims(), tokens(None)).await.unwrap();

        let cookie = service.issue_cookie(&session).unwrap();
        assert!(!cookie.contains(&session.tokens.access_token));

        let resolved = service.resolve_cookie(&cookie).await.unwrap();
        assert_eq!(resolved.session_id, session.session_id);
    }

    #[tokio::test]
    async fn test_cookie_signed_with_other_secret_rejected() {
        let service = SessionService::new(SessionConfig::default().with_cookie_secret("s3cret"));
        let forger = SessionService::new(SessionConfig::default().with_cookie_secret("guess"));

        let session = service.create(claims(), tokens(None)).await.unwrap();
        let forged = forger.issue_cookie(&session).unwrap();

        assert!(matches!(
            service.resolve_cookie(&forged).await,
            Err(SessionError::JwtError(_))
        ));
    }

    #[tokio::test]
    async fn test_cookie_for_ended_session_rejected() {
        let service = SessionService::default();
        let session = service.create(claims(), tokens(None)).await.unwrap();
        let cookie = service.issue_cookie(&session).unwrap();

        service.invalidate(&session.session_id).await;
        assert!(matches!(
            service.resolve_cookie(&cookie).await,
            Err(SessionError::SessionNotFound)
        ));
    }
}
