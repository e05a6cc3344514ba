//! OpenID Connect error types.

use ras_identity_core::IdentityError;
use thiserror::Error;

pub type OidcResult<T> = Result<T, OidcError>;

/// Startup-time configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    MissingValue(&'static str),

    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Requested scopes must include 'openid'")]
    MissingOpenIdScope,

    #[error("Client authentication method {0} requires a client secret")]
    MissingClientSecret(&'static str),

    #[error("Configuration value out of range: {0}")]
    OutOfRange(&'static str),
}

/// Identity provider metadata or keys could not be obtained
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Malformed document from {url}: {reason}")]
    MalformedDocument { url: String, reason: String },

    #[error("Discovery document is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Discovery document issuer '{found}' does not match '{expected}'")]
    IssuerMismatch { expected: String, found: String },

    #[error("Identity provider does not support S256 PKCE")]
    PkceUnsupported,
}

/// Flow state lookup failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowStateError {
    #[error("State not found or expired")]
    UnknownOrExpiredState,
}

/// Why an identity token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenValidationReason {
    Malformed,
    BadSignature,
    IssuerMismatch,
    AudienceMismatch,
    Expired,
    IssuedInFuture,
    NonceMismatch,
    KeysUnavailable,
}

impl std::fmt::Display for TokenValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenValidationReason::Malformed => "malformed",
            TokenValidationReason::BadSignature => "bad_signature",
            TokenValidationReason::IssuerMismatch => "issuer_mismatch",
            TokenValidationReason::AudienceMismatch => "audience_mismatch",
            TokenValidationReason::Expired => "expired",
            TokenValidationReason::IssuedInFuture => "issued_in_future",
            TokenValidationReason::NonceMismatch => "nonce_mismatch",
            TokenValidationReason::KeysUnavailable => "keys_unavailable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Identity token rejected ({reason}): {detail}")]
pub struct TokenValidationError {
    pub reason: TokenValidationReason,
    pub detail: String,
}

impl TokenValidationError {
    pub fn new(reason: TokenValidationReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Discriminant of [`CallbackError`], for callers that branch on the failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackErrorKind {
    IdpDenied,
    MalformedCallback,
    InvalidOrReplayedState,
    TokenExchangeFailed,
    IdentityTokenInvalid,
    Discovery,
    UserInfoFailed,
    SessionFailed,
}

/// Failure while completing a login from the identity provider's redirect
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Identity provider returned {error}: {}", .description.as_deref().unwrap_or("No description"))]
    IdpDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Malformed callback: {0}")]
    MalformedCallback(&'static str),

    #[error("Invalid or replayed state: {0}")]
    InvalidOrReplayedState(#[from] FlowStateError),

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error(transparent)]
    IdentityTokenInvalid(#[from] TokenValidationError),

    #[error("Provider metadata unavailable: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("User info request failed: {0}")]
    UserInfoFailed(String),

    #[error("Session could not be created: {0}")]
    SessionFailed(#[from] IdentityError),
}

impl CallbackError {
    pub fn kind(&self) -> CallbackErrorKind {
        match self {
            CallbackError::IdpDenied { .. } => CallbackErrorKind::IdpDenied,
            CallbackError::MalformedCallback(_) => CallbackErrorKind::MalformedCallback,
            CallbackError::InvalidOrReplayedState(_) => CallbackErrorKind::InvalidOrReplayedState,
            CallbackError::TokenExchangeFailed(_) => CallbackErrorKind::TokenExchangeFailed,
            CallbackError::IdentityTokenInvalid(_) => CallbackErrorKind::IdentityTokenInvalid,
            CallbackError::Discovery(_) => CallbackErrorKind::Discovery,
            CallbackError::UserInfoFailed(_) => CallbackErrorKind::UserInfoFailed,
            CallbackError::SessionFailed(_) => CallbackErrorKind::SessionFailed,
        }
    }

    /// Text that is safe to show the end user. Only a provider denial is
    /// echoed back; every other failure gets a generic message.
    pub fn user_message(&self) -> String {
        match self {
            CallbackError::IdpDenied { error, description } => match description {
                Some(description) => format!("Sign-in was not completed: {}", description),
                None => format!("Sign-in was not completed: {}", error),
            },
            CallbackError::MalformedCallback(_) | CallbackError::InvalidOrReplayedState(_) => {
                "Your sign-in session is no longer valid. Please retry login.".to_string()
            }
            CallbackError::Discovery(_) => {
                "The identity provider is currently unavailable. Please try again later."
                    .to_string()
            }
            _ => "Sign-in failed. Please retry login.".to_string(),
        }
    }

    /// Whether the failure lies on our side or the provider's availability
    /// rather than with the request.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            CallbackError::Discovery(_) | CallbackError::SessionFailed(_)
        )
    }
}

/// Errors surfaced while starting a login or wiring the engine
#[derive(Debug, Error)]
pub enum OidcError {
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Provider metadata unavailable: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}
