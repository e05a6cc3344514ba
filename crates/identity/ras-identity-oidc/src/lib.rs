//! OpenID Connect relying party for the authorization code flow with PKCE.
//!
//! The crate covers the protocol side of a login: provider discovery, the
//! authorization request with `state`, `nonce` and an S256 code challenge,
//! the callback with its single-use flow state, the token exchange and full
//! verification of the identity token. Validated identities are handed to a
//! [`SessionManager`] from ras-identity-core.

mod authorization;
mod callback;
mod client;
mod config;
mod discovery;
mod error;
mod id_token;
mod pkce;
mod provider;
mod state;
mod types;

#[cfg(test)]
mod test_support;

pub use authorization::AuthorizationRequestBuilder;
pub use callback::CallbackProcessor;
pub use client::{TokenClient, build_http_client};
pub use config::{
    ClientAuthMethod, MAX_CLOCK_SKEW_SECONDS, MAX_STATE_TTL_SECONDS, OidcClientConfig, OidcConfig,
};
pub use discovery::MetadataResolver;
pub use error::{
    CallbackError, CallbackErrorKind, ConfigError, DiscoveryError, FlowStateError, OidcError,
    OidcResult, TokenValidationError, TokenValidationReason,
};
pub use id_token::IdentityTokenValidator;
pub use pkce::{CODE_CHALLENGE_METHOD, PkceChallenge, random_token};
pub use provider::OidcRelyingParty;
pub use state::{FlowAttempt, FlowStateStore, InMemoryFlowStateStore, spawn_sweeper};
pub use types::{
    AuthorizationRedirect, CallbackParams, ProviderMetadata, TokenResponse, UserInfoResponse,
};

// Re-export common types for convenience
pub use ras_identity_core::{IdentityClaims, Session, SessionManager, TokenSet};
