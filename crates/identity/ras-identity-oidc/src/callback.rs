//! Completion of a login from the identity provider's redirect.

use crate::client::TokenClient;
use crate::config::OidcClientConfig;
use crate::discovery::MetadataResolver;
use crate::error::CallbackError;
use crate::id_token::IdentityTokenValidator;
use crate::state::FlowStateStore;
use crate::types::{CallbackParams, UserInfoResponse};
use ras_identity_core::{IdentityClaims, Session, SessionManager};
use std::sync::Arc;
use tracing::{debug, info, warn};

// Claims carried by dedicated IdentityClaims fields; userinfo never touches them.
const RESERVED_CLAIMS: &[&str] = &["sub", "iss", "aud", "exp", "iat", "nonce"];

pub struct CallbackProcessor {
    client: OidcClientConfig,
    resolver: Arc<MetadataResolver>,
    state_store: Arc<dyn FlowStateStore>,
    token_client: TokenClient,
    validator: IdentityTokenValidator,
    sessions: Arc<dyn SessionManager>,
    fetch_userinfo: bool,
}

impl CallbackProcessor {
    pub fn new(
        client: OidcClientConfig,
        resolver: Arc<MetadataResolver>,
        state_store: Arc<dyn FlowStateStore>,
        token_client: TokenClient,
        validator: IdentityTokenValidator,
        sessions: Arc<dyn SessionManager>,
    ) -> Self {
        Self {
            client,
            resolver,
            state_store,
            token_client,
            validator,
            sessions,
            fetch_userinfo: false,
        }
    }

    /// Supplement identity token claims from the userinfo endpoint
    pub fn with_userinfo(mut self, enabled: bool) -> Self {
        self.fetch_userinfo = enabled;
        self
    }

    /// Turn the provider's redirect into a session.
    ///
    /// The flow state is consumed before any network call, so a callback can
    /// be processed at most once whatever its outcome.
    pub async fn handle(&self, params: CallbackParams) -> Result<Session, CallbackError> {
        if let Some(error) = params.error {
            if let Some(state) = params.state.as_deref() {
                if self.state_store.consume(state).await.is_err() {
                    debug!("Denied callback carried an unknown state");
                }
            }
            warn!("Identity provider denied the login: {}", error);
            return Err(CallbackError::IdpDenied {
                error,
                description: params.error_description,
            });
        }

        let state =
            non_empty(params.state).ok_or(CallbackError::MalformedCallback("missing state"))?;
        let code =
            non_empty(params.code).ok_or(CallbackError::MalformedCallback("missing code"))?;

        let attempt = self.state_store.consume(&state).await.map_err(|e| {
            warn!("Rejected callback with unknown or replayed state");
            CallbackError::from(e)
        })?;

        let metadata = self.resolver.resolve(&self.client.issuer_url).await?;

        let tokens = self
            .token_client
            .exchange_code(&metadata, &self.client, &code, &attempt)
            .await?;

        let mut claims = self
            .validator
            .validate(
                &tokens.id_token,
                &metadata.issuer,
                &self.client.client_id,
                &attempt.nonce,
            )
            .await?;

        if self.fetch_userinfo {
            if let Some(endpoint) = metadata.userinfo_endpoint.as_deref() {
                let user_info = self
                    .token_client
                    .get_user_info(endpoint, &tokens.access_token)
                    .await?;
                merge_user_info(&mut claims, user_info);
            }
        }

        let session = self.sessions.create(claims, tokens).await?;
        info!("Login completed for subject {}", session.claims.subject);
        Ok(session)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Add userinfo claims the identity token did not carry. Returns `false` when
/// the response describes a different subject and was discarded.
pub(crate) fn merge_user_info(claims: &mut IdentityClaims, user_info: UserInfoResponse) -> bool {
    if user_info.sub != claims.subject {
        warn!(
            "Discarding userinfo for subject {} during login of {}",
            user_info.sub, claims.subject
        );
        return false;
    }

    for (name, value) in user_info.additional_claims {
        if RESERVED_CLAIMS.contains(&name.as_str()) {
            continue;
        }
        claims.profile.entry(name).or_insert(value);
    }
    true
}
