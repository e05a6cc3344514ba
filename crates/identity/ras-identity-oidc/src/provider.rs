//! Relying party facade used by the web boundary.

use crate::authorization::AuthorizationRequestBuilder;
use crate::callback::CallbackProcessor;
use crate::client::{TokenClient, build_http_client};
use crate::config::{OidcClientConfig, OidcConfig};
use crate::discovery::MetadataResolver;
use crate::error::{CallbackError, OidcResult};
use crate::id_token::IdentityTokenValidator;
use crate::state::FlowStateStore;
use crate::types::{AuthorizationRedirect, CallbackParams, ProviderMetadata};
use ras_identity_core::{IdentityClaims, Session, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One client registration at one identity provider, wired to its flow state
/// and session storage.
pub struct OidcRelyingParty {
    client: OidcClientConfig,
    resolver: Arc<MetadataResolver>,
    state_store: Arc<dyn FlowStateStore>,
    sessions: Arc<dyn SessionManager>,
    authorization: AuthorizationRequestBuilder,
    callback: CallbackProcessor,
}

impl OidcRelyingParty {
    pub fn new(
        config: OidcConfig,
        client: OidcClientConfig,
        state_store: Arc<dyn FlowStateStore>,
        sessions: Arc<dyn SessionManager>,
    ) -> OidcResult<Self> {
        config.validate()?;
        client.validate()?;

        let http_client = build_http_client(config.http_timeout())?;
        let resolver = Arc::new(MetadataResolver::new(
            http_client.clone(),
            Duration::from_secs(config.metadata_ttl_seconds),
        ));

        let authorization =
            AuthorizationRequestBuilder::new(resolver.clone(), state_store.clone())
                .with_extra_params(client.auth_params.clone());

        let callback = CallbackProcessor::new(
            client.clone(),
            resolver.clone(),
            state_store.clone(),
            TokenClient::new(http_client),
            IdentityTokenValidator::new(resolver.clone(), config.clock_skew_seconds),
            sessions.clone(),
        )
        .with_userinfo(config.fetch_userinfo);

        info!(
            "Configured relying party {} for issuer {}",
            client.client_id, client.issuer_url
        );

        Ok(Self {
            client,
            resolver,
            state_store,
            sessions,
            authorization,
            callback,
        })
    }

    pub fn client_config(&self) -> &OidcClientConfig {
        &self.client
    }

    pub fn state_store(&self) -> &Arc<dyn FlowStateStore> {
        &self.state_store
    }

    pub fn sessions(&self) -> &Arc<dyn SessionManager> {
        &self.sessions
    }

    /// Resolve provider metadata ahead of the first login
    pub async fn discover(&self) -> OidcResult<Arc<ProviderMetadata>> {
        Ok(self.resolver.resolve(&self.client.issuer_url).await?)
    }

    /// Begin a login for the configured redirect URI and scopes
    pub async fn start_login(&self) -> OidcResult<AuthorizationRedirect> {
        self.authorization
            .build(
                &self.client.issuer_url,
                &self.client.client_id,
                &self.client.redirect_uri,
                &self.client.scopes,
            )
            .await
    }

    pub async fn complete_login(&self, params: CallbackParams) -> Result<Session, CallbackError> {
        self.callback.handle(params).await
    }

    /// End a session, returning whether one existed
    pub async fn logout(&self, session_id: &str) -> bool {
        let ended = self.sessions.invalidate(session_id).await;
        if let Some(session) = &ended {
            info!("Logged out subject {}", session.claims.subject);
        }
        ended.is_some()
    }

    /// Claims of a live session
    pub async fn user_info(&self, session_id: &str) -> Option<IdentityClaims> {
        self.sessions
            .lookup(session_id)
            .await
            .map(|session| session.claims)
    }
}
