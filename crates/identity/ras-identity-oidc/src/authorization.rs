//! Authorization request construction.

use crate::discovery::MetadataResolver;
use crate::error::OidcResult;
use crate::pkce::CODE_CHALLENGE_METHOD;
use crate::state::FlowStateStore;
use crate::types::AuthorizationRedirect;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

const PROTOCOL_PARAMS: &[&str] = &[
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
];

/// Builds the URL that starts a login at the identity provider
pub struct AuthorizationRequestBuilder {
    resolver: Arc<MetadataResolver>,
    state_store: Arc<dyn FlowStateStore>,
    extra_params: HashMap<String, String>,
}

impl AuthorizationRequestBuilder {
    pub fn new(resolver: Arc<MetadataResolver>, state_store: Arc<dyn FlowStateStore>) -> Self {
        Self {
            resolver,
            state_store,
            extra_params: HashMap::new(),
        }
    }

    /// Static parameters such as `prompt` or `login_hint` added to every request.
    /// They can never replace a protocol parameter.
    pub fn with_extra_params(mut self, params: HashMap<String, String>) -> Self {
        self.extra_params = params;
        self
    }

    pub async fn build(
        &self,
        issuer_url: &str,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> OidcResult<AuthorizationRedirect> {
        let metadata = self.resolver.resolve(issuer_url).await?;
        let mut url = Url::parse(&metadata.authorization_endpoint)?;

        let attempt = self.state_store.begin(redirect_uri).await;
        let scope = scope_string(scopes);

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("scope", &scope);
            params.append_pair("state", &attempt.state);
            params.append_pair("nonce", &attempt.nonce);
            params.append_pair("code_challenge", &attempt.code_challenge);
            params.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);

            let mut extra: Vec<_> = self.extra_params.iter().collect();
            extra.sort();
            for (key, value) in extra {
                if PROTOCOL_PARAMS.contains(&key.as_str()) {
                    warn!(
                        "Ignoring authorization parameter '{}' that would override the protocol",
                        key
                    );
                    continue;
                }
                params.append_pair(key, value);
            }
        }

        debug!("Built authorization request for client {}", client_id);
        Ok(AuthorizationRedirect {
            url: url.to_string(),
            state: attempt.state,
        })
    }
}

/// Space separated scopes, `openid` first and never duplicated
fn scope_string(scopes: &[String]) -> String {
    let mut result = vec!["openid"];
    result.extend(
        scopes
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty() && *s != "openid"),
    );
    result.join(" ")
}
