//! Token endpoint and userinfo requests.

use crate::config::{ClientAuthMethod, OidcClientConfig};
use crate::error::CallbackError;
use crate::state::FlowAttempt;
use crate::types::{ProviderMetadata, TokenErrorResponse, TokenResponse, UserInfoResponse};
use ras_identity_core::TokenSet;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info};

/// Build the HTTP client shared by every outbound call. Each request is
/// bounded by `timeout` so an unresponsive provider cannot stall a login.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}

/// Client for the provider's token and userinfo endpoints
#[derive(Clone)]
pub struct TokenClient {
    http_client: Client,
}

impl TokenClient {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Authorization codes are single use at the provider, so a failure here
    /// is final for the attempt and the request is never retried.
    pub async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        client: &OidcClientConfig,
        code: &str,
        attempt: &FlowAttempt,
    ) -> Result<TokenSet, CallbackError> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", attempt.redirect_uri.as_str()),
            ("code_verifier", attempt.code_verifier.as_str()),
        ];

        let mut request = self.http_client.post(&metadata.token_endpoint);
        match client.auth_method {
            ClientAuthMethod::ClientSecretBasic => {
                request = request.basic_auth(&client.client_id, client.client_secret.as_deref());
            }
            ClientAuthMethod::ClientSecretPost => {
                params.push(("client_id", client.client_id.as_str()));
                if let Some(secret) = client.client_secret.as_deref() {
                    params.push(("client_secret", secret));
                }
            }
            ClientAuthMethod::None => {
                params.push(("client_id", client.client_id.as_str()));
            }
        }

        let response = request.form(&params).send().await.map_err(|e| {
            error!("Token request to {} failed: {}", metadata.token_endpoint, e);
            CallbackError::TokenExchangeFailed(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallbackError::TokenExchangeFailed(e.to_string()))?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            error!("Token exchange failed: {}", reason);
            return Err(CallbackError::TokenExchangeFailed(reason));
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            CallbackError::TokenExchangeFailed(format!("invalid token response: {}", e))
        })?;

        let id_token = token_response.id_token.ok_or_else(|| {
            CallbackError::TokenExchangeFailed("token response did not include an id_token".into())
        })?;

        info!("Successfully exchanged code for tokens");
        Ok(TokenSet {
            access_token: token_response.access_token,
            id_token,
            token_type: token_response.token_type,
            refresh_token: token_response.refresh_token,
            expires_in: token_response.expires_in,
            scope: token_response.scope,
        })
    }

    /// Get user info using access token
    pub async fn get_user_info(
        &self,
        userinfo_endpoint: &str,
        access_token: &str,
    ) -> Result<UserInfoResponse, CallbackError> {
        let response = self
            .http_client
            .get(userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| CallbackError::UserInfoFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            error!("User info request failed with HTTP {}", status);
            return Err(CallbackError::UserInfoFailed(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let user_info: UserInfoResponse = response
            .json()
            .await
            .map_err(|e| CallbackError::UserInfoFailed(e.to_string()))?;

        debug!(
            "Successfully retrieved user info for subject: {}",
            user_info.sub
        );
        Ok(user_info)
    }
}
