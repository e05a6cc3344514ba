//! OpenID Connect protocol types.

use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Query parameters of the identity provider's redirect back to us.
///
/// Every field is optional on the wire; the callback processor decides which
/// combinations are acceptable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            code: query.get("code").cloned(),
            state: query.get("state").cloned(),
            error: query.get("error").cloned(),
            error_description: query.get("error_description").cloned(),
        }
    }
}

/// Where to send the user agent to start a login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRedirect {
    pub url: String,
    pub state: String,
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// Token endpoint error body (RFC 6749 section 5.2)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

/// Userinfo endpoint response
///
/// Only `sub` is required; everything else is carried as-is so it can be
/// merged into the identity claims' profile map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(flatten)]
    pub additional_claims: HashMap<String, serde_json::Value>,
}

/// Discovery document exactly as served; validated into [`ProviderMetadata`]
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DiscoveryDocument {
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub scopes_supported: Option<Vec<String>>,
    pub code_challenge_methods_supported: Option<Vec<String>>,
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
}

/// Identity provider metadata with all required endpoints present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: Option<String>,
    pub scopes_supported: Option<Vec<String>>,
    pub code_challenge_methods_supported: Option<Vec<String>>,
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
}

impl TryFrom<DiscoveryDocument> for ProviderMetadata {
    type Error = DiscoveryError;

    fn try_from(doc: DiscoveryDocument) -> Result<Self, Self::Error> {
        fn required(value: Option<String>, field: &'static str) -> Result<String, DiscoveryError> {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or(DiscoveryError::MissingField(field))
        }

        Ok(Self {
            issuer: required(doc.issuer, "issuer")?,
            authorization_endpoint: required(
                doc.authorization_endpoint,
                "authorization_endpoint",
            )?,
            token_endpoint: required(doc.token_endpoint, "token_endpoint")?,
            jwks_uri: required(doc.jwks_uri, "jwks_uri")?,
            userinfo_endpoint: doc.userinfo_endpoint.filter(|v| !v.trim().is_empty()),
            scopes_supported: doc.scopes_supported,
            code_challenge_methods_supported: doc.code_challenge_methods_supported,
            token_endpoint_auth_methods_supported: doc.token_endpoint_auth_methods_supported,
            id_token_signing_alg_values_supported: doc.id_token_signing_alg_values_supported,
        })
    }
}

impl ProviderMetadata {
    /// `false` only when the provider explicitly advertises PKCE methods
    /// without S256. Providers that stay silent are given the benefit of the doubt.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_none_or(|methods| methods.iter().any(|m| m == "S256"))
    }
}
