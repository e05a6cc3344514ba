//! OpenID Connect relying party configuration types.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// How the client authenticates itself at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` in the form body
    #[default]
    ClientSecretPost,
    /// HTTP Basic authentication with `client_id:client_secret`
    ClientSecretBasic,
    /// Public client, only `client_id` is sent
    None,
}

impl ClientAuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAuthMethod::ClientSecretPost => "client_secret_post",
            ClientAuthMethod::ClientSecretBasic => "client_secret_basic",
            ClientAuthMethod::None => "none",
        }
    }
}

/// Registration of this relying party at one identity provider
#[derive(Clone, Serialize, Deserialize)]
pub struct OidcClientConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_method: ClientAuthMethod,
    /// Additional parameters to include in the authorization request
    #[serde(default)]
    pub auth_params: HashMap<String, String>,
}

impl std::fmt::Debug for OidcClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClientConfig")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("auth_method", &self.auth_method)
            .field("auth_params", &self.auth_params)
            .finish()
    }
}

impl OidcClientConfig {
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            auth_method: ClientAuthMethod::ClientSecretPost,
            auth_params: HashMap::new(),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_params.insert(key.into(), value.into());
        self
    }

    /// Reject configurations that could never complete a login.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = parse_absolute_url("issuer_url", &self.issuer_url)?;
        if issuer.query().is_some() || issuer.fragment().is_some() {
            return Err(ConfigError::InvalidUrl {
                field: "issuer_url",
                reason: "issuer must not carry a query or fragment".to_string(),
            });
        }

        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingValue("client_id"));
        }

        let redirect = parse_absolute_url("redirect_uri", &self.redirect_uri)?;
        if redirect.fragment().is_some() {
            return Err(ConfigError::InvalidUrl {
                field: "redirect_uri",
                reason: "redirect URI must not carry a fragment".to_string(),
            });
        }

        if !self.scopes.iter().any(|s| s == "openid") {
            return Err(ConfigError::MissingOpenIdScope);
        }

        match (self.auth_method, self.client_secret.as_deref()) {
            (ClientAuthMethod::None, _) => {}
            (_, Some(secret)) if !secret.is_empty() => {}
            (method, _) => return Err(ConfigError::MissingClientSecret(method.as_str())),
        }

        Ok(())
    }
}

fn parse_absolute_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingValue(field));
    }

    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            field,
            reason: format!("expected an absolute http(s) URL, got '{}'", value),
        });
    }

    Ok(url)
}

/// Longest a login attempt may stay open
pub const MAX_STATE_TTL_SECONDS: u64 = 600;

/// Largest tolerated clock difference with the identity provider
pub const MAX_CLOCK_SKEW_SECONDS: u64 = 300;

/// Engine wide settings shared by every login attempt
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub state_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
    pub metadata_ttl_seconds: u64,
    pub clock_skew_seconds: u64,
    pub fetch_userinfo: bool,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: 600, // 10 minutes
            http_timeout_seconds: 5,
            metadata_ttl_seconds: 3600,
            clock_skew_seconds: 60,
            fetch_userinfo: true,
        }
    }
}

impl OidcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_ttl(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_metadata_ttl(mut self, seconds: u64) -> Self {
        self.metadata_ttl_seconds = seconds;
        self
    }

    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    pub fn with_userinfo(mut self, enabled: bool) -> Self {
        self.fetch_userinfo = enabled;
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_ttl_seconds == 0 || self.state_ttl_seconds > MAX_STATE_TTL_SECONDS {
            return Err(ConfigError::OutOfRange("state_ttl_seconds"));
        }
        if self.http_timeout_seconds == 0 {
            return Err(ConfigError::OutOfRange("http_timeout_seconds"));
        }
        if self.clock_skew_seconds > MAX_CLOCK_SKEW_SECONDS {
            return Err(ConfigError::OutOfRange("clock_skew_seconds"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> OidcClientConfig {
        OidcClientConfig::new(
            "https://idp.example.com",
            "test-client",
            "http://localhost:3000/callback",
        )
        .with_client_secret("test-secret")
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let mut config = valid_config();
        config.client_id = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingValue("client_id"))
        ));
    }

    #[test]
    fn test_relative_redirect_rejected() {
        let mut config = valid_config();
        config.redirect_uri = "/callback".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl {
                field: "redirect_uri",
                ..
            })
        ));
    }

    #[test]
    fn test_non_http_issuer_rejected() {
        let mut config = valid_config();
        config.issuer_url = "ftp://idp.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl {
                field: "issuer_url",
                ..
            })
        ));
    }

    #[test]
    fn test_openid_scope_required() {
        let config = valid_config().with_scopes(["profile", "email"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOpenIdScope)
        ));
    }

    #[test]
    fn test_secret_required_unless_public_client() {
        let mut config = valid_config();
        config.client_secret = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingClientSecret("client_secret_post"))
        ));

        let public = config.with_auth_method(ClientAuthMethod::None);
        assert!(public.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", valid_config());
        assert!(!rendered.contains("test-secret"));
    }

    #[test]
    fn test_engine_defaults() {
        let config = OidcConfig::default();
        assert_eq!(config.state_ttl_seconds, 600);
        assert_eq!(config.clock_skew_seconds, 60);
        assert!(config.validate().is_ok());
        assert!(OidcConfig::new().with_state_ttl(0).validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        assert!(matches!(
            OidcConfig::new().with_state_ttl(u64::MAX).validate(),
            Err(ConfigError::OutOfRange("state_ttl_seconds"))
        ));
        assert!(
            OidcConfig::new()
                .with_state_ttl(MAX_STATE_TTL_SECONDS + 1)
                .validate()
                .is_err()
        );
        assert!(matches!(
            OidcConfig::new().with_clock_skew(u64::MAX).validate(),
            Err(ConfigError::OutOfRange("clock_skew_seconds"))
        ));
        assert!(
            OidcConfig::new()
                .with_clock_skew(MAX_CLOCK_SKEW_SECONDS)
                .validate()
                .is_ok()
        );
    }
}
