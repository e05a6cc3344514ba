use anyhow::{Context, Result, bail};
use ras_identity_oidc::OidcClientConfig;

const DEFAULT_SCOPES: &str = "openid profile email";

/// Configuration for the relying party demo server
#[derive(Clone)]
pub struct AppConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub session_secret: String,
    pub server_host: String,
    pub server_port: u16,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read and validate every setting through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} environment variable is required", key))
        };

        let config = Self {
            issuer: required("OIDC_ISSUER")?,
            client_id: required("CLIENT_ID")?,
            client_secret: required("CLIENT_SECRET")?,
            redirect_uri: required("REDIRECT_URI")?,
            scopes: lookup("OIDC_SCOPES")
                .unwrap_or_else(|| DEFAULT_SCOPES.to_string())
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            session_secret: required("SESSION_SECRET")?,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: lookup("SERVER_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
        };

        if config.session_secret.len() < 32 {
            bail!("SESSION_SECRET must be at least 32 characters");
        }

        config
            .client_config()
            .validate()
            .context("Invalid OpenID Connect client configuration")?;

        Ok(config)
    }

    pub fn client_config(&self) -> OidcClientConfig {
        OidcClientConfig::new(&self.issuer, &self.client_id, &self.redirect_uri)
            .with_client_secret(&self.client_secret)
            .with_scopes(self.scopes.iter().cloned())
    }

    /// Session cookies are only marked `Secure` when we are served over TLS
    pub fn secure_cookies(&self) -> bool {
        self.redirect_uri.starts_with("https://")
    }
}
