//! Provider metadata discovery and JWKS retrieval with per-issuer caching.

use crate::error::DiscoveryError;
use crate::types::{DiscoveryDocument, ProviderMetadata};
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(value: Arc<T>) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Resolves and caches discovery documents and key sets.
///
/// Fetches happen outside of any lock, so readers of still-valid entries are
/// never blocked by a refresh in progress.
pub struct MetadataResolver {
    http_client: Client,
    ttl: Duration,
    metadata: DashMap<String, CacheEntry<ProviderMetadata>>,
    jwks: DashMap<String, CacheEntry<JwkSet>>,
}

impl MetadataResolver {
    pub fn new(http_client: Client, ttl: Duration) -> Self {
        Self {
            http_client,
            ttl,
            metadata: DashMap::new(),
            jwks: DashMap::new(),
        }
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Provider metadata for `issuer_url`, from cache when fresh
    pub async fn resolve(&self, issuer_url: &str) -> Result<Arc<ProviderMetadata>, DiscoveryError> {
        let issuer = normalize_issuer(issuer_url);

        if let Some(entry) = self.metadata.get(issuer) {
            if entry.is_fresh(self.ttl) {
                return Ok(entry.value.clone());
            }
        }

        let metadata = Arc::new(self.fetch_metadata(issuer).await?);
        self.metadata
            .insert(issuer.to_string(), CacheEntry::new(metadata.clone()));

        info!("Resolved provider metadata for issuer {}", issuer);
        Ok(metadata)
    }

    /// Forget cached metadata for `issuer_url`
    pub fn invalidate(&self, issuer_url: &str) {
        self.metadata.remove(normalize_issuer(issuer_url));
    }

    /// Signing keys published at the metadata's `jwks_uri`, from cache when fresh
    pub async fn jwks(&self, metadata: &ProviderMetadata) -> Result<Arc<JwkSet>, DiscoveryError> {
        if let Some(entry) = self.jwks.get(&metadata.jwks_uri) {
            if entry.is_fresh(self.ttl) {
                return Ok(entry.value.clone());
            }
        }

        self.refresh_jwks(&metadata.jwks_uri).await
    }

    /// Fetch `jwks_uri` regardless of cache state. Used when a token names a
    /// key we have not seen, which usually means the provider rotated keys.
    pub async fn refresh_jwks(&self, jwks_uri: &str) -> Result<Arc<JwkSet>, DiscoveryError> {
        let jwks: JwkSet = self.get_json(jwks_uri).await?;
        let jwks = Arc::new(jwks);

        debug!("Fetched {} signing keys from {}", jwks.keys.len(), jwks_uri);
        self.jwks
            .insert(jwks_uri.to_string(), CacheEntry::new(jwks.clone()));

        Ok(jwks)
    }

    async fn fetch_metadata(&self, issuer: &str) -> Result<ProviderMetadata, DiscoveryError> {
        let url = format!("{}{}", issuer, WELL_KNOWN_PATH);
        let document: DiscoveryDocument = self.get_json(&url).await?;
        let metadata = ProviderMetadata::try_from(document)?;

        if normalize_issuer(&metadata.issuer) != issuer {
            warn!(
                "Discovery document at {} names issuer {}",
                url, metadata.issuer
            );
            return Err(DiscoveryError::IssuerMismatch {
                expected: issuer.to_string(),
                found: metadata.issuer,
            });
        }

        if !metadata.supports_s256() {
            return Err(DiscoveryError::PkceUnsupported);
        }

        Ok(metadata)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DiscoveryError> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!("GET {} returned {}", url, status);
            return Err(DiscoveryError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| DiscoveryError::MalformedDocument {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

fn normalize_issuer(issuer_url: &str) -> &str {
    issuer_url.trim_end_matches('/')
}
