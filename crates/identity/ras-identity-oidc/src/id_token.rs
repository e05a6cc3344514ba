//! Identity token verification against the provider's published keys.

use crate::config::MAX_CLOCK_SKEW_SECONDS;
use crate::discovery::MetadataResolver;
use crate::error::{TokenValidationError, TokenValidationReason};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use ras_identity_core::IdentityClaims;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const ASYMMETRIC_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    iss: Option<String>,
    sub: Option<String>,
    aud: Option<Audience>,
    exp: Option<i64>,
    iat: Option<i64>,
    nonce: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// Verifies identity tokens and turns them into [`IdentityClaims`]
pub struct IdentityTokenValidator {
    resolver: Arc<MetadataResolver>,
    leeway_seconds: i64,
}

impl IdentityTokenValidator {
    pub fn new(resolver: Arc<MetadataResolver>, leeway_seconds: u64) -> Self {
        Self {
            resolver,
            leeway_seconds: leeway_seconds.min(MAX_CLOCK_SKEW_SECONDS) as i64,
        }
    }

    /// Check signature, issuer, audience, lifetime and nonce of `id_token`,
    /// stopping at the first failure.
    pub async fn validate(
        &self,
        id_token: &str,
        expected_issuer: &str,
        expected_audience: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, TokenValidationError> {
        let result = self
            .validate_inner(id_token, expected_issuer, expected_audience, expected_nonce)
            .await;

        match &result {
            Ok(claims) => debug!("Identity token verified for subject {}", claims.subject),
            Err(e) => warn!("Identity token rejected: {}", e),
        }
        result
    }

    async fn validate_inner(
        &self,
        id_token: &str,
        expected_issuer: &str,
        expected_audience: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, TokenValidationError> {
        if id_token.split('.').count() != 3 {
            return Err(TokenValidationError::new(
                TokenValidationReason::Malformed,
                "token does not have three segments",
            ));
        }

        let header = decode_header(id_token).map_err(|e| {
            TokenValidationError::new(
                TokenValidationReason::Malformed,
                format!("undecodable header: {}", e),
            )
        })?;

        if !ASYMMETRIC_ALGORITHMS.contains(&header.alg) {
            return Err(TokenValidationError::new(
                TokenValidationReason::BadSignature,
                format!("algorithm {:?} is not accepted", header.alg),
            ));
        }

        let key = self
            .decoding_key(expected_issuer, header.kid.as_deref())
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let raw = decode::<RawClaims>(id_token, &key, &validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_) => TokenValidationReason::Malformed,
                    _ => TokenValidationReason::BadSignature,
                };
                TokenValidationError::new(reason, e.to_string())
            })?
            .claims;

        self.check_claims(raw, expected_issuer, expected_audience, expected_nonce)
    }

    /// Key named by `kid`. A miss refreshes the key set once, since providers
    /// publish new keys before signing with them.
    async fn decoding_key(
        &self,
        issuer: &str,
        kid: Option<&str>,
    ) -> Result<DecodingKey, TokenValidationError> {
        let keys_unavailable = |e: crate::error::DiscoveryError| {
            TokenValidationError::new(TokenValidationReason::KeysUnavailable, e.to_string())
        };

        let metadata = self.resolver.resolve(issuer).await.map_err(keys_unavailable)?;

        let jwks = self.resolver.jwks(&metadata).await.map_err(keys_unavailable)?;
        if let Some(jwk) = select_key(&jwks, kid) {
            return jwk_to_key(jwk);
        }

        debug!("No signing key for kid {:?}, refreshing key set", kid);
        let jwks = self
            .resolver
            .refresh_jwks(&metadata.jwks_uri)
            .await
            .map_err(keys_unavailable)?;

        match select_key(&jwks, kid) {
            Some(jwk) => jwk_to_key(jwk),
            None => Err(TokenValidationError::new(
                TokenValidationReason::BadSignature,
                match kid {
                    Some(kid) => format!("no signing key with kid '{}'", kid),
                    None => "token has no kid and the key set is ambiguous".to_string(),
                },
            )),
        }
    }

    fn check_claims(
        &self,
        raw: RawClaims,
        expected_issuer: &str,
        expected_audience: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, TokenValidationError> {
        let missing = |claim: &str| {
            TokenValidationError::new(
                TokenValidationReason::Malformed,
                format!("missing required claim '{}'", claim),
            )
        };

        let subject = raw.sub.filter(|s| !s.is_empty()).ok_or_else(|| missing("sub"))?;
        let exp = raw.exp.ok_or_else(|| missing("exp"))?;
        let iat = raw.iat.ok_or_else(|| missing("iat"))?;

        let issuer = raw.iss.unwrap_or_default();
        if issuer != expected_issuer {
            return Err(TokenValidationError::new(
                TokenValidationReason::IssuerMismatch,
                format!("expected '{}', found '{}'", expected_issuer, issuer),
            ));
        }

        let audience = raw.aud.map(Audience::into_vec).unwrap_or_default();
        if !audience.iter().any(|aud| aud == expected_audience) {
            return Err(TokenValidationError::new(
                TokenValidationReason::AudienceMismatch,
                format!("'{}' is not among {:?}", expected_audience, audience),
            ));
        }

        let azp = raw.extra.get("azp").and_then(|v| v.as_str());
        if audience.len() > 1 {
            if let Some(azp) = azp.filter(|azp| *azp != expected_audience) {
                return Err(TokenValidationError::new(
                    TokenValidationReason::AudienceMismatch,
                    format!("authorized party '{}' is not '{}'", azp, expected_audience),
                ));
            }
        }

        let now = Utc::now().timestamp();
        if exp <= now - self.leeway_seconds {
            return Err(TokenValidationError::new(
                TokenValidationReason::Expired,
                format!("expired at {}", exp),
            ));
        }
        if iat > now + self.leeway_seconds {
            return Err(TokenValidationError::new(
                TokenValidationReason::IssuedInFuture,
                format!("issued at {}", iat),
            ));
        }

        let nonce = raw.nonce.unwrap_or_default();
        if nonce != expected_nonce {
            return Err(TokenValidationError::new(
                TokenValidationReason::NonceMismatch,
                "nonce does not match the login attempt",
            ));
        }

        Ok(IdentityClaims {
            subject,
            issuer,
            audience,
            nonce,
            issued_at: timestamp(iat, "iat")?,
            expires_at: timestamp(exp, "exp")?,
            profile: raw.extra,
        })
    }
}

fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

fn jwk_to_key(jwk: &Jwk) -> Result<DecodingKey, TokenValidationError> {
    DecodingKey::from_jwk(jwk).map_err(|e| {
        TokenValidationError::new(
            TokenValidationReason::BadSignature,
            format!("unusable signing key: {}", e),
        )
    })
}

fn timestamp(secs: i64, claim: &str) -> Result<DateTime<Utc>, TokenValidationError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        TokenValidationError::new(
            TokenValidationReason::Malformed,
            format!("claim '{}' is out of range", claim),
        )
    })
}
