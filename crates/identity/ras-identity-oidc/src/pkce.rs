//! PKCE verifier/challenge generation and opaque random tokens.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, thread_rng};
use sha2::{Digest, Sha256};

/// The only challenge method we ever advertise. `plain` offers no protection.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

const VERIFIER_BYTES: usize = 64;
const TOKEN_BYTES: usize = 32;

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::generate()
    }
}

impl PkceChallenge {
    /// Generate a new PKCE pair. The verifier is 86 characters of the
    /// base64url alphabet, which is a subset of the unreserved set.
    pub fn generate() -> Self {
        let code_verifier = random_string(VERIFIER_BYTES);
        let code_challenge = Self::challenge_for(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
        }
    }

    pub fn code_challenge_method(&self) -> &'static str {
        CODE_CHALLENGE_METHOD
    }

    /// `base64url_nopad(sha256(verifier))`
    pub fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Opaque unguessable value for `state` and `nonce`
pub fn random_token() -> String {
    random_string(TOKEN_BYTES)
}

fn random_string(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// RFC 7636 `unreserved = ALPHA / DIGIT / "-" / "." / "_" / "~"`
#[cfg(test)]
pub(crate) fn is_unreserved(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}
