//! Signed, self-contained session credentials for the frontend.
//!
//! Sessions are never stored server-side; verification is purely by
//! signature and expiry.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account identity (case-normalized email).
    pub sub: String,
    /// Email as resolved from the provider profile.
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session token")]
    Verification(#[source] jsonwebtoken::errors::Error),
}

/// HS256 issuer/verifier over the configured signing secret.
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
}

impl SessionIssuer {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    /// Mint a session token expiring `ttl_secs` after `now`.
    pub fn issue(&self, identity: &str, email: &str, now: i64) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: identity.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(SessionError::Verification)
    }

    /// Verify signature, structure, and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(SessionError::Verification)
    }
}
