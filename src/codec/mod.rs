//! Signed, claims-bearing tokens.
//!
//! API tokens and OAuth state tokens are HS256 JWTs signed with a single
//! secret that is fixed for the life of the process. Expiry travels in the
//! claims but is not enforced here: callers compare `exp` against the clock
//! themselves, so a token that parses is never confused with a malformed one.

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};


/// Lifetime of the `state` parameter round-tripped through the IdP
pub const STATE_TOKEN_LIFETIME_MINUTES: i64 = 5;

/// Size of a generated HMAC secret in bytes
const HMAC_SECRET_BYTES: usize = 32;

/// Claims carried by session and long-lived API tokens
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiTokenClaims {
    /// IdP subject of the user the token was issued to
    #[serde(default)]
    pub sub: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    /// Random salt so two tokens minted for the same user in the same
    /// second still differ
    #[serde(default)]
    pub randomizer: u64,

    /// Expiry as a unix timestamp (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl ApiTokenClaims {
    /// Build claims for `user_id` expiring `lifetime` from now, with a fresh salt
    pub fn issue(user_id: &str, email: &str, lifetime: Duration) -> Self {
        Self {
            sub: user_id.to_string(),
            email: email.to_string(),
            randomizer: rand::random(),
            exp: Some((Utc::now() + lifetime).timestamp()),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.is_some_and(|exp| now.timestamp() > exp)
    }
}

/// Claims of the OAuth `state` parameter: where to send the browser after login
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateClaims {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rd: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl StateClaims {
    pub fn issue(redirect_url: &str) -> Self {
        Self {
            rd: redirect_url.to_string(),
            exp: Some((Utc::now() + Duration::minutes(STATE_TOKEN_LIFETIME_MINUTES)).timestamp()),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.is_some_and(|exp| now.timestamp() > exp)
    }
}

/// The identity claims read out of an IdP ID token
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IdTokenClaims {
    pub sub: Option<String>,
    pub email: Option<String>,
}

/// Token codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not a well-formed token (bad segments, base64 or JSON)
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Well-formed, but not signed by our key
    #[error("token signature is invalid")]
    Signature,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Signs API token claims. Token stores mint through this seam.
pub trait TokenSigner: Send + Sync {
    fn sign_api_token(&self, claims: &ApiTokenClaims) -> Result<String, CodecError>;
}

/// HS256 codec keyed by the process-wide signing secret.
///
/// The secret is injected once at construction and never changes afterwards.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign arbitrary claims
    pub fn mint<C: Serialize>(&self, claims: &C) -> Result<String, CodecError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| CodecError::Signing(e.to_string()))
    }

    /// Check structure and signature, then return the claims.
    ///
    /// Expiry is deliberately left to the caller.
    pub fn verify<C: DeserializeOwned>(&self, token: &str) -> Result<C, CodecError> {
        jsonwebtoken::decode::<C>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => CodecError::Signature,
                _ => CodecError::Malformed(e.to_string()),
            })
    }
}

impl TokenSigner for TokenCodec {
    fn sign_api_token(&self, claims: &ApiTokenClaims) -> Result<String, CodecError> {
        self.mint(claims)
    }
}

/// Read the claims segment of a JWT without checking its signature.
///
/// Only for ID tokens received directly from the IdP's token endpoint during
/// code exchange; never for anything a browser handed us.
pub fn unverified_claims<C: DeserializeOwned>(token: &str) -> Result<C, CodecError> {
    let mut segments = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(CodecError::Malformed(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| CodecError::Malformed(format!("invalid base64 in claims: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| CodecError::Malformed(format!("invalid claims JSON: {}", e)))
}

/// Generate a fresh random signing secret (URL-safe base64 of 32 bytes)
pub fn generate_hmac_secret() -> String {
    let mut bytes = [0u8; HMAC_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}
