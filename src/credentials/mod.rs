//! OAuth credentials obtained from the IdP for a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair for one user.
///
/// Owned by exactly one user in the token store and replaced as a whole on
/// every refresh, never patched field by field.
///
/// # Security
/// - Never log these values
/// - Never return them from the HTTP surface
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OAuthCredential {
    /// OAuth access token
    pub access_token: String,

    /// Usually "Bearer"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,

    /// OAuth refresh token (used to obtain new access tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC). `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuthCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| now > expiry)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
