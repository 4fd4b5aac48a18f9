//! OAuth 2.0 / OpenID Connect client side of the login flow.
//!
//! The gateway needs three things from the IdP:
//! 1. An authorization URL to send the browser to (`/login`)
//! 2. Exchange of the returned authorization code for tokens (`/callback`)
//! 3. Refresh of an expired access token (every authorized request)
//!
//! [`OAuth2Adapter`] is the seam; [`OidcClient`] implements it against a
//! discovered provider, and tests substitute their own.

use crate::credentials::OAuthCredential;
use async_trait::async_trait;

pub mod client;
pub mod discovery;

pub use client::OidcClient;
pub use discovery::{discover, discover_with_retry, ProviderMetadata};

/// Scope that asks for a refresh token on providers that advertise it
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Scopes every login requests
pub const BASE_SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// Prefix of the scope that asks for an ID token usable by another client
pub const CROSS_CLIENT_SCOPE_PREFIX: &str = "audience:server:client_id:";

/// OAuth client errors
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("request to identity provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid identity provider response: {0}")]
    Parse(String),

    #[error("credential has no refresh token")]
    NoRefreshToken,

    #[error("issuer mismatch: expected {expected}, provider reported {actual}")]
    IssuerMismatch { expected: String, actual: String },
}

/// Extra parameters for the authorization URL
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthCodeOptions {
    /// Add `access_type=offline`, for providers that hand out refresh
    /// tokens that way instead of through the `offline_access` scope
    pub access_type_offline: bool,
}

/// Result of a code exchange
#[derive(Clone, Debug)]
pub struct TokenResponse {
    pub credential: OAuthCredential,

    /// Raw ID token, when the provider returned one
    pub id_token: Option<String>,
}

/// The OAuth operations the gateway performs against its provider
#[async_trait]
pub trait OAuth2Adapter: Send + Sync {
    /// URL to redirect the browser to, carrying `state` and `scopes`
    fn auth_code_url(&self, state: &str, scopes: &[String], options: &AuthCodeOptions) -> String;

    /// Trade an authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OAuthError>;

    /// Trade the credential's refresh token for a new credential
    async fn refresh(&self, credential: &OAuthCredential) -> Result<OAuthCredential, OAuthError>;
}

/// Scopes for a login request.
///
/// Always `openid profile email`, then `extra_scopes` (space separated),
/// then one cross-client audience scope per entry in `cross_clients`, then
/// `offline_access` when the provider accepts it as a scope.
pub fn login_scopes(extra_scopes: &str, cross_clients: &str, offline_as_scope: bool) -> Vec<String> {
    let mut scopes: Vec<String> = BASE_SCOPES.iter().map(|s| s.to_string()).collect();

    scopes.extend(extra_scopes.split_whitespace().map(str::to_string));
    scopes.extend(
        cross_clients
            .split_whitespace()
            .map(|client| format!("{}{}", CROSS_CLIENT_SCOPE_PREFIX, client)),
    );

    if offline_as_scope {
        scopes.push(OFFLINE_ACCESS_SCOPE.to_string());
    }

    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_scopes_with_offline_scope() {
        assert_eq!(
            login_scopes("", "", true),
            vec!["openid", "profile", "email", "offline_access"]
        );
    }

    #[test]
    fn test_base_scopes_without_offline_scope() {
        assert_eq!(login_scopes("", "", false), vec!["openid", "profile", "email"]);
    }

    #[test]
    fn test_extra_and_cross_client_scopes() {
        let scopes = login_scopes("groups  federated:id", "kubectl dashboard", false);
        assert_eq!(
            scopes,
            vec![
                "openid",
                "profile",
                "email",
                "groups",
                "federated:id",
                "audience:server:client_id:kubectl",
                "audience:server:client_id:dashboard",
            ]
        );
    }
}
