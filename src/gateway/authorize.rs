//! Is this request authenticated?
//!
//! ```text
//! NoToken → TokenFound → UserResolved → CredentialPresent → Fresh      → Authorized
//!                                                         ↘ Refreshing → Authorized | Denied
//! ```
//!
//! Any step that fails ends in Denied with the reason as the error. An
//! expired OAuth credential is refreshed in place; concurrent requests for
//! the same user may each refresh, and the last stored credential wins.

use crate::auth::{extract_request_token, TokenError};
use crate::codec::{ApiTokenClaims, CodecError};
use crate::oauth::OAuthError;
use crate::tokenstore::StoreError;
use axum::http::HeaderMap;
use chrono::Utc;
use tracing::{debug, error, warn};

use super::GatewayState;

/// Why a request was denied
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no token in request: {0}")]
    NoToken(TokenError),

    #[error("invalid token: {0}")]
    Malformed(CodecError),

    #[error("token has expired")]
    Expired,

    #[error("token is not registered")]
    UnknownToken,

    #[error("token is valid, but user {0} has no stored credentials")]
    NoCredential(String),

    #[error("failed to fetch credentials: {0}")]
    CredentialFetch(StoreError),

    #[error("credentials for user {0} fetched, but empty")]
    MissingCredential(String),

    #[error("failed to refresh credentials: {0}")]
    RefreshFailed(OAuthError),

    #[error("failed to store refreshed credentials: {0}")]
    StoreFailed(StoreError),
}

impl AuthError {
    /// Denials caused by the gateway's own state rather than the request
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::MissingCredential(_) | AuthError::StoreFailed(_)
        )
    }
}

/// The user a request was authorized as
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizedUser {
    pub user_id: String,

    /// Email recorded in the token's claims (may be empty)
    pub email: String,
}

/// Decide whether the request carries a token for a user with usable
/// OAuth credentials, refreshing the credentials if they have expired.
pub async fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<AuthorizedUser, AuthError> {
    let token = extract_request_token(headers, &state.token_cookie).map_err(|e| {
        debug!(error = %e, "No API token in request");
        AuthError::NoToken(e)
    })?;

    let claims: ApiTokenClaims = state.codec.verify(&token).map_err(|e| {
        debug!(error = %e, "Couldn't verify API token");
        AuthError::Malformed(e)
    })?;

    if claims.is_expired_at(Utc::now()) {
        debug!(user = %claims.sub, "API token has expired");
        return Err(AuthError::Expired);
    }

    let user_id = state.store.user_for_token(&token).map_err(|_| {
        debug!("API token not found");
        AuthError::UnknownToken
    })?;

    if !state.store.has_user_credentials(&user_id) {
        debug!(user = %user_id, "API token mapped to user, but user has no credentials");
        return Err(AuthError::NoCredential(user_id));
    }

    let credential = match state.store.token_for_user(&user_id) {
        Ok(Some(credential)) => credential,
        Ok(None) => {
            error!(user = %user_id, "Token store returned no credential and no error");
            return Err(AuthError::MissingCredential(user_id));
        }
        Err(e) => {
            debug!(user = %user_id, error = %e, "Failed to get credentials for user");
            return Err(AuthError::CredentialFetch(e));
        }
    };

    let authorized = AuthorizedUser {
        user_id,
        email: claims.email,
    };

    if !credential.is_expired() {
        return Ok(authorized);
    }

    debug!(user = %authorized.user_id, "Refreshing credentials for user");
    let refreshed = match state.oauth.refresh(&credential).await {
        Ok(refreshed) => refreshed,
        Err(e) => {
            warn!(user = %authorized.user_id, error = %e, "Failed to refresh credentials for user");
            if state.invalidate_on_refresh_failure {
                if let Err(invalidate_err) = state.store.invalidate_user(&authorized.user_id) {
                    error!(
                        user = %authorized.user_id,
                        error = %invalidate_err,
                        "Failed to invalidate user after refresh failure"
                    );
                }
            }
            return Err(AuthError::RefreshFailed(e));
        }
    };

    state
        .store
        .store_user(&authorized.user_id, refreshed)
        .map_err(|e| {
            error!(user = %authorized.user_id, error = %e, "Failed to store refreshed credentials");
            AuthError::StoreFailed(e)
        })?;

    debug!(user = %authorized.user_id, "Refreshed credentials for user");
    Ok(authorized)
}
