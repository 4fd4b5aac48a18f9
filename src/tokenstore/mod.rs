//! Token store: the mapping between API tokens, users and OAuth credentials.
//!
//! Three maps are kept:
//!
//! ```text
//!   names:  token name -> API token   (1:1)
//!   tokens: API token  -> user ID     (many:1)
//!   users:  user ID    -> credential  (1:1)
//! ```
//!
//! Deleting a name removes its token but never the user's credential, which
//! may be shared by other tokens of the same user. Tokens are not swept when
//! they expire; expiry is checked against the token's own claims when it is
//! presented.
//!
//! Two implementations share these semantics: [`InMemoryTokenStore`]
//! (process memory only) and [`PersistedTokenStore`] (memory, plus
//! best-effort asynchronous saves to a [`SecretBackend`]).
//!
//! [`SecretBackend`]: crate::persistence::SecretBackend

use crate::codec::{ApiTokenClaims, CodecError, TokenSigner};
use crate::credentials::OAuthCredential;
use chrono::Duration;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

mod index;
pub mod memory;
pub mod persisted;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use index::ApiTokenIndex;
pub use memory::InMemoryTokenStore;
pub use persisted::PersistedTokenStore;
pub use snapshot::TokenSnapshot;

/// Session tokens back a browser cookie and live for an hour
pub const SESSION_TOKEN_LIFETIME_SECONDS: i64 = 60 * 60;

/// Long-lived API tokens expire 100 years out, i.e. effectively never
pub const API_TOKEN_LIFETIME_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

/// Token store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("API token not found")]
    TokenNotFound,

    #[error("user ID not found: {0}")]
    UserNotFound(String),

    #[error("failed to mint token: {0}")]
    Signing(#[from] CodecError),
}

/// All operations on API tokens and user credentials.
///
/// Every method is safe to call concurrently. Mutations never block on I/O.
pub trait TokenStore: Send + Sync {
    /// Mint a long-lived API token, unique among currently stored tokens
    fn generate_api_token(&self, user_id: &str, email: &str) -> Result<String, StoreError>;

    /// Mint a short-lived session token, unique among currently stored tokens
    fn generate_session_token(&self, user_id: &str, email: &str) -> Result<String, StoreError>;

    /// Names of all stored API tokens, in no particular order
    fn api_token_names(&self) -> Vec<String>;

    fn contains_api_token(&self, name: &str) -> bool;

    /// Which user a token represents
    fn user_for_token(&self, token: &str) -> Result<String, StoreError>;

    /// Register `token` under `name` for `user_id`.
    ///
    /// This is an upsert: an existing name or token is silently overwritten.
    /// Check [`contains_api_token`](Self::contains_api_token) first if that
    /// is not wanted.
    fn store_api_token(&self, name: &str, token: &str, user_id: &str) -> Result<(), StoreError>;

    /// Remove the named token. A missing name is not an error.
    fn delete_api_token(&self, name: &str) -> Result<(), StoreError>;

    fn has_user_credentials(&self, user_id: &str) -> bool;

    /// Forget the user's credential so the next request forces a fresh login.
    /// A missing user is not an error.
    fn invalidate_user(&self, user_id: &str) -> Result<(), StoreError>;

    /// Store (or replace) the user's OAuth credential
    fn store_user(&self, user_id: &str, credential: OAuthCredential) -> Result<(), StoreError>;

    /// The user's OAuth credential.
    ///
    /// `Err(UserNotFound)` when absent. `Ok(None)` is never produced by the
    /// stores in this crate; callers treat it as a broken invariant.
    fn token_for_user(&self, user_id: &str) -> Result<Option<OAuthCredential>, StoreError>;
}

/// Mint tokens until one is not already in the store.
///
/// The random salt in the claims makes a collision astronomically unlikely,
/// but a colliding token is never returned.
pub(crate) fn generate_unique_token(
    signer: &dyn TokenSigner,
    user_id: &str,
    email: &str,
    lifetime: Duration,
    is_unique: impl Fn(&str) -> bool,
) -> Result<String, StoreError> {
    loop {
        let claims = ApiTokenClaims::issue(user_id, email, lifetime);
        let token = signer.sign_api_token(&claims)?;

        if is_unique(&token) {
            return Ok(token);
        }

        debug!(user = %user_id, "Minted token collided with a stored token, retrying");
    }
}

/// Lock a store map. Updates never panic halfway, so a poisoned map is still
/// consistent and is used as is.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
