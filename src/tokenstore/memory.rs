//! Token store held in process memory only. Everything is lost on restart.

use crate::codec::TokenSigner;
use crate::credentials::OAuthCredential;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    generate_unique_token, lock, ApiTokenIndex, StoreError, TokenStore,
    API_TOKEN_LIFETIME_SECONDS, SESSION_TOKEN_LIFETIME_SECONDS,
};

/// In-memory [`TokenStore`].
///
/// `names` and `tokens` share one lock since they always change together;
/// `users` has its own.
pub struct InMemoryTokenStore {
    signer: Arc<dyn TokenSigner>,
    index: Mutex<ApiTokenIndex>,
    users: Mutex<HashMap<String, OAuthCredential>>,
}

impl InMemoryTokenStore {
    pub fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self {
            signer,
            index: Mutex::new(ApiTokenIndex::default()),
            users: Mutex::new(HashMap::new()),
        }
    }

    fn is_token_unique(&self, token: &str) -> bool {
        !lock(&self.index).contains_token(token)
    }

    fn generate(&self, user_id: &str, email: &str, lifetime_seconds: i64) -> Result<String, StoreError> {
        generate_unique_token(
            self.signer.as_ref(),
            user_id,
            email,
            Duration::seconds(lifetime_seconds),
            |token| self.is_token_unique(token),
        )
    }
}

impl TokenStore for InMemoryTokenStore {
    fn generate_api_token(&self, user_id: &str, email: &str) -> Result<String, StoreError> {
        self.generate(user_id, email, API_TOKEN_LIFETIME_SECONDS)
    }

    fn generate_session_token(&self, user_id: &str, email: &str) -> Result<String, StoreError> {
        self.generate(user_id, email, SESSION_TOKEN_LIFETIME_SECONDS)
    }

    fn api_token_names(&self) -> Vec<String> {
        lock(&self.index).names()
    }

    fn contains_api_token(&self, name: &str) -> bool {
        lock(&self.index).contains_name(name)
    }

    fn user_for_token(&self, token: &str) -> Result<String, StoreError> {
        lock(&self.index)
            .user_for(token)
            .cloned()
            .ok_or(StoreError::TokenNotFound)
    }

    fn store_api_token(&self, name: &str, token: &str, user_id: &str) -> Result<(), StoreError> {
        lock(&self.index).insert(name, token, user_id);
        Ok(())
    }

    fn delete_api_token(&self, name: &str) -> Result<(), StoreError> {
        lock(&self.index).remove(name);
        Ok(())
    }

    fn has_user_credentials(&self, user_id: &str) -> bool {
        lock(&self.users).contains_key(user_id)
    }

    fn invalidate_user(&self, user_id: &str) -> Result<(), StoreError> {
        lock(&self.users).remove(user_id);
        Ok(())
    }

    fn store_user(&self, user_id: &str, credential: OAuthCredential) -> Result<(), StoreError> {
        lock(&self.users).insert(user_id.to_string(), credential);
        Ok(())
    }

    fn token_for_user(&self, user_id: &str) -> Result<Option<OAuthCredential>, StoreError> {
        lock(&self.users)
            .get(user_id)
            .cloned()
            .map(Some)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }
}
