use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::snapshot::nullable_map;

/// The `names` and `tokens` maps, always updated together.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiTokenIndex {
    /// name -> API token (1:1)
    #[serde(default, deserialize_with = "nullable_map")]
    pub names: HashMap<String, String>,

    /// API token -> user ID (many:1)
    #[serde(default, deserialize_with = "nullable_map")]
    pub tokens: HashMap<String, String>,
}

impl ApiTokenIndex {
    /// Upsert `name -> token -> user_id`.
    ///
    /// A token displaced from `name` is dropped, and `token` is detached from
    /// any other name holding it, so each name and token pair up 1:1.
    pub fn insert(&mut self, name: &str, token: &str, user_id: &str) {
        if let Some(previous) = self.names.insert(name.to_string(), token.to_string()) {
            if previous != token {
                self.tokens.remove(&previous);
            }
        }
        self.names.retain(|n, t| n == name || t != token);
        self.tokens.insert(token.to_string(), user_id.to_string());
    }

    /// Remove a name and its token. Returns whether the name existed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.names.remove(name) {
            Some(token) => {
                self.tokens.remove(&token);
                true
            }
            None => false,
        }
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn user_for(&self, token: &str) -> Option<&String> {
        self.tokens.get(token)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }
}
