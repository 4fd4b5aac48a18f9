//! Serialized form of the whole token store.
//!
//! The persisted layout is a single JSON object:
//!
//! ```json
//! {"names": {"<name>": "<token>"}, "tokens": {"<token>": "<user>"}, "users": {"<user>": {...}}}
//! ```

use crate::credentials::OAuthCredential;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use super::ApiTokenIndex;

/// Backing stores reject objects above roughly 1 MiB
pub const MAX_SNAPSHOT_BYTES: usize = 1024 * 1024;

/// Full state of a token store at one point in time
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    #[serde(flatten)]
    pub index: ApiTokenIndex,

    /// user ID -> OAuth credential (1:1)
    #[serde(default, deserialize_with = "nullable_map")]
    pub users: HashMap<String, OAuthCredential>,
}

impl TokenSnapshot {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize token snapshot")
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Failed to deserialize token snapshot")
    }

    pub fn token_count(&self) -> usize {
        self.index.tokens.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

/// Accept `null` where a map is expected; older writers emitted it for empty maps
pub(crate) fn nullable_map<'de, D, V>(deserializer: D) -> Result<HashMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    Ok(Option::<HashMap<String, V>>::deserialize(deserializer)?.unwrap_or_default())
}
