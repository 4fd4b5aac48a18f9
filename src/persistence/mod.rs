//! Durable homes for the token store's serialized state.
//!
//! A backend holds exactly one opaque blob. It is read once at startup and
//! overwritten wholesale on every save. Backends are slow and may fail; the
//! persisted token store only ever calls them from its background worker.

use async_trait::async_trait;

pub mod file;
pub mod kube;
pub mod memory;

pub use file::FileSecretBackend;
pub use kube::KubeSecretBackend;
pub use memory::MemorySecretBackend;

/// Persistence backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request to backing store failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backing store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response from backing store: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored data is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("key {0} not found in stored object")]
    MissingKey(String),

    #[error("blob of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("backend misconfigured: {0}")]
    Config(String),
}

/// One blob, loaded at startup and overwritten on save.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// The last saved blob, or `None` if nothing has been saved yet
    async fn load(&self) -> Result<Option<Vec<u8>>, BackendError>;

    /// Replace the stored blob
    async fn save(&self, data: &[u8]) -> Result<(), BackendError>;

    /// Where the blob lives, for log lines
    fn describe(&self) -> String;
}
