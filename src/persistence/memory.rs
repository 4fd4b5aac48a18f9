//! Blob kept in memory. Used to exercise the persisted store without I/O.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{BackendError, SecretBackend};

#[derive(Default)]
pub struct MemorySecretBackend {
    blob: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemorySecretBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a previously saved blob
    pub fn with_blob(data: impl Into<Vec<u8>>) -> Self {
        Self {
            blob: Mutex::new(Some(data.into())),
            saves: AtomicUsize::new(0),
        }
    }

    /// The currently stored blob
    pub fn blob(&self) -> Option<Vec<u8>> {
        self.blob.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// How many saves have completed
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretBackend for MemorySecretBackend {
    async fn load(&self) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.blob())
    }

    async fn save(&self, data: &[u8]) -> Result<(), BackendError> {
        if let Ok(mut blob) = self.blob.lock() {
            *blob = Some(data.to_vec());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
