//! Blob stored in a local file, for single-node deployments.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BackendError, SecretBackend};

pub struct FileSecretBackend {
    path: PathBuf,
}

impl FileSecretBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecretBackend for FileSecretBackend {
    async fn load(&self) -> Result<Option<Vec<u8>>, BackendError> {
        match fs::read(&self.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write: temp file, fsync, then rename over the old blob, so a
    /// crash never leaves a half-written file behind.
    async fn save(&self, data: &[u8]) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }

        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
