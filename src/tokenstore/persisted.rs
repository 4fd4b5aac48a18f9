//! Token store that mirrors its state into a [`SecretBackend`].
//!
//! All reads and writes are served from memory. After each mutation a write
//! request is queued for a background worker, which serializes the whole
//! store and hands the blob to the backend. The queue holds at most one
//! request: a mutation that finds a request already pending drops its own,
//! since the pending write will serialize the latest state anyway. Bursts of
//! mutations therefore collapse into a few saves, and request handlers never
//! wait on backend I/O.
//!
//! Saves are best effort. A failed save is logged and the in-memory state
//! stays authoritative until the next successful one.

use crate::codec::TokenSigner;
use crate::credentials::OAuthCredential;
use crate::persistence::{BackendError, SecretBackend};
use chrono::Duration;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::snapshot::MAX_SNAPSHOT_BYTES;
use super::{
    generate_unique_token, lock, StoreError, TokenSnapshot, TokenStore,
    API_TOKEN_LIFETIME_SECONDS, SESSION_TOKEN_LIFETIME_SECONDS,
};

pub struct PersistedTokenStore {
    signer: Arc<dyn TokenSigner>,
    state: Arc<Mutex<TokenSnapshot>>,
    write_tx: mpsc::Sender<()>,
    stop_tx: mpsc::Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistedTokenStore {
    /// Load whatever the backend holds and start the save worker.
    ///
    /// A blob that can't be read or parsed is logged and the store starts
    /// empty; users then simply log in again.
    pub async fn open(signer: Arc<dyn TokenSigner>, backend: Arc<dyn SecretBackend>) -> Self {
        let snapshot = match backend.load().await {
            Ok(Some(data)) => match TokenSnapshot::from_json(&data) {
                Ok(snapshot) => {
                    info!(
                        tokens = snapshot.token_count(),
                        users = snapshot.user_count(),
                        "Loaded token state from {}",
                        backend.describe()
                    );
                    snapshot
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable token state in {}", backend.describe());
                    TokenSnapshot::default()
                }
            },
            Ok(None) => {
                info!("No token state in {}, starting empty", backend.describe());
                TokenSnapshot::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load token state from {}, starting empty", backend.describe());
                TokenSnapshot::default()
            }
        };

        let state = Arc::new(Mutex::new(snapshot));
        let (write_tx, write_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let worker = tokio::spawn(run_save_worker(state.clone(), backend, write_rx, stop_rx));

        Self {
            signer,
            state,
            write_tx,
            stop_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Finish any pending save, then stop the worker. Mutations after this
    /// are kept in memory only.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.try_send(());

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Token store save worker failed");
            }
        }
    }

    /// Copy of the current in-memory state
    pub fn snapshot(&self) -> TokenSnapshot {
        lock(&self.state).clone()
    }

    /// Queue a save unless one is already pending
    fn notify_to_write(&self) {
        match self.write_tx.try_send(()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(())) => debug!("Token state save already pending"),
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("Token store save worker stopped, change kept in memory only")
            }
        }
    }

    fn generate(&self, user_id: &str, email: &str, lifetime_seconds: i64) -> Result<String, StoreError> {
        generate_unique_token(
            self.signer.as_ref(),
            user_id,
            email,
            Duration::seconds(lifetime_seconds),
            |token| !lock(&self.state).index.contains_token(token),
        )
    }
}

async fn run_save_worker(
    state: Arc<Mutex<TokenSnapshot>>,
    backend: Arc<dyn SecretBackend>,
    mut write_rx: mpsc::Receiver<()>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            Some(()) = write_rx.recv() => {
                save(&state, backend.as_ref()).await;
            }
            _ = stop_rx.recv() => {
                if write_rx.try_recv().is_ok() {
                    save(&state, backend.as_ref()).await;
                }
                break;
            }
        }
    }

    debug!("Token store save worker stopped");
}

async fn save(state: &Mutex<TokenSnapshot>, backend: &dyn SecretBackend) {
    match write_snapshot(state, backend).await {
        Ok(size) => debug!(bytes = size, "Saved token state to {}", backend.describe()),
        Err(e) => error!(error = %e, "Failed to save token state to {}", backend.describe()),
    }
}

async fn write_snapshot(state: &Mutex<TokenSnapshot>, backend: &dyn SecretBackend) -> anyhow::Result<usize> {
    let data = {
        let snapshot = lock(state);
        snapshot.to_json()?
    };

    if data.len() > MAX_SNAPSHOT_BYTES {
        return Err(BackendError::TooLarge {
            size: data.len(),
            limit: MAX_SNAPSHOT_BYTES,
        }
        .into());
    }

    backend.save(&data).await?;
    Ok(data.len())
}

impl TokenStore for PersistedTokenStore {
    fn generate_api_token(&self, user_id: &str, email: &str) -> Result<String, StoreError> {
        self.generate(user_id, email, API_TOKEN_LIFETIME_SECONDS)
    }

    fn generate_session_token(&self, user_id: &str, email: &str) -> Result<String, StoreError> {
        self.generate(user_id, email, SESSION_TOKEN_LIFETIME_SECONDS)
    }

    fn api_token_names(&self) -> Vec<String> {
        lock(&self.state).index.names()
    }

    fn contains_api_token(&self, name: &str) -> bool {
        lock(&self.state).index.contains_name(name)
    }

    fn user_for_token(&self, token: &str) -> Result<String, StoreError> {
        lock(&self.state)
            .index
            .user_for(token)
            .cloned()
            .ok_or(StoreError::TokenNotFound)
    }

    fn store_api_token(&self, name: &str, token: &str, user_id: &str) -> Result<(), StoreError> {
        lock(&self.state).index.insert(name, token, user_id);
        self.notify_to_write();
        Ok(())
    }

    fn delete_api_token(&self, name: &str) -> Result<(), StoreError> {
        let removed = lock(&self.state).index.remove(name);
        if removed {
            self.notify_to_write();
        }
        Ok(())
    }

    fn has_user_credentials(&self, user_id: &str) -> bool {
        lock(&self.state).users.contains_key(user_id)
    }

    fn invalidate_user(&self, user_id: &str) -> Result<(), StoreError> {
        let removed = lock(&self.state).users.remove(user_id).is_some();
        if removed {
            self.notify_to_write();
        }
        Ok(())
    }

    fn store_user(&self, user_id: &str, credential: OAuthCredential) -> Result<(), StoreError> {
        lock(&self.state)
            .users
            .insert(user_id.to_string(), credential);
        self.notify_to_write();
        Ok(())
    }

    fn token_for_user(&self, user_id: &str) -> Result<Option<OAuthCredential>, StoreError> {
        lock(&self.state)
            .users
            .get(user_id)
            .cloned()
            .map(Some)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }
}
