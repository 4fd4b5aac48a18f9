//! Blob stored in a Kubernetes secret.
//!
//! Talks to the API server directly with the pod's service account. The blob
//! lives base64-encoded under the `value` key of the secret's data. Secrets
//! are capped at 1 MiB, which is plenty unless an enormous number of users
//! log in (at which point a dedicated secrets product is the better home).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::{BackendError, SecretBackend};

/// Key the blob is stored under inside the secret's data
pub const SECRET_DATA_KEY: &str = "value";

/// Default secret name. Must be lowercase alphanumeric, '.' or '-'.
pub const DEFAULT_SECRET_NAME: &str = "auth-gateway-token-secret";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: Option<HashMap<String, String>>,
}

pub struct KubeSecretBackend {
    client: reqwest::Client,
    api_base: String,
    bearer_token: String,
    namespace: String,
    name: String,
}

impl KubeSecretBackend {
    /// Connect to the API server of the cluster this pod runs in
    pub fn in_cluster(namespace: &str, name: &str) -> Result<Self, BackendError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| BackendError::Config("KUBERNETES_SERVICE_HOST not set (not running in a cluster?)".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        let account_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let bearer_token = std::fs::read_to_string(account_dir.join("token"))?
            .trim()
            .to_string();
        let ca = std::fs::read(account_dir.join("ca.crt"))?;
        let certificate = reqwest::Certificate::from_pem(&ca)?;

        let client = reqwest::Client::builder()
            .add_root_certificate(certificate)
            .build()?;

        Ok(Self {
            client,
            api_base: format!("https://{}:{}", host, port),
            bearer_token,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Point at an arbitrary API server (tests, or kubectl proxy)
    pub fn with_base_url(api_base: String, bearer_token: String, namespace: &str, name: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            bearer_token,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/secrets", self.api_base, self.namespace)
    }

    fn secret_url(&self) -> String {
        format!("{}/{}", self.collection_url(), self.name)
    }

    fn secret_body(&self, data: &[u8]) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
            },
            "data": {
                SECRET_DATA_KEY: BASE64.encode(data),
            },
        })
    }

    async fn update(&self, body: &serde_json::Value) -> Result<(), BackendError> {
        let response = self
            .client
            .put(self.secret_url())
            .bearer_auth(&self.bearer_token)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }

    async fn create(&self, body: &serde_json::Value) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.collection_url())
            .bearer_auth(&self.bearer_token)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(BackendError::Status { status, body })
}

#[async_trait]
impl SecretBackend for KubeSecretBackend {
    async fn load(&self) -> Result<Option<Vec<u8>>, BackendError> {
        let response = self
            .client
            .get(self.secret_url())
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Status { status, body });
        }

        let secret: SecretObject = serde_json::from_slice(&response.bytes().await?)?;
        let encoded = secret
            .data
            .and_then(|mut data| data.remove(SECRET_DATA_KEY))
            .ok_or_else(|| BackendError::MissingKey(SECRET_DATA_KEY.to_string()))?;

        Ok(Some(BASE64.decode(encoded)?))
    }

    /// Update the secret in place; if that fails (most likely because it
    /// doesn't exist yet) try creating it. A create that also fails is the
    /// error reported.
    async fn save(&self, data: &[u8]) -> Result<(), BackendError> {
        let body = self.secret_body(data);

        if let Err(e) = self.update(&body).await {
            debug!(error = %e, secret = %self.name, "Secret update failed, trying create");
            return self.create(&body).await;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("secret {}/{}", self.namespace, self.name)
    }
}
