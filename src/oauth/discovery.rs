//! OpenID Connect provider discovery.
//!
//! Reads `{issuer}/.well-known/openid-configuration` once at startup. The
//! gateway can't serve anything without its provider, so startup retries
//! until discovery succeeds.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{OAuthError, OFFLINE_ACCESS_SCOPE};

/// Delay between discovery attempts at startup
pub const DISCOVERY_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The parts of the provider's discovery document the gateway uses
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,

    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Whether refresh tokens are requested with the `offline_access` scope.
    ///
    /// Providers that don't advertise their scopes are assumed to support
    /// it; the rest (e.g. Google) take `access_type=offline` instead.
    pub fn offline_as_scope(&self) -> bool {
        self.scopes_supported.is_empty()
            || self.scopes_supported.iter().any(|s| s == OFFLINE_ACCESS_SCOPE)
    }
}

/// Fetch and check the provider's discovery document
pub async fn discover(http: &reqwest::Client, issuer_url: &str) -> Result<ProviderMetadata, OAuthError> {
    let well_known = format!(
        "{}/.well-known/openid-configuration",
        issuer_url.trim_end_matches('/')
    );

    debug!("Fetching provider metadata from {}", well_known);

    let response = http
        .get(&well_known)
        .header("Accept", "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(OAuthError::Status { status, body });
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| OAuthError::Parse(format!("discovery document: {}", e)))?;

    if metadata.issuer != issuer_url {
        return Err(OAuthError::IssuerMismatch {
            expected: issuer_url.to_string(),
            actual: metadata.issuer,
        });
    }

    Ok(metadata)
}

/// [`discover`], retried with a fixed delay until it succeeds
pub async fn discover_with_retry(http: &reqwest::Client, issuer_url: &str, delay: Duration) -> ProviderMetadata {
    let mut attempt: u32 = 1;
    loop {
        match discover(http, issuer_url).await {
            Ok(metadata) => {
                info!(
                    issuer = %metadata.issuer,
                    offline_as_scope = metadata.offline_as_scope(),
                    "Discovered OpenID Connect provider"
                );
                return metadata;
            }
            Err(e) => {
                warn!(
                    issuer = %issuer_url,
                    attempt = attempt,
                    error = %e,
                    "Failed to query provider, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
