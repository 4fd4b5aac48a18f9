use crate::gateway::{DEFAULT_SESSION_COOKIE, DEFAULT_TOKEN_COOKIE};
use crate::persistence::kube::DEFAULT_SECRET_NAME;
use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "AUTHGATE_CONFIG";

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oidc: OidcConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,

    /// Token signing secret. Generated at startup when unset, which logs
    /// everyone out on restart.
    #[serde(default)]
    pub hmac_secret: Option<String>,
}

/// Where and how the gateway listens
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `http://host:port` or `https://host:port`
    #[serde(default = "default_listen")]
    pub listen: String,
    /// PEM certificate, required for https
    #[serde(default)]
    pub tls_cert: Option<String>,
    /// PEM private key, required for https
    #[serde(default)]
    pub tls_key: Option<String>,
}

fn default_listen() -> String {
    "http://127.0.0.1:5555".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Identity provider connection
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Must point at this gateway's `/callback`
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_discovery_retry")]
    pub discovery_retry_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Accept any TLS certificate from the IdP (self-signed test setups only)
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Log IdP responses
    #[serde(default)]
    pub debug: bool,
}

fn default_issuer_url() -> String {
    "http://127.0.0.1:5556/dex".to_string()
}

fn default_client_id() -> String {
    "auth-gateway".to_string()
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:5555/callback".to_string()
}

fn default_discovery_retry() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer_url: default_issuer_url(),
            client_id: default_client_id(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            discovery_retry_seconds: default_discovery_retry(),
            request_timeout_seconds: default_request_timeout(),
            insecure_skip_verify: false,
            debug: false,
        }
    }
}

impl OidcConfig {
    pub fn discovery_retry_delay(&self) -> Duration {
        Duration::from_secs(self.discovery_retry_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Where token state is persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Nothing persisted; restarts log everyone out
    #[default]
    Memory,
    /// JSON file on local disk
    File,
    /// Kubernetes secret in the gateway's namespace
    Kubernetes,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "file" => Ok(StoreBackend::File),
            "kubernetes" | "kube" => Ok(StoreBackend::Kubernetes),
            other => Err(anyhow!(
                "unknown store backend '{}' (expected memory, file or kubernetes)",
                other
            )),
        }
    }
}

/// Token store persistence
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// File backend location
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Kubernetes backend namespace
    #[serde(default = "default_secret_namespace")]
    pub secret_namespace: String,
    /// Kubernetes backend secret name
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
}

fn default_store_path() -> String {
    "authgate-tokens.json".to_string()
}

fn default_secret_namespace() -> String {
    "default".to_string()
}

fn default_secret_name() -> String {
    DEFAULT_SECRET_NAME.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            secret_namespace: default_secret_namespace(),
            secret_name: default_secret_name(),
        }
    }
}

/// Browser session handling
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_token_cookie")]
    pub token_cookie: String,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// Drop a user's credential when refreshing it fails
    #[serde(default)]
    pub invalidate_on_refresh_failure: bool,
}

fn default_token_cookie() -> String {
    DEFAULT_TOKEN_COOKIE.to_string()
}

fn default_session_cookie() -> String {
    DEFAULT_SESSION_COOKIE.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_cookie: default_token_cookie(),
            session_cookie: default_session_cookie(),
            invalidate_on_refresh_failure: false,
        }
    }
}

/// Parsed listen address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenAddr {
    pub addr: SocketAddr,
    pub tls: bool,
}

impl GatewayConfig {
    /// Config file (if `AUTHGATE_CONFIG` names one), then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => load_config(&path)?,
            Err(_) => GatewayConfig::default(),
        };

        let config = config.with_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("OAUTH2_CLIENT_ID") {
            self.oidc.client_id = v;
        }
        if let Some(v) = lookup("OAUTH2_CLIENT_SECRET") {
            self.oidc.client_secret = v;
        }
        if let Some(v) = lookup("AUTH_SERVER_CALLBACK_URL") {
            self.oidc.redirect_uri = v;
        }
        if let Some(v) = lookup("OPENID_CONNECT_ISSUER_URL") {
            self.oidc.issuer_url = v;
        }
        if let Some(v) = lookup("AUTH_SERVER_DEBUG") {
            self.oidc.debug = v
                .parse::<bool>()
                .with_context(|| format!("AUTH_SERVER_DEBUG must be true or false, got '{}'", v))?;
        }
        if let Some(v) = lookup("AUTH_SERVER_LISTEN_AT") {
            self.server.listen = v;
        }
        if let Some(v) = lookup("AUTH_SERVER_TLS_CERT").filter(|v| !v.is_empty()) {
            self.server.tls_cert = Some(v);
        }
        if let Some(v) = lookup("AUTH_SERVER_TLS_KEY").filter(|v| !v.is_empty()) {
            self.server.tls_key = Some(v);
        }
        if let Some(v) = lookup("AUTHGATE_STORE_BACKEND") {
            self.store.backend = v.parse()?;
        }
        if let Some(v) = lookup("AUTHGATE_STORE_PATH") {
            self.store.path = v;
        }
        if let Some(v) = lookup("AUTHGATE_SECRET_NAMESPACE") {
            self.store.secret_namespace = v;
        }
        if let Some(v) = lookup("AUTHGATE_SECRET_NAME") {
            self.store.secret_name = v;
        }
        if let Some(v) = lookup("AUTHGATE_HMAC_SECRET").filter(|v| !v.is_empty()) {
            self.hmac_secret = Some(v);
        }
        Ok(self)
    }

    /// Reject configurations the gateway can't start with
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.oidc.redirect_uri)
            .with_context(|| format!("Invalid redirect URI '{}'", self.oidc.redirect_uri))?;
        Url::parse(&self.oidc.issuer_url)
            .with_context(|| format!("Invalid issuer URL '{}'", self.oidc.issuer_url))?;

        if self.oidc.client_id.is_empty() {
            bail!("OAuth client ID must not be empty");
        }

        let listen = self.listen_addr()?;
        if listen.tls && (self.server.tls_cert.is_none() || self.server.tls_key.is_none()) {
            bail!("Listening on https requires both a TLS certificate and key");
        }

        Ok(())
    }

    /// Resolve the listen URL to a socket address
    pub fn listen_addr(&self) -> Result<ListenAddr> {
        let url = Url::parse(&self.server.listen)
            .with_context(|| format!("Invalid listen address '{}'", self.server.listen))?;

        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => bail!("Listen address must be http or https, got '{}'", other),
        };

        let addr = url
            .socket_addrs(|| Some(if tls { 443 } else { 80 }))
            .with_context(|| format!("Failed to resolve listen address '{}'", self.server.listen))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Listen address '{}' resolved to nothing", self.server.listen))?;

        Ok(ListenAddr { addr, tls })
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<GatewayConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: GatewayConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
