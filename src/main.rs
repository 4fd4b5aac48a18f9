use anyhow::{anyhow, Context, Result};
use authgate::codec::{generate_hmac_secret, TokenCodec};
use authgate::config::{GatewayConfig, StoreBackend};
use authgate::gateway::{create_gateway_router, GatewayState};
use authgate::oauth::{discover_with_retry, OidcClient};
use authgate::persistence::{FileSecretBackend, KubeSecretBackend, SecretBackend};
use authgate::tokenstore::{InMemoryTokenStore, PersistedTokenStore, TokenStore};
use axum_server::tls_rustls::RustlsConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// How long in-flight HTTPS requests get to finish on shutdown
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate=info".into()),
        )
        .init();

    info!("Auth gateway starting...");

    let config = GatewayConfig::load().context("Failed to load configuration")?;
    let listen = config.listen_addr()?;

    info!(
        listen = %config.server.listen,
        issuer = %config.oidc.issuer_url,
        client_id = %config.oidc.client_id,
        redirect_uri = %config.oidc.redirect_uri,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let hmac_secret = match &config.hmac_secret {
        Some(secret) => secret.clone(),
        None => {
            info!("No signing secret configured, generated one (sessions end on restart)");
            generate_hmac_secret()
        }
    };
    let codec = Arc::new(TokenCodec::new(hmac_secret.as_bytes()));

    if config.oidc.insecure_skip_verify {
        warn!("TLS certificate verification of the identity provider is disabled");
    }
    let http = reqwest::Client::builder()
        .timeout(config.oidc.request_timeout())
        .danger_accept_invalid_certs(config.oidc.insecure_skip_verify)
        .build()
        .context("Failed to build HTTP client")?;

    let provider = discover_with_retry(
        &http,
        &config.oidc.issuer_url,
        config.oidc.discovery_retry_delay(),
    )
    .await;

    let oauth = Arc::new(
        OidcClient::new(
            http,
            &provider,
            &config.oidc.client_id,
            &config.oidc.client_secret,
            &config.oidc.redirect_uri,
        )
        .with_debug(config.oidc.debug),
    );

    let (store, persisted) = open_store(&config, codec.clone()).await?;

    let state = GatewayState::new(store, codec, oauth)
        .with_offline_as_scope(provider.offline_as_scope())
        .with_invalidate_on_refresh_failure(config.session.invalidate_on_refresh_failure)
        .with_cookie_names(&config.session.token_cookie, &config.session.session_cookie);

    let router = create_gateway_router(state).layer(TraceLayer::new_for_http());

    if listen.tls {
        let (cert, key) = config
            .server
            .tls_cert
            .as_ref()
            .zip(config.server.tls_key.as_ref())
            .ok_or_else(|| anyhow!("https requires a TLS certificate and key"))?;
        let tls = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("Failed to load TLS certificate and key")?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        });

        info!(addr = %listen.addr, "Auth gateway listening (https)");
        axum_server::bind_rustls(listen.addr, tls)
            .handle(handle)
            .serve(router.into_make_service())
            .await
            .context("HTTPS server error")?;
    } else {
        let listener = tokio::net::TcpListener::bind(listen.addr)
            .await
            .with_context(|| format!("Failed to bind {}", listen.addr))?;

        info!(addr = %listen.addr, "Auth gateway listening (http)");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;
    }

    if let Some(persisted) = persisted {
        persisted.shutdown().await;
    }

    info!("Auth gateway stopped");
    Ok(())
}

/// Build the configured token store. The persisted store is also returned
/// on its own so its pending save can be flushed at shutdown.
async fn open_store(
    config: &GatewayConfig,
    codec: Arc<TokenCodec>,
) -> Result<(Arc<dyn TokenStore>, Option<Arc<PersistedTokenStore>>)> {
    let backend: Arc<dyn SecretBackend> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Token state is kept in memory only");
            let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new(codec));
            return Ok((store, None));
        }
        StoreBackend::File => Arc::new(FileSecretBackend::new(&config.store.path)),
        StoreBackend::Kubernetes => Arc::new(
            KubeSecretBackend::in_cluster(&config.store.secret_namespace, &config.store.secret_name)
                .context("Failed to set up Kubernetes secret backend")?,
        ),
    };

    let persisted = Arc::new(PersistedTokenStore::open(codec, backend).await);
    let store: Arc<dyn TokenStore> = persisted.clone();
    Ok((store, Some(persisted)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
