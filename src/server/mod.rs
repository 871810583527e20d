pub mod download;
pub mod routes;
pub mod state;
pub mod upload;

pub use routes::create_router;
pub use state::{AppState, StorageHealth, TransferLimits};

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

use crate::common::{AppError, RelayConfig};
use crate::registry::SessionRegistry;
use crate::store::{BlobStore, LocalStore};
use crate::sweeper::Sweeper;

// In-flight downloads get this long to finish after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wire the store, registry and sweeper together from configuration.
pub async fn build_state(config: &RelayConfig) -> Result<AppState> {
    let store = LocalStore::new(&config.storage_root)
        .await
        .with_context(|| format!("open storage root {}", config.storage_root.display()))?;
    let store: Arc<dyn BlobStore> = Arc::new(store);

    let registry = SessionRegistry::new(store.clone(), config.token_range, config.session_ttl());

    Ok(AppState::new(registry, store, TransferLimits::from(config)))
}

/// Run the relay until Ctrl-C.
pub async fn start_server(config: RelayConfig) -> Result<()> {
    let state = build_state(&config).await?;

    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    let sweeper = Sweeper::from_state(&state, config.sweep_interval())
        .with_consumed_grace(config.consumed_grace())
        .spawn(shutdown_receiver);

    let app = create_router(&state);

    let handle = axum_server::Handle::new();
    let server_handle = handle.clone();

    // Spawn ctrl-c handler
    tokio::spawn(async move {
        signal::ctrl_c().await.ok();
        tracing::info!("shutdown requested");
        server_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    tracing::info!(
        addr = %config.bind,
        storage_root = %config.storage_root.display(),
        token_range = %config.token_range,
        ttl_secs = config.session_ttl_seconds,
        max_upload_bytes = config.max_upload_bytes,
        tls = config.tls.is_some(),
        "relay listening"
    );

    match &config.tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .context("load TLS certificate")?;
            axum_server::bind_rustls(config.bind, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("serve https")?;
        }
        None => {
            axum_server::bind(config.bind)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("serve http")?;
        }
    }

    let _ = shutdown_sender.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }
    tracing::info!(open_sessions = state.registry.len(), "relay stopped");
    Ok(())
}

/// Bound a client-facing I/O step so a stalled peer cannot hold resources.
pub(crate) async fn within<F>(limit: Duration, what: &str, future: F) -> Result<F::Output, AppError>
where
    F: Future,
{
    tokio::time::timeout(limit, future).await.map_err(|_| {
        AppError::Timeout(format!("{} stalled for {}s", what, limit.as_secs()))
    })
}
