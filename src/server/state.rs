use crate::common::RelayConfig;
use crate::registry::SessionRegistry;
use crate::store::BlobStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-request bounds for uploads and downloads
#[derive(Debug, Clone, Copy)]
pub struct TransferLimits {
    pub max_upload_bytes: u64,
    pub io_timeout: Duration,
    pub min_free_bytes: u64,
}

impl From<&RelayConfig> for TransferLimits {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            io_timeout: config.io_timeout(),
            min_free_bytes: config.min_free_bytes,
        }
    }
}

/// Shared flag set when storage fails in a way retrying will not fix.
///
/// While degraded, uploads are refused and downloads keep being served.
#[derive(Clone, Debug, Default)]
pub struct StorageHealth {
    degraded: Arc<AtomicBool>,
}

impl StorageHealth {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn mark_degraded(&self) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            tracing::error!("storage degraded, refusing new uploads");
        }
    }

    /// Returns true if the flag was set before.
    pub fn mark_healthy(&self) -> bool {
        self.degraded.swap(false, Ordering::SeqCst)
    }
}

/// Application state
/// Passed to all handlers via Axum State extractor
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub store: Arc<dyn BlobStore>,
    pub limits: TransferLimits,
    pub health: StorageHealth,
}

impl AppState {
    pub fn new(registry: SessionRegistry, store: Arc<dyn BlobStore>, limits: TransferLimits) -> Self {
        Self {
            registry,
            store,
            limits,
            health: StorageHealth::default(),
        }
    }
}
