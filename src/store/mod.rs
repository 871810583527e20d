//! Blob storage abstraction
//!
//! A session owns exactly one blob. Handlers and the registry only talk to
//! storage through [`BlobStore`], so the backend can change without touching
//! session logic.

mod capacity;
mod local;

pub use capacity::available_space;
pub use local::LocalStore;

use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Opaque handle into a [`BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef(String);

impl BlobRef {
    /// Fresh random reference, never shared between sessions.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keys are lowercase hex only, which keeps them safe as file names.
    pub fn parse(key: &str) -> Option<Self> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(key.to_string()))
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(unix)]
const ENOSPC: i32 = 28;
#[cfg(unix)]
const EROFS: i32 = 30;

impl StoreError {
    /// Errors that will keep failing until an operator intervenes.
    ///
    /// A fatal error stops new uploads; already issued downloads keep working.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Io(err) => {
                err.kind() == std::io::ErrorKind::PermissionDenied || is_disk_exhausted(err)
            }
            StoreError::NotFound(_) | StoreError::InvalidKey(_) => false,
        }
    }
}

#[cfg(unix)]
fn is_disk_exhausted(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(ENOSPC) | Some(EROFS))
}

#[cfg(not(unix))]
fn is_disk_exhausted(_err: &std::io::Error) -> bool {
    false
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BlobWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A stored blob as seen by a listing, used for orphan collection.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub blob: BlobRef,
    /// Time since the blob was last written.
    pub age: Duration,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create an empty blob and return a writer for it.
    ///
    /// Callers must `shutdown()` the writer to flush it. Creating a blob
    /// that already exists is an error.
    async fn create(&self, blob: &BlobRef) -> StoreResult<BlobWriter>;

    /// Open a blob for reading, returning the reader and the blob size.
    async fn open(&self, blob: &BlobRef) -> StoreResult<(BlobReader, u64)>;

    /// Delete a blob. Returns `Ok(false)` if it was already gone.
    async fn delete(&self, blob: &BlobRef) -> StoreResult<bool>;

    /// Every blob currently held by the store.
    async fn list(&self) -> StoreResult<Vec<BlobEntry>>;

    /// Check that the store accepts writes.
    async fn probe(&self) -> StoreResult<()>;

    /// Free bytes left for new blobs, if the backend can tell.
    async fn available_space(&self) -> Option<u64> {
        None
    }
}
