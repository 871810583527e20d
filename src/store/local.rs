use super::{BlobEntry, BlobReader, BlobRef, BlobStore, BlobWriter, StoreError, StoreResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

const BLOB_EXTENSION: &str = "blob";
const WRITE_BUFFER_BYTES: usize = 256 * 1024;

/// Blobs stored as `<root>/<key>.blob` on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();

        fs::create_dir_all(&root).await.map_err(|e| {
            StoreError::Unavailable(format!(
                "failed to create storage root {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    pub fn blob_path(&self, blob: &BlobRef) -> PathBuf {
        self.root
            .join(format!("{}.{}", blob.as_str(), BLOB_EXTENSION))
    }

    // A missing root means someone removed the directory under us
    fn map_root_error(&self, err: std::io::Error) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::Unavailable(format!("storage root {} is missing", self.root.display()))
        } else {
            StoreError::Io(err)
        }
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn create(&self, blob: &BlobRef) -> StoreResult<BlobWriter> {
        let path = self.blob_path(blob);

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| self.map_root_error(e))?;

        tracing::debug!(blob = %blob, path = %path.display(), "blob created");
        Ok(Box::pin(BufWriter::with_capacity(WRITE_BUFFER_BYTES, file)))
    }

    async fn open(&self, blob: &BlobRef) -> StoreResult<(BlobReader, u64)> {
        let path = self.blob_path(blob);

        let file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(blob.clone()),
            _ => StoreError::Io(e),
        })?;
        let size = file.metadata().await?.len();

        Ok((Box::pin(file), size))
    }

    async fn delete(&self, blob: &BlobRef) -> StoreResult<bool> {
        match fs::remove_file(self.blob_path(blob)).await {
            Ok(()) => {
                tracing::debug!(blob = %blob, "blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self) -> StoreResult<Vec<BlobEntry>> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| self.map_root_error(e))?;
        let now = SystemTime::now();
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            let Some(blob) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(BlobRef::parse)
            else {
                continue;
            };

            // Raced with a delete
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(e)),
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();

            entries.push(BlobEntry { blob, age });
        }

        Ok(entries)
    }

    async fn probe(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| self.map_root_error(e))?;

        let probe_path = self.root.join(format!(".probe-{}", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&probe_path).await?;
        let written = file.write_all(b"probe").await;
        drop(file);
        let removed = fs::remove_file(&probe_path).await;

        written?;
        removed?;
        Ok(())
    }

    async fn available_space(&self) -> Option<u64> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || super::available_space(&root))
            .await
            .ok()
            .flatten()
    }
}
