//! Local filesystem chunk store.

use crate::error::{StorageError, StorageResult};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use trove_core::{Chunk, Reference};
use uuid::Uuid;

/// Chunk store keeping one file per chunk under `chunks/ab/cd/<address>`.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a new filesystem store, creating the root directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, address: &Reference) -> StorageResult<PathBuf> {
        let key = address.to_object_key();
        if !Path::new(&key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(key));
        }
        Ok(self.root.join(key))
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write to a uniquely named temp file, fsync, then rename into place.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.ensure_parent(path).await?;
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for FilesystemStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn has(&self, address: &Reference) -> StorageResult<bool> {
        let path = self.chunk_path(address)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, address: &Reference) -> StorageResult<Chunk> {
        let path = self.chunk_path(address)?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(address.to_hex())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Chunk::from_parts(*address, Bytes::from(data))?)
    }

    #[instrument(skip(self, chunk), fields(backend = "filesystem", address = %chunk.address()))]
    async fn put(&self, chunk: &Chunk) -> StorageResult<bool> {
        let path = self.chunk_path(&chunk.address())?;

        // Content-addressed chunks are immutable, so check-then-write only
        // risks redundant work. Single-owner chunks are overwritten.
        if fs::try_exists(&path).await.map_err(StorageError::Io)? {
            let existing = fs::read(&path).await?;
            if existing == chunk.data().as_ref() {
                return Ok(false);
            }
        }

        self.write_atomic(&path, chunk.data()).await?;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
