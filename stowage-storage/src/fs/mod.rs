use std::{fmt::Debug, path::PathBuf};

use bytes::Bytes;

use crate::error::StorageResult;

mod local;
mod object_store_fs;

pub(crate) use local::resolve;
pub use local::LocalFileSystem;
pub use object_store_fs::ObjectStoreFileSystem;

/// Result of [`FileSystem::get`]: either a path on the local filesystem or the
/// file's contents when no local filesystem is available.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    Path(PathBuf),
    Bytes(Bytes),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Always return the contents as a byte buffer.
    pub as_buffer: bool,
}

impl GetOptions {
    pub fn buffer() -> Self {
        Self { as_buffer: true }
    }
}

/// Byte-oriented file access used by the object codecs.
///
/// Paths are `/`-separated and relative to whatever root the implementation
/// was configured with.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync + Debug {
    /// Makes the file at `path` available for reading.
    async fn get(&self, path: &str, options: GetOptions) -> StorageResult<Retrieved>;
    async fn exists(&self, path: &str) -> StorageResult<bool>;
    /// Stores `contents` at `path`, replacing any existing file.
    async fn write(&self, path: &str, contents: Bytes) -> StorageResult<()>;
    /// Creates the directory at `path`. Parents must already exist.
    async fn mkdir(&self, path: &str) -> StorageResult<()>;
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;
    /// Releases anything allocated by a previous [`FileSystem::get`].
    async fn clean(&self, retrieved: Retrieved) -> StorageResult<()>;
    /// Removes `path` and everything beneath it. Missing paths are not an error.
    async fn remove(&self, path: &str) -> StorageResult<()>;

    async fn get_bytes(&self, path: &str) -> StorageResult<Bytes> {
        match self.get(path, GetOptions::buffer()).await? {
            Retrieved::Bytes(bytes) => Ok(bytes),
            Retrieved::Path(local) => Ok(Bytes::from(
                tokio::fs::read(&local)
                    .await
                    .map_err(|e| crate::error::StorageError::from_io(e, path))?,
            )),
        }
    }
}
