use std::{
    io::Write,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use tempfile::NamedTempFile;

use super::{FileSystem, GetOptions, Retrieved};
use crate::error::{StorageError, StorageResult};

/// [`FileSystem`] backed by a directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Local filesystem rooted at `STOWAGE_DATA_DIR`.
    pub fn from_config() -> Self {
        Self::new(stowage_config::DATA_DIR.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve(&self.root, path)
    }
}

pub(crate) fn resolve(root: &Path, path: &str) -> PathBuf {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        root.to_path_buf()
    } else {
        root.join(trimmed)
    }
}

#[async_trait::async_trait]
impl FileSystem for LocalFileSystem {
    async fn get(&self, path: &str, options: GetOptions) -> StorageResult<Retrieved> {
        let local = self.resolve(path);
        if options.as_buffer {
            let contents = tokio::fs::read(&local)
                .await
                .map_err(|e| StorageError::from_io(e, path))?;
            return Ok(Retrieved::Bytes(Bytes::from(contents)));
        }

        let metadata = tokio::fs::metadata(&local)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(Retrieved::Path(local))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn write(&self, path: &str, contents: Bytes) -> StorageResult<()> {
        let target = self.resolve(path);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let display = path.to_string();

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut staged =
                NamedTempFile::new_in(&parent).map_err(|e| StorageError::from_io(e, &display))?;
            staged.write_all(&contents)?;
            staged.as_file().sync_all()?;
            staged
                .persist(&target)
                .map_err(|e| StorageError::from_io(e.error, &display))?;
            Ok(())
        })
        .await?
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        let local = self.resolve(path);
        match tokio::fs::create_dir(&local).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if tokio::fs::metadata(&local).await?.is_dir() {
                    Ok(())
                } else {
                    Err(StorageError::AlreadyExists(path.to_string()))
                }
            }
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        tokio::fs::copy(self.resolve(from), self.resolve(to))
            .await
            .map_err(|e| StorageError::from_io(e, from))?;
        Ok(())
    }

    async fn clean(&self, _retrieved: Retrieved) -> StorageResult<()> {
        // Paths point at the real file and buffers are owned by the caller.
        Ok(())
    }

    async fn remove(&self, path: &str) -> StorageResult<()> {
        let local = self.resolve(path);
        let metadata = match tokio::fs::symlink_metadata(&local).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&local).await?;
        } else {
            tokio::fs::remove_file(&local).await?;
        }
        Ok(())
    }
}
