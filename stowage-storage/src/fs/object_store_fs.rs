use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::{path::Path, ObjectStore};

use super::{FileSystem, GetOptions, Retrieved};
use crate::error::{StorageError, StorageResult};

/// [`FileSystem`] over an [`ObjectStore`], for environments without a local
/// filesystem. Contents are always handed out as buffers and directories are
/// implicit in object prefixes.
#[derive(Debug, Clone)]
pub struct ObjectStoreFileSystem {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreFileSystem {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn location(path: &str) -> Path {
        Path::from_iter(
            path.split('/')
                .filter(|part| !part.is_empty() && *part != "."),
        )
    }
}

#[async_trait::async_trait]
impl FileSystem for ObjectStoreFileSystem {
    async fn get(&self, path: &str, _options: GetOptions) -> StorageResult<Retrieved> {
        let result = self
            .store
            .get(&Self::location(path))
            .await
            .map_err(|e| StorageError::from_object_store(e, path))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::from_object_store(e, path))?;
        Ok(Retrieved::Bytes(bytes))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let location = Self::location(path);
        match self.store.head(&location).await {
            Ok(_) => return Ok(true),
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(StorageError::ObjectStore(e)),
        }

        let mut listing = self.store.list(Some(&location));
        match listing.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(StorageError::ObjectStore(e)),
            None => Ok(false),
        }
    }

    async fn write(&self, path: &str, contents: Bytes) -> StorageResult<()> {
        self.store
            .put(&Self::location(path), contents.into())
            .await
            .map_err(|e| StorageError::from_object_store(e, path))?;
        Ok(())
    }

    async fn mkdir(&self, _path: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        self.store
            .copy(&Self::location(from), &Self::location(to))
            .await
            .map_err(|e| StorageError::from_object_store(e, from))?;
        Ok(())
    }

    async fn clean(&self, _retrieved: Retrieved) -> StorageResult<()> {
        Ok(())
    }

    async fn remove(&self, path: &str) -> StorageResult<()> {
        let location = Self::location(path);
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(StorageError::ObjectStore(e)),
        }

        let nested: Vec<Path> = self
            .store
            .list(Some(&location))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        for child in nested {
            match self.store.delete(&child).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(StorageError::ObjectStore(e)),
            }
        }
        tracing::trace!("removed '{}' from object store", path);
        Ok(())
    }
}
