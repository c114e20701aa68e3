use std::{path::PathBuf, sync::Arc};

use object_store::{memory::InMemory, ObjectStore};

pub mod container;
pub mod error;
pub mod fs;

pub use container::{
    AttributeValue, Attributes, Child, Completion, ContainerBackend, ContainerFile, DataSet,
    DataType, Group, OpenMode, TreeContainerBackend, Values,
};
pub use error::{StorageError, StorageResult};
pub use fs::{FileSystem, GetOptions, LocalFileSystem, ObjectStoreFileSystem, Retrieved};

/// A filesystem paired with the container backend used for binary files on it.
#[derive(Debug, Clone)]
pub struct Storage {
    pub fs: Arc<dyn FileSystem>,
    pub container: Arc<dyn ContainerBackend>,
}

impl Storage {
    pub fn new(fs: Arc<dyn FileSystem>, container: Arc<dyn ContainerBackend>) -> Self {
        Self { fs, container }
    }

    /// Local directory where containers are written in place.
    pub fn local<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self::new(
            Arc::new(LocalFileSystem::new(root.clone())),
            Arc::new(TreeContainerBackend::direct(root)),
        )
    }

    /// Local storage rooted at `STOWAGE_DATA_DIR`.
    pub fn from_config() -> Self {
        Self::local(stowage_config::DATA_DIR.clone())
    }

    /// Object store without local files; containers travel as buffers.
    pub fn object_store(store: Arc<dyn ObjectStore>) -> Self {
        Self::new(
            Arc::new(ObjectStoreFileSystem::new(store)),
            Arc::new(TreeContainerBackend::buffered()),
        )
    }

    pub fn in_memory() -> Self {
        Self::object_store(Arc::new(InMemory::new()))
    }
}
