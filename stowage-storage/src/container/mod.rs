//! Hierarchical binary container: groups, typed datasets and scalar attributes.
//!
//! Handles are plain owned values that close themselves when dropped. Opening
//! children in nested scopes therefore releases them in reverse open order.

use std::{any::Any, fmt::Debug};

use bytes::Bytes;

use crate::{
    error::{StorageError, StorageResult},
    fs::Retrieved,
};

mod tree;
mod values;

pub use tree::TreeContainerBackend;
pub use values::{AttributeValue, DataType, Values};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Outcome reported to [`ContainerBackend::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    /// The writer failed part-way; partial state must be discarded.
    Failed,
}

/// Attribute access shared by groups and datasets.
pub trait Attributes {
    /// Location of this object inside its container, used in error messages.
    fn location(&self) -> String;
    fn attribute_names(&self) -> StorageResult<Vec<String>>;
    fn read_attribute(&self, name: &str) -> StorageResult<AttributeValue>;
    fn write_attribute(&self, name: &str, value: AttributeValue) -> StorageResult<()>;

    fn has_attribute(&self, name: &str) -> StorageResult<bool> {
        Ok(self.attribute_names()?.iter().any(|n| n == name))
    }

    fn read_string_attribute(&self, name: &str) -> StorageResult<String> {
        match self.read_attribute(name)? {
            AttributeValue::Utf8(s) => Ok(s),
            other => Err(StorageError::Corrupt(format!(
                "attribute '{}' on '{}' should be a string, found {:?}",
                name,
                self.location(),
                other.data_type()
            ))),
        }
    }
}

pub enum Child {
    Group(Box<dyn Group>),
    DataSet(Box<dyn DataSet>),
}

pub trait Group: Attributes + Send + Sync {
    fn children(&self) -> StorageResult<Vec<String>>;
    fn open(&self, name: &str) -> StorageResult<Child>;
    fn create_group(&self, name: &str) -> StorageResult<Box<dyn Group>>;
    fn write_dataset(
        &self,
        name: &str,
        values: Values,
        shape: &[usize],
    ) -> StorageResult<Box<dyn DataSet>>;

    fn has_child(&self, name: &str) -> StorageResult<bool> {
        Ok(self.children()?.iter().any(|n| n == name))
    }

    fn open_group(&self, name: &str) -> StorageResult<Box<dyn Group>> {
        match self.open(name)? {
            Child::Group(group) => Ok(group),
            Child::DataSet(dataset) => Err(StorageError::NotAGroup(dataset.location())),
        }
    }

    fn open_dataset(&self, name: &str) -> StorageResult<Box<dyn DataSet>> {
        match self.open(name)? {
            Child::DataSet(dataset) => Ok(dataset),
            Child::Group(group) => Err(StorageError::NotADataSet(group.location())),
        }
    }

    /// Writes a one-dimensional dataset.
    fn write_vector(&self, name: &str, values: Values) -> StorageResult<Box<dyn DataSet>> {
        let len = values.len();
        self.write_dataset(name, values, &[len])
    }
}

pub trait DataSet: Attributes + Send + Sync {
    fn data_type(&self) -> StorageResult<DataType>;
    /// Empty for scalar datasets.
    fn shape(&self) -> StorageResult<Vec<usize>>;
    fn values(&self) -> StorageResult<Values>;
}

/// An open container file. Dropping it closes the file.
pub trait ContainerFile: Send + Sync {
    fn root(&self) -> StorageResult<Box<dyn Group>>;
    fn as_any(&self) -> &dyn Any;
}

#[async_trait::async_trait]
pub trait ContainerBackend: Send + Sync + Debug {
    /// Opens an existing container from a local path or from its bytes.
    async fn open(
        &self,
        source: &Retrieved,
        mode: OpenMode,
    ) -> StorageResult<Box<dyn ContainerFile>>;

    /// Starts a new, empty container destined for `path`.
    async fn create(&self, path: &str) -> StorageResult<Box<dyn ContainerFile>>;

    /// Completes a container obtained from [`ContainerBackend::create`].
    ///
    /// Returns the serialized container when the backend has no filesystem of
    /// its own; the caller then persists it with [`crate::fs::FileSystem::write`].
    /// With [`Completion::Failed`] nothing is persisted.
    async fn finalize(
        &self,
        file: Box<dyn ContainerFile>,
        completion: Completion,
    ) -> StorageResult<Option<Bytes>>;
}
