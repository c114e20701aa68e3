//! Routing between on-disk type tags and codecs.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use stowage_storage::Storage;

use crate::{
    data_frame,
    error::{StowageError, StowageResult},
    experiment, list,
    metadata::{read_object_file, ObjectMetadata},
    object::Object,
    options::Options,
};

/// Recursion point handed to codecs so they can persist nested objects.
#[async_trait::async_trait]
pub trait ObjectDispatch: Send + Sync {
    /// Decodes the object at `path`. The envelope is loaded when `metadata` is `None`.
    async fn read_object(
        &self,
        path: &str,
        metadata: Option<ObjectMetadata>,
        storage: &Storage,
        options: &Options,
    ) -> StowageResult<Object>;

    async fn save_object(
        &self,
        object: &Object,
        path: &str,
        storage: &Storage,
        options: &Options,
    ) -> StowageResult<()>;
}

/// Decoder for one type tag.
#[async_trait::async_trait]
pub trait ReadHandler: Send + Sync {
    async fn read(
        &self,
        path: &str,
        metadata: &ObjectMetadata,
        storage: &Storage,
        options: &Options,
        dispatch: &dyn ObjectDispatch,
    ) -> StowageResult<Object>;
}

#[async_trait::async_trait]
pub trait SaveHandler: Send + Sync {
    async fn save(
        &self,
        object: &Object,
        path: &str,
        storage: &Storage,
        options: &Options,
        dispatch: &dyn ObjectDispatch,
    ) -> StowageResult<()>;
}

pub type SavePredicate = Arc<dyn Fn(&Object) -> bool + Send + Sync>;

/// Built-in codecs plus caller-registered extensions.
///
/// Readers are looked up by tag before the built-in ones. Savers are tried
/// from the most recently registered to the oldest, so a specific handler
/// registered later shadows a general one registered earlier.
#[derive(Default)]
pub struct Dispatcher {
    readers: RwLock<HashMap<String, Arc<dyn ReadHandler>>>,
    savers: RwLock<Vec<(SavePredicate, Arc<dyn SaveHandler>)>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut readers: Vec<String> = self.readers.read().keys().cloned().collect();
        readers.sort();
        f.debug_struct("Dispatcher")
            .field("readers", &readers)
            .field("savers", &self.savers.read().len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader for `tag`, returning the one it replaces.
    pub fn register_reader<T: Into<String>>(
        &self,
        tag: T,
        handler: Arc<dyn ReadHandler>,
    ) -> Option<Arc<dyn ReadHandler>> {
        self.readers.write().insert(tag.into(), handler)
    }

    pub fn register_saver<P>(&self, predicate: P, handler: Arc<dyn SaveHandler>)
    where
        P: Fn(&Object) -> bool + Send + Sync + 'static,
    {
        self.savers.write().push((Arc::new(predicate), handler));
    }

    fn reader_for(&self, tag: &str) -> Option<Arc<dyn ReadHandler>> {
        self.readers.read().get(tag).cloned()
    }

    fn saver_for(&self, object: &Object) -> Option<Arc<dyn SaveHandler>> {
        self.savers
            .read()
            .iter()
            .rev()
            .find(|(predicate, _)| predicate(object))
            .map(|(_, handler)| handler.clone())
    }
}

#[async_trait::async_trait]
impl ObjectDispatch for Dispatcher {
    async fn read_object(
        &self,
        path: &str,
        metadata: Option<ObjectMetadata>,
        storage: &Storage,
        options: &Options,
    ) -> StowageResult<Object> {
        let metadata = match metadata {
            Some(metadata) => metadata,
            None => read_object_file(path, storage).await?,
        };

        if let Some(handler) = self.reader_for(&metadata.object_type) {
            tracing::debug!(
                "reading '{}' at '{}' with a registered handler",
                metadata.object_type,
                path
            );
            return handler.read(path, &metadata, storage, options, self).await;
        }

        tracing::debug!("reading '{}' at '{}'", metadata.object_type, path);
        match metadata.object_type.as_str() {
            data_frame::DATA_FRAME => {
                data_frame::read_data_frame(path, &metadata, storage, options, self)
                    .await
                    .map(Object::DataFrame)
            }
            list::SIMPLE_LIST => list::read_list(path, &metadata, storage, options, self)
                .await
                .map(Object::List),
            experiment::SUMMARIZED_EXPERIMENT => {
                experiment::read_summarized_experiment(path, &metadata, storage, options, self)
                    .await
                    .map(Object::SummarizedExperiment)
            }
            experiment::SINGLE_CELL_EXPERIMENT => {
                experiment::read_single_cell_experiment(path, &metadata, storage, options, self)
                    .await
                    .map(Object::SingleCellExperiment)
            }
            other => Err(StowageError::UnsupportedType {
                tag: other.to_string(),
                path: path.to_string(),
            }),
        }
    }

    async fn save_object(
        &self,
        object: &Object,
        path: &str,
        storage: &Storage,
        options: &Options,
    ) -> StowageResult<()> {
        if let Some(handler) = self.saver_for(object) {
            tracing::debug!(
                "saving {} at '{}' with a registered handler",
                object.kind(),
                path
            );
            return handler.save(object, path, storage, options, self).await;
        }

        // Most specific kinds first.
        match object {
            Object::SingleCellExperiment(sce) => {
                experiment::save_single_cell_experiment(sce, path, storage, options, self).await
            }
            Object::SummarizedExperiment(se) => {
                experiment::save_summarized_experiment(se, path, storage, options, self).await
            }
            Object::DataFrame(frame) => {
                data_frame::save_data_frame(frame, path, storage, options, self).await
            }
            Object::List(values) => list::save_list(values, path, storage, options, self).await,
            other => Err(StowageError::UnsupportedType {
                tag: other.kind(),
                path: path.to_string(),
            }),
        }
    }
}
