use stowage_storage::Storage;

pub mod data_frame;
pub mod dispatch;
pub mod error;
pub mod experiment;
pub mod list;
pub mod metadata;
pub mod object;
pub mod options;
pub mod placeholder;

pub use dispatch::{Dispatcher, ObjectDispatch, ReadHandler, SaveHandler};
pub use error::{StowageError, StowageResult};
pub use metadata::{join_path, read_object_file, write_object_file, ObjectMetadata};
pub use object::{
    Column, DataFrame, ExternalObject, List, Object, SingleCellExperiment, SummarizedExperiment,
    Value, Vector,
};
pub use options::{ComponentReader, ComponentRequest, Options, ReadOverride};

/// Reads the object at `path` with the built-in codecs only.
pub async fn read_object(path: &str, storage: &Storage, options: &Options) -> StowageResult<Object> {
    Dispatcher::new()
        .read_object(path, None, storage, options)
        .await
}

/// Saves `object` at `path` with the built-in codecs only.
pub async fn save_object(
    object: &Object,
    path: &str,
    storage: &Storage,
    options: &Options,
) -> StowageResult<()> {
    Dispatcher::new()
        .save_object(object, path, storage, options)
        .await
}
