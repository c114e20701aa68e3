//! Codecs for `summarized_experiment` and `single_cell_experiment` directories.
//!
//! Both kinds share one layout for assays, row and column annotations and
//! metadata. A single-cell experiment adds reduced dimensions and
//! alternative experiments next to it.

mod single_cell;
mod summarized;

use bytes::Bytes;
use indexmap::IndexMap;
use stowage_storage::Storage;

pub use single_cell::{read_single_cell_experiment, save_single_cell_experiment};
pub use summarized::{read_summarized_experiment, save_summarized_experiment};

use crate::{
    dispatch::ObjectDispatch,
    error::{StowageError, StowageResult},
    metadata::{join_path, read_object_file},
    object::Object,
    options::{ComponentRequest, Options, ReadOverride},
};

pub const SUMMARIZED_EXPERIMENT: &str = "summarized_experiment";
pub const SINGLE_CELL_EXPERIMENT: &str = "single_cell_experiment";
pub const EXPERIMENT_VERSION: &str = "1.0";

const NAMES_FILE: &str = "names.json";

async fn read_names(directory: &str, storage: &Storage) -> StowageResult<Vec<String>> {
    let location = join_path([directory, NAMES_FILE]);
    let payload = storage.fs.get_bytes(&location).await?;
    serde_json::from_slice(&payload)
        .map_err(|e| StowageError::format(location, format!("expected a list of names: {}", e)))
}

/// Reads `directory/names.json` and the components `directory/<i>`.
async fn read_components(
    directory: &str,
    extent: (Option<usize>, Option<usize>),
    read_override: &ReadOverride,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<IndexMap<String, Object>> {
    let mut components = IndexMap::new();
    if matches!(read_override, ReadOverride::Skip) || !storage.fs.exists(directory).await? {
        return Ok(components);
    }

    let names = read_names(directory, storage).await?;
    for (index, name) in names.into_iter().enumerate() {
        let path = join_path([directory, &index.to_string()]);
        let object = match read_override {
            ReadOverride::Custom(reader) => {
                let metadata = read_object_file(&path, storage).await?;
                reader
                    .read(ComponentRequest {
                        path: &path,
                        metadata: &metadata,
                        extent,
                        storage,
                        options,
                        dispatch,
                    })
                    .await?
            }
            _ => dispatch.read_object(&path, None, storage, options).await?,
        };
        if components.insert(name.clone(), object).is_some() {
            return Err(StowageError::format(
                directory,
                format!("duplicate component name '{}'", name),
            ));
        }
    }
    Ok(components)
}

/// Writes `directory/names.json` and each component to `directory/<i>`.
async fn save_components(
    directory: &str,
    components: &IndexMap<String, Object>,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    if components.is_empty() {
        return Ok(());
    }

    storage.fs.mkdir(directory).await?;
    let names: Vec<&String> = components.keys().collect();
    let payload = serde_json::to_vec(&names)
        .map_err(|e| StowageError::format(directory, format!("cannot serialize names: {}", e)))?;
    storage
        .fs
        .write(&join_path([directory, NAMES_FILE]), Bytes::from(payload))
        .await?;

    for (index, component) in components.values().enumerate() {
        let path = join_path([directory, &index.to_string()]);
        dispatch.save_object(component, &path, storage, options).await?;
    }
    Ok(())
}
