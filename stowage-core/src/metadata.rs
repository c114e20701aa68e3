//! The `OBJECT` envelope and helpers shared by every codec.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stowage_storage::Storage;

use crate::{
    dispatch::ObjectDispatch,
    error::{StowageError, StowageResult},
    object::{List, Object},
    options::{ComponentRequest, Options, ReadOverride},
};

pub const OBJECT_FILE: &str = "OBJECT";

/// Contents of an `OBJECT` file: the type tag plus one section per tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl ObjectMetadata {
    pub fn new<T: Into<String>>(object_type: T, version: &str) -> Self {
        let object_type = object_type.into();
        let mut metadata = Self {
            object_type: object_type.clone(),
            sections: Map::new(),
        };
        metadata.set_field(&object_type, "version", Value::from(version));
        metadata
    }

    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.sections.get(name).and_then(Value::as_object)
    }

    /// Version recorded in the section named after the type tag.
    pub fn version(&self) -> Option<&str> {
        self.field(&self.object_type, "version").and_then(Value::as_str)
    }

    pub fn field(&self, section: &str, key: &str) -> Option<&Value> {
        self.section(section).and_then(|s| s.get(key))
    }

    pub fn set_field<V: Into<Value>>(&mut self, section: &str, key: &str, value: V) {
        let entry = self
            .sections
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), value.into());
        }
    }
}

/// Joins path components with `/`, treating `.` as the identity.
pub fn join_path<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut output = String::new();
    for part in parts {
        let part = part.as_ref();
        if output.is_empty() || output == "." {
            output = part.to_string();
        } else if part != "." {
            output.push('/');
            output.push_str(part);
        }
    }
    output
}

pub async fn read_object_file(path: &str, storage: &Storage) -> StowageResult<ObjectMetadata> {
    let location = join_path([path, OBJECT_FILE]);
    let payload = storage.fs.get_bytes(&location).await?;
    serde_json::from_slice(&payload).map_err(|e| StowageError::InvalidMetadata {
        path: location,
        reason: e.to_string(),
    })
}

pub async fn write_object_file(
    path: &str,
    metadata: &ObjectMetadata,
    storage: &Storage,
) -> StowageResult<()> {
    let location = join_path([path, OBJECT_FILE]);
    let payload = serde_json::to_vec(metadata).map_err(|e| StowageError::InvalidMetadata {
        path: location.clone(),
        reason: e.to_string(),
    })?;
    storage.fs.write(&location, Bytes::from(payload)).await?;
    Ok(())
}

/// Reads the metadata list stored at `path`. Absent or skipped metadata is empty.
pub async fn read_annotated_metadata(
    path: &str,
    storage: &Storage,
    options: &Options,
    read_override: &ReadOverride,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<List> {
    if !storage.fs.exists(path).await? {
        return Ok(List::default());
    }

    let object = match read_override {
        ReadOverride::Skip => return Ok(List::default()),
        ReadOverride::Custom(reader) => {
            let metadata = read_object_file(path, storage).await?;
            reader
                .read(ComponentRequest {
                    path,
                    metadata: &metadata,
                    extent: (None, None),
                    storage,
                    options,
                    dispatch,
                })
                .await?
        }
        ReadOverride::Default => dispatch.read_object(path, None, storage, options).await?,
    };

    match object {
        Object::List(list) => Ok(list),
        other => Err(StowageError::format(
            path,
            format!("expected a list of metadata, found {}", other.kind()),
        )),
    }
}

/// Saves `metadata` at `path` unless it is empty.
pub async fn save_annotated_metadata(
    metadata: &List,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    if metadata.is_empty() {
        return Ok(());
    }
    dispatch
        .save_object(&Object::List(metadata.clone()), path, storage, options)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_treats_dot_as_identity() {
        assert_eq!(join_path([".", "a"]), "a");
        assert_eq!(join_path(["a", ".", "b"]), "a/b");
        assert_eq!(join_path(["a", "b", "c"]), "a/b/c");
        assert_eq!(join_path(["."]), ".");
        assert_eq!(join_path([".", "."]), ".");
    }

    #[test]
    fn envelope_layout() {
        let metadata = ObjectMetadata::new("data_frame", "1.1");
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "data_frame", "data_frame": { "version": "1.1" } })
        );
        assert_eq!(metadata.version(), Some("1.1"));
    }

    #[test]
    fn envelope_keeps_extra_sections() {
        let raw = r#"{"type":"single_cell_experiment",
            "summarized_experiment":{"version":"1.0","dimensions":[10,5]},
            "single_cell_experiment":{"version":"1.0","main_experiment_name":"rna"}}"#;
        let metadata: ObjectMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(metadata.object_type, "single_cell_experiment");
        assert_eq!(
            metadata.field("summarized_experiment", "dimensions"),
            Some(&serde_json::json!([10, 5]))
        );
        assert_eq!(
            metadata
                .field("single_cell_experiment", "main_experiment_name")
                .and_then(Value::as_str),
            Some("rna")
        );
    }

    #[tokio::test]
    async fn object_file_round_trip() -> anyhow::Result<()> {
        let storage = Storage::in_memory();
        let mut metadata = ObjectMetadata::new("simple_list", "1.0");
        metadata.set_field("simple_list", "format", "json");
        write_object_file("lst", &metadata, &storage).await?;

        assert_eq!(read_object_file("lst", &storage).await?, metadata);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_object_file_is_invalid_metadata() -> anyhow::Result<()> {
        let storage = Storage::in_memory();
        storage
            .fs
            .write("x/OBJECT", Bytes::from_static(b"{\"version\":1}"))
            .await?;
        let err = read_object_file("x", &storage).await.unwrap_err();
        assert!(matches!(err, StowageError::InvalidMetadata { path, .. } if path == "x/OBJECT"));
        Ok(())
    }
}
