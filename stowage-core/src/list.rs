//! Codec for `simple_list` directories.
//!
//! The list structure and its atomic vectors live in `list_contents.json`;
//! any other element is stored through the dispatcher under
//! `other_contents/<i>` and referenced by index.

use std::{collections::HashMap, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int32Array, StringArray},
    compute::cast,
    datatypes::{DataType as ArrowType, Float64Type, Int32Type, Int64Type},
};
use bytes::Bytes;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use stowage_storage::Storage;

use crate::{
    dispatch::ObjectDispatch,
    error::{StowageError, StowageResult},
    metadata::{join_path, write_object_file, ObjectMetadata},
    object::{List, Object, Vector},
    options::Options,
    placeholder::fits_integer,
};

pub const SIMPLE_LIST: &str = "simple_list";
pub const SIMPLE_LIST_VERSION: &str = "1.0";

const CONTENTS_FILE: &str = "list_contents.json";
const OTHER_CONTENTS: &str = "other_contents";

/// A JSON number that may also be spelled `"NaN"`, `"Inf"` or `"-Inf"`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct JsonNumber(f64);

impl Serialize for JsonNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.0;
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value == f64::INFINITY {
            serializer.serialize_str("Inf")
        } else if value == f64::NEG_INFINITY {
            serializer.serialize_str("-Inf")
        } else {
            serializer.serialize_f64(value)
        }
    }
}

impl<'de> Deserialize<'de> for JsonNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(JsonNumber(value)),
            Raw::Text(text) => match text.as_str() {
                "NaN" => Ok(JsonNumber(f64::NAN)),
                "Inf" => Ok(JsonNumber(f64::INFINITY)),
                "-Inf" => Ok(JsonNumber(f64::NEG_INFINITY)),
                other => Err(de::Error::custom(format!("invalid number '{}'", other))),
            },
        }
    }
}

/// `values` of an atomic vector; a bare scalar is a length-one vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Entries<T> {
    Many(Vec<Option<T>>),
    One(Option<T>),
}

impl<T> Entries<T> {
    fn new(values: Vec<Option<T>>, scalar: bool) -> Self {
        if scalar && values.len() == 1 {
            let mut values = values;
            Entries::One(values.pop().flatten())
        } else {
            Entries::Many(values)
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self, Entries::One(_))
    }

    fn into_vec(self) -> Vec<Option<T>> {
        match self {
            Entries::Many(values) => values,
            Entries::One(value) => vec![value],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    List {
        values: Vec<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        names: Option<Vec<String>>,
    },
    Integer {
        values: Entries<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        names: Option<Vec<String>>,
    },
    Number {
        values: Entries<JsonNumber>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        names: Option<Vec<String>>,
    },
    Boolean {
        values: Entries<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        names: Option<Vec<String>>,
    },
    String {
        values: Entries<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        names: Option<Vec<String>>,
    },
    Factor {
        values: Entries<i32>,
        levels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        names: Option<Vec<String>>,
    },
    Nothing,
    External {
        index: usize,
    },
}

#[tracing::instrument(skip(metadata, storage, options, dispatch))]
pub async fn read_list(
    path: &str,
    metadata: &ObjectMetadata,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<List> {
    if let Some(format) = metadata
        .field(SIMPLE_LIST, "format")
        .and_then(serde_json::Value::as_str)
    {
        if format != "json" {
            return Err(StowageError::UnsupportedType {
                tag: format!("{} ({})", SIMPLE_LIST, format),
                path: path.to_string(),
            });
        }
    }

    let contents = storage
        .fs
        .get_bytes(&join_path([path, CONTENTS_FILE]))
        .await?;
    let root: Node = serde_json::from_slice(&contents)
        .map_err(|e| StowageError::format(path, format!("unreadable list contents: {}", e)))?;

    let mut indices = Vec::new();
    collect_externals(&root, &mut indices);
    indices.sort_unstable();
    indices.dedup();

    let mut externals = HashMap::with_capacity(indices.len());
    for index in indices {
        let side_path = join_path([path, OTHER_CONTENTS, &index.to_string()]);
        let object = dispatch
            .read_object(&side_path, None, storage, options)
            .await?;
        externals.insert(index, object);
    }

    match node_to_object(root, &mut externals, path)? {
        Object::List(list) => Ok(list),
        other => Err(StowageError::format(
            path,
            format!("list contents hold a {} instead of a list", other.kind()),
        )),
    }
}

fn collect_externals(node: &Node, indices: &mut Vec<usize>) {
    match node {
        Node::External { index } => indices.push(*index),
        Node::List { values, .. } => {
            for value in values {
                collect_externals(value, indices);
            }
        }
        _ => {}
    }
}

fn check_names(names: &Option<Vec<String>>, len: usize, path: &str) -> StowageResult<()> {
    match names {
        Some(names) if names.len() != len => Err(StowageError::format(
            path,
            format!("{} names for {} list entries", names.len(), len),
        )),
        _ => Ok(()),
    }
}

fn vector<T>(
    values: Entries<T>,
    names: Option<Vec<String>>,
    path: &str,
    build: impl FnOnce(Vec<Option<T>>) -> ArrayRef,
) -> StowageResult<Object> {
    let scalar = values.is_scalar();
    let values = values.into_vec();
    check_names(&names, values.len(), path)?;
    let data = build(values);
    let vector = if scalar {
        Vector::scalar(data)
    } else {
        Vector::new(data)
    };
    Ok(Object::Vector(vector.with_names(names)))
}

fn node_to_object(
    node: Node,
    externals: &mut HashMap<usize, Object>,
    path: &str,
) -> StowageResult<Object> {
    match node {
        Node::List { values, names } => {
            check_names(&names, values.len(), path)?;
            let values = values
                .into_iter()
                .map(|value| node_to_object(value, externals, path))
                .collect::<StowageResult<Vec<_>>>()?;
            Ok(Object::List(List { values, names }))
        }
        Node::Integer { values, names } => vector(values, names, path, |v| {
            Arc::new(Int32Array::from(v))
        }),
        Node::Number { values, names } => vector(values, names, path, |v| {
            Arc::new(Float64Array::from(
                v.into_iter().map(|n| n.map(|n| n.0)).collect::<Vec<_>>(),
            ))
        }),
        Node::Boolean { values, names } => vector(values, names, path, |v| {
            Arc::new(BooleanArray::from(v))
        }),
        Node::String { values, names } => vector(values, names, path, |v| {
            Arc::new(StringArray::from(v))
        }),
        Node::Factor {
            values,
            levels,
            names,
        } => {
            let codes = values.into_vec();
            let strings = codes
                .into_iter()
                .map(|code| match code {
                    None => Ok(None),
                    Some(code) => usize::try_from(code)
                        .ok()
                        .and_then(|i| levels.get(i))
                        .cloned()
                        .map(Some)
                        .ok_or_else(|| {
                            StowageError::format(path, format!("factor code {} has no level", code))
                        }),
                })
                .collect::<StowageResult<Vec<_>>>()?;
            vector(Entries::Many(strings), names, path, |v| {
                Arc::new(StringArray::from(v))
            })
        }
        Node::Nothing => Ok(Object::Nothing),
        Node::External { index } => externals.remove(&index).ok_or_else(|| {
            StowageError::format(path, format!("external {} is referenced twice", index))
        }),
    }
}

#[tracing::instrument(skip(list, storage, options, dispatch))]
pub async fn save_list(
    list: &List,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    storage.fs.mkdir(path).await?;
    match write_list(list, path, storage, options, dispatch).await {
        Ok(()) => {
            tracing::info!("saved list with {} entries at '{}'", list.len(), path);
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = storage.fs.remove(path).await {
                tracing::warn!("failed to remove partial list at '{}': {}", path, cleanup);
            }
            Err(e)
        }
    }
}

async fn write_list(
    list: &List,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    let mut metadata = ObjectMetadata::new(SIMPLE_LIST, SIMPLE_LIST_VERSION);
    metadata.set_field(SIMPLE_LIST, "format", "json");
    write_object_file(path, &metadata, storage).await?;

    let mut externals = Vec::new();
    let root = list_to_node(list, &mut externals, path)?;
    let contents = serde_json::to_vec(&root)
        .map_err(|e| StowageError::format(path, format!("cannot serialize list: {}", e)))?;
    storage
        .fs
        .write(&join_path([path, CONTENTS_FILE]), Bytes::from(contents))
        .await?;

    if !externals.is_empty() {
        storage.fs.mkdir(&join_path([path, OTHER_CONTENTS])).await?;
    }
    for (index, object) in externals.into_iter().enumerate() {
        let side_path = join_path([path, OTHER_CONTENTS, &index.to_string()]);
        dispatch
            .save_object(object, &side_path, storage, options)
            .await?;
    }
    Ok(())
}

fn list_to_node<'a>(
    list: &'a List,
    externals: &mut Vec<&'a Object>,
    path: &str,
) -> StowageResult<Node> {
    if let Some(names) = &list.names {
        if names.len() != list.len() {
            return Err(StowageError::InvalidObject(format!(
                "list has {} names for {} entries",
                names.len(),
                list.len()
            )));
        }
    }

    let mut values = Vec::with_capacity(list.len());
    for value in &list.values {
        let node = match value {
            Object::List(nested) => list_to_node(nested, externals, path)?,
            Object::Vector(vector) => vector_to_node(vector, path)?,
            Object::Nothing => Node::Nothing,
            other => {
                externals.push(other);
                Node::External {
                    index: externals.len() - 1,
                }
            }
        };
        values.push(node);
    }
    Ok(Node::List {
        values,
        names: list.names.clone(),
    })
}

fn vector_to_node(vector: &Vector, path: &str) -> StowageResult<Node> {
    let data = vector.data();
    let names = vector.names().map(<[String]>::to_vec);
    if let Some(names) = &names {
        if names.len() != data.len() {
            return Err(StowageError::InvalidObject(format!(
                "vector has {} names for {} entries",
                names.len(),
                data.len()
            )));
        }
    }
    let scalar = vector.is_scalar();

    let node = match data.data_type() {
        ArrowType::Int8 | ArrowType::UInt8 | ArrowType::Int16 | ArrowType::UInt16 | ArrowType::Int32 => {
            integer_node(data, scalar, names)?
        }
        ArrowType::UInt32 | ArrowType::Int64 | ArrowType::UInt64 => {
            let wide = cast(data.as_ref(), &ArrowType::Int64)?;
            if fits_integer(wide.as_primitive::<Int64Type>().iter().flatten()) {
                integer_node(data, scalar, names)?
            } else {
                number_node(data, scalar, names)?
            }
        }
        ArrowType::Float16 | ArrowType::Float32 | ArrowType::Float64 => {
            number_node(data, scalar, names)?
        }
        ArrowType::Boolean => Node::Boolean {
            values: Entries::new(data.as_boolean().iter().collect(), scalar),
            names,
        },
        ArrowType::Null => Node::Boolean {
            values: Entries::new(vec![None; data.len()], scalar),
            names,
        },
        ArrowType::Utf8 | ArrowType::LargeUtf8 => {
            let strings = cast(data.as_ref(), &ArrowType::Utf8)?;
            Node::String {
                values: Entries::new(
                    strings
                        .as_string::<i32>()
                        .iter()
                        .map(|s| s.map(str::to_string))
                        .collect(),
                    scalar,
                ),
                names,
            }
        }
        ArrowType::Dictionary(_, value)
            if matches!(value.as_ref(), ArrowType::Utf8 | ArrowType::LargeUtf8) =>
        {
            let normalized = cast(
                data.as_ref(),
                &ArrowType::Dictionary(Box::new(ArrowType::Int32), Box::new(ArrowType::Utf8)),
            )?;
            let dictionary = normalized.as_dictionary::<Int32Type>();
            let levels = dictionary
                .values()
                .as_string::<i32>()
                .iter()
                .map(|level| level.unwrap_or_default().to_string())
                .collect();
            Node::Factor {
                values: Entries::new(dictionary.keys().iter().collect(), scalar),
                levels,
                names,
            }
        }
        other => {
            return Err(StowageError::UnsupportedType {
                tag: format!("{} vector", other),
                path: path.to_string(),
            })
        }
    };
    Ok(node)
}

fn integer_node(data: &ArrayRef, scalar: bool, names: Option<Vec<String>>) -> StowageResult<Node> {
    let ints = cast(data.as_ref(), &ArrowType::Int32)?;
    Ok(Node::Integer {
        values: Entries::new(ints.as_primitive::<Int32Type>().iter().collect(), scalar),
        names,
    })
}

fn number_node(data: &ArrayRef, scalar: bool, names: Option<Vec<String>>) -> StowageResult<Node> {
    let floats = cast(data.as_ref(), &ArrowType::Float64)?;
    Ok(Node::Number {
        values: Entries::new(
            floats
                .as_primitive::<Float64Type>()
                .iter()
                .map(|v| v.map(JsonNumber))
                .collect(),
            scalar,
        ),
        names,
    })
}
