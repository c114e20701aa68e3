use std::borrow::Cow;

use arrow::{
    array::{Array, ArrayRef, AsArray},
    compute::cast,
    datatypes::{DataType as ArrowType, Float64Type, Int32Type},
};
use stowage_config::StringEncoding;
use stowage_storage::{AttributeValue, Completion, ContainerFile, Storage, Values};

use super::*;
use crate::{
    dispatch::ObjectDispatch,
    error::StowageResult,
    metadata::{join_path, save_annotated_metadata, write_object_file, ObjectMetadata},
    object::{Column, DataFrame, List, Object, Value, Vector},
    options::Options,
    placeholder::{
        fits_integer, float_placeholder, integer_placeholder, string_placeholder,
        BOOLEAN_PLACEHOLDER, MISSING_VALUE_PLACEHOLDER,
    },
};

/// On-disk form chosen for one column.
enum Encoded<'a> {
    Leaf {
        column_type: &'static str,
        values: Values,
        placeholder: Option<AttributeValue>,
    },
    Factor {
        levels: Vec<String>,
        codes: Vec<i32>,
        placeholder: Option<i32>,
    },
    Vls {
        heap: Vec<u8>,
        offsets: Vec<u64>,
        lengths: Vec<u64>,
        placeholder: Option<String>,
    },
    Delegated(Cow<'a, Object>),
}

#[tracing::instrument(skip(frame, storage, options, dispatch))]
pub async fn save_data_frame(
    frame: &DataFrame,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    frame.validate()?;
    storage.fs.mkdir(path).await?;

    match write_data_frame(frame, path, storage, options, dispatch).await {
        Ok(()) => {
            tracing::info!(
                "saved data frame with {} rows and {} columns at '{}'",
                frame.row_count(),
                frame.column_count(),
                path
            );
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = storage.fs.remove(path).await {
                tracing::warn!("failed to remove partial data frame at '{}': {}", path, cleanup);
            }
            Err(e)
        }
    }
}

async fn write_data_frame(
    frame: &DataFrame,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    write_object_file(
        path,
        &ObjectMetadata::new(DATA_FRAME, DATA_FRAME_VERSION),
        storage,
    )
    .await?;

    let container_path = join_path([path, CONTAINER_FILE]);
    let file = storage.container.create(&container_path).await?;
    let delegated = match write_container(file.as_ref(), frame, options.string_encoding) {
        Ok(delegated) => delegated,
        Err(e) => {
            if let Err(discard) = storage.container.finalize(file, Completion::Failed).await {
                tracing::warn!("failed to discard '{}': {}", container_path, discard);
            }
            return Err(e);
        }
    };
    if let Some(bytes) = storage
        .container
        .finalize(file, Completion::Success)
        .await?
    {
        storage.fs.write(&container_path, bytes).await?;
    }

    if !delegated.is_empty() {
        storage.fs.mkdir(&join_path([path, OTHER_COLUMNS])).await?;
    }
    for (index, object) in delegated {
        let side_path = join_path([path, OTHER_COLUMNS, &index.to_string()]);
        tracing::debug!("delegating column {} ({}) to '{}'", index, object.kind(), side_path);
        dispatch
            .save_object(&object, &side_path, storage, options)
            .await?;
    }

    save_annotated_metadata(
        frame.metadata(),
        &join_path([path, OTHER_ANNOTATIONS]),
        storage,
        options,
        dispatch,
    )
    .await
}

/// Writes every inline column and returns the columns left for the dispatcher.
fn write_container<'a>(
    file: &dyn ContainerFile,
    frame: &'a DataFrame,
    encoding: StringEncoding,
) -> StowageResult<Vec<(usize, Cow<'a, Object>)>> {
    let root = file.root()?;
    let group = root.create_group(GROUP)?;
    group.write_attribute(ROW_COUNT, AttributeValue::UInt64(frame.row_count() as u64))?;
    group.write_vector(COLUMN_NAMES, Values::String(frame.column_names().to_vec()))?;
    if let Some(row_names) = frame.row_names() {
        group.write_vector(ROW_NAMES, Values::String(row_names.to_vec()))?;
    }

    let data = group.create_group(DATA_GROUP)?;
    let mut delegated = Vec::new();
    for (index, column) in frame.columns().iter().enumerate() {
        let key = index.to_string();
        let encoded = match column {
            Column::Array(array) => encode_array(array, encoding)?,
            Column::Values(values) => encode_values(values, encoding)?,
            Column::Object(object) => Encoded::Delegated(Cow::Borrowed(object)),
        };

        match encoded {
            Encoded::Leaf {
                column_type,
                values,
                placeholder,
            } => {
                let dataset = data.write_vector(&key, values)?;
                dataset.write_attribute(TYPE, column_type.into())?;
                if let Some(placeholder) = placeholder {
                    dataset.write_attribute(MISSING_VALUE_PLACEHOLDER, placeholder)?;
                }
            }
            Encoded::Factor {
                levels,
                codes,
                placeholder,
            } => {
                let factor = data.create_group(&key)?;
                factor.write_attribute(TYPE, FACTOR.into())?;
                factor.write_vector("levels", Values::String(levels))?;
                let codes = factor.write_vector("codes", Values::Int32(codes))?;
                if let Some(placeholder) = placeholder {
                    codes.write_attribute(MISSING_VALUE_PLACEHOLDER, placeholder.into())?;
                }
            }
            Encoded::Vls {
                heap,
                offsets,
                lengths,
                placeholder,
            } => {
                let vls = data.create_group(&key)?;
                vls.write_attribute(TYPE, VLS.into())?;
                vls.write_vector("heap", Values::UInt8(heap))?;
                let pointers = vls.write_vector(
                    "pointers",
                    Values::Compound(vec![
                        ("offset".to_string(), Values::UInt64(offsets)),
                        ("length".to_string(), Values::UInt64(lengths)),
                    ]),
                )?;
                if let Some(placeholder) = placeholder {
                    pointers.write_attribute(MISSING_VALUE_PLACEHOLDER, placeholder.into())?;
                }
            }
            Encoded::Delegated(object) => delegated.push((index, object)),
        }
    }
    Ok(delegated)
}

fn encode_array(array: &ArrayRef, encoding: StringEncoding) -> StowageResult<Encoded<'static>> {
    let encoded = match array.data_type() {
        ArrowType::Null => encode_booleans(vec![None; array.len()]),
        ArrowType::Int8
        | ArrowType::UInt8
        | ArrowType::Int16
        | ArrowType::UInt16
        | ArrowType::Int32 => {
            let ints = cast(array.as_ref(), &ArrowType::Int32)?;
            encode_integers(ints.as_primitive::<Int32Type>().iter().collect())?
        }
        // Wider kinds do not fit the 32-bit integer domain and are stored as doubles.
        ArrowType::UInt32
        | ArrowType::Int64
        | ArrowType::UInt64
        | ArrowType::Float16
        | ArrowType::Float32
        | ArrowType::Float64 => {
            let floats = cast(array.as_ref(), &ArrowType::Float64)?;
            encode_floats(floats.as_primitive::<Float64Type>().iter().collect())?
        }
        ArrowType::Boolean => encode_booleans(array.as_boolean().iter().collect()),
        ArrowType::Utf8 | ArrowType::LargeUtf8 => {
            let strings = cast(array.as_ref(), &ArrowType::Utf8)?;
            encode_strings(strings.as_string::<i32>().iter().collect(), encoding)
        }
        ArrowType::Dictionary(_, value)
            if matches!(value.as_ref(), ArrowType::Utf8 | ArrowType::LargeUtf8) =>
        {
            encode_dictionary(array)?
        }
        other => {
            tracing::debug!("no inline encoding for {} columns", other);
            Encoded::Delegated(Cow::Owned(Object::Vector(Vector::new(array.clone()))))
        }
    };
    Ok(encoded)
}

fn encode_dictionary(array: &ArrayRef) -> StowageResult<Encoded<'static>> {
    let normalized = cast(
        array.as_ref(),
        &ArrowType::Dictionary(Box::new(ArrowType::Int32), Box::new(ArrowType::Utf8)),
    )?;
    let dictionary = normalized.as_dictionary::<Int32Type>();

    // Null dictionary entries are dropped; keys pointing at them become missing codes.
    let mut levels = Vec::new();
    let remap: Vec<Option<i32>> = dictionary
        .values()
        .as_string::<i32>()
        .iter()
        .map(|level| {
            level.map(|level| {
                levels.push(level.to_string());
                levels.len() as i32 - 1
            })
        })
        .collect();

    let codes: Vec<Option<i32>> = dictionary
        .keys()
        .iter()
        .map(|key| key.and_then(|key| remap.get(key as usize).copied().flatten()))
        .collect();
    let placeholder = if codes.iter().any(Option::is_none) {
        Some(integer_placeholder(codes.iter().flatten().copied())?)
    } else {
        None
    };
    Ok(Encoded::Factor {
        levels,
        codes: fill(codes, placeholder),
        placeholder,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Numeric,
    Boolean,
    String,
    Object,
}

fn encode_values(values: &[Value], encoding: StringEncoding) -> StowageResult<Encoded<'static>> {
    let mut kinds = Vec::new();
    for value in values {
        let kind = match value {
            Value::Null => continue,
            Value::Integer(_) | Value::Number(_) => Kind::Numeric,
            Value::Boolean(_) => Kind::Boolean,
            Value::String(_) => Kind::String,
            Value::Object(_) => Kind::Object,
        };
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }

    let encoded = match kinds.as_slice() {
        // Written with one placeholder per row so the row count survives a round trip.
        [] => encode_booleans(vec![None; values.len()]),
        [Kind::Numeric] => encode_numeric(values)?,
        [Kind::Boolean] => encode_booleans(
            values
                .iter()
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect(),
        ),
        [Kind::String] => encode_strings(
            values
                .iter()
                .map(|v| match v {
                    Value::String(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect(),
            encoding,
        ),
        _ => {
            tracing::debug!("mixed column of {:?} is stored as a list", kinds);
            let list = List::new(values.iter().cloned().map(Object::from).collect());
            Encoded::Delegated(Cow::Owned(Object::List(list)))
        }
    };
    Ok(encoded)
}

/// Integers stay `integer` unless a number is present or a value leaves the
/// 32-bit domain, in which case the whole column becomes `number`.
fn encode_numeric(values: &[Value]) -> StowageResult<Encoded<'static>> {
    let integers: Option<Vec<Option<i64>>> = values
        .iter()
        .map(|v| match v {
            Value::Integer(i) => Some(Some(*i)),
            Value::Null => Some(None),
            _ => None,
        })
        .collect();

    if let Some(integers) = integers {
        if fits_integer(integers.iter().flatten().copied()) {
            return encode_integers(
                integers
                    .into_iter()
                    .map(|v| v.and_then(|i| i32::try_from(i).ok()))
                    .collect(),
            );
        }
        tracing::debug!("integer column exceeds 32 bits, storing as number");
    }

    encode_floats(
        values
            .iter()
            .map(|v| match v {
                Value::Integer(i) => Some(*i as f64),
                Value::Number(n) => Some(*n),
                _ => None,
            })
            .collect(),
    )
}

fn fill<T: Copy + Default>(values: Vec<Option<T>>, placeholder: Option<T>) -> Vec<T> {
    let placeholder = placeholder.unwrap_or_default();
    values
        .into_iter()
        .map(|v| v.unwrap_or(placeholder))
        .collect()
}

fn encode_integers(values: Vec<Option<i32>>) -> StowageResult<Encoded<'static>> {
    let placeholder = if values.iter().any(Option::is_none) {
        Some(integer_placeholder(values.iter().flatten().copied())?)
    } else {
        None
    };
    Ok(Encoded::Leaf {
        column_type: INTEGER,
        values: Values::Int32(fill(values, placeholder)),
        placeholder: placeholder.map(AttributeValue::Int32),
    })
}

fn encode_floats(values: Vec<Option<f64>>) -> StowageResult<Encoded<'static>> {
    let placeholder = if values.iter().any(Option::is_none) {
        Some(float_placeholder(values.iter().flatten().copied())?)
    } else {
        None
    };
    Ok(Encoded::Leaf {
        column_type: NUMBER,
        values: Values::Float64(fill(values, placeholder)),
        placeholder: placeholder.map(AttributeValue::Float64),
    })
}

fn encode_booleans(values: Vec<Option<bool>>) -> Encoded<'static> {
    let has_missing = values.iter().any(Option::is_none);
    Encoded::Leaf {
        column_type: BOOLEAN,
        values: Values::UInt8(
            values
                .into_iter()
                .map(|v| v.map(u8::from).unwrap_or(BOOLEAN_PLACEHOLDER))
                .collect(),
        ),
        placeholder: has_missing.then_some(AttributeValue::UInt8(BOOLEAN_PLACEHOLDER)),
    }
}

/// Per-entry cost of a heap pointer: two 64-bit integers.
const VLS_POINTER_SIZE: usize = 16;

fn encode_strings(values: Vec<Option<&str>>, encoding: StringEncoding) -> Encoded<'static> {
    let placeholder = values
        .iter()
        .any(Option::is_none)
        .then(|| string_placeholder(values.iter().flatten().copied()));
    let filled: Vec<&str> = values
        .iter()
        .map(|&v| v.or(placeholder.as_deref()).unwrap_or_default())
        .collect();

    let max_len = filled.iter().map(|s| s.len()).max().unwrap_or(0);
    let sum_len: usize = filled.iter().map(|s| s.len()).sum();
    let padded = max_len * filled.len();
    // Heap strings end at the first NUL byte, so only the plain layout keeps them intact.
    let has_nul = filled.iter().any(|s| s.contains('\0'));
    if encoding == StringEncoding::Auto
        && !has_nul
        && padded > sum_len + VLS_POINTER_SIZE * filled.len()
    {
        let mut heap = Vec::with_capacity(sum_len);
        let mut offsets = Vec::with_capacity(filled.len());
        let mut lengths = Vec::with_capacity(filled.len());
        for s in &filled {
            offsets.push(heap.len() as u64);
            lengths.push(s.len() as u64);
            heap.extend_from_slice(s.as_bytes());
        }
        return Encoded::Vls {
            heap,
            offsets,
            lengths,
            placeholder,
        };
    }

    Encoded::Leaf {
        column_type: STRING,
        values: Values::String(filled.into_iter().map(str::to_string).collect()),
        placeholder: placeholder.map(AttributeValue::Utf8),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{DictionaryArray, Int32Array, Int64Array, StringArray};

    use super::*;

    fn leaf(encoded: Encoded<'_>) -> (&'static str, Values, Option<AttributeValue>) {
        match encoded {
            Encoded::Leaf {
                column_type,
                values,
                placeholder,
            } => (column_type, values, placeholder),
            _ => panic!("expected an inline dataset"),
        }
    }

    #[test]
    fn integer_overflow_demotes_to_number() {
        let values: Vec<Value> = [1, 2, 3, 1i64 << 31].map(Value::Integer).to_vec();
        let (column_type, stored, placeholder) =
            leaf(encode_values(&values, StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, NUMBER);
        assert_eq!(stored, Values::Float64(vec![1.0, 2.0, 3.0, 2147483648.0]));
        assert_eq!(placeholder, None);
    }

    #[test]
    fn integer_placeholder_search() {
        let values = vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Null,
            Value::Integer(i32::MAX as i64),
            Value::Integer(i32::MIN as i64),
            Value::Integer(0),
        ];
        let (column_type, stored, placeholder) =
            leaf(encode_values(&values, StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, INTEGER);
        assert_eq!(placeholder, Some(AttributeValue::Int32(i32::MIN + 1)));
        assert_eq!(
            stored,
            Values::Int32(vec![1, 2, i32::MIN + 1, i32::MAX, i32::MIN, 0])
        );
    }

    #[test]
    fn boolean_sentinel() {
        let values = vec![Value::Boolean(true), Value::Boolean(false), Value::Null];
        let (column_type, stored, placeholder) =
            leaf(encode_values(&values, StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, BOOLEAN);
        assert_eq!(stored, Values::UInt8(vec![1, 0, 2]));
        assert_eq!(placeholder, Some(AttributeValue::UInt8(2)));
    }

    #[test]
    fn string_placeholder_grows() {
        let values = vec![
            Value::String("NA".to_string()),
            Value::Null,
            Value::String("b".to_string()),
        ];
        let (column_type, stored, placeholder) =
            leaf(encode_values(&values, StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, STRING);
        assert_eq!(stored, Values::from(vec!["NA", "NA_", "b"]));
        assert_eq!(placeholder, Some(AttributeValue::Utf8("NA_".to_string())));
    }

    #[test]
    fn numbers_with_nulls_use_nan() {
        let values = vec![Value::Integer(1), Value::Number(2.5), Value::Null];
        let (column_type, stored, placeholder) =
            leaf(encode_values(&values, StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, NUMBER);
        assert!(matches!(placeholder, Some(AttributeValue::Float64(p)) if p.is_nan()));
        match stored {
            Values::Float64(v) => {
                assert_eq!(&v[..2], &[1.0, 2.5]);
                assert!(v[2].is_nan());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn all_missing_is_boolean() {
        let values = vec![Value::Null, Value::Null];
        let (column_type, stored, placeholder) =
            leaf(encode_values(&values, StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, BOOLEAN);
        assert_eq!(stored, Values::UInt8(vec![2, 2]));
        assert_eq!(placeholder, Some(AttributeValue::UInt8(2)));

        let (column_type, stored, placeholder) =
            leaf(encode_values(&[], StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, BOOLEAN);
        assert!(stored.is_empty());
        assert_eq!(placeholder, None);
    }

    #[test]
    fn mixed_values_are_delegated_as_lists() {
        let values = vec![Value::Integer(1), Value::String("a".to_string())];
        match encode_values(&values, StringEncoding::Fixed).unwrap() {
            Encoded::Delegated(object) => {
                assert_eq!(object.as_list().map(List::len), Some(2));
            }
            _ => panic!("mixed columns should be delegated"),
        }
    }

    #[test]
    fn wide_arrays_are_numbers() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]));
        let (column_type, _, placeholder) =
            leaf(encode_array(&array, StringEncoding::Fixed).unwrap());
        assert_eq!(column_type, NUMBER);
        assert!(matches!(placeholder, Some(AttributeValue::Float64(p)) if p.is_nan()));
    }

    #[test]
    fn long_strings_use_vls_when_allowed() {
        let long = "x".repeat(200);
        let array: ArrayRef = Arc::new(StringArray::from(vec![
            Some("a"),
            Some(long.as_str()),
            None,
            Some("b"),
        ]));

        assert!(matches!(
            encode_array(&array, StringEncoding::Fixed).unwrap(),
            Encoded::Leaf { column_type: STRING, .. }
        ));
        match encode_array(&array, StringEncoding::Auto).unwrap() {
            Encoded::Vls {
                heap,
                offsets,
                lengths,
                placeholder,
            } => {
                assert_eq!(placeholder.as_deref(), Some("NA"));
                assert_eq!(offsets, vec![0, 1, 201, 203]);
                assert_eq!(lengths, vec![1, 200, 2, 1]);
                assert_eq!(heap.len(), 204);
            }
            _ => panic!("expected a vls column"),
        }
    }

    #[test]
    fn strings_with_nul_bytes_stay_plain() {
        let long = "z".repeat(300);
        let array: ArrayRef = Arc::new(StringArray::from(vec![
            Some("NA\0tail"),
            None,
            Some(long.as_str()),
        ]));
        let (column_type, _, placeholder) =
            leaf(encode_array(&array, StringEncoding::Auto).unwrap());
        assert_eq!(column_type, STRING);
        assert_eq!(placeholder, Some(AttributeValue::Utf8("NA".to_string())));
    }

    #[test]
    fn null_dictionary_entries_become_missing_codes() {
        let keys = Int32Array::from(vec![0, 1, 2, 1]);
        let values: ArrayRef = Arc::new(StringArray::from(vec![Some("lo"), None, Some("hi")]));
        let dictionary: ArrayRef = Arc::new(DictionaryArray::new(keys, values));
        match encode_array(&dictionary, StringEncoding::Fixed).unwrap() {
            Encoded::Factor {
                levels,
                codes,
                placeholder,
            } => {
                assert_eq!(levels, vec!["lo", "hi"]);
                assert_eq!(placeholder, Some(i32::MIN));
                assert_eq!(codes, vec![0, i32::MIN, 1, i32::MIN]);
            }
            _ => panic!("expected a factor"),
        }
    }
}
