use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray};
use stowage_storage::{
    AttributeValue, Attributes, Child, ContainerFile, DataSet, GetOptions, Group, OpenMode,
    Storage, Values,
};

use super::*;
use crate::{
    dispatch::ObjectDispatch,
    error::{StowageError, StowageResult},
    metadata::{join_path, read_annotated_metadata, ObjectMetadata},
    object::{Column, DataFrame},
    options::{Options, ReadOverride},
    placeholder::MISSING_VALUE_PLACEHOLDER,
};

/// Columns read from the container; `None` marks a delegated column.
struct InlineFrame {
    row_count: usize,
    column_names: Vec<String>,
    columns: Vec<Option<ArrayRef>>,
    row_names: Option<Vec<String>>,
}

#[tracing::instrument(skip(_metadata, storage, options, dispatch))]
pub async fn read_data_frame(
    path: &str,
    _metadata: &ObjectMetadata,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<DataFrame> {
    let container_path = join_path([path, CONTAINER_FILE]);
    let contents = storage
        .fs
        .get(
            &container_path,
            GetOptions {
                as_buffer: options.force_buffer,
            },
        )
        .await?;

    let inline = match storage.container.open(&contents, OpenMode::ReadOnly).await {
        Ok(file) => read_container(file.as_ref(), path),
        Err(e) => Err(e.into()),
    };
    storage.fs.clean(contents).await?;
    let inline = inline?;

    let mut frame = DataFrame::new(inline.row_count).with_row_names(inline.row_names);
    for (index, (name, column)) in inline
        .column_names
        .into_iter()
        .zip(inline.columns)
        .enumerate()
    {
        let column = match column {
            Some(array) => Column::Array(array),
            None => {
                let side_path = join_path([path, OTHER_COLUMNS, &index.to_string()]);
                tracing::debug!("column '{}' is delegated to '{}'", name, side_path);
                Column::Object(
                    dispatch
                        .read_object(&side_path, None, storage, options)
                        .await?,
                )
            }
        };
        frame.push_column(name, column);
    }

    let read_metadata = if options.data_frame_read_metadata {
        ReadOverride::Default
    } else {
        ReadOverride::Skip
    };
    let metadata = read_annotated_metadata(
        &join_path([path, OTHER_ANNOTATIONS]),
        storage,
        options,
        &read_metadata,
        dispatch,
    )
    .await?;

    Ok(frame.with_metadata(metadata))
}

/// Reads every inline column. All handles are released when this returns.
fn read_container(file: &dyn ContainerFile, path: &str) -> StowageResult<InlineFrame> {
    let root = file.root()?;
    let group = root.open_group(GROUP)?;

    let row_count = group
        .read_attribute(ROW_COUNT)?
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| StowageError::format(path, "'row-count' is not an unsigned integer"))?;
    let column_names = read_strings(group.open_dataset(COLUMN_NAMES)?.as_ref(), path)?;

    let data = group.open_group(DATA_GROUP)?;
    let present = data.children()?;
    let mut columns = Vec::with_capacity(column_names.len());
    for (index, name) in column_names.iter().enumerate() {
        let key = index.to_string();
        if !present.contains(&key) {
            columns.push(None);
            continue;
        }

        let array = match data.open(&key)? {
            Child::DataSet(dataset) => read_leaf(dataset.as_ref(), row_count, name, path)?,
            Child::Group(nested) => read_nested(nested.as_ref(), name, path)?,
        };
        if array.len() != row_count {
            return Err(StowageError::format(
                path,
                format!(
                    "column '{}' has {} entries for {} rows",
                    name,
                    array.len(),
                    row_count
                ),
            ));
        }
        columns.push(Some(array));
    }

    let row_names = if group.has_child(ROW_NAMES)? {
        Some(read_strings(group.open_dataset(ROW_NAMES)?.as_ref(), path)?)
    } else {
        None
    };

    Ok(InlineFrame {
        row_count,
        column_names,
        columns,
        row_names,
    })
}

fn read_strings(dataset: &dyn DataSet, path: &str) -> StowageResult<Vec<String>> {
    dataset.values()?.into_strings().ok_or_else(|| {
        StowageError::format(path, format!("'{}' is not a string dataset", dataset.location()))
    })
}

fn read_placeholder<A: Attributes + ?Sized>(handle: &A) -> StowageResult<Option<AttributeValue>> {
    if handle.has_attribute(MISSING_VALUE_PLACEHOLDER)? {
        Ok(Some(handle.read_attribute(MISSING_VALUE_PLACEHOLDER)?))
    } else {
        Ok(None)
    }
}

fn bad_placeholder(column: &str, path: &str) -> StowageError {
    StowageError::format(
        path,
        format!("placeholder of column '{}' does not match its type", column),
    )
}

fn wrong_values(column: &str, column_type: &str, path: &str) -> StowageError {
    StowageError::format(
        path,
        format!("column '{}' does not hold {} values", column, column_type),
    )
}

fn read_leaf(
    dataset: &dyn DataSet,
    row_count: usize,
    column: &str,
    path: &str,
) -> StowageResult<ArrayRef> {
    let column_type = dataset.read_string_attribute(TYPE)?;
    let placeholder = read_placeholder(dataset)?;
    let raw = dataset.values()?;

    let array: ArrayRef = match column_type.as_str() {
        INTEGER => {
            let values = raw
                .to_i64()
                .ok_or_else(|| wrong_values(column, INTEGER, path))?;
            let missing = placeholder
                .map(|p| p.as_i64().ok_or_else(|| bad_placeholder(column, path)))
                .transpose()?;
            let decoded = values
                .into_iter()
                .map(|v| {
                    if Some(v) == missing {
                        Ok(None)
                    } else {
                        i32::try_from(v)
                            .map(Some)
                            .map_err(|_| wrong_values(column, INTEGER, path))
                    }
                })
                .collect::<StowageResult<Vec<_>>>()?;
            Arc::new(Int32Array::from(decoded))
        }
        NUMBER => {
            let values = raw
                .to_f64()
                .ok_or_else(|| wrong_values(column, NUMBER, path))?;
            let missing = placeholder
                .map(|p| p.as_f64().ok_or_else(|| bad_placeholder(column, path)))
                .transpose()?;
            let decoded: Vec<Option<f64>> = values
                .into_iter()
                .map(|v| match missing {
                    Some(p) if p.is_nan() && v.is_nan() => None,
                    Some(p) if v == p => None,
                    _ => Some(v),
                })
                .collect();
            Arc::new(Float64Array::from(decoded))
        }
        BOOLEAN => {
            let values = raw
                .to_i64()
                .ok_or_else(|| wrong_values(column, BOOLEAN, path))?;
            let missing = placeholder
                .map(|p| p.as_i64().ok_or_else(|| bad_placeholder(column, path)))
                .transpose()?;
            if values.is_empty() && row_count > 0 {
                // Older writers store all-missing columns without any entries.
                Arc::new(BooleanArray::from(vec![None::<bool>; row_count]))
            } else {
                let decoded: Vec<Option<bool>> = values
                    .into_iter()
                    .map(|v| (Some(v) != missing).then_some(v != 0))
                    .collect();
                Arc::new(BooleanArray::from(decoded))
            }
        }
        STRING => {
            let values = raw
                .into_strings()
                .ok_or_else(|| wrong_values(column, STRING, path))?;
            let missing = placeholder
                .map(|p| {
                    p.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| bad_placeholder(column, path))
                })
                .transpose()?;
            Arc::new(mask_strings(values, missing.as_deref()))
        }
        other => {
            return Err(StowageError::UnsupportedColumnType {
                column: column.to_string(),
                column_type: other.to_string(),
                path: path.to_string(),
            })
        }
    };
    Ok(array)
}

fn mask_strings(values: Vec<String>, missing: Option<&str>) -> StringArray {
    let decoded: Vec<Option<String>> = values
        .into_iter()
        .map(|v| (Some(v.as_str()) != missing).then_some(v))
        .collect();
    StringArray::from(decoded)
}

fn read_nested(group: &dyn Group, column: &str, path: &str) -> StowageResult<ArrayRef> {
    let group_type = group.read_string_attribute(TYPE)?;
    match group_type.as_str() {
        FACTOR => read_factor(group, column, path),
        VLS => read_vls(group, column, path),
        other => Err(StowageError::UnsupportedColumnType {
            column: column.to_string(),
            column_type: other.to_string(),
            path: path.to_string(),
        }),
    }
}

/// Factors are flattened to their level strings.
fn read_factor(group: &dyn Group, column: &str, path: &str) -> StowageResult<ArrayRef> {
    let levels = read_strings(group.open_dataset("levels")?.as_ref(), path)?;

    let (codes, missing) = {
        let codes = group.open_dataset("codes")?;
        let missing = read_placeholder(codes.as_ref())?
            .map(|p| p.as_i64().ok_or_else(|| bad_placeholder(column, path)))
            .transpose()?;
        let values = codes
            .values()?
            .to_i64()
            .ok_or_else(|| wrong_values(column, "factor code", path))?;
        (values, missing)
    };

    let decoded = codes
        .into_iter()
        .map(|code| {
            if Some(code) == missing {
                return Ok(None);
            }
            usize::try_from(code)
                .ok()
                .and_then(|i| levels.get(i))
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    StowageError::format(
                        path,
                        format!("code {} of factor column '{}' has no level", code, column),
                    )
                })
        })
        .collect::<StowageResult<Vec<_>>>()?;
    Ok(Arc::new(StringArray::from(decoded)))
}

fn read_vls(group: &dyn Group, column: &str, path: &str) -> StowageResult<ArrayRef> {
    let heap = group.open_dataset("heap")?.values()?;
    let heap = heap
        .as_bytes()
        .ok_or_else(|| wrong_values(column, "heap byte", path))?;

    let (offsets, lengths, missing) = {
        let pointers = group.open_dataset("pointers")?;
        let missing = read_placeholder(pointers.as_ref())?
            .map(|p| {
                p.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| bad_placeholder(column, path))
            })
            .transpose()?;
        let records = pointers.values()?;
        let member = |name: &str| -> StowageResult<Vec<i64>> {
            records
                .member(name)
                .and_then(Values::to_i64)
                .ok_or_else(|| wrong_values(column, "pointer", path))
        };
        (member("offset")?, member("length")?, missing)
    };

    let mut decoded = Vec::with_capacity(offsets.len());
    for (&offset, &length) in offsets.iter().zip(&lengths) {
        let span = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(length).ok())
            .and_then(|(start, len)| heap.get(start..start.checked_add(len)?))
            .ok_or_else(|| {
                StowageError::format(
                    path,
                    format!(
                        "pointer ({}, {}) of column '{}' is outside the heap",
                        offset, length, column
                    ),
                )
            })?;
        let span = match span.iter().position(|&b| b == 0) {
            Some(end) => &span[..end],
            None => span,
        };
        let text = std::str::from_utf8(span).map_err(|_| {
            StowageError::format(path, format!("column '{}' holds invalid UTF-8", column))
        })?;
        decoded.push(text.to_string());
    }

    Ok(Arc::new(mask_strings(decoded, missing.as_deref())))
}
