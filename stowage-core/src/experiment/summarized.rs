use stowage_storage::Storage;

use super::*;
use crate::{
    metadata::{
        read_annotated_metadata, save_annotated_metadata, write_object_file, ObjectMetadata,
    },
    object::{DataFrame, SummarizedExperiment},
};

const ASSAYS: &str = "assays";
const ROW_DATA: &str = "row_data";
const COLUMN_DATA: &str = "column_data";
const OTHER_DATA: &str = "other_data";

/// `[rows, columns]` recorded in the `summarized_experiment` section.
pub(super) fn dimensions(path: &str, metadata: &ObjectMetadata) -> StowageResult<(usize, usize)> {
    let invalid = |reason: &str| StowageError::InvalidMetadata {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    let dims = metadata
        .field(SUMMARIZED_EXPERIMENT, "dimensions")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| invalid("missing 'summarized_experiment.dimensions'"))?;
    match dims.as_slice() {
        [rows, columns] => {
            let extent = |v: &serde_json::Value| {
                v.as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| invalid("dimensions must be non-negative integers"))
            };
            Ok((extent(rows)?, extent(columns)?))
        }
        _ => Err(invalid("dimensions must have two entries")),
    }
}

/// Reads an annotation frame; its row names become the experiment's names.
async fn read_annotations(
    path: &str,
    expected_rows: usize,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<(DataFrame, Option<Vec<String>>)> {
    if !storage.fs.exists(path).await? {
        return Ok((DataFrame::new(expected_rows), None));
    }

    let mut frame = match dispatch.read_object(path, None, storage, options).await? {
        Object::DataFrame(frame) => frame,
        other => {
            return Err(StowageError::format(
                path,
                format!("expected a data frame, found {}", other.kind()),
            ))
        }
    };
    if frame.row_count() != expected_rows {
        return Err(StowageError::format(
            path,
            format!(
                "annotations have {} rows, expected {}",
                frame.row_count(),
                expected_rows
            ),
        ));
    }
    let names = frame.row_names().map(<[String]>::to_vec);
    frame.set_row_names(None);
    Ok((frame, names))
}

/// Decodes the parts shared with single-cell experiments.
pub(super) async fn read_experiment_components(
    path: &str,
    metadata: &ObjectMetadata,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<SummarizedExperiment> {
    let (rows, columns) = dimensions(path, metadata)?;

    let assays = read_components(
        &join_path([path, ASSAYS]),
        (Some(rows), Some(columns)),
        &options.read_assays,
        storage,
        options,
        dispatch,
    )
    .await?;
    let (row_data, row_names) =
        read_annotations(&join_path([path, ROW_DATA]), rows, storage, options, dispatch).await?;
    let (column_data, column_names) = read_annotations(
        &join_path([path, COLUMN_DATA]),
        columns,
        storage,
        options,
        dispatch,
    )
    .await?;
    let metadata = read_annotated_metadata(
        &join_path([path, OTHER_DATA]),
        storage,
        options,
        &options.read_experiment_metadata,
        dispatch,
    )
    .await?;

    Ok(SummarizedExperiment {
        assays,
        row_data,
        column_data,
        row_names,
        column_names,
        metadata,
    })
}

#[tracing::instrument(skip(metadata, storage, options, dispatch))]
pub async fn read_summarized_experiment(
    path: &str,
    metadata: &ObjectMetadata,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<SummarizedExperiment> {
    read_experiment_components(path, metadata, storage, options, dispatch).await
}

/// Envelope sections describing the experiment's extents.
pub(super) fn experiment_metadata(object_type: &str, se: &SummarizedExperiment) -> ObjectMetadata {
    let mut metadata = ObjectMetadata::new(object_type, EXPERIMENT_VERSION);
    metadata.set_field(SUMMARIZED_EXPERIMENT, "version", EXPERIMENT_VERSION);
    metadata.set_field(
        SUMMARIZED_EXPERIMENT,
        "dimensions",
        serde_json::json!([se.row_count(), se.column_count()]),
    );
    metadata
}

/// Writes the parts shared with single-cell experiments into an existing directory.
pub(super) async fn save_experiment_components(
    se: &SummarizedExperiment,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    save_components(&join_path([path, ASSAYS]), &se.assays, storage, options, dispatch).await?;

    // Names live on the experiment; whatever the annotation frames carry is replaced.
    let row_data = se.row_data.clone().with_row_names(se.row_names.clone());
    dispatch
        .save_object(
            &Object::DataFrame(row_data),
            &join_path([path, ROW_DATA]),
            storage,
            options,
        )
        .await?;
    let column_data = se
        .column_data
        .clone()
        .with_row_names(se.column_names.clone());
    dispatch
        .save_object(
            &Object::DataFrame(column_data),
            &join_path([path, COLUMN_DATA]),
            storage,
            options,
        )
        .await?;

    save_annotated_metadata(
        &se.metadata,
        &join_path([path, OTHER_DATA]),
        storage,
        options,
        dispatch,
    )
    .await
}

#[tracing::instrument(skip(se, storage, options, dispatch))]
pub async fn save_summarized_experiment(
    se: &SummarizedExperiment,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    se.validate()?;
    storage.fs.mkdir(path).await?;

    let result = async {
        write_object_file(path, &experiment_metadata(SUMMARIZED_EXPERIMENT, se), storage).await?;
        save_experiment_components(se, path, storage, options, dispatch).await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::info!(
                "saved summarized experiment ({} x {}) at '{}'",
                se.row_count(),
                se.column_count(),
                path
            );
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = storage.fs.remove(path).await {
                tracing::warn!("failed to remove partial experiment at '{}': {}", path, cleanup);
            }
            Err(e)
        }
    }
}
