use stowage_storage::Storage;

use super::{
    summarized::{experiment_metadata, read_experiment_components, save_experiment_components},
    *,
};
use crate::{
    metadata::{write_object_file, ObjectMetadata},
    object::SingleCellExperiment,
};

const REDUCED_DIMENSIONS: &str = "reduced_dimensions";
const ALTERNATIVE_EXPERIMENTS: &str = "alternative_experiments";

#[tracing::instrument(skip(metadata, storage, options, dispatch))]
pub async fn read_single_cell_experiment(
    path: &str,
    metadata: &ObjectMetadata,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<SingleCellExperiment> {
    let experiment = read_experiment_components(path, metadata, storage, options, dispatch).await?;
    let columns = experiment.column_count();

    let reduced_dimensions = read_components(
        &join_path([path, REDUCED_DIMENSIONS]),
        (Some(columns), None),
        &options.read_reduced_dimensions,
        storage,
        options,
        dispatch,
    )
    .await?;
    let alternative_experiments = read_components(
        &join_path([path, ALTERNATIVE_EXPERIMENTS]),
        (None, Some(columns)),
        &options.read_alternative_experiments,
        storage,
        options,
        dispatch,
    )
    .await?;
    let main_experiment_name = metadata
        .field(SINGLE_CELL_EXPERIMENT, "main_experiment_name")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    Ok(SingleCellExperiment {
        experiment,
        reduced_dimensions,
        alternative_experiments,
        main_experiment_name,
    })
}

#[tracing::instrument(skip(sce, storage, options, dispatch))]
pub async fn save_single_cell_experiment(
    sce: &SingleCellExperiment,
    path: &str,
    storage: &Storage,
    options: &Options,
    dispatch: &dyn ObjectDispatch,
) -> StowageResult<()> {
    sce.validate()?;
    storage.fs.mkdir(path).await?;

    let result = async {
        let mut metadata = experiment_metadata(SINGLE_CELL_EXPERIMENT, &sce.experiment);
        if let Some(name) = &sce.main_experiment_name {
            metadata.set_field(SINGLE_CELL_EXPERIMENT, "main_experiment_name", name.as_str());
        }
        write_object_file(path, &metadata, storage).await?;

        save_experiment_components(&sce.experiment, path, storage, options, dispatch).await?;
        save_components(
            &join_path([path, REDUCED_DIMENSIONS]),
            &sce.reduced_dimensions,
            storage,
            options,
            dispatch,
        )
        .await?;
        save_components(
            &join_path([path, ALTERNATIVE_EXPERIMENTS]),
            &sce.alternative_experiments,
            storage,
            options,
            dispatch,
        )
        .await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::info!(
                "saved single-cell experiment ({} x {}) at '{}'",
                sce.experiment.row_count(),
                sce.experiment.column_count(),
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
