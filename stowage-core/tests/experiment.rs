use std::{any::Any, sync::Arc};

use arrow::array::{ArrayRef, Int32Array, StringArray};
use bytes::Bytes;
use parking_lot::Mutex;
use stowage_core::{
    join_path, read_object_file, write_object_file, ComponentReader, ComponentRequest, DataFrame,
    Dispatcher, ExternalObject, List, Object, ObjectDispatch, ObjectMetadata, Options,
    ReadHandler, ReadOverride, SaveHandler, SingleCellExperiment, StowageError, StowageResult,
    SummarizedExperiment, Vector,
};
use stowage_storage::{Completion, Group, OpenMode, Storage, Values};

const DENSE_ARRAY: &str = "dense_array";

#[derive(Debug)]
struct DenseMatrix {
    rows: usize,
    columns: usize,
}

impl ExternalObject for DenseMatrix {
    fn type_name(&self) -> &str {
        "dense matrix"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dimensions(&self) -> Option<Vec<usize>> {
        Some(vec![self.rows, self.columns])
    }
}

fn matrix(rows: usize, columns: usize) -> Object {
    Object::External(Arc::new(DenseMatrix { rows, columns }))
}

fn shape(object: &Object) -> Option<(usize, usize)> {
    object
        .as_external::<DenseMatrix>()
        .map(|m| (m.rows, m.columns))
}

struct DenseArrayReader;

#[async_trait::async_trait]
impl ReadHandler for DenseArrayReader {
    async fn read(
        &self,
        path: &str,
        _metadata: &ObjectMetadata,
        storage: &Storage,
        options: &Options,
        _dispatch: &dyn ObjectDispatch,
    ) -> StowageResult<Object> {
        let contents = storage
            .fs
            .get(
                &join_path([path, "array.h5"]),
                stowage_storage::GetOptions {
                    as_buffer: options.force_buffer,
                },
            )
            .await?;
        let dims = {
            let file = storage.container.open(&contents, OpenMode::ReadOnly).await?;
            let root = file.root()?;
            let data = root.open_group(DENSE_ARRAY)?.open_dataset("data")?;
            data.shape()?
        };
        storage.fs.clean(contents).await?;
        Ok(matrix(dims[0], dims[1]))
    }
}

struct DenseArraySaver;

#[async_trait::async_trait]
impl SaveHandler for DenseArraySaver {
    async fn save(
        &self,
        object: &Object,
        path: &str,
        storage: &Storage,
        _options: &Options,
        _dispatch: &dyn ObjectDispatch,
    ) -> StowageResult<()> {
        let dense = object
            .as_external::<DenseMatrix>()
            .ok_or_else(|| StowageError::InvalidObject("not a dense matrix".into()))?;
        storage.fs.mkdir(path).await?;
        write_object_file(path, &ObjectMetadata::new(DENSE_ARRAY, "1.0"), storage).await?;

        let container_path = join_path([path, "array.h5"]);
        let file = storage.container.create(&container_path).await?;
        {
            let root = file.root()?;
            root.create_group(DENSE_ARRAY)?.write_dataset(
                "data",
                Values::Float64(vec![0.0; dense.rows * dense.columns]),
                &[dense.rows, dense.columns],
            )?;
        }
        if let Some(bytes) = storage.container.finalize(file, Completion::Success).await? {
            storage.fs.write(&container_path, bytes).await?;
        }
        Ok(())
    }
}

fn dispatcher() -> Dispatcher {
    let dispatcher = Dispatcher::new();
    dispatcher.register_reader(DENSE_ARRAY, Arc::new(DenseArrayReader));
    dispatcher.register_saver(
        |object: &Object| object.as_external::<DenseMatrix>().is_some(),
        Arc::new(DenseArraySaver),
    );
    dispatcher
}

fn names(prefix: &str, n: usize) -> Option<Vec<String>> {
    Some((0..n).map(|i| format!("{}_{}", prefix, i)).collect())
}

fn experiment() -> SummarizedExperiment {
    let mut se = SummarizedExperiment::new(4, 3);
    se.assays.insert("counts".into(), matrix(4, 3));
    se.assays.insert("logcounts".into(), matrix(4, 3));
    se.row_data = DataFrame::new(4).with_column(
        "symbol",
        Arc::new(StringArray::from(vec!["A", "B", "C", "D"])) as ArrayRef,
    );
    se.column_data = DataFrame::new(3).with_column(
        "batch",
        Arc::new(Int32Array::from(vec![1, 1, 2])) as ArrayRef,
    );
    se.row_names = names("gene", 4);
    se.column_names = names("cell", 3);
    se.metadata = List::named(vec![(
        "lab",
        Object::Vector(Vector::scalar(Arc::new(StringArray::from(vec!["north"])))),
    )]);
    se
}

fn assert_same_experiment(decoded: &SummarizedExperiment, expected: &SummarizedExperiment) {
    assert_eq!(
        decoded.assays.keys().collect::<Vec<_>>(),
        expected.assays.keys().collect::<Vec<_>>()
    );
    for assay in decoded.assays.values() {
        assert_eq!(shape(assay), Some((expected.row_count(), expected.column_count())));
    }
    assert_eq!(decoded.row_data, expected.row_data);
    assert_eq!(decoded.column_data, expected.column_data);
    assert_eq!(decoded.row_names, expected.row_names);
    assert_eq!(decoded.column_names, expected.column_names);
    assert_eq!(decoded.metadata, expected.metadata);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn summarized_experiment_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Storage::local(dir.path());
    let dispatch = dispatcher();
    let se = experiment();

    dispatch
        .save_object(&Object::SummarizedExperiment(se.clone()), "se", &storage, &Options::default())
        .await?;
    assert!(dir.path().join("se/assays/names.json").is_file());
    assert!(dir.path().join("se/assays/1/array.h5").is_file());
    assert!(dir.path().join("se/row_data/basic_columns.h5").is_file());

    let envelope = read_object_file("se", &storage).await?;
    assert_eq!(envelope.object_type, "summarized_experiment");
    assert_eq!(
        envelope.field("summarized_experiment", "dimensions"),
        Some(&serde_json::json!([4, 3]))
    );

    let decoded = dispatch
        .read_object("se", None, &storage, &Options::default())
        .await?;
    let Object::SummarizedExperiment(decoded) = decoded else {
        anyhow::bail!("expected a summarized experiment");
    };
    assert_same_experiment(&decoded, &se);
    assert!(logs_contain("saved summarized experiment"));
    Ok(())
}

#[tokio::test]
async fn missing_annotations_read_as_empty_frames() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let dispatch = dispatcher();
    dispatch
        .save_object(
            &Object::SummarizedExperiment(SummarizedExperiment::new(5, 2)),
            "se",
            &storage,
            &Options::default(),
        )
        .await?;
    storage.fs.remove("se/row_data").await?;

    let decoded = dispatch
        .read_object("se", None, &storage, &Options::default())
        .await?;
    let se = decoded.as_summarized_experiment().expect("an experiment");
    assert_eq!((se.row_count(), se.column_count()), (5, 2));
    assert!(se.assays.is_empty());
    assert_eq!(se.row_names, None);
    Ok(())
}

struct ExtentReader;

#[async_trait::async_trait]
impl ComponentReader for ExtentReader {
    async fn read(&self, request: ComponentRequest<'_>) -> StowageResult<Object> {
        assert_eq!(request.metadata.object_type, DENSE_ARRAY);
        let (rows, columns) = request.extent;
        Ok(matrix(rows.unwrap_or(0), columns.unwrap_or(0)))
    }
}

#[tokio::test]
async fn component_overrides() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let dispatch = dispatcher();
    dispatch
        .save_object(&Object::SummarizedExperiment(experiment()), "se", &storage, &Options::default())
        .await?;

    let skipped = Options {
        read_assays: ReadOverride::Skip,
        read_experiment_metadata: ReadOverride::Skip,
        ..Options::default()
    };
    let decoded = dispatch.read_object("se", None, &storage, &skipped).await?;
    let se = decoded.as_summarized_experiment().expect("an experiment");
    assert!(se.assays.is_empty());
    assert!(se.metadata.is_empty());
    assert_eq!(se.row_names, names("gene", 4));

    // Assays decoded without the dense_array reader.
    let custom = Options {
        read_assays: ReadOverride::Custom(Arc::new(ExtentReader)),
        ..Options::default()
    };
    let decoded = Dispatcher::new()
        .read_object("se", None, &storage, &custom)
        .await?;
    let se = decoded.as_summarized_experiment().expect("an experiment");
    assert_eq!(shape(&se.assays["counts"]), Some((4, 3)));
    Ok(())
}

#[tokio::test]
async fn unknown_assay_types_fail_the_read() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    dispatcher()
        .save_object(&Object::SummarizedExperiment(experiment()), "se", &storage, &Options::default())
        .await?;

    let err = Dispatcher::new()
        .read_object("se", None, &storage, &Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::UnsupportedType { tag, .. } if tag == DENSE_ARRAY));
    Ok(())
}

#[tokio::test]
async fn mismatched_assays_are_rejected() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let mut se = experiment();
    se.assays.insert("wrong".into(), matrix(3, 4));

    let err = dispatcher()
        .save_object(&Object::SummarizedExperiment(se), "se", &storage, &Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::InvalidObject(_)));
    assert!(!storage.fs.exists("se").await?);
    Ok(())
}

#[tokio::test]
async fn single_cell_experiment_round_trip() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let dispatch = dispatcher();
    let mut sce = SingleCellExperiment::new(experiment());
    sce.reduced_dimensions.insert("PCA".into(), matrix(3, 2));
    sce.alternative_experiments
        .insert("spikes".into(), Object::SummarizedExperiment(SummarizedExperiment::new(2, 3)));
    sce.main_experiment_name = Some("rna".into());

    dispatch
        .save_object(&Object::SingleCellExperiment(sce), "sce", &storage, &Options::default())
        .await?;
    let envelope = read_object_file("sce", &storage).await?;
    assert_eq!(envelope.object_type, "single_cell_experiment");

    let decoded = dispatch
        .read_object("sce", None, &storage, &Options::default())
        .await?;
    let Object::SingleCellExperiment(decoded) = decoded else {
        anyhow::bail!("expected a single-cell experiment");
    };
    assert_same_experiment(&decoded.experiment, &experiment());
    assert_eq!(shape(&decoded.reduced_dimensions["PCA"]), Some((3, 2)));
    let spikes = decoded.alternative_experiments["spikes"]
        .as_summarized_experiment()
        .expect("an experiment");
    assert_eq!((spikes.row_count(), spikes.column_count()), (2, 3));
    assert_eq!(decoded.main_experiment_name.as_deref(), Some("rna"));
    Ok(())
}

#[tokio::test]
async fn reduced_dimensions_must_match_columns() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let mut sce = SingleCellExperiment::new(experiment());
    sce.reduced_dimensions.insert("UMAP".into(), matrix(4, 2));

    let err = dispatcher()
        .save_object(&Object::SingleCellExperiment(sce), "sce", &storage, &Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::InvalidObject(_)));
    Ok(())
}

#[tokio::test]
async fn duplicate_component_names_are_rejected() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let dispatch = dispatcher();
    dispatch
        .save_object(&Object::SummarizedExperiment(experiment()), "se", &storage, &Options::default())
        .await?;
    storage
        .fs
        .write("se/assays/names.json", Bytes::from_static(br#"["x","x"]"#))
        .await?;

    let err = dispatch
        .read_object("se", None, &storage, &Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::Format { .. }));
    Ok(())
}

/// Records which handler saved an object without writing anything.
struct Recorder {
    label: &'static str,
    seen: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait::async_trait]
impl SaveHandler for Recorder {
    async fn save(
        &self,
        _object: &Object,
        _path: &str,
        _storage: &Storage,
        _options: &Options,
        _dispatch: &dyn ObjectDispatch,
    ) -> StowageResult<()> {
        self.seen.lock().push(self.label);
        Ok(())
    }
}

#[derive(Debug)]
struct Opaque;

impl ExternalObject for Opaque {
    fn type_name(&self) -> &str {
        "opaque"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[tokio::test]
async fn later_savers_shadow_earlier_ones() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = |label| {
        Arc::new(Recorder {
            label,
            seen: seen.clone(),
        })
    };

    let dispatch = Dispatcher::new();
    dispatch.register_saver(|o: &Object| matches!(o, Object::External(_)), recorder("general"));
    dispatch.register_saver(
        |o: &Object| o.as_external::<DenseMatrix>().is_some(),
        recorder("specific"),
    );
    dispatch.register_saver(
        |o: &Object| o.as_summarized_experiment().is_some(),
        recorder("experiment"),
    );

    let options = Options::default();
    dispatch.save_object(&matrix(1, 1), "a", &storage, &options).await?;
    dispatch
        .save_object(&Object::External(Arc::new(Opaque)), "b", &storage, &options)
        .await?;
    let sce = SingleCellExperiment::new(SummarizedExperiment::new(0, 0));
    dispatch
        .save_object(&Object::SingleCellExperiment(sce), "c", &storage, &options)
        .await?;

    assert_eq!(*seen.lock(), vec!["specific", "general", "experiment"]);
    Ok(())
}

#[tokio::test]
async fn external_objects_need_a_handler() -> anyhow::Result<()> {
    let storage = Storage::in_memory();
    let err = Dispatcher::new()
        .save_object(&Object::External(Arc::new(Opaque)), "x", &storage, &Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::UnsupportedType { tag, .. } if tag == "opaque"));
    Ok(())
}
