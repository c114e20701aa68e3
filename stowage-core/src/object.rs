//! In-memory objects handled by the dispatcher.

use std::{any::Any, fmt::Debug, sync::Arc};

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use indexmap::IndexMap;

use crate::error::{StowageError, StowageResult};

/// Caller-defined object persisted through a registered extension handler.
pub trait ExternalObject: Debug + Send + Sync {
    /// Short description of the object's kind, used in error messages.
    fn type_name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
    /// Extents of the object, when it has any (e.g. `[rows, columns]` for a matrix).
    fn dimensions(&self) -> Option<Vec<usize>> {
        None
    }
}

#[derive(Debug, Clone)]
pub enum Object {
    DataFrame(DataFrame),
    List(List),
    Vector(Vector),
    Nothing,
    SummarizedExperiment(SummarizedExperiment),
    SingleCellExperiment(SingleCellExperiment),
    External(Arc<dyn ExternalObject>),
}

impl Object {
    /// Description of the runtime kind, as reported by `UnsupportedType`.
    pub fn kind(&self) -> String {
        match self {
            Object::DataFrame(_) => "data_frame".to_string(),
            Object::List(_) => "simple_list".to_string(),
            Object::Vector(vector) => format!("{} vector", vector.data().data_type()),
            Object::Nothing => "nothing".to_string(),
            Object::SummarizedExperiment(_) => "summarized_experiment".to_string(),
            Object::SingleCellExperiment(_) => "single_cell_experiment".to_string(),
            Object::External(external) => external.type_name().to_string(),
        }
    }

    /// Number of rows (or elements) when the object has a length along its first axis.
    pub fn length(&self) -> Option<usize> {
        match self {
            Object::DataFrame(frame) => Some(frame.row_count()),
            Object::List(list) => Some(list.len()),
            Object::Vector(vector) => Some(vector.len()),
            Object::Nothing => Some(0),
            Object::SummarizedExperiment(se) => Some(se.row_count()),
            Object::SingleCellExperiment(sce) => Some(sce.experiment.row_count()),
            Object::External(external) => external
                .dimensions()
                .and_then(|dims| dims.first().copied()),
        }
    }

    /// The summarized-experiment view of the object. Single-cell experiments
    /// expose their base experiment.
    pub fn as_summarized_experiment(&self) -> Option<&SummarizedExperiment> {
        match self {
            Object::SummarizedExperiment(se) => Some(se),
            Object::SingleCellExperiment(sce) => Some(&sce.experiment),
            _ => None,
        }
    }

    pub fn as_data_frame(&self) -> Option<&DataFrame> {
        match self {
            Object::DataFrame(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Object::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_external<T: 'static>(&self) -> Option<&T> {
        match self {
            Object::External(external) => external.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::DataFrame(a), Object::DataFrame(b)) => a == b,
            (Object::List(a), Object::List(b)) => a == b,
            (Object::Vector(a), Object::Vector(b)) => a == b,
            (Object::Nothing, Object::Nothing) => true,
            (Object::SummarizedExperiment(a), Object::SummarizedExperiment(b)) => a == b,
            (Object::SingleCellExperiment(a), Object::SingleCellExperiment(b)) => a == b,
            (Object::External(a), Object::External(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! object_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Object {
                fn from(value: $ty) -> Self {
                    Object::$variant(value)
                }
            }
        )*
    };
}

object_from!(
    DataFrame => DataFrame,
    List => List,
    Vector => Vector,
    SummarizedExperiment => SummarizedExperiment,
    SingleCellExperiment => SingleCellExperiment,
);

/// One entry of a generic, possibly heterogeneous column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Box<Object>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<Value> for Object {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Object::Nothing,
            Value::Integer(v) => Vector::scalar(Arc::new(Int64Array::from(vec![v]))).into(),
            Value::Number(v) => Vector::scalar(Arc::new(Float64Array::from(vec![v]))).into(),
            Value::Boolean(v) => Vector::scalar(Arc::new(BooleanArray::from(vec![v]))).into(),
            Value::String(v) => Vector::scalar(Arc::new(StringArray::from(vec![v]))).into(),
            Value::Object(object) => *object,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Typed array; null slots are missing values.
    Array(ArrayRef),
    /// Generic sequence whose type is inferred on save.
    Values(Vec<Value>),
    /// Stored as an independent object next to the frame.
    Object(Object),
}

impl Column {
    pub fn len(&self) -> Option<usize> {
        match self {
            Column::Array(array) => Some(array.len()),
            Column::Values(values) => Some(values.len()),
            Column::Object(object) => object.length(),
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Column::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Column::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl From<ArrayRef> for Column {
    fn from(array: ArrayRef) -> Self {
        Column::Array(array)
    }
}

impl From<Vec<Value>> for Column {
    fn from(values: Vec<Value>) -> Self {
        Column::Values(values)
    }
}

impl From<Object> for Column {
    fn from(object: Object) -> Self {
        Column::Object(object)
    }
}

/// Tabular object: named columns of equal length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataFrame {
    row_count: usize,
    column_names: Vec<String>,
    columns: Vec<Column>,
    row_names: Option<Vec<String>>,
    metadata: List,
}

impl DataFrame {
    pub fn new(row_count: usize) -> Self {
        Self {
            row_count,
            ..Default::default()
        }
    }

    pub fn with_column<N: Into<String>, C: Into<Column>>(mut self, name: N, column: C) -> Self {
        self.push_column(name, column);
        self
    }

    pub fn with_row_names(mut self, row_names: Option<Vec<String>>) -> Self {
        self.row_names = row_names;
        self
    }

    pub fn with_metadata(mut self, metadata: List) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn push_column<N: Into<String>, C: Into<Column>>(&mut self, name: N, column: C) {
        self.column_names.push(name.into());
        self.columns.push(column.into());
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// First column with the given name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    pub fn row_names(&self) -> Option<&[String]> {
        self.row_names.as_deref()
    }

    pub fn set_row_names(&mut self, row_names: Option<Vec<String>>) {
        self.row_names = row_names;
    }

    pub fn metadata(&self) -> &List {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: List) {
        self.metadata = metadata;
    }

    /// Checks that every column and the row names span `row_count` rows.
    pub fn validate(&self) -> StowageResult<()> {
        if self.column_names.len() != self.columns.len() {
            return Err(StowageError::InvalidObject(format!(
                "data frame has {} column names for {} columns",
                self.column_names.len(),
                self.columns.len()
            )));
        }
        for (name, column) in self.column_names.iter().zip(&self.columns) {
            if let Some(len) = column.len() {
                if len != self.row_count {
                    return Err(StowageError::InvalidObject(format!(
                        "column '{}' has length {} but the data frame has {} rows",
                        name, len, self.row_count
                    )));
                }
            }
        }
        if let Some(row_names) = &self.row_names {
            if row_names.len() != self.row_count {
                return Err(StowageError::InvalidObject(format!(
                    "{} row names for {} rows",
                    row_names.len(),
                    self.row_count
                )));
            }
        }
        Ok(())
    }
}

/// Ordered, optionally named collection of arbitrary objects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    pub values: Vec<Object>,
    pub names: Option<Vec<String>>,
}

impl List {
    pub fn new(values: Vec<Object>) -> Self {
        Self {
            values,
            names: None,
        }
    }

    pub fn named<N: Into<String>>(entries: Vec<(N, Object)>) -> Self {
        let (names, values) = entries
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .unzip();
        Self {
            values,
            names: Some(names),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Object> {
        let names = self.names.as_ref()?;
        names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
    }
}

/// Atomic vector: a typed array with optional element names.
#[derive(Debug, Clone)]
pub struct Vector {
    data: ArrayRef,
    names: Option<Vec<String>>,
    scalar: bool,
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        &self.data == &other.data && self.names == other.names && self.scalar == other.scalar
    }
}

impl Vector {
    pub fn new(data: ArrayRef) -> Self {
        Self {
            data,
            names: None,
            scalar: false,
        }
    }

    /// A length-one vector that is stored as a bare scalar where the format allows it.
    pub fn scalar(data: ArrayRef) -> Self {
        Self {
            scalar: data.len() == 1,
            data,
            names: None,
        }
    }

    pub fn with_names(mut self, names: Option<Vec<String>>) -> Self {
        self.names = names;
        self
    }

    pub fn data(&self) -> &ArrayRef {
        &self.data
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Assays over a grid of rows (features) and columns (samples) with
/// per-row and per-column annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedExperiment {
    pub assays: IndexMap<String, Object>,
    pub row_data: DataFrame,
    pub column_data: DataFrame,
    pub row_names: Option<Vec<String>>,
    pub column_names: Option<Vec<String>>,
    pub metadata: List,
}

impl SummarizedExperiment {
    pub fn new(row_count: usize, column_count: usize) -> Self {
        Self {
            assays: IndexMap::new(),
            row_data: DataFrame::new(row_count),
            column_data: DataFrame::new(column_count),
            row_names: None,
            column_names: None,
            metadata: List::default(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_data.row_count()
    }

    pub fn column_count(&self) -> usize {
        self.column_data.row_count()
    }

    pub fn validate(&self) -> StowageResult<()> {
        let (rows, columns) = (self.row_count(), self.column_count());
        for (name, assay) in &self.assays {
            if let Object::External(external) = assay {
                if let Some(dims) = external.dimensions() {
                    if dims.len() < 2 || dims[0] != rows || dims[1] != columns {
                        return Err(StowageError::InvalidObject(format!(
                            "assay '{}' has dimensions {:?}, expected [{}, {}]",
                            name, dims, rows, columns
                        )));
                    }
                }
            }
        }
        check_names("row", self.row_names.as_deref(), rows)?;
        check_names("column", self.column_names.as_deref(), columns)?;
        self.row_data.validate()?;
        self.column_data.validate()
    }
}

fn check_names(axis: &str, names: Option<&[String]>, expected: usize) -> StowageResult<()> {
    match names {
        Some(names) if names.len() != expected => Err(StowageError::InvalidObject(format!(
            "{} {} names for {} {}s",
            names.len(),
            axis,
            expected,
            axis
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleCellExperiment {
    pub experiment: SummarizedExperiment,
    pub reduced_dimensions: IndexMap<String, Object>,
    pub alternative_experiments: IndexMap<String, Object>,
    pub main_experiment_name: Option<String>,
}

impl SingleCellExperiment {
    pub fn new(experiment: SummarizedExperiment) -> Self {
        Self {
            experiment,
            reduced_dimensions: IndexMap::new(),
            alternative_experiments: IndexMap::new(),
            main_experiment_name: None,
        }
    }

    pub fn validate(&self) -> StowageResult<()> {
        self.experiment.validate()?;
        let columns = self.experiment.column_count();
        for (name, reduced) in &self.reduced_dimensions {
            if let Some(len) = reduced.length() {
                if len != columns {
                    return Err(StowageError::InvalidObject(format!(
                        "reduced dimension '{}' has {} rows, expected {}",
                        name, len, columns
                    )));
                }
            }
        }
        for (name, alternative) in &self.alternative_experiments {
            if let Some(se) = alternative.as_summarized_experiment() {
                if se.column_count() != columns {
                    return Err(StowageError::InvalidObject(format!(
                        "alternative experiment '{}' has {} columns, expected {}",
                        name,
                        se.column_count(),
                        columns
                    )));
                }
            }
        }
        Ok(())
    }
}
