use stowage_storage::StorageError;

pub type StowageResult<T> = Result<T, StowageError>;

#[derive(thiserror::Error, Debug)]
pub enum StowageError {
    #[error("Type '{tag}' is not supported (at '{path}')")]
    UnsupportedType { tag: String, path: String },
    #[error("Unknown type '{column_type}' in column '{column}' of a data frame at '{path}'")]
    UnsupportedColumnType {
        column: String,
        column_type: String,
        path: String,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Invalid OBJECT metadata at '{path}': {reason}")]
    InvalidMetadata { path: String, reason: String },
    #[error("Invalid contents at '{path}': {reason}")]
    Format { path: String, reason: String },
    #[error("Invalid object: {0}")]
    InvalidObject(String),
    #[error("No unused placeholder left for {0} values")]
    PlaceholderExhausted(String),
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl StowageError {
    pub(crate) fn format<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        StowageError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
