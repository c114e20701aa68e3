pub type StorageResult<T> = Result<T, StorageError>;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Path not found: {0}")]
    NotFound(String),
    #[error("No child named '{name}' in group '{parent}'")]
    NoSuchChild { parent: String, name: String },
    #[error("No attribute named '{name}' on '{object}'")]
    NoSuchAttribute { object: String, name: String },
    #[error("'{0}' is not a group")]
    NotAGroup(String),
    #[error("'{0}' is not a dataset")]
    NotADataSet(String),
    #[error("Container opened read-only, cannot modify '{0}'")]
    ReadOnly(String),
    #[error("'{0}' already exists")]
    AlreadyExists(String),
    #[error("Shape {shape:?} of '{location}' does not hold {len} values")]
    InvalidShape {
        location: String,
        shape: Vec<usize>,
        len: usize,
    },
    #[error("Corrupt container: {0}")]
    Corrupt(String),
    #[error("Failed to (de)serialize container: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Blocking storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub(crate) fn from_io(err: std::io::Error, path: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    pub(crate) fn from_object_store(err: object_store::Error, path: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
            other => StorageError::ObjectStore(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
