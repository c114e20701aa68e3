use std::{fmt, sync::Arc};

use stowage_config::{StringEncoding, CONFIG};
use stowage_storage::Storage;

use crate::{
    dispatch::ObjectDispatch, error::StowageResult, metadata::ObjectMetadata, object::Object,
};

/// Everything a custom component reader gets to decode one component.
pub struct ComponentRequest<'a> {
    pub path: &'a str,
    pub metadata: &'a ObjectMetadata,
    /// Expected `(rows, columns)` of the component; `None` where unconstrained.
    pub extent: (Option<usize>, Option<usize>),
    pub storage: &'a Storage,
    pub options: &'a Options,
    pub dispatch: &'a dyn ObjectDispatch,
}

/// Replaces the dispatcher for one kind of experiment component.
#[async_trait::async_trait]
pub trait ComponentReader: Send + Sync {
    async fn read(&self, request: ComponentRequest<'_>) -> StowageResult<Object>;
}

#[derive(Clone, Default)]
pub enum ReadOverride {
    /// Read through the dispatcher.
    #[default]
    Default,
    /// Leave the component out of the decoded object.
    Skip,
    Custom(Arc<dyn ComponentReader>),
}

impl fmt::Debug for ReadOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOverride::Default => write!(f, "Default"),
            ReadOverride::Skip => write!(f, "Skip"),
            ReadOverride::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Per-call settings shared by all codecs.
#[derive(Debug, Clone)]
pub struct Options {
    /// Retrieve containers as byte buffers instead of local paths.
    pub force_buffer: bool,
    pub string_encoding: StringEncoding,
    pub data_frame_read_metadata: bool,
    pub read_assays: ReadOverride,
    pub read_experiment_metadata: ReadOverride,
    pub read_reduced_dimensions: ReadOverride,
    pub read_alternative_experiments: ReadOverride,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            force_buffer: CONFIG.force_buffer,
            string_encoding: CONFIG.string_encoding,
            data_frame_read_metadata: true,
            read_assays: ReadOverride::Default,
            read_experiment_metadata: ReadOverride::Default,
            read_reduced_dimensions: ReadOverride::Default,
            read_alternative_experiments: ReadOverride::Default,
        }
    }
}

impl Options {
    pub fn with_string_encoding(mut self, encoding: StringEncoding) -> Self {
        self.string_encoding = encoding;
        self
    }

    pub fn with_force_buffer(mut self, force_buffer: bool) -> Self {
        self.force_buffer = force_buffer;
        self
    }
}
