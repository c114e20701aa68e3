//! Codec for `data_frame` directories.
//!
//! ```text
//! P/OBJECT               {"type":"data_frame","data_frame":{"version":"1.1"}}
//! P/basic_columns.h5     group data_frame { row-count, column_names, row_names?, data/<i> }
//! P/other_columns/<i>    delegated columns
//! P/other_annotations    optional metadata list
//! ```

mod decode;
mod encode;

pub use decode::read_data_frame;
pub use encode::save_data_frame;

pub const DATA_FRAME: &str = "data_frame";
pub const DATA_FRAME_VERSION: &str = "1.1";

const CONTAINER_FILE: &str = "basic_columns.h5";
const GROUP: &str = "data_frame";
const DATA_GROUP: &str = "data";
const ROW_COUNT: &str = "row-count";
const COLUMN_NAMES: &str = "column_names";
const ROW_NAMES: &str = "row_names";
const TYPE: &str = "type";
const OTHER_COLUMNS: &str = "other_columns";
const OTHER_ANNOTATIONS: &str = "other_annotations";

const INTEGER: &str = "integer";
const NUMBER: &str = "number";
const BOOLEAN: &str = "boolean";
const STRING: &str = "string";
const FACTOR: &str = "factor";
const VLS: &str = "vls";
