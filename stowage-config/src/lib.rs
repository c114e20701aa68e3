use std::{fmt::Display, path::PathBuf, str::FromStr};

use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "STOWAGE_LOG_LEVEL", default = "info")]
    pub log_level: String,
    /// Retrieve containers as in-memory buffers instead of local paths.
    #[envconfig(from = "STOWAGE_FORCE_BUFFER", default = "false")]
    pub force_buffer: bool,
    #[envconfig(from = "STOWAGE_STRING_ENCODING", default = "fixed")]
    pub string_encoding: StringEncoding,
    #[envconfig(from = "STOWAGE_DATA_DIR", default = "./data")]
    pub data_dir: PathBuf,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
    /// Root directory of the default local filesystem backend.
    pub static ref DATA_DIR: PathBuf = CONFIG.data_dir.clone();
}

/// How string columns of a data frame are laid out in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEncoding {
    /// Always a plain string dataset.
    #[default]
    Fixed,
    /// Switch to the variable-length heap layout when padding would waste space.
    Auto,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid string encoding '{0}', expected 'fixed' or 'auto'")]
pub struct ParseStringEncodingError(String);

impl FromStr for StringEncoding {
    type Err = ParseStringEncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(StringEncoding::Fixed),
            "auto" => Ok(StringEncoding::Auto),
            _ => Err(ParseStringEncodingError(s.to_string())),
        }
    }
}

impl Display for StringEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StringEncoding::Fixed => write!(f, "fixed"),
            StringEncoding::Auto => write!(f, "auto"),
        }
    }
}
