use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::FileId;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("{0}")]
    Validation(String),

    #[error("cached file not found: {0}")]
    NotFound(FileId),

    #[error("cannot decode uploaded file: {0}")]
    Decode(String),

    #[error("not a valid campaign file: {0}")]
    CorruptFile(String),

    #[error("campaign is already being processed")]
    Busy,

    #[error("no free cache id below {ceiling}; clear the cache directory")]
    IdSpaceExhausted { ceiling: u32 },

    #[error("chromatogram not found in campaign: {0}")]
    ChromatogramNotFound(usize),

    #[error("cannot read chromatogram data from {name}: {message}")]
    DataFormat { name: String, message: String },

    #[error("analysis failed: {0}")]
    Engine(String),

    #[error("background worker failed: {0}")]
    Worker(String),

    #[error("failed to parse processing settings: {0}")]
    SettingsParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
