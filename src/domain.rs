use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u32);

impl FileId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| KiraError::Validation(format!("invalid cached file id: {value}")))
    }
}

/// A file uploaded into the cache directory. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub id: FileId,
    pub original_name: String,
    pub cached_path: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    Idle,
    Processing,
    DataReady,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingState::Idle => write!(f, "IDLE"),
            ProcessingState::Processing => write!(f, "PROCESSING"),
            ProcessingState::DataReady => write!(f, "DATA_READY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Status of the background campaign processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub state: ProcessingState,
    pub message: String,
    pub severity: Severity,
}

impl ProcessingStatus {
    pub fn idle() -> Self {
        Self {
            state: ProcessingState::Idle,
            message: String::new(),
            severity: Severity::Info,
        }
    }

    pub fn processing() -> Self {
        Self {
            state: ProcessingState::Processing,
            message: "The data is being processed, please wait...".to_string(),
            severity: Severity::Warn,
        }
    }

    pub fn data_ready(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            state: ProcessingState::DataReady,
            message: message.into(),
            severity,
        }
    }

    /// The same message, consumed: state goes back to idle.
    pub fn acknowledged(&self) -> Self {
        Self {
            state: ProcessingState::Idle,
            message: self.message.clone(),
            severity: self.severity,
        }
    }
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// Outcome of a background run, handed out once by `poll`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionNotice {
    pub message: String,
    pub severity: Severity,
}

/// One row of the editable sample table.
///
/// `chromatogram_id` set means the row re-annotates a chromatogram that is
/// already in the campaign; `None` means a freshly uploaded sample that still
/// has to be loaded from the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub chromatogram_id: Option<usize>,
    #[serde(default)]
    pub sample_file_id: Option<FileId>,
    #[serde(default)]
    pub blank_file_id: Option<FileId>,
    pub name: String,
    #[serde(default)]
    pub sample: String,
    #[serde(default)]
    pub blank: Option<String>,
    #[serde(default)]
    pub compound_name: Option<String>,
    #[serde(default)]
    pub compound_conc: Option<String>,
    #[serde(default)]
    pub istd_conc: Option<String>,
}

impl TableRow {
    pub fn compound_name(&self) -> Option<&str> {
        non_empty(self.compound_name.as_deref())
    }

    pub fn compound_conc(&self) -> Option<&str> {
        non_empty(self.compound_conc.as_deref())
    }

    pub fn istd_conc(&self) -> Option<&str> {
        non_empty(self.istd_conc.as_deref())
    }
}

/// The sample table together with the internal standard compound name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadTable {
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub istd: Option<String>,
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
