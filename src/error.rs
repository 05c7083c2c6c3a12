use std::io;

/// Invalid shift parameters or missing environment credentials.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("gas price must be positive, got {0}")]
    NonPositiveGasPrice(f64),
    #[error("{0} not set in .env")]
    MissingEnv(&'static str),
}

/// Failures of the image-recognition collaborator.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("File not found. Browse to select again.")]
    FileNotFound,
    #[error("Could not read image file: {0}")]
    Io(#[source] io::Error),
    #[error("Check your internet connection and try again.")]
    Connection(#[source] reqwest::Error),
    #[error("Network error.")]
    Transport(#[source] reqwest::Error),
    #[error("Recognition failed ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Empty response from API")]
    EmptyResponse,
    #[error("Model response is not valid JSON: {0}")]
    MalformedResponse(String),
    #[error("Failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
}

/// Per-category extraction failures. Fatal to that one source file only;
/// the rest of the batch keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unknown category label: {0}")]
    UnknownCategory(String),
    #[error("category {category} cannot be extracted from this source kind")]
    UnsupportedSource { category: &'static str },
    #[error("field '{field}' missing from {category} recognition result")]
    MissingField {
        category: &'static str,
        field: &'static str,
    },
    #[error("Could not open table file: {0}")]
    Table(String),
    #[error("column '{0}' not found in table")]
    MissingColumn(String),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("worker thread failed: {0}")]
    Worker(String),
}

/// Batch-fatal workbook failures. Validation errors abort the whole batch
/// before any write; persistence errors carry the operator-facing message.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Sheet '{0}' not found in workbook")]
    UnknownSheet(String),
    #[error("invalid update instruction: {0}")]
    InvalidInstruction(String),
    #[error("workbook is not open")]
    WorkbookClosed,
    #[error("{0}")]
    Persistence(String),
}
