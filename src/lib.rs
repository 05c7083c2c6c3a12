//! Gas-station shift accounting: receipts and exported tables in, formatted
//! Excel workbook updates out.

pub mod config;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod parse;
pub mod session;
pub mod tables;
pub mod types;
pub mod vision;

pub use config::{ShiftConfig, VisionSettings};
pub use engine::WorkbookEngine;
pub use error::{ConfigError, ExtractionError, UpdateError, VisionError};
pub use extractors::{Category, ExtractionOutcome};
pub use session::{BatchOutcome, BatchReport, ShiftSession, SourceFile, SourceReport, SourceStatus};
pub use types::{ColumnRef, RawExtractionResult, Section, UpdateInstruction};
pub use vision::{VisionClient, VisionExtractor};
