//! Batch run over all uploaded sources: extract in parallel, join every
//! worker, then apply the collected instructions once and save once.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ShiftConfig;
use crate::engine::WorkbookEngine;
use crate::error::{ExtractionError, UpdateError};
use crate::extractors::{self, Category, ExtractionOutcome};
use crate::types::{ProcessedValues, UpdateInstruction};
use crate::vision::VisionExtractor;

/// Sources processed at the same time.
const CONCURRENCY: usize = 5;

/// One uploaded source file with its category.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub category: Category,
    pub path: PathBuf,
}

/// Per-source lifecycle status, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceStatus {
    Uploaded,
    Processing,
    Done,
    Error(String),
}

/// Outcome of one source after the batch ran.
#[derive(Debug, Serialize)]
pub struct SourceReport {
    pub category: &'static str,
    pub status: SourceStatus,
    pub processed: ProcessedValues,
}

/// What happened to the batch as a whole after all extraction finished.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Updates applied and the workbook saved.
    Saved { applied: usize },
    /// Updates applied in memory but the save failed; retry with
    /// [`ShiftSession::retry_save`] once the conflicting program is closed.
    SaveFailed { applied: usize, error: UpdateError },
    /// The batch failed validation; nothing was written. The collected
    /// instructions are returned so extraction need not be redone.
    ApplyFailed {
        error: UpdateError,
        pending: Vec<UpdateInstruction>,
    },
    /// No instructions were produced (e.g. every source failed).
    Empty,
}

#[derive(Debug)]
pub struct BatchReport {
    pub sources: Vec<SourceReport>,
    pub outcome: BatchOutcome,
}

/// One operator session: the shift parameters, the open workbook, and the
/// recognition collaborator.
pub struct ShiftSession {
    engine: Arc<WorkbookEngine>,
    config: ShiftConfig,
    vision: Arc<dyn VisionExtractor>,
}

impl ShiftSession {
    pub fn new(
        engine: Arc<WorkbookEngine>,
        config: ShiftConfig,
        vision: Arc<dyn VisionExtractor>,
    ) -> Self {
        Self {
            engine,
            config,
            vision,
        }
    }

    pub fn engine(&self) -> &Arc<WorkbookEngine> {
        &self.engine
    }

    pub fn config(&self) -> &ShiftConfig {
        &self.config
    }

    /// Operator edits to date/time/price between runs.
    pub fn config_mut(&mut self) -> &mut ShiftConfig {
        &mut self.config
    }

    /// Process every uploaded source, then apply all collected instructions
    /// in one call and save in one call. A failed source is reported and
    /// contributes zero instructions; it never blocks the batch join.
    pub fn run_batch(&self, sources: &[SourceFile]) -> BatchReport {
        let mut reports = Vec::with_capacity(sources.len());
        let mut pending: Vec<UpdateInstruction> = Vec::new();

        for chunk in sources.chunks(CONCURRENCY) {
            let handles: Vec<_> = chunk
                .iter()
                .map(|source| {
                    let source = source.clone();
                    let config = self.config.clone();
                    let vision = Arc::clone(&self.vision);
                    thread::spawn(move || process_source(&source, &config, vision.as_ref()))
                })
                .collect();

            // Joining every handle before the next chunk doubles as the
            // batch barrier: apply cannot start with workers in flight.
            for (source, handle) in chunk.iter().zip(handles) {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(ExtractionError::Worker(format!(
                        "extraction worker for {} panicked",
                        source.category.label()
                    )))
                });
                reports.push(match result {
                    Ok(outcome) => {
                        pending.extend(outcome.updates);
                        SourceReport {
                            category: source.category.label(),
                            status: SourceStatus::Done,
                            processed: outcome.processed,
                        }
                    }
                    Err(e) => {
                        warn!(
                            category = source.category.label(),
                            error = %e,
                            "source extraction failed"
                        );
                        SourceReport {
                            category: source.category.label(),
                            status: SourceStatus::Error(e.to_string()),
                            processed: ProcessedValues::new(),
                        }
                    }
                });
            }
        }

        let outcome = if pending.is_empty() {
            BatchOutcome::Empty
        } else {
            info!(count = pending.len(), "applying pending updates");
            match self.engine.apply_updates(&pending) {
                Err(error) => BatchOutcome::ApplyFailed { error, pending },
                Ok(()) => match self.engine.save_workbook() {
                    Ok(()) => BatchOutcome::Saved {
                        applied: pending.len(),
                    },
                    Err(error) => BatchOutcome::SaveFailed {
                        applied: pending.len(),
                        error,
                    },
                },
            }
        };

        BatchReport {
            sources: reports,
            outcome,
        }
    }

    /// Retry persisting after a [`BatchOutcome::SaveFailed`]; the applied
    /// updates are still in the in-memory document.
    pub fn retry_save(&self) -> Result<(), UpdateError> {
        self.engine.save_workbook()
    }
}

fn process_source(
    source: &SourceFile,
    config: &ShiftConfig,
    vision: &dyn VisionExtractor,
) -> Result<ExtractionOutcome, ExtractionError> {
    if source.category.is_table() {
        extractors::extract_table(source.category, &source.path, config)
    } else {
        let raw = vision.extract(&source.path, source.category)?;
        extractors::extract_receipt(source.category, &raw, config)
    }
}
