//! Workbook update engine: validates and applies instruction batches against
//! the one live workbook handle, then persists it with formatting intact.
//!
//! Row location (section markers, day numbers) reads the document via
//! calamine; mutations go through edit-xlsx so existing styles survive. The
//! located columns are never written by any instruction, so the two views
//! cannot drift within a session.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use calamine::{open_workbook_auto, Data, Range, Reader};
use edit_xlsx::Write as XlsxWrite;
use regex::Regex;
use tracing::{info, warn};
use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::UpdateError;
use crate::tables::{cell_f64, cell_str};
use crate::types::{ColumnRef, Section, UpdateInstruction, ACCUMULATING_CELLS};

/// First 1-based row of section markers / pump rows on the pricing sheet.
const SECTION_SCAN_START: u32 = 3;
/// First 1-based row of day rows on the discount detail sheet.
const DATE_SCAN_START: u32 = 2;

/// Holds the single open workbook for a session. Producer threads share the
/// engine as `Arc<WorkbookEngine>`; every operation serializes on the inner
/// mutex, so writes to the document never interleave.
pub struct WorkbookEngine {
    inner: Mutex<EngineInner>,
}

struct EngineInner {
    workbook: Option<edit_xlsx::Workbook>,
    path: PathBuf,
}

impl WorkbookEngine {
    /// Open the workbook at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UpdateError> {
        let path = path.into();
        let workbook = load_workbook(&path)?;
        Ok(Self {
            inner: Mutex::new(EngineInner {
                workbook: Some(workbook),
                path,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind to a (possibly different) workbook file, replacing any open
    /// handle. Safe to call after [`WorkbookEngine::close_workbook`]; the
    /// fresh handle carries no stale scan state.
    pub fn open_workbook(&self, path: impl Into<PathBuf>) -> Result<(), UpdateError> {
        let path = path.into();
        let workbook = load_workbook(&path)?;
        let mut guard = self.lock();
        guard.workbook = Some(workbook);
        guard.path = path;
        info!(path = %guard.path.display(), "opened workbook");
        Ok(())
    }

    /// Reload the currently bound path, e.g. after a close forced by an
    /// external editor holding the file.
    pub fn reopen(&self) -> Result<(), UpdateError> {
        let mut guard = self.lock();
        let workbook = load_workbook(&guard.path)?;
        guard.workbook = Some(workbook);
        info!(path = %guard.path.display(), "reopened workbook");
        Ok(())
    }

    /// Drop the open handle. Subsequent applies fail until a reopen.
    pub fn close_workbook(&self) {
        let mut guard = self.lock();
        guard.workbook = None;
        info!("closed workbook");
    }

    pub fn is_open(&self) -> bool {
        self.lock().workbook.is_some()
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    /// Validate and apply one batch. Validation covers the whole batch
    /// before the first write, so a bad instruction never leaves a partial
    /// application. Lookup misses are warnings, not errors.
    pub fn apply_updates(&self, updates: &[UpdateInstruction]) -> Result<(), UpdateError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let workbook = inner.workbook.as_mut().ok_or(UpdateError::WorkbookClosed)?;

        for update in updates {
            validate(workbook, update)?;
        }

        let locator = RowLocator::scan(&inner.path, updates)?;

        // Running totals for the designated shared cells; the first write in
        // a batch replaces whatever the cell held before.
        let mut accumulated: HashMap<(String, u32, u32), f64> = HashMap::new();

        for update in updates {
            match update {
                UpdateInstruction::Cell {
                    sheet,
                    row,
                    column,
                    value,
                } => {
                    let value = accumulate(&mut accumulated, sheet, *row, column, *value)
                        .unwrap_or(*value);
                    write_number(workbook, sheet, *row, column, value)?;
                }
                UpdateInstruction::Categorical {
                    sheet,
                    section,
                    lookup_key,
                    column,
                    value,
                } => match locator.section_row(sheet, *section, lookup_key) {
                    Some(row) => write_number(workbook, sheet, row, column, *value)?,
                    None => warn!(
                        sheet = %sheet,
                        section = section.marker(),
                        lookup_key = %lookup_key,
                        "no row matches categorical lookup, skipping"
                    ),
                },
                UpdateInstruction::DateKeyed {
                    sheet,
                    date_day,
                    columns,
                } => match locator.date_row(sheet, *date_day) {
                    Some(row) => {
                        for (column, value) in columns {
                            write_number(workbook, sheet, row, column, *value)?;
                        }
                    }
                    None => warn!(
                        sheet = %sheet,
                        date_day = *date_day,
                        "date not found in sheet, skipping"
                    ),
                },
            }
        }

        info!(count = updates.len(), "applied update batch");
        Ok(())
    }

    /// Persist the in-memory document to its bound path. Locked-file and
    /// permission failures are fatal and user-visible; nothing is retried.
    pub fn save_workbook(&self) -> Result<(), UpdateError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let workbook = inner.workbook.as_mut().ok_or(UpdateError::WorkbookClosed)?;
        workbook.save_as(&inner.path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("Permission denied") || msg.contains("being used") {
                UpdateError::Persistence("Please close the file in Excel first.".to_string())
            } else {
                UpdateError::Persistence(format!("Cannot write to file: {msg}"))
            }
        })?;
        strip_drawings_from_xlsx(&inner.path)?;
        info!(path = %inner.path.display(), "saved workbook");
        Ok(())
    }
}

fn load_workbook(path: &Path) -> Result<edit_xlsx::Workbook, UpdateError> {
    if !path.exists() {
        return Err(UpdateError::Persistence(
            "File not found. Browse to select again.".to_string(),
        ));
    }
    edit_xlsx::Workbook::from_path(path).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("Could not open") || msg.contains("permission") || msg.contains("Permission")
        {
            UpdateError::Persistence("Please close the file in Excel first.".to_string())
        } else {
            UpdateError::Persistence(format!("Could not open Excel file: {msg}"))
        }
    })
}

fn validate(workbook: &edit_xlsx::Workbook, update: &UpdateInstruction) -> Result<(), UpdateError> {
    let sheet = update.sheet();
    if workbook.get_worksheet_by_name(sheet).is_err() {
        return Err(UpdateError::UnknownSheet(sheet.to_string()));
    }
    match update {
        UpdateInstruction::Cell { row, .. } if *row == 0 => Err(UpdateError::InvalidInstruction(
            "cell row must be 1-based".to_string(),
        )),
        UpdateInstruction::Categorical { lookup_key, .. }
            if normalize_machine_key(lookup_key).is_empty() =>
        {
            Err(UpdateError::InvalidInstruction(
                "categorical lookup key is empty".to_string(),
            ))
        }
        UpdateInstruction::DateKeyed { columns, .. } if columns.is_empty() => {
            Err(UpdateError::InvalidInstruction(
                "date-keyed update has no column values".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// Running-total bookkeeping for the shared cells; `None` means the cell is
/// ordinary and last-write-wins.
fn accumulate(
    totals: &mut HashMap<(String, u32, u32), f64>,
    sheet: &str,
    row: u32,
    column: &ColumnRef,
    value: f64,
) -> Option<f64> {
    let shared = ACCUMULATING_CELLS
        .iter()
        .any(|(s, r, c)| *s == sheet && *r == row && *c == column.as_str());
    if !shared {
        return None;
    }
    let entry = totals
        .entry((sheet.to_string(), row, column.index()))
        .or_insert(0.0);
    *entry += value;
    Some(*entry)
}

fn write_number(
    workbook: &mut edit_xlsx::Workbook,
    sheet: &str,
    row: u32,
    column: &ColumnRef,
    value: f64,
) -> Result<(), UpdateError> {
    let worksheet = workbook
        .get_worksheet_mut_by_name(sheet)
        .map_err(|_| UpdateError::UnknownSheet(sheet.to_string()))?;
    let cell_ref = format!("{}{}", column.as_str(), row);
    worksheet
        .write(&cell_ref, value)
        .map_err(|e| UpdateError::Persistence(format!("Cannot write to cell {cell_ref}: {e}")))?;
    Ok(())
}

/// Row index over the on-disk document for the sheets a batch looks rows up
/// in. Built once per apply call.
struct RowLocator {
    ranges: HashMap<String, Range<Data>>,
}

impl RowLocator {
    fn scan(path: &Path, updates: &[UpdateInstruction]) -> Result<Self, UpdateError> {
        let mut needed: Vec<&str> = updates
            .iter()
            .filter_map(|update| match update {
                UpdateInstruction::Categorical { sheet, .. }
                | UpdateInstruction::DateKeyed { sheet, .. } => Some(sheet.as_str()),
                UpdateInstruction::Cell { .. } => None,
            })
            .collect();
        needed.sort_unstable();
        needed.dedup();

        let mut ranges = HashMap::new();
        if needed.is_empty() {
            return Ok(Self { ranges });
        }
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| UpdateError::Persistence(format!("Could not open Excel file: {e}")))?;
        for sheet in needed {
            let range = workbook
                .worksheet_range(sheet)
                .map_err(|_| UpdateError::UnknownSheet(sheet.to_string()))?;
            ranges.insert(sheet.to_string(), range);
        }
        Ok(Self { ranges })
    }

    /// 1-based row of the first pump row matching the section and normalized
    /// key, or `None` on a lookup miss.
    fn section_row(&self, sheet: &str, section: Section, lookup_key: &str) -> Option<u32> {
        let range = self.ranges.get(sheet)?;
        let (end_row, _) = range.end()?;
        let rows = (SECTION_SCAN_START - 1..=end_row).map(|row| {
            (
                cell_str(range.get_value((row, 0))),
                cell_str(range.get_value((row, 1))),
            )
        });
        locate_section_row(rows, section, lookup_key)
            .map(|offset| SECTION_SCAN_START + offset as u32)
    }

    /// 1-based row whose day cell (column B) equals `date_day`.
    fn date_row(&self, sheet: &str, date_day: u32) -> Option<u32> {
        let range = self.ranges.get(sheet)?;
        let (end_row, _) = range.end()?;
        let days = (DATE_SCAN_START - 1..=end_row).map(|row| cell_f64(range.get_value((row, 1))));
        locate_date_row(days, date_day).map(|offset| DATE_SCAN_START + offset as u32)
    }
}

/// Fold over `(marker, key)` cells: a non-empty marker opens a section that
/// persists through unmarked rows; the first key match inside the wanted
/// section wins. Returns the 0-based offset into the iterator.
pub(crate) fn locate_section_row<I>(rows: I, section: Section, lookup_key: &str) -> Option<usize>
where
    I: IntoIterator<Item = (Option<String>, Option<String>)>,
{
    let want = normalize_machine_key(lookup_key);
    if want.is_empty() {
        return None;
    }
    let mut current: Option<String> = None;
    for (offset, (marker, key)) in rows.into_iter().enumerate() {
        if let Some(marker) = marker {
            let marker = marker.trim();
            if !marker.is_empty() {
                current = Some(marker.to_string());
            }
        }
        if current.as_deref() == Some(section.marker()) {
            if let Some(key) = key {
                if normalize_machine_key(&key) == want {
                    return Some(offset);
                }
            }
        }
    }
    None
}

/// Offset of the first row whose day cell equals `date_day`.
pub(crate) fn locate_date_row<I>(days: I, date_day: u32) -> Option<usize>
where
    I: IntoIterator<Item = Option<f64>>,
{
    days.into_iter()
        .position(|day| day == Some(f64::from(date_day)))
}

/// Machine labels normalize by trimming and dropping a trailing 号, so
/// "3号" and "3" refer to the same pump while "03" stays distinct.
pub(crate) fn normalize_machine_key(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_suffix('号').unwrap_or(name);
    name.trim().to_string()
}

/// Strip drawing and image parts from an xlsx (zip) file so Excel won't show
/// "Repairs to ... Removed Part: Drawing shape" when opening. Worksheet XML
/// (sheet1.xml etc.) is copied unchanged to avoid corrupting cell data.
fn strip_drawings_from_xlsx(path: &Path) -> Result<(), UpdateError> {
    let persist = UpdateError::Persistence;

    let file = File::open(path).map_err(|e| persist(format!("Could not open for strip: {e}")))?;
    let mut archive = ZipArchive::new(file).map_err(|e| persist(format!("Invalid zip: {e}")))?;

    let temp_path = path.with_extension("tmp.xlsx");
    let out_file =
        File::create(&temp_path).map_err(|e| persist(format!("Could not create temp: {e}")))?;
    let mut zip_writer = ZipWriter::new(out_file);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let rel_drawing_re = Regex::new(r#"<Relationship[^>]*drawing[^>]*/>"#).expect("rel drawing regex");
    let ct_drawing_re =
        Regex::new(r#"<Override\s+PartName="/xl/drawings/[^"]*"[^>]*/>"#).expect("ct drawing regex");
    let ct_media_re =
        Regex::new(r#"<Override\s+PartName="/xl/media/[^"]*"[^>]*/>"#).expect("ct media regex");

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| persist(format!("Entry {i}: {e}")))?;
        let name = entry.name().replace('\\', "/");
        if name.starts_with("xl/drawings/") || name.starts_with("xl/media/") {
            continue;
        }
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| persist(format!("Read {name}: {e}")))?;

        if name == "[Content_Types].xml" {
            let s = String::from_utf8_lossy(&data);
            let out = ct_drawing_re.replace_all(&s, "");
            let out = ct_media_re.replace_all(&out, "");
            zip_writer
                .start_file(name.as_str(), opts)
                .map_err(|e| persist(e.to_string()))?;
            zip_writer
                .write_all(out.as_bytes())
                .map_err(|e| persist(e.to_string()))?;
        } else if name.contains("worksheets/_rels/") && name.ends_with(".rels") {
            let s = String::from_utf8_lossy(&data);
            let out = rel_drawing_re.replace_all(&s, "");
            zip_writer
                .start_file(name.as_str(), opts)
                .map_err(|e| persist(e.to_string()))?;
            zip_writer
                .write_all(out.as_bytes())
                .map_err(|e| persist(e.to_string()))?;
        } else {
            zip_writer
                .start_file(name.as_str(), opts)
                .map_err(|e| persist(e.to_string()))?;
            zip_writer
                .write_all(&data)
                .map_err(|e| persist(e.to_string()))?;
        }
    }
    zip_writer.finish().map_err(|e| persist(e.to_string()))?;
    std::fs::rename(&temp_path, path).map_err(|e| persist(format!("Replace file: {e}")))?;
    Ok(())
}
